#[cfg(test)]
mod tests {
    use indoc::indoc;
    use lode::{
        ClassInfo, ColumnRef, Expr, Select, Value, VariableFactory, mysql_compile,
        postgres_compile, standard_compile,
    };
    use once_cell::sync::Lazy;
    use std::sync::Arc;

    static ANIMAL: Lazy<Arc<ClassInfo>> = Lazy::new(|| {
        ClassInfo::builder("Animal", "animal")
            .column("id", VariableFactory::int())
            .column("name", VariableFactory::text())
            .column("order", VariableFactory::int())
            .column("weight", VariableFactory::float())
            .primary(["id"])
            .build()
            .unwrap()
    });

    fn col(name: &str) -> ColumnRef {
        ANIMAL.column(name).unwrap()
    }

    fn sql(expr: &Expr) -> String {
        standard_compile().compile(expr).unwrap().text
    }

    #[test]
    fn comparison_binds_its_parameter() {
        let expr = Expr::from(col("id")).gt(5);
        let statement = standard_compile().compile(&expr).unwrap();
        assert_eq!(statement.text, "animal.id > ?");
        assert_eq!(statement.parameter_values().unwrap(), vec![Value::Int(5)]);
    }

    #[test]
    fn select_deduces_from_clause() {
        let select = Select {
            columns: vec![Expr::from(col("id")), Expr::from(col("name"))],
            where_clause: Some(Expr::from(col("weight")).ge(10.5)),
            ..Select::default()
        };
        assert_eq!(
            sql(&Expr::Select(Box::new(select))),
            "SELECT animal.id, animal.name FROM animal WHERE animal.weight >= ?",
        );
    }

    #[test]
    fn inner_operator_is_parenthesized() {
        let a = Expr::from(col("id")).eq(1);
        let b = Expr::from(col("id")).eq(2);
        let c = Expr::from(col("name")).eq("cat");
        assert_eq!(
            sql(&a.or(b).and(c)),
            "(animal.id = ? OR animal.id = ?) AND animal.name = ?",
        );
        let a = Expr::from(col("id")).eq(1);
        let b = Expr::from(col("id")).eq(2);
        let c = Expr::from(col("name")).eq("cat");
        // AND binds tighter; no parentheses needed the other way around.
        assert_eq!(
            sql(&a.and(b).or(c)),
            "animal.id = ? AND animal.id = ? OR animal.name = ?",
        );
    }

    #[test]
    fn null_comparisons_become_is_null() {
        let statement = standard_compile()
            .compile(&Expr::from(col("name")).eq(Value::Null))
            .unwrap();
        assert_eq!(statement.text, "animal.name IS NULL");
        assert!(statement.parameters.is_empty());
        assert_eq!(
            sql(&Expr::from(col("name")).ne(Value::Null)),
            "animal.name IS NOT NULL",
        );
    }

    #[test]
    fn in_list_keeps_single_parentheses() {
        let expr = Expr::from(col("id")).is_in(vec![1, 2, 3]);
        let statement = standard_compile().compile(&expr).unwrap();
        assert_eq!(statement.text, "animal.id IN (?, ?, ?)");
        assert_eq!(
            statement.parameter_values().unwrap(),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)],
        );
    }

    #[test]
    fn reserved_identifiers_are_quoted() {
        assert_eq!(
            sql(&Expr::from(col("order")).eq(1)),
            "animal.\"order\" = ?",
        );
    }

    #[test]
    fn arithmetic_respects_precedence() {
        let expr = (Expr::from(col("id")) + 1) * 2;
        assert_eq!(sql(&expr), "(animal.id + ?) * ?");
        let expr = Expr::from(col("id")) - (Expr::from(col("order")) - 1);
        // Subtraction is non-associative; the right side keeps its parens.
        assert_eq!(sql(&expr), "animal.id - (animal.\"order\" - ?)");
        let expr = (Expr::from(col("id")) - 1) - 2;
        assert_eq!(sql(&expr), "animal.id - ? - ?");
    }

    #[test]
    fn count_and_aggregates() {
        assert_eq!(sql(&Expr::count()), "COUNT(*)");
        assert_eq!(
            sql(&Expr::from(col("id")).count_of()),
            "COUNT(animal.id)",
        );
        assert_eq!(sql(&Expr::from(col("weight")).avg()), "AVG(animal.weight)");
    }

    #[test]
    fn order_by_directions() {
        let select = Select {
            columns: vec![Expr::from(col("id"))],
            order_by: vec![Expr::from(col("name")).asc(), Expr::from(col("id")).desc()],
            ..Select::default()
        };
        assert_eq!(
            sql(&Expr::Select(Box::new(select))),
            "SELECT animal.id FROM animal ORDER BY animal.name ASC, animal.id DESC",
        );
    }

    #[test]
    fn limit_and_offset() {
        let select = Select {
            columns: vec![Expr::from(col("id"))],
            limit: Some(10),
            offset: Some(20),
            ..Select::default()
        };
        assert_eq!(
            sql(&Expr::Select(Box::new(select))),
            "SELECT animal.id FROM animal LIMIT 10 OFFSET 20",
        );
    }

    #[test]
    fn subselect_in_where_is_parenthesized() {
        let inner = Select {
            columns: vec![Expr::from(col("id"))],
            where_clause: Some(Expr::from(col("weight")).lt(1)),
            ..Select::default()
        };
        let expr = Expr::from(col("id")).in_select(inner);
        assert_eq!(
            sql(&expr),
            "animal.id IN (SELECT animal.id FROM animal WHERE animal.weight < ?)",
        );
    }

    #[test]
    fn dialect_forks_do_not_leak_into_the_parent() {
        let expr = Expr::from(col("order")).eq(1);
        assert_eq!(
            mysql_compile().compile(&expr).unwrap().text,
            "animal.`order` = ?",
        );
        // The parent still quotes with double quotes.
        assert_eq!(sql(&expr), "animal.\"order\" = ?");
    }

    #[test]
    fn postgres_compiles_sequences() {
        let expr = Expr::Sequence("animal_id_seq".to_string());
        assert_eq!(
            postgres_compile().compile(&expr).unwrap().text,
            "nextval('animal_id_seq')",
        );
        assert!(standard_compile().compile(&expr).is_err());
    }

    #[test]
    fn raw_sql_passes_through_with_parameters() {
        let expr = Expr::Raw {
            sql: "lower(animal.name) = ?".to_string(),
            params: vec![Value::Text("cat".to_string())],
            tables: vec![Expr::Table("animal".to_string())],
        };
        let select = Select {
            columns: vec![Expr::from(col("id"))],
            where_clause: Some(expr),
            ..Select::default()
        };
        let statement = standard_compile()
            .compile(&Expr::Select(Box::new(select)))
            .unwrap();
        assert_eq!(
            statement.text,
            "SELECT animal.id FROM animal WHERE lower(animal.name) = ?",
        );
        assert_eq!(
            statement.parameter_values().unwrap(),
            vec![Value::Text("cat".to_string())],
        );
    }

    #[test]
    fn raw_statements_compile_verbatim() {
        let expr = Expr::Raw {
            sql: indoc! {"
                CREATE TABLE animal (
                    id INTEGER PRIMARY KEY,
                    name TEXT
                )"}
            .to_string(),
            params: Vec::new(),
            tables: Vec::new(),
        };
        let statement = standard_compile().compile(&expr).unwrap();
        assert_eq!(
            statement.text,
            indoc! {"
                CREATE TABLE animal (
                    id INTEGER PRIMARY KEY,
                    name TEXT
                )"},
        );
        assert!(statement.parameter_values().unwrap().is_empty());
    }
}
