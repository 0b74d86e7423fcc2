mod dialect;
mod eval;
mod state;

pub use dialect::*;
pub use eval::*;
pub use state::*;

use crate::{BinOp, Error, Expr, ExprKind, Result, Value, Variable, VariableFactory};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// Least binding possible; used when bumping the outer precedence so that
/// the next operand is parenthesized no matter what.
pub const MAX_PRECEDENCE: i32 = 10_000;

/// A compile handler: writes the SQL for one expression kind into `out`,
/// collecting parameters and auto tables in `state`. `compile` is the
/// dispatching (most derived) compiler, so recursion stays in the dialect.
pub type Handler = fn(&Compile, &mut State, &Expr, &mut String) -> Result<()>;

/// The result of compiling an expression: statement text with `?` markers
/// and the variables to bind, in order.
#[derive(Debug)]
pub struct Statement {
    pub text: String,
    pub parameters: Vec<Variable>,
}

impl Statement {
    /// Database-form values for the bound parameters.
    pub fn parameter_values(&self) -> Result<Vec<Value>> {
        self.parameters.iter().map(Variable::get_to_db).collect()
    }
}

/// Translates expression trees to SQL text. A dispatch table maps each
/// [`ExprKind`] to a handler; a dialect is a child compiler that shadows
/// individual handlers, precedences and reserved words while inheriting
/// the rest from its parent chain.
pub struct Compile {
    parent: Option<Arc<Compile>>,
    handlers: HashMap<ExprKind, Handler>,
    precedence: HashMap<ExprKind, i32>,
    /// Lowercased; `false` un-reserves a word inherited from the parent.
    reserved: HashMap<String, bool>,
}

impl Compile {
    /// An empty compiler knowing nothing. Dialects normally start from
    /// [`standard_compile`] instead.
    pub fn empty() -> Self {
        Self {
            parent: None,
            handlers: HashMap::new(),
            precedence: HashMap::new(),
            reserved: HashMap::new(),
        }
    }

    /// Fork this compiler. The child sees everything of the parent and
    /// can shadow it without affecting statements compiled by the parent.
    pub fn create_child(self: &Arc<Self>) -> Compile {
        Compile {
            parent: Some(self.clone()),
            handlers: HashMap::new(),
            precedence: HashMap::new(),
            reserved: HashMap::new(),
        }
    }

    /// Register `handler` for the given kinds.
    pub fn when(&mut self, kinds: &[ExprKind], handler: Handler) {
        for kind in kinds {
            self.handlers.insert(*kind, handler);
        }
    }

    pub fn set_precedence(&mut self, precedence: i32, kinds: &[ExprKind]) {
        for kind in kinds {
            self.precedence.insert(*kind, precedence);
        }
    }

    pub fn add_reserved_words<I, S>(&mut self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for word in words {
            self.reserved.insert(word.as_ref().to_lowercase(), true);
        }
    }

    pub fn remove_reserved_words<I, S>(&mut self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for word in words {
            self.reserved.insert(word.as_ref().to_lowercase(), false);
        }
    }

    pub fn is_reserved(&self, word: &str) -> bool {
        let word = word.to_lowercase();
        let mut current = Some(self);
        while let Some(compile) = current {
            if let Some(reserved) = compile.reserved.get(&word) {
                return *reserved;
            }
            current = compile.parent.as_deref();
        }
        false
    }

    fn handler(&self, kind: ExprKind) -> Result<Handler> {
        let mut current = Some(self);
        while let Some(compile) = current {
            if let Some(handler) = compile.handlers.get(&kind) {
                return Ok(*handler);
            }
            current = compile.parent.as_deref();
        }
        Err(Error::compile(format!(
            "don't know how to compile {kind:?}"
        )))
    }

    pub fn precedence(&self, kind: ExprKind) -> i32 {
        let mut current = Some(self);
        while let Some(compile) = current {
            if let Some(precedence) = compile.precedence.get(&kind) {
                return *precedence;
            }
            current = compile.parent.as_deref();
        }
        MAX_PRECEDENCE
    }

    /// Compile a whole statement or expression from a fresh state.
    pub fn compile(&self, expr: &Expr) -> Result<Statement> {
        let mut state = State::new();
        let mut text = String::new();
        self.compile_expr(&mut state, expr, &mut text)?;
        Ok(Statement {
            text,
            parameters: state.parameters,
        })
    }

    /// Compile one node, wrapping it in parentheses when it binds less
    /// tightly than its surroundings.
    pub fn compile_expr(&self, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
        let kind = expr.kind();
        let handler = self.handler(kind)?;
        let outer = state.precedence;
        let inner = self.precedence(kind);
        let parenthesize = inner < outer;
        state.precedence = inner;
        if parenthesize {
            out.push('(');
        }
        handler(self, state, expr, out)?;
        if parenthesize {
            out.push(')');
        }
        state.precedence = outer;
        Ok(())
    }

    pub fn compile_list(
        &self,
        state: &mut State,
        exprs: &[Expr],
        separator: &str,
        out: &mut String,
    ) -> Result<()> {
        let mut first = true;
        for expr in exprs {
            if !first {
                out.push_str(separator);
            }
            first = false;
            self.compile_expr(state, expr, out)?;
        }
        Ok(())
    }

    /// Emits the FROM content: explicit tables win, then the tables the
    /// compiled expressions mentioned, then the statement's defaults.
    /// Duplicates are dropped by compiled text. Returns None when there is
    /// nothing to select from.
    pub fn build_tables(
        &self,
        state: &mut State,
        tables: &[Expr],
        default_tables: &[Expr],
    ) -> Result<Option<String>> {
        let auto = std::mem::take(&mut state.auto_tables);
        let chosen: Vec<Expr> = if !tables.is_empty() {
            tables.to_vec()
        } else if !auto.is_empty() {
            auto
        } else if !default_tables.is_empty() {
            default_tables.to_vec()
        } else {
            return Ok(None);
        };
        state.push_context(Context::Table);
        let mut seen = HashSet::new();
        let mut out = String::new();
        for table in &chosen {
            let mut text = String::new();
            let before = state.parameters.len();
            self.compile_expr(state, table, &mut text)?;
            if !seen.insert(text.clone()) {
                // Duplicate table; drop any parameters it contributed.
                state.parameters.truncate(before);
                continue;
            }
            if !out.is_empty() {
                // A join without a left side rides on the previous entry.
                if matches!(table, Expr::Join(join) if join.left.is_none()) {
                    out.push(' ');
                } else {
                    out.push_str(", ");
                }
            }
            out.push_str(&text);
        }
        state.pop();
        Ok(Some(out))
    }

    /// Quote an identifier when it is reserved or not a plain word.
    pub fn write_token(&self, name: &str, out: &mut String) {
        if is_safe_token(name) && !self.is_reserved(name) {
            out.push_str(name);
        } else {
            out.push('"');
            let mut parts = name.split('"');
            if let Some(first) = parts.next() {
                out.push_str(first);
            }
            for part in parts {
                out.push_str("\"\"");
                out.push_str(part);
            }
            out.push('"');
        }
    }
}

fn is_safe_token(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// SQL-92 keywords plus the usual suspects. Dialects extend the list.
const RESERVED_WORDS: &[&str] = &[
    "all", "and", "any", "as", "asc", "between", "by", "case", "cast", "check", "collate",
    "column", "constraint", "create", "cross", "current_date", "current_time",
    "current_timestamp", "default", "delete", "desc", "distinct", "drop", "else", "end",
    "except", "exists", "foreign", "from", "full", "group", "having", "in", "inner", "insert",
    "intersect", "into", "is", "join", "key", "left", "like", "limit", "natural", "not",
    "null", "offset", "on", "or", "order", "outer", "primary", "references", "right",
    "select", "set", "table", "then", "to", "union", "unique", "update", "user", "using",
    "values", "when", "where", "with",
];

/// The dialect-neutral compiler with every default handler registered.
pub fn build_standard_compile() -> Compile {
    use ExprKind::*;
    let mut compile = Compile::empty();
    compile.add_reserved_words(RESERVED_WORDS);
    compile.when(&[Param], compile_param);
    compile.when(&[Raw], compile_raw);
    compile.when(&[Token], compile_token);
    compile.when(&[Column], compile_column);
    compile.when(&[Table], compile_table);
    compile.when(&[Alias], compile_alias);
    compile.when(&[AutoTables], compile_auto_tables);
    compile.when(&[Sequence], compile_sequence);
    compile.when(&[Row], compile_row);
    compile.when(&[Select], compile_select);
    compile.when(&[Insert], compile_insert);
    compile.when(&[Update], compile_update);
    compile.when(&[Delete], compile_delete);
    compile.when(&[Join], compile_join);
    compile.when(&[SetOp], compile_set_op);
    compile.when(&[And, Or], compile_and_or);
    compile.when(&[Not], compile_not);
    compile.when(&[Neg], compile_neg);
    compile.when(&[Exists], compile_exists);
    compile.when(
        &[Eq, Ne, Lt, Gt, Le, Ge, Add, Sub, Mul, Div, Mod, LShift, RShift],
        compile_bin,
    );
    compile.when(&[Like], compile_like);
    compile.when(&[In], compile_in);
    compile.when(&[Func], compile_func);
    compile.when(&[Count], compile_count);
    compile.when(&[Cast], compile_cast);
    compile.when(&[Asc], compile_asc);
    compile.when(&[Desc], compile_desc);

    compile.set_precedence(100, &[Select, Insert, Update, Delete, Join, SetOp]);
    compile.set_precedence(200, &[Raw]);
    compile.set_precedence(300, &[Or]);
    compile.set_precedence(400, &[And]);
    compile.set_precedence(450, &[Not]);
    compile.set_precedence(500, &[Eq, Ne, Lt, Gt, Le, Ge, Like, In]);
    compile.set_precedence(600, &[LShift, RShift]);
    compile.set_precedence(700, &[Add, Sub]);
    compile.set_precedence(800, &[Mul, Div, Mod]);
    compile.set_precedence(900, &[Neg]);
    compile
}

fn compile_param(_compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Param { factory, value } = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    state.parameters.push(factory.build_with(value.clone(), false)?);
    out.push('?');
    Ok(())
}

fn compile_raw(_compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Raw {
        sql,
        params,
        tables,
    } = expr
    else {
        return Err(Error::compile("handler got the wrong node"));
    };
    for param in params {
        state
            .parameters
            .push(VariableFactory::any().build_with(param.clone(), false)?);
    }
    state.auto_tables.extend(tables.iter().cloned());
    out.push_str(sql);
    Ok(())
}

fn compile_token(compile: &Compile, _state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Token(name) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    compile.write_token(name, out);
    Ok(())
}

fn compile_column(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Column(column) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    if state.context == Context::ColumnName {
        return compile.compile_expr(state, &Expr::Token(column.name.clone()), out);
    }
    state.auto_tables.push(Expr::Table(column.table.clone()));
    compile.compile_expr(state, &Expr::Token(column.table.clone()), out)?;
    out.push('.');
    compile.compile_expr(state, &Expr::Token(column.name.clone()), out)
}

fn compile_table(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Table(name) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    compile.compile_expr(state, &Expr::Token(name.clone()), out)
}

fn compile_alias(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Alias { expr: inner, name } = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    match state.context {
        // Declaration positions spell out what the alias stands for.
        Context::Column | Context::Table => {
            compile.compile_expr(state, inner, out)?;
            out.push_str(" AS ");
            compile.compile_expr(state, &Expr::Token(name.clone()), out)
        }
        _ => compile.compile_expr(state, &Expr::Token(name.clone()), out),
    }
}

fn compile_auto_tables(
    compile: &Compile,
    state: &mut State,
    expr: &Expr,
    out: &mut String,
) -> Result<()> {
    let Expr::AutoTables {
        expr: inner,
        tables,
        replace,
    } = expr
    else {
        return Err(Error::compile("handler got the wrong node"));
    };
    if *replace {
        state.auto_tables.clear();
    }
    state.auto_tables.extend(tables.iter().cloned());
    compile.compile_expr(state, inner, out)
}

fn compile_sequence(_compile: &Compile, _state: &mut State, _expr: &Expr, _out: &mut String) -> Result<()> {
    Err(Error::FeatureUnsupported(
        "sequences are not supported by this dialect".into(),
    ))
}

fn compile_row(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Row(items) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    out.push('(');
    compile.compile_list(state, items, ", ", out)?;
    out.push(')');
    Ok(())
}

fn compile_select(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Select(select) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    state.push_auto_tables();
    state.push_context(Context::Select);

    let mut columns = String::new();
    state.push_context(Context::Column);
    compile.compile_list(state, &select.columns, ", ", &mut columns)?;
    state.pop();

    // Tables are emitted before WHERE but compiled after it, since the
    // deduced FROM content depends on every compiled expression. The
    // parameter splice below repairs the binding order.
    let from_params_at = state.parameters.len();
    state.push_context(Context::Expr);
    let mut where_sql = String::new();
    if let Some(where_clause) = &select.where_clause {
        compile.compile_expr(state, where_clause, &mut where_sql)?;
    }
    let mut group_by = String::new();
    compile.compile_list(state, &select.group_by, ", ", &mut group_by)?;
    let mut having = String::new();
    if let Some(having_clause) = &select.having {
        compile.compile_expr(state, having_clause, &mut having)?;
    }
    let mut order_by = String::new();
    compile.compile_list(state, &select.order_by, ", ", &mut order_by)?;
    state.pop();

    let before_tables = state.parameters.len();
    let tables = compile.build_tables(state, &select.tables, &select.default_tables)?;
    let table_params = state.parameters.split_off(before_tables);
    state
        .parameters
        .splice(from_params_at..from_params_at, table_params);

    out.push_str("SELECT ");
    if select.distinct {
        out.push_str("DISTINCT ");
    }
    out.push_str(&columns);
    if let Some(tables) = tables {
        out.push_str(" FROM ");
        out.push_str(&tables);
    }
    if !where_sql.is_empty() {
        out.push_str(" WHERE ");
        out.push_str(&where_sql);
    }
    if !group_by.is_empty() {
        out.push_str(" GROUP BY ");
        out.push_str(&group_by);
    }
    if !having.is_empty() {
        out.push_str(" HAVING ");
        out.push_str(&having);
    }
    if !order_by.is_empty() {
        out.push_str(" ORDER BY ");
        out.push_str(&order_by);
    }
    if let Some(limit) = select.limit {
        out.push_str(" LIMIT ");
        out.push_str(itoa::Buffer::new().format(limit));
    }
    if let Some(offset) = select.offset {
        out.push_str(" OFFSET ");
        out.push_str(itoa::Buffer::new().format(offset));
    }
    state.pop();
    state.pop();
    Ok(())
}

fn compile_insert(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Insert(insert) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    state.push_auto_tables();

    let mut columns = String::new();
    state.push_context(Context::ColumnName);
    compile.compile_list(state, &insert.columns, ", ", &mut columns)?;
    state.pop();

    let from_params_at = state.parameters.len();
    let mut body = String::new();
    if let Some(source) = &insert.source {
        compile.compile_expr(state, source, &mut body)?;
    } else {
        body.push_str("VALUES ");
        let mut first = true;
        for row in &insert.values {
            if !first {
                body.push_str(", ");
            }
            first = false;
            body.push('(');
            compile.compile_list(state, row, ", ", &mut body)?;
            body.push(')');
        }
    }

    let before_table = state.parameters.len();
    let table = build_statement_table(compile, state, &insert.table, &insert.default_table)?;
    let table_params = state.parameters.split_off(before_table);
    state
        .parameters
        .splice(from_params_at..from_params_at, table_params);

    out.push_str("INSERT INTO ");
    out.push_str(&table);
    out.push_str(" (");
    out.push_str(&columns);
    out.push_str(") ");
    out.push_str(&body);
    state.pop();
    Ok(())
}

fn compile_update(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Update(update) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    state.push_auto_tables();

    let from_params_at = state.parameters.len();
    let mut sets = String::new();
    let mut first = true;
    for (column, value) in &update.set {
        if !first {
            sets.push_str(", ");
        }
        first = false;
        state.push_context(Context::ColumnName);
        compile.compile_expr(state, column, &mut sets)?;
        state.pop();
        sets.push_str(" = ");
        compile.compile_expr(state, value, &mut sets)?;
    }
    let mut where_sql = String::new();
    if let Some(where_clause) = &update.where_clause {
        compile.compile_expr(state, where_clause, &mut where_sql)?;
    }

    let before_table = state.parameters.len();
    let table = build_statement_table(compile, state, &update.table, &update.default_table)?;
    let table_params = state.parameters.split_off(before_table);
    state
        .parameters
        .splice(from_params_at..from_params_at, table_params);

    out.push_str("UPDATE ");
    out.push_str(&table);
    out.push_str(" SET ");
    out.push_str(&sets);
    if !where_sql.is_empty() {
        out.push_str(" WHERE ");
        out.push_str(&where_sql);
    }
    state.pop();
    Ok(())
}

fn compile_delete(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Delete(delete) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    state.push_auto_tables();

    let from_params_at = state.parameters.len();
    let mut where_sql = String::new();
    if let Some(where_clause) = &delete.where_clause {
        compile.compile_expr(state, where_clause, &mut where_sql)?;
    }

    let before_table = state.parameters.len();
    let table = build_statement_table(compile, state, &delete.table, &delete.default_table)?;
    let table_params = state.parameters.split_off(before_table);
    state
        .parameters
        .splice(from_params_at..from_params_at, table_params);

    out.push_str("DELETE FROM ");
    out.push_str(&table);
    if !where_sql.is_empty() {
        out.push_str(" WHERE ");
        out.push_str(&where_sql);
    }
    state.pop();
    Ok(())
}

fn build_statement_table(
    compile: &Compile,
    state: &mut State,
    table: &Option<Expr>,
    default_table: &Option<Expr>,
) -> Result<String> {
    let tables: Vec<Expr> = table.iter().cloned().collect();
    let defaults: Vec<Expr> = default_table.iter().cloned().collect();
    compile
        .build_tables(state, &tables, &defaults)?
        .ok_or_else(|| Error::compile("statement has no target table"))
}

fn compile_join(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Join(join) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    let outer = state.precedence;
    // Nested joins bind equally; bump so they come out parenthesized.
    state.precedence += 1;
    if let Some(left) = &join.left {
        compile.compile_expr(state, left, out)?;
        out.push(' ');
    }
    out.push_str(join.kind.sql());
    out.push(' ');
    compile.compile_expr(state, &join.right, out)?;
    if let Some(on) = &join.on {
        out.push_str(" ON ");
        state.push_context(Context::Expr);
        compile.compile_expr(state, on, out)?;
        state.pop();
    }
    state.precedence = outer;
    Ok(())
}

fn compile_set_op(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::SetOp(set_op) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    compile.compile_list(state, &set_op.exprs, set_op.kind.sql(), out)?;
    if !set_op.order_by.is_empty() {
        out.push_str(" ORDER BY ");
        state.push_context(Context::Expr);
        compile.compile_list(state, &set_op.order_by, ", ", out)?;
        state.pop();
    }
    if let Some(limit) = set_op.limit {
        out.push_str(" LIMIT ");
        out.push_str(itoa::Buffer::new().format(limit));
    }
    if let Some(offset) = set_op.offset {
        out.push_str(" OFFSET ");
        out.push_str(itoa::Buffer::new().format(offset));
    }
    Ok(())
}

fn compile_and_or(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let (items, separator) = match expr {
        Expr::And(items) => (items, " AND "),
        Expr::Or(items) => (items, " OR "),
        _ => return Err(Error::compile("handler got the wrong node")),
    };
    if items.is_empty() {
        return Err(Error::compile("AND/OR over no expressions"));
    }
    compile.compile_list(state, items, separator, out)
}

fn compile_not(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Not(inner) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    out.push_str("NOT ");
    compile.compile_expr(state, inner, out)
}

fn compile_neg(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Neg(inner) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    out.push('-');
    compile.compile_expr(state, inner, out)
}

fn compile_exists(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Exists(inner) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    out.push_str("EXISTS ");
    compile.compile_expr(state, inner, out)
}

fn compile_bin(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Bin { op, left, right } = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    // Comparisons against NULL become IS [NOT] NULL.
    if matches!(op, BinOp::Eq | BinOp::Ne)
        && matches!(&**right, Expr::Param { value, .. } if value.is_null())
    {
        compile.compile_expr(state, left, out)?;
        out.push_str(match op {
            BinOp::Eq => " IS NULL",
            _ => " IS NOT NULL",
        });
        return Ok(());
    }
    compile.compile_expr(state, left, out)?;
    out.push_str(op.sql());
    let outer = state.precedence;
    let non_associative = matches!(
        op,
        BinOp::Sub | BinOp::Div | BinOp::Mod | BinOp::LShift | BinOp::RShift
    );
    if non_associative {
        state.precedence = outer + 1;
    }
    compile.compile_expr(state, right, out)?;
    state.precedence = outer;
    Ok(())
}

fn compile_like(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Like {
        left,
        right,
        escape,
    } = expr
    else {
        return Err(Error::compile("handler got the wrong node"));
    };
    compile.compile_expr(state, left, out)?;
    out.push_str(" LIKE ");
    compile.compile_expr(state, right, out)?;
    if let Some(escape) = escape {
        out.push_str(" ESCAPE ");
        compile.compile_expr(state, escape, out)?;
    }
    Ok(())
}

fn compile_in(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::In { left, items } = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    if items.is_empty() {
        return Err(Error::compile("IN over an empty list"));
    }
    compile.compile_expr(state, left, out)?;
    out.push_str(" IN (");
    let outer = state.precedence;
    // The parentheses are part of IN itself; never double them up.
    state.precedence = 0;
    compile.compile_list(state, items, ", ", out)?;
    state.precedence = outer;
    out.push(')');
    Ok(())
}

fn compile_func(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Func { name, args } = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    out.push_str(name);
    out.push('(');
    let outer = state.precedence;
    state.precedence = 0;
    compile.compile_list(state, args, ", ", out)?;
    state.precedence = outer;
    out.push(')');
    Ok(())
}

fn compile_count(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Count { expr: inner, distinct } = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    match inner {
        Some(inner) => {
            out.push_str("COUNT(");
            if *distinct {
                out.push_str("DISTINCT ");
            }
            let outer = state.precedence;
            state.precedence = 0;
            compile.compile_expr(state, inner, out)?;
            state.precedence = outer;
            out.push(')');
        }
        None => out.push_str("COUNT(*)"),
    }
    Ok(())
}

fn compile_cast(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Cast { expr: inner, ty } = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    out.push_str("CAST(");
    let outer = state.precedence;
    state.precedence = 0;
    compile.compile_expr(state, inner, out)?;
    state.precedence = outer;
    out.push_str(" AS ");
    out.push_str(ty);
    out.push(')');
    Ok(())
}

fn compile_asc(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Asc(inner) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    compile.compile_expr(state, inner, out)?;
    out.push_str(" ASC");
    Ok(())
}

fn compile_desc(compile: &Compile, state: &mut State, expr: &Expr, out: &mut String) -> Result<()> {
    let Expr::Desc(inner) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    compile.compile_expr(state, inner, out)?;
    out.push_str(" DESC");
    Ok(())
}
