#[cfg(test)]
mod tests {
    use lode::{
        ClassInfo, Entity, Error, MemoryDatabase, Obj, Store, Value, VariableFactory,
    };
    use once_cell::sync::Lazy;
    use std::sync::Arc;

    static PERSON: Lazy<Arc<ClassInfo>> = Lazy::new(|| {
        ClassInfo::builder("Person", "person")
            .column("id", VariableFactory::int())
            .column("name", VariableFactory::text())
            .column("team_id", VariableFactory::int())
            .primary(["id"])
            .order_by(["id"])
            .build()
            .unwrap()
    });

    struct Person;
    impl Entity for Person {
        fn class_info() -> Arc<ClassInfo> {
            PERSON.clone()
        }
    }

    fn setup() -> (MemoryDatabase, Store) {
        let _ = env_logger::builder().is_test(true).try_init();
        let database = MemoryDatabase::new();
        let store = Store::new(&database).unwrap();
        (database, store)
    }

    #[test]
    fn add_and_flush_inserts() {
        let (database, store) = setup();
        let person = Obj::<Person>::new();
        person.set("name", "Ada").unwrap();
        store.add_obj(&person).unwrap();
        store.flush().unwrap();
        let entries = database.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "INSERT INTO person (name) VALUES (?)");
        assert_eq!(entries[0].1, vec![Value::Text("Ada".to_string())]);
        // The generated key came back from the backend.
        assert_eq!(person.get("id").unwrap(), Value::Int(1));
    }

    #[test]
    fn get_hits_the_identity_map() {
        let (database, store) = setup();
        database.queue_rows(vec![vec![
            Value::Int(7),
            Value::Text("Ada".to_string()),
            Value::Null,
        ]]);
        let first = store.get::<Person>(7).unwrap().unwrap();
        assert_eq!(database.statements().len(), 1);
        assert_eq!(
            database.statements()[0],
            "SELECT person.id, person.name, person.team_id FROM person WHERE person.id = ?",
        );
        let second = store.get::<Person>(7).unwrap().unwrap();
        assert!(first.same(&second));
        // Served from memory; no second query.
        assert_eq!(database.statements().len(), 1);
    }

    #[test]
    fn missing_row_is_none() {
        let (_database, store) = setup();
        assert!(store.get::<Person>(42).unwrap().is_none());
    }

    #[test]
    fn change_and_flush_updates() {
        let (database, store) = setup();
        database.queue_rows(vec![vec![
            Value::Int(7),
            Value::Text("Ada".to_string()),
            Value::Null,
        ]]);
        let person = store.get::<Person>(7).unwrap().unwrap();
        database.clear_log();
        person.set("name", "Grace").unwrap();
        store.flush().unwrap();
        let entries = database.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "UPDATE person SET name = ? WHERE person.id = ?");
        assert_eq!(
            entries[0].1,
            vec![Value::Text("Grace".to_string()), Value::Int(7)],
        );
        // A second flush has nothing to do.
        store.flush().unwrap();
        assert_eq!(database.entries().len(), 1);
    }

    #[test]
    fn setting_the_same_value_is_not_a_change() {
        let (database, store) = setup();
        database.queue_rows(vec![vec![
            Value::Int(7),
            Value::Text("Ada".to_string()),
            Value::Null,
        ]]);
        let person = store.get::<Person>(7).unwrap().unwrap();
        database.clear_log();
        person.set("name", "Ada").unwrap();
        store.flush().unwrap();
        assert!(database.entries().is_empty());
    }

    #[test]
    fn remove_and_flush_deletes() {
        let (database, store) = setup();
        database.queue_rows(vec![vec![
            Value::Int(7),
            Value::Text("Ada".to_string()),
            Value::Null,
        ]]);
        let person = store.get::<Person>(7).unwrap().unwrap();
        database.clear_log();
        store.remove_obj(&person).unwrap();
        store.flush().unwrap();
        let entries = database.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "DELETE FROM person WHERE person.id = ?");
        assert_eq!(entries[0].1, vec![Value::Int(7)]);
    }

    #[test]
    fn removing_a_pending_add_never_touches_the_database() {
        let (database, store) = setup();
        let person = Obj::<Person>::new();
        person.set("name", "Ada").unwrap();
        store.add_obj(&person).unwrap();
        store.remove_obj(&person).unwrap();
        store.flush().unwrap();
        assert!(database.entries().is_empty());
    }

    #[test]
    fn columns_left_out_of_the_insert_load_lazily() {
        let (database, store) = setup();
        let person = Obj::<Person>::new();
        person.set("name", "Ada").unwrap();
        store.add_obj(&person).unwrap();
        store.flush().unwrap();
        database.clear_log();
        database.queue_rows(vec![vec![
            Value::Int(1),
            Value::Text("Ada".to_string()),
            Value::Int(3),
        ]]);
        assert_eq!(person.get("team_id").unwrap(), Value::Int(3));
        assert_eq!(
            database.statements(),
            vec![
                "SELECT person.id, person.name, person.team_id FROM person WHERE person.id = ?"
                    .to_string()
            ],
        );
    }

    #[test]
    fn commit_flushes_first() {
        let (database, store) = setup();
        let person = Obj::<Person>::new();
        person.set("name", "Ada").unwrap();
        store.add_obj(&person).unwrap();
        store.commit().unwrap();
        assert_eq!(database.entries().len(), 1);
        assert_eq!(database.commits(), 1);
    }

    #[test]
    fn rollback_restores_and_invalidates() {
        let (database, store) = setup();
        database.queue_rows(vec![vec![
            Value::Int(7),
            Value::Text("Ada".to_string()),
            Value::Null,
        ]]);
        let person = store.get::<Person>(7).unwrap().unwrap();
        person.set("name", "Grace").unwrap();
        store.rollback().unwrap();
        assert_eq!(database.rollbacks(), 1);
        // Nothing left to flush.
        database.clear_log();
        store.flush().unwrap();
        assert!(database.entries().is_empty());
        // Values are refetched after the aborted transaction.
        database.queue_rows(vec![vec![
            Value::Int(7),
            Value::Text("Ada".to_string()),
            Value::Null,
        ]]);
        assert_eq!(person.get("name").unwrap(), Value::Text("Ada".to_string()));
        assert_eq!(database.statements().len(), 1);
    }

    #[test]
    fn rollback_discards_pending_adds() {
        let (database, store) = setup();
        let person = Obj::<Person>::new();
        person.set("name", "Ada").unwrap();
        store.add_obj(&person).unwrap();
        store.rollback().unwrap();
        store.flush().unwrap();
        assert!(database.entries().is_empty());
    }

    #[test]
    fn conflicting_flush_order_is_a_loop() {
        let (_database, store) = setup();
        let a = Obj::<Person>::new();
        a.set("name", "a").unwrap();
        let b = Obj::<Person>::new();
        b.set("name", "b").unwrap();
        store.add_obj(&a).unwrap();
        store.add_obj(&b).unwrap();
        store.add_flush_order(a.info(), b.info());
        store.add_flush_order(b.info(), a.info());
        assert!(matches!(store.flush(), Err(Error::OrderLoop)));
        // Dropping one constraint unblocks the flush.
        store.remove_flush_order(b.info(), a.info());
        store.flush().unwrap();
    }

    #[test]
    fn objects_cannot_span_stores() {
        let (_database, store) = setup();
        let other = Store::open("memory:").unwrap();
        let person = Obj::<Person>::new();
        person.set("name", "Ada").unwrap();
        store.add_obj(&person).unwrap();
        assert!(matches!(other.add_obj(&person), Err(Error::Store(..))));
    }

    #[test]
    fn primary_key_changes_refile_the_object() {
        let (database, store) = setup();
        database.queue_rows(vec![vec![
            Value::Int(7),
            Value::Text("Ada".to_string()),
            Value::Null,
        ]]);
        let person = store.get::<Person>(7).unwrap().unwrap();
        database.clear_log();
        person.set("id", 8).unwrap();
        store.flush().unwrap();
        let entries = database.entries();
        assert_eq!(entries[0].0, "UPDATE person SET id = ? WHERE person.id = ?");
        // The WHERE targets the key the row still has in the database.
        assert_eq!(entries[0].1, vec![Value::Int(8), Value::Int(7)]);
        let again = store.get::<Person>(8).unwrap().unwrap();
        assert!(person.same(&again));
    }
}
