#[cfg(test)]
mod tests {
    use lode::{
        ClassInfo, Entity, IndirectReferenceSet, MemoryDatabase, Obj, Reference, ReferenceSet,
        Store, Value, VariableFactory,
    };
    use once_cell::sync::Lazy;
    use std::sync::Arc;

    static TEAM: Lazy<Arc<ClassInfo>> = Lazy::new(|| {
        ClassInfo::builder("Team", "team")
            .column("id", VariableFactory::int())
            .column("name", VariableFactory::text())
            .primary(["id"])
            .build()
            .unwrap()
    });

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

    struct Team;
    impl Entity for Team {
        fn class_info() -> Arc<ClassInfo> {
            TEAM.clone()
        }
    }

    struct Person;
    impl Entity for Person {
        fn class_info() -> Arc<ClassInfo> {
            PERSON.clone()
        }
    }

    fn team_of() -> Reference<Person, Team> {
        Reference::new(&["team_id"], &["id"]).unwrap()
    }

    fn members_of() -> ReferenceSet<Team, Person> {
        ReferenceSet::new(&["id"], &["team_id"]).unwrap()
    }

    fn setup() -> (MemoryDatabase, Store) {
        let database = MemoryDatabase::new();
        let store = Store::new(&database).unwrap();
        (database, store)
    }

    #[test]
    fn setting_a_reference_copies_the_key() {
        let (database, store) = setup();
        database.queue_rows(vec![vec![Value::Int(3), Value::Text("Blue".to_string())]]);
        let team = store.get::<Team>(3).unwrap().unwrap();
        let person = Obj::<Person>::new();
        person.set("name", "Ada").unwrap();
        team_of().set(&person, Some(&team)).unwrap();
        assert_eq!(person.get("team_id").unwrap(), Value::Int(3));
        // Linking pulled the person into the team's store.
        assert!(Store::of(person.info()).unwrap().same(&store));
    }

    #[test]
    fn getting_a_reference_uses_the_identity_map() {
        let (database, store) = setup();
        database.queue_rows(vec![vec![Value::Int(3), Value::Text("Blue".to_string())]]);
        let team = store.get::<Team>(3).unwrap().unwrap();
        database.queue_rows(vec![vec![
            Value::Int(1),
            Value::Text("Ada".to_string()),
            Value::Int(3),
        ]]);
        let person = store.get::<Person>(1).unwrap().unwrap();
        database.clear_log();
        let found = team_of().get(&person).unwrap().unwrap();
        assert!(found.same(&team));
        assert!(database.statements().is_empty());
    }

    #[test]
    fn null_key_resolves_to_none() {
        let (database, store) = setup();
        database.queue_rows(vec![vec![
            Value::Int(1),
            Value::Text("Ada".to_string()),
            Value::Null,
        ]]);
        let person = store.get::<Person>(1).unwrap().unwrap();
        assert!(team_of().get(&person).unwrap().is_none());
    }

    #[test]
    fn unsetting_nulls_the_key_columns() {
        let (database, store) = setup();
        database.queue_rows(vec![vec![
            Value::Int(1),
            Value::Text("Ada".to_string()),
            Value::Int(3),
        ]]);
        let person = store.get::<Person>(1).unwrap().unwrap();
        team_of().set(&person, None).unwrap();
        assert_eq!(person.get("team_id").unwrap(), Value::Null);
    }

    #[test]
    fn linking_to_an_unflushed_object_defers_the_key() {
        let (database, store) = setup();
        let team = Obj::<Team>::new();
        team.set("name", "Blue").unwrap();
        store.add_obj(&team).unwrap();
        let person = Obj::<Person>::new();
        person.set("name", "Ada").unwrap();
        team_of().set(&person, Some(&team)).unwrap();
        // Resolvable before any flush, straight from the pending link.
        let linked = team_of().get(&person).unwrap().unwrap();
        assert!(linked.same(&team));
        assert!(database.statements().is_empty());

        store.flush().unwrap();
        let entries = database.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "INSERT INTO team (name) VALUES (?)");
        assert_eq!(
            entries[1].0,
            "INSERT INTO person (name, team_id) VALUES (?, ?)",
        );
        // The generated team key flowed into the person row.
        assert_eq!(
            entries[1].1,
            vec![Value::Text("Ada".to_string()), Value::Int(1)],
        );
        assert_eq!(person.get("team_id").unwrap(), Value::Int(1));
    }

    #[test]
    fn writing_the_key_by_hand_severs_a_pending_link() {
        let (database, store) = setup();
        let team = Obj::<Team>::new();
        team.set("name", "Blue").unwrap();
        store.add_obj(&team).unwrap();
        let person = Obj::<Person>::new();
        person.set("name", "Ada").unwrap();
        team_of().set(&person, Some(&team)).unwrap();
        person.set("team_id", 9).unwrap();
        store.flush().unwrap();
        // The manual key survived; the deferred copy never happened.
        assert_eq!(person.get("team_id").unwrap(), Value::Int(9));
        let inserts: Vec<_> = database
            .entries()
            .into_iter()
            .filter(|(sql, _)| sql.starts_with("INSERT INTO person"))
            .collect();
        assert_eq!(inserts[0].1, vec![Value::Text("Ada".to_string()), Value::Int(9)]);
    }

    #[test]
    fn on_remote_references_live_on_the_other_side() {
        let (database, store) = setup();
        let captain_of: Reference<Team, Person> =
            Reference::on_remote(&["id"], &["team_id"]).unwrap();
        database.queue_rows(vec![vec![Value::Int(3), Value::Text("Blue".to_string())]]);
        let team = store.get::<Team>(3).unwrap().unwrap();
        database.clear_log();
        // The key is not the person's primary key, so resolution queries.
        database.queue_rows(vec![vec![
            Value::Int(1),
            Value::Text("Ada".to_string()),
            Value::Int(3),
        ]]);
        let captain = captain_of.get(&team).unwrap().unwrap();
        assert_eq!(captain.get("name").unwrap(), Value::Text("Ada".to_string()));
        assert_eq!(
            database.statements(),
            vec![
                "SELECT person.id, person.name, person.team_id FROM person \
                 WHERE person.team_id = ? ORDER BY person.id LIMIT 2"
                    .to_string()
            ],
        );
        // Setting writes the owner's key into the remote side.
        let person = Obj::<Person>::new();
        person.set("name", "Grace").unwrap();
        captain_of.set(&team, Some(&person)).unwrap();
        assert_eq!(person.get("team_id").unwrap(), Value::Int(3));
    }

    #[test]
    fn reference_sets_query_by_the_owners_key() {
        let (database, store) = setup();
        database.queue_rows(vec![vec![Value::Int(3), Value::Text("Blue".to_string())]]);
        let team = store.get::<Team>(3).unwrap().unwrap();
        database.clear_log();
        database.queue_rows(vec![vec![
            Value::Int(1),
            Value::Text("Ada".to_string()),
            Value::Int(3),
        ]]);
        let members = members_of().find(&team).unwrap().all().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(
            database.statements(),
            vec![
                "SELECT person.id, person.name, person.team_id FROM person \
                 WHERE person.team_id = ? ORDER BY person.id"
                    .to_string()
            ],
        );
    }

    #[test]
    fn reference_set_add_and_remove() {
        let (database, store) = setup();
        database.queue_rows(vec![vec![Value::Int(3), Value::Text("Blue".to_string())]]);
        let team = store.get::<Team>(3).unwrap().unwrap();
        let person = Obj::<Person>::new();
        person.set("name", "Ada").unwrap();
        let members = members_of();
        members.add(&team, &person).unwrap();
        assert_eq!(person.get("team_id").unwrap(), Value::Int(3));
        members.remove(&person).unwrap();
        assert_eq!(person.get("team_id").unwrap(), Value::Null);
    }

    #[test]
    fn indirect_sets_join_through_the_link_table() {
        let (database, store) = setup();
        database.queue_rows(vec![vec![Value::Int(3), Value::Text("Blue".to_string())]]);
        let team = store.get::<Team>(3).unwrap().unwrap();
        database.queue_rows(vec![vec![
            Value::Int(1),
            Value::Text("Ada".to_string()),
            Value::Null,
        ]]);
        let person = store.get::<Person>(1).unwrap().unwrap();
        database.clear_log();
        let members: IndirectReferenceSet<Team, Person> = IndirectReferenceSet::new(
            "team_member",
            &["id"],
            &["team_id"],
            &["person_id"],
            &["id"],
        )
        .unwrap();
        members.add(&team, &person).unwrap();
        assert_eq!(
            database.entries()[0],
            (
                "INSERT INTO team_member (team_id, person_id) VALUES (?, ?)".to_string(),
                vec![Value::Int(3), Value::Int(1)],
            ),
        );
        database.clear_log();
        database.queue_rows(vec![vec![
            Value::Int(1),
            Value::Text("Ada".to_string()),
            Value::Null,
        ]]);
        let found = members.all(&team).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].same(&person));
        assert_eq!(
            database.statements(),
            vec![
                "SELECT person.id, person.name, person.team_id FROM person, team_member \
                 WHERE team_member.team_id = ? AND team_member.person_id = person.id \
                 ORDER BY person.id"
                    .to_string()
            ],
        );
        database.clear_log();
        members.remove(&team, &person).unwrap();
        assert_eq!(
            database.statements(),
            vec![
                "DELETE FROM team_member WHERE team_member.team_id = ? AND team_member.person_id = ?"
                    .to_string()
            ],
        );
    }
}
