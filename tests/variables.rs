#[cfg(test)]
mod tests {
    use lode::{Error, LazyValue, Value, VariableFactory};
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;
    use time::macros::datetime;
    use uuid::Uuid;

    #[test]
    fn int_coercions() {
        let mut variable = VariableFactory::int().build();
        variable.set(Value::Bool(true), false).unwrap();
        assert_eq!(variable.get().unwrap(), Value::Int(1));
        variable.set(Value::Int(42), false).unwrap();
        assert_eq!(variable.get().unwrap(), Value::Int(42));
        // A fractional float is not silently truncated.
        assert!(variable.set(Value::Float(1.5), false).is_err());
    }

    #[test]
    fn undefined_reads_as_null() {
        let variable = VariableFactory::text().build();
        assert_eq!(variable.get().unwrap(), Value::Null);
        assert!(!variable.is_defined());
    }

    #[test]
    fn required_rejects_null() {
        let mut variable = VariableFactory::text().required().build();
        assert!(matches!(
            variable.set(Value::Null, false),
            Err(Error::NoneViolation(..)),
        ));
        let mut variable = VariableFactory::text().build();
        variable.set(Value::Null, false).unwrap();
        assert_eq!(variable.get().unwrap(), Value::Null);
    }

    #[test]
    fn validators_run_on_application_writes_only() {
        let factory = VariableFactory::int().with_validator(|value| match value {
            Value::Int(v) if v < 0 => Err(Error::value("negative")),
            value => Ok(value),
        });
        let mut variable = factory.build();
        assert!(variable.set(Value::Int(-1), false).is_err());
        // Values arriving from the database bypass validation.
        variable.set(Value::Int(-1), true).unwrap();
        assert_eq!(variable.get().unwrap(), Value::Int(-1));
    }

    #[test]
    fn checkpoint_tracks_changes() {
        let mut variable = VariableFactory::text().build();
        variable.set(Value::Text("a".to_string()), true).unwrap();
        // A database load starts out clean.
        assert!(!variable.has_changed());
        variable.set(Value::Text("b".to_string()), false).unwrap();
        assert!(variable.has_changed());
        variable.checkpoint();
        assert!(!variable.has_changed());
    }

    #[test]
    fn save_and_restore() {
        let mut variable = VariableFactory::int().build();
        variable.set(Value::Int(1), false).unwrap();
        variable.save();
        variable.set(Value::Int(2), false).unwrap();
        variable.restore();
        assert_eq!(variable.get().unwrap(), Value::Int(1));
        // The snapshot survives the restore.
        variable.set(Value::Int(3), false).unwrap();
        variable.restore();
        assert_eq!(variable.get().unwrap(), Value::Int(1));
    }

    #[test]
    fn lazy_values_block_reads_until_resolved() {
        let mut variable = VariableFactory::int().build();
        variable.set_lazy(LazyValue::AutoReload);
        assert!(matches!(variable.get(), Err(Error::NotFlushed(..))));
        assert!(variable.has_changed());
        variable.set(Value::Int(5), true).unwrap();
        assert_eq!(variable.get().unwrap(), Value::Int(5));
    }

    #[test]
    fn enumeration_maps_between_forms() {
        let factory = VariableFactory::enumeration(vec![
            (Value::Text("open".to_string()), Value::Int(1)),
            (Value::Text("closed".to_string()), Value::Int(2)),
        ]);
        let mut variable = factory.build();
        variable.set(Value::Text("open".to_string()), false).unwrap();
        assert_eq!(variable.get().unwrap(), Value::Text("open".to_string()));
        assert_eq!(variable.get_to_db().unwrap(), Value::Int(1));
        // Database form maps back to the exposed form.
        variable.set(Value::Int(2), true).unwrap();
        assert_eq!(variable.get().unwrap(), Value::Text("closed".to_string()));
        assert!(variable.set(Value::Text("broken".to_string()), false).is_err());
    }

    #[test]
    fn datetime_accepts_unix_timestamps() {
        let mut variable = VariableFactory::datetime().build();
        variable.set(Value::Int(0), true).unwrap();
        assert_eq!(
            variable.get().unwrap(),
            Value::DateTime(datetime!(1970-01-01 00:00:00 UTC)),
        );
        variable.set(Value::Int(86_400), false).unwrap();
        assert_eq!(
            variable.get().unwrap(),
            Value::DateTime(datetime!(1970-01-02 00:00:00 UTC)),
        );
        // Text only arrives from the database.
        assert!(variable
            .set(Value::Text("1970-01-01 00:00:00".to_string()), false)
            .is_err());
    }

    #[test]
    fn temporal_values_round_trip_as_text() {
        let mut variable = VariableFactory::datetime().build();
        variable
            .set(Value::DateTime(datetime!(2024-03-01 12:30:45 UTC)), false)
            .unwrap();
        assert_eq!(
            variable.get_to_db().unwrap(),
            Value::Text("2024-03-01 12:30:45".to_string()),
        );
        let mut other = VariableFactory::datetime().build();
        other
            .set(Value::Text("2024-03-01 12:30:45".to_string()), true)
            .unwrap();
        assert_eq!(other.get().unwrap(), variable.get().unwrap());
    }

    #[test]
    fn decimal_round_trips_through_text() {
        let mut variable = VariableFactory::decimal().build();
        variable
            .set(Value::Decimal(Decimal::from_str("12.50").unwrap()), false)
            .unwrap();
        assert_eq!(
            variable.get_to_db().unwrap(),
            Value::Text("12.50".to_string()),
        );
        // The database hands decimals back as text.
        let mut other = VariableFactory::decimal().build();
        other.set(Value::Text("12.50".to_string()), true).unwrap();
        assert_eq!(other.get().unwrap(), variable.get().unwrap());
        // Text is not accepted from the application side.
        assert!(other.set(Value::Text("1.5".to_string()), false).is_err());
    }

    #[test]
    fn uuid_is_text_for_the_database() {
        let id = Uuid::from_str("0609f76b-878f-4546-baf5-c1b135e8de72").unwrap();
        let mut variable = VariableFactory::uuid().build();
        variable.set(Value::Uuid(id), false).unwrap();
        assert_eq!(
            variable.get_to_db().unwrap(),
            Value::Text("0609f76b-878f-4546-baf5-c1b135e8de72".to_string()),
        );
        let mut other = VariableFactory::uuid().build();
        other
            .set(
                Value::Text("0609f76b-878f-4546-baf5-c1b135e8de72".to_string()),
                true,
            )
            .unwrap();
        assert_eq!(other.get().unwrap(), Value::Uuid(id));
    }

    #[test]
    fn json_serialises_for_the_database() {
        let mut variable = VariableFactory::json().build();
        variable
            .set(Value::Json(json!({"a": 1})), false)
            .unwrap();
        assert_eq!(
            variable.get_to_db().unwrap(),
            Value::Text("{\"a\":1}".to_string()),
        );
        let mut other = VariableFactory::json().build();
        other
            .set(Value::Text("{\"a\":1}".to_string()), true)
            .unwrap();
        assert_eq!(other.get().unwrap(), Value::Json(json!({"a": 1})));
    }

    #[test]
    fn lists_coerce_their_items() {
        let factory = VariableFactory::list(VariableFactory::int());
        let mut variable = factory.build();
        variable
            .set(
                Value::List(vec![Value::Int(1), Value::Bool(true)]),
                false,
            )
            .unwrap();
        assert_eq!(
            variable.get().unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(1)]),
        );
    }
}
