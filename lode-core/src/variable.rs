use crate::{
    Error, Expr, Result, Value, format_date, format_datetime, format_interval, format_time,
    parse_date, parse_datetime, parse_interval, parse_time,
};
use rust_decimal::{
    Decimal,
    prelude::{FromPrimitive, ToPrimitive},
};
use std::{fmt, str::FromStr, sync::Arc};
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

/// A marker stored in place of a value.
///
/// `AutoReload` makes the next read go back to the database (how stores
/// invalidate objects across transaction boundaries). `Sequence` defers the
/// value to a database sequence at flush time. `Expr` flushes an arbitrary
/// SQL expression and reloads the column afterwards.
#[derive(Clone, Debug)]
pub enum LazyValue {
    AutoReload,
    Sequence(String),
    Expr(Box<Expr>),
}

#[derive(Clone, Debug)]
pub enum VarState {
    /// No value at all; the column is skipped at flush time.
    Undef,
    Lazy(LazyValue),
    Set(Value),
}

/// What the accepted type of a variable is, with the coercion rules that
/// go with it. One kind per column; the `List` kind nests a factory for
/// its items.
#[derive(Clone, Debug)]
pub enum VariableKind {
    /// No coercion, any value passes through.
    Any,
    Bool,
    Int,
    Float,
    Decimal,
    Bytes,
    Text,
    Date,
    Time,
    DateTime {
        /// When set, accepted datetimes are converted to this offset.
        offset: Option<UtcOffset>,
    },
    TimeDelta,
    Uuid,
    /// Pairs of (exposed value, stored value). The stored form is what
    /// lives in the database and in the variable.
    Enum { pairs: Arc<Vec<(Value, Value)>> },
    Json,
    List { item: Arc<VariableFactory> },
}

pub type Validator = dyn Fn(Value) -> Result<Value> + Send + Sync;

/// Immutable description of a variable: its kind, nullability, validator
/// and a label for error messages. Shared between a column's metadata and
/// every variable it stamps out.
#[derive(Clone)]
pub struct VariableFactory {
    kind: VariableKind,
    allow_none: bool,
    validator: Option<Arc<Validator>>,
    label: Option<Arc<str>>,
}

impl fmt::Debug for VariableFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableFactory")
            .field("kind", &self.kind)
            .field("allow_none", &self.allow_none)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl VariableFactory {
    pub fn new(kind: VariableKind) -> Self {
        Self {
            kind,
            allow_none: true,
            validator: None,
            label: None,
        }
    }

    /// Reject NULL for variables built by this factory.
    pub fn required(mut self) -> Self {
        self.allow_none = false;
        self
    }

    /// App-side values go through `validator` before the type coercion.
    /// Values arriving from the database do not.
    pub fn with_validator(
        mut self,
        validator: impl Fn(Value) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn labeled(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn kind(&self) -> &VariableKind {
        &self.kind
    }

    pub fn allow_none(&self) -> bool {
        self.allow_none
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("value")
    }

    pub fn build(&self) -> Variable {
        Variable {
            factory: self.clone(),
            column: None,
            state: VarState::Undef,
            checkpoint: VarState::Undef,
            saved: None,
        }
    }

    pub fn build_with(&self, value: Value, from_db: bool) -> Result<Variable> {
        let mut variable = self.build();
        variable.set(value, from_db)?;
        Ok(variable)
    }

    /// Coerce an app- or database-side value to this factory's stored form
    /// without building a variable. Used for identity-map keys.
    pub fn coerce(&self, value: Value, from_db: bool) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        parse_set(&self.kind, value, from_db)
    }

    /// Convert a stored-form value to the app (`to_db == false`) or
    /// database (`to_db == true`) form.
    pub fn get(&self, stored: &Value, to_db: bool) -> Result<Value> {
        parse_get(&self.kind, stored, to_db)
    }
}

/// Shorthand factories for the common kinds.
impl VariableFactory {
    pub fn any() -> Self {
        Self::new(VariableKind::Any)
    }
    pub fn bool() -> Self {
        Self::new(VariableKind::Bool)
    }
    pub fn int() -> Self {
        Self::new(VariableKind::Int)
    }
    pub fn float() -> Self {
        Self::new(VariableKind::Float)
    }
    pub fn decimal() -> Self {
        Self::new(VariableKind::Decimal)
    }
    pub fn bytes() -> Self {
        Self::new(VariableKind::Bytes)
    }
    pub fn text() -> Self {
        Self::new(VariableKind::Text)
    }
    pub fn date() -> Self {
        Self::new(VariableKind::Date)
    }
    pub fn time() -> Self {
        Self::new(VariableKind::Time)
    }
    pub fn datetime() -> Self {
        Self::new(VariableKind::DateTime { offset: None })
    }
    pub fn datetime_at(offset: UtcOffset) -> Self {
        Self::new(VariableKind::DateTime {
            offset: Some(offset),
        })
    }
    pub fn timedelta() -> Self {
        Self::new(VariableKind::TimeDelta)
    }
    pub fn uuid() -> Self {
        Self::new(VariableKind::Uuid)
    }
    pub fn enumeration(pairs: Vec<(Value, Value)>) -> Self {
        Self::new(VariableKind::Enum {
            pairs: Arc::new(pairs),
        })
    }
    pub fn json() -> Self {
        Self::new(VariableKind::Json)
    }
    pub fn list(item: VariableFactory) -> Self {
        Self::new(VariableKind::List {
            item: Arc::new(item),
        })
    }
}

/// Emitted by the mutating calls so the owning object can publish a
/// changed event after its own borrows are released.
#[derive(Clone, Debug)]
pub struct ChangedData {
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub lazy: Option<LazyValue>,
}

/// A typed cell holding one column's value for one object, along with the
/// checkpoint used for dirty detection and the snapshot used for rollback.
#[derive(Clone, Debug)]
pub struct Variable {
    factory: VariableFactory,
    column: Option<usize>,
    state: VarState,
    checkpoint: VarState,
    saved: Option<(VarState, VarState)>,
}

impl Variable {
    pub fn factory(&self) -> &VariableFactory {
        &self.factory
    }

    pub fn column(&self) -> Option<usize> {
        self.column
    }

    pub(crate) fn set_column(&mut self, column: usize) {
        self.column = Some(column);
    }

    pub fn is_defined(&self) -> bool {
        matches!(self.state, VarState::Set(..))
    }

    pub fn lazy(&self) -> Option<&LazyValue> {
        match &self.state {
            VarState::Lazy(lazy) => Some(lazy),
            _ => None,
        }
    }

    pub fn state(&self) -> &VarState {
        &self.state
    }

    /// Accept a new value, coercing it per the variable's kind. NULL is
    /// rejected when the factory forbids it. Returns the change to be
    /// published, or None when the state did not move.
    pub fn set(&mut self, value: Value, from_db: bool) -> Result<Option<ChangedData>> {
        let parsed = if value.is_null() {
            if !self.factory.allow_none {
                return Err(Error::NoneViolation(self.factory.label().to_string().into()));
            }
            Value::Null
        } else {
            let value = match (&self.factory.validator, from_db) {
                (Some(validator), false) => validator(value)?,
                _ => value,
            };
            parse_set(&self.factory.kind, value, from_db)?
        };
        let old_value = self.external_value();
        if let VarState::Set(old) = &self.state {
            if *old == parsed {
                // Same stored value, nothing to publish.
                if from_db {
                    self.checkpoint = self.state.clone();
                }
                return Ok(None);
            }
        }
        self.state = VarState::Set(parsed);
        if from_db {
            // What came from the database is clean by definition.
            self.checkpoint = self.state.clone();
        }
        let new_value = self.external_value();
        Ok(Some(ChangedData {
            old_value,
            new_value,
            lazy: None,
        }))
    }

    /// Install a lazy marker. Always publishes a change.
    pub fn set_lazy(&mut self, lazy: LazyValue) -> ChangedData {
        let old_value = self.external_value();
        self.state = VarState::Lazy(lazy.clone());
        ChangedData {
            old_value,
            new_value: None,
            lazy: Some(lazy),
        }
    }

    /// Drop the value, going back to undefined.
    pub fn delete(&mut self) -> Option<ChangedData> {
        if matches!(self.state, VarState::Undef) {
            return None;
        }
        let old_value = self.external_value();
        self.state = VarState::Undef;
        Some(ChangedData {
            old_value,
            new_value: None,
            lazy: None,
        })
    }

    /// The app-side view of the value. Undefined reads as NULL; a lazy
    /// marker must be resolved by the store before this is called.
    pub fn get(&self) -> Result<Value> {
        match &self.state {
            VarState::Undef => Ok(Value::Null),
            VarState::Lazy(..) => Err(Error::NotFlushed(
                format!("{} is lazy and no store resolved it", self.factory.label()).into(),
            )),
            VarState::Set(value) => parse_get(&self.factory.kind, value, false),
        }
    }

    /// The database-side form, for binding as a statement parameter.
    pub fn get_to_db(&self) -> Result<Value> {
        match &self.state {
            VarState::Undef => Ok(Value::Null),
            VarState::Lazy(..) => Err(Error::NotFlushed(
                format!("{} has no database value yet", self.factory.label()).into(),
            )),
            VarState::Set(value) => parse_get(&self.factory.kind, value, true),
        }
    }

    /// The stored form, used for identity-map keys.
    pub fn stored(&self) -> Option<&Value> {
        match &self.state {
            VarState::Set(value) => Some(value),
            _ => None,
        }
    }

    pub fn has_changed(&self) -> bool {
        match (&self.state, &self.checkpoint) {
            (VarState::Lazy(..), _) => true,
            (VarState::Undef, VarState::Undef) => false,
            (VarState::Set(a), VarState::Set(b)) => a != b,
            _ => true,
        }
    }

    /// Make the current state the clean baseline.
    pub fn checkpoint(&mut self) {
        self.checkpoint = self.state.clone();
    }

    /// Snapshot state and checkpoint for a later [`Variable::restore`].
    pub fn save(&mut self) {
        self.saved = Some((self.state.clone(), self.checkpoint.clone()));
    }

    pub fn restore(&mut self) {
        if let Some((state, checkpoint)) = &self.saved {
            self.state = state.clone();
            self.checkpoint = checkpoint.clone();
        }
    }

    fn external_value(&self) -> Option<Value> {
        match &self.state {
            VarState::Set(value) => parse_get(&self.factory.kind, value, false).ok(),
            _ => None,
        }
    }
}

fn type_error(kind: &VariableKind, value: &Value) -> Error {
    Error::value(format!(
        "expected a {:?}-compatible value, got {}",
        kind,
        value.type_name()
    ))
}

/// App/database value to stored form, per kind.
fn parse_set(kind: &VariableKind, value: Value, from_db: bool) -> Result<Value> {
    Ok(match (kind, value) {
        (VariableKind::Any, value) => value,

        (VariableKind::Bool, Value::Bool(v)) => Value::Bool(v),
        (VariableKind::Bool, Value::Int(v)) => Value::Bool(v != 0),
        (VariableKind::Bool, Value::Float(v)) => Value::Bool(v != 0.0),
        (VariableKind::Bool, Value::Decimal(v)) => Value::Bool(!v.is_zero()),

        (VariableKind::Int, Value::Int(v)) => Value::Int(v),
        (VariableKind::Int, Value::Bool(v)) => Value::Int(v as i64),
        (VariableKind::Int, Value::Decimal(v)) if v.fract().is_zero() => Value::Int(
            v.to_i64()
                .ok_or_else(|| Error::value("decimal out of integer range"))?,
        ),
        (VariableKind::Int, Value::Float(v)) if from_db && v.fract() == 0.0 => {
            Value::Int(v as i64)
        }

        (VariableKind::Float, Value::Float(v)) => Value::Float(v),
        (VariableKind::Float, Value::Int(v)) => Value::Float(v as f64),
        (VariableKind::Float, Value::Decimal(v)) => Value::Float(
            v.to_f64()
                .ok_or_else(|| Error::value("decimal out of float range"))?,
        ),

        (VariableKind::Decimal, Value::Decimal(v)) => Value::Decimal(v),
        (VariableKind::Decimal, Value::Int(v)) => Value::Decimal(Decimal::from(v)),
        (VariableKind::Decimal, Value::Float(v)) if from_db => Value::Decimal(
            Decimal::from_f64(v).ok_or_else(|| Error::value("float out of decimal range"))?,
        ),
        (VariableKind::Decimal, Value::Text(v)) if from_db => Value::Decimal(
            Decimal::from_str(&v).map_err(|e| Error::value(format!("bad decimal {v:?}: {e}")))?,
        ),

        (VariableKind::Bytes, Value::Bytes(v)) => Value::Bytes(v),
        (VariableKind::Bytes, Value::Text(v)) if from_db => {
            Value::Bytes(v.into_bytes().into_boxed_slice())
        }

        (VariableKind::Text, Value::Text(v)) => Value::Text(v),
        (VariableKind::Text, Value::Bytes(v)) if from_db => Value::Text(
            String::from_utf8(v.into_vec())
                .map_err(|_| Error::value("bytes from the database are not valid UTF-8"))?,
        ),

        (VariableKind::Date, Value::Date(v)) => Value::Date(v),
        (VariableKind::Date, Value::DateTime(v)) => Value::Date(v.date()),
        (VariableKind::Date, Value::Text(v)) if from_db => Value::Date(parse_date(&v)?),

        (VariableKind::Time, Value::Time(v)) => Value::Time(v),
        (VariableKind::Time, Value::DateTime(v)) => Value::Time(v.time()),
        (VariableKind::Time, Value::Text(v)) if from_db => Value::Time(parse_time(&v)?),

        (VariableKind::DateTime { offset }, Value::DateTime(v)) => Value::DateTime(match offset {
            Some(offset) => v.to_offset(*offset),
            None => v,
        }),
        (VariableKind::DateTime { offset }, Value::Int(v)) => {
            let dt = OffsetDateTime::from_unix_timestamp(v)
                .map_err(|e| Error::value(format!("bad unix timestamp {v}: {e}")))?;
            Value::DateTime(dt.to_offset(offset.unwrap_or(UtcOffset::UTC)))
        }
        (VariableKind::DateTime { offset }, Value::Float(v)) => {
            let nanos = (v * 1e9) as i128;
            let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos)
                .map_err(|e| Error::value(format!("bad unix timestamp {v}: {e}")))?;
            Value::DateTime(dt.to_offset(offset.unwrap_or(UtcOffset::UTC)))
        }
        (VariableKind::DateTime { offset }, Value::Text(v)) if from_db => {
            Value::DateTime(parse_datetime(&v, offset.unwrap_or(UtcOffset::UTC))?)
        }

        (VariableKind::TimeDelta, Value::TimeDelta(v)) => Value::TimeDelta(v),
        (VariableKind::TimeDelta, Value::Text(v)) if from_db => {
            Value::TimeDelta(parse_interval(&v)?)
        }

        (VariableKind::Uuid, Value::Uuid(v)) => Value::Uuid(v),
        (VariableKind::Uuid, Value::Text(v)) if from_db => Value::Uuid(
            Uuid::from_str(&v).map_err(|e| Error::value(format!("bad uuid {v:?}: {e}")))?,
        ),

        (VariableKind::Enum { pairs }, value) => {
            if from_db {
                if pairs.iter().any(|(_, stored)| *stored == value) {
                    value
                } else {
                    return Err(Error::value(format!("{value} is not part of the enum")));
                }
            } else {
                pairs
                    .iter()
                    .find(|(exposed, _)| *exposed == value)
                    .map(|(_, stored)| stored.clone())
                    .ok_or_else(|| Error::value(format!("{value} is not part of the enum")))?
            }
        }

        (VariableKind::Json, Value::Json(v)) => Value::Json(v),
        (VariableKind::Json, Value::Text(v)) if from_db => Value::Json(
            serde_json::from_str(&v).map_err(|e| Error::value(format!("bad JSON: {e}")))?,
        ),

        (VariableKind::List { item }, Value::List(values)) => Value::List(
            values
                .into_iter()
                .map(|v| parse_set(&item.kind, v, from_db))
                .collect::<Result<_>>()?,
        ),
        (VariableKind::List { item }, Value::Text(v)) if from_db => {
            let parsed: serde_json::Value =
                serde_json::from_str(&v).map_err(|e| Error::value(format!("bad JSON: {e}")))?;
            let serde_json::Value::Array(items) = parsed else {
                return Err(Error::value("expected a JSON array"));
            };
            Value::List(
                items
                    .into_iter()
                    .map(|v| parse_set(&item.kind, json_to_value(v), true))
                    .collect::<Result<_>>()?,
            )
        }

        (kind, value) => return Err(type_error(kind, &value)),
    })
}

/// Stored form to app (`to_db == false`) or database (`to_db == true`)
/// form, per kind.
fn parse_get(kind: &VariableKind, value: &Value, to_db: bool) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    if !to_db {
        return Ok(match kind {
            VariableKind::Enum { pairs } => pairs
                .iter()
                .find(|(_, stored)| stored == value)
                .map(|(exposed, _)| exposed.clone())
                .ok_or_else(|| Error::value(format!("{value} is not part of the enum")))?,
            _ => value.clone(),
        });
    }
    Ok(match (kind, value) {
        (VariableKind::Date, Value::Date(v)) => Value::Text(format_date(*v)?),
        (VariableKind::Time, Value::Time(v)) => Value::Text(format_time(*v)?),
        (VariableKind::DateTime { .. }, Value::DateTime(v)) => Value::Text(format_datetime(*v)?),
        (VariableKind::TimeDelta, Value::TimeDelta(v)) => Value::Text(format_interval(*v)),
        (VariableKind::Decimal, Value::Decimal(v)) => Value::Text(v.to_string()),
        (VariableKind::Uuid, Value::Uuid(v)) => Value::Text(v.hyphenated().to_string()),
        (VariableKind::Json, Value::Json(v)) => Value::Text(v.to_string()),
        (VariableKind::List { item }, Value::List(values)) => {
            let items = values
                .iter()
                .map(|v| parse_get(&item.kind, v, true).map(value_to_json))
                .collect::<Result<Vec<_>>>()?;
            Value::Text(serde_json::Value::Array(items).to_string())
        }
        (_, value) => value.clone(),
    })
}

fn json_to_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(v) => Value::Bool(v),
        serde_json::Value::Number(v) => match v.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(v.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(v) => Value::Text(v),
        nested => Value::Json(nested),
    }
}

fn value_to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(v) => serde_json::Value::Bool(v),
        Value::Int(v) => serde_json::Value::Number(v.into()),
        Value::Float(v) => serde_json::Number::from_f64(v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(v) => serde_json::Value::String(v),
        Value::Json(v) => v,
        other => serde_json::Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AsValue;

    #[test]
    fn int_accepts_bool_and_whole_decimal() {
        let mut v = VariableFactory::int().build();
        v.set(true.as_value(), false).unwrap();
        assert_eq!(v.get().unwrap(), Value::Int(1));
        v.set(Decimal::from(20).as_value(), false).unwrap();
        assert_eq!(v.get().unwrap(), Value::Int(20));
        assert!(v.set("1".as_value(), false).is_err());
    }

    #[test]
    fn none_violation() {
        let mut v = VariableFactory::int().required().labeled("person.id").build();
        let err = v.set(Value::Null, false).unwrap_err();
        assert!(matches!(err, Error::NoneViolation(..)));
    }

    #[test]
    fn checkpoint_and_has_changed() {
        let mut v = VariableFactory::text().build();
        assert!(!v.has_changed());
        v.set("a".as_value(), false).unwrap();
        assert!(v.has_changed());
        v.checkpoint();
        assert!(!v.has_changed());
        v.set("a".as_value(), false).unwrap();
        assert!(!v.has_changed());
        v.set("b".as_value(), false).unwrap();
        assert!(v.has_changed());
    }

    #[test]
    fn from_db_is_clean() {
        let mut v = VariableFactory::int().build();
        v.set(3.as_value(), true).unwrap();
        assert!(!v.has_changed());
    }

    #[test]
    fn save_and_restore() {
        let mut v = VariableFactory::int().build();
        v.set(1.as_value(), false).unwrap();
        v.save();
        v.set(2.as_value(), false).unwrap();
        v.restore();
        assert_eq!(v.get().unwrap(), Value::Int(1));
    }

    #[test]
    fn enum_maps_both_ways() {
        let factory = VariableFactory::enumeration(vec![
            ("red".as_value(), 1.as_value()),
            ("green".as_value(), 2.as_value()),
        ]);
        let mut v = factory.build();
        v.set("green".as_value(), false).unwrap();
        assert_eq!(v.get_to_db().unwrap(), Value::Int(2));
        assert_eq!(v.get().unwrap(), Value::Text("green".into()));
        assert!(v.set("blue".as_value(), false).is_err());
        v.set(1.as_value(), true).unwrap();
        assert_eq!(v.get().unwrap(), Value::Text("red".into()));
    }

    #[test]
    fn validator_runs_app_side_only() {
        let factory = VariableFactory::int().with_validator(|v| match v {
            Value::Int(i) if i < 0 => Err(Error::value("negative")),
            v => Ok(v),
        });
        let mut v = factory.build();
        assert!(v.set((-2).as_value(), false).is_err());
        v.set((-2).as_value(), true).unwrap();
        assert_eq!(v.get().unwrap(), Value::Int(-2));
    }

    #[test]
    fn lazy_read_is_an_error() {
        let mut v = VariableFactory::int().build();
        v.set_lazy(LazyValue::AutoReload);
        assert!(matches!(v.get(), Err(Error::NotFlushed(..))));
        assert!(v.has_changed());
    }

    #[test]
    fn list_round_trips_through_db_text() {
        let factory = VariableFactory::list(VariableFactory::int());
        let mut v = factory.build();
        v.set(vec![1.as_value(), 2.as_value()].as_value(), false)
            .unwrap();
        assert_eq!(v.get_to_db().unwrap(), Value::Text("[1,2]".into()));
        let mut w = factory.build();
        w.set("[1,2]".as_value(), true).unwrap();
        assert_eq!(w.get().unwrap(), vec![1.as_value(), 2.as_value()].as_value());
    }
}
