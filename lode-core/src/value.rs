use crate::{format_date, format_datetime, format_time, write_interval};
use rust_decimal::Decimal;
use std::{
    fmt::{self, Display, Write},
    hash::{Hash, Hasher},
    mem::discriminant,
};
use time::{Date, Duration, OffsetDateTime, Time};
use uuid::Uuid;

/// A dynamically typed value moving between variables, query parameters and
/// result rows. This is the common currency of the whole crate: columns
/// store it, the compiler binds it positionally, drivers receive and
/// produce it.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Bytes(Box<[u8]>),
    Text(String),
    Date(Date),
    Time(Time),
    DateTime(OffsetDateTime),
    TimeDelta(Duration),
    Uuid(Uuid),
    Json(serde_json::Value),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(..) => "bool",
            Value::Int(..) => "int",
            Value::Float(..) => "float",
            Value::Decimal(..) => "decimal",
            Value::Bytes(..) => "bytes",
            Value::Text(..) => "text",
            Value::Date(..) => "date",
            Value::Time(..) => "time",
            Value::DateTime(..) => "datetime",
            Value::TimeDelta(..) => "timedelta",
            Value::Uuid(..) => "uuid",
            Value::Json(..) => "json",
            Value::List(..) => "list",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // Bitwise so that Value can also be Eq and Hash.
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::TimeDelta(a), Value::TimeDelta(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Decimal(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Text(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Time(v) => v.hash(state),
            Value::DateTime(v) => v.hash(state),
            Value::TimeDelta(v) => v.hash(state),
            Value::Uuid(v) => v.hash(state),
            Value::Json(v) => v.to_string().hash(state),
            Value::List(v) => v.hash(state),
        }
    }
}

/// Renders the value the way it would read inline in SQL. Used by tracers
/// and log lines, never to build real statements (those bind parameters).
impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => f.write_str(if *v { "TRUE" } else { "FALSE" }),
            Value::Int(v) => f.write_str(itoa::Buffer::new().format(*v)),
            Value::Float(v) => f.write_str(ryu::Buffer::new().format(*v)),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "X'{}'", hex::encode_upper(v)),
            Value::Text(v) => write_quoted(f, v),
            Value::Date(v) => match format_date(*v) {
                Ok(s) => write_quoted(f, &s),
                Err(..) => f.write_str("'<date>'"),
            },
            Value::Time(v) => match format_time(*v) {
                Ok(s) => write_quoted(f, &s),
                Err(..) => f.write_str("'<time>'"),
            },
            Value::DateTime(v) => match format_datetime(*v) {
                Ok(s) => write_quoted(f, &s),
                Err(..) => f.write_str("'<datetime>'"),
            },
            Value::TimeDelta(v) => {
                let mut out = String::new();
                write_interval(&mut out, *v)?;
                write_quoted(f, &out)
            }
            Value::Uuid(v) => write!(f, "'{}'", v),
            Value::Json(v) => write_quoted(f, &v.to_string()),
            Value::List(v) => {
                f.write_char('(')?;
                let mut first = true;
                for item in v {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{}", item)?;
                }
                f.write_char(')')
            }
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    f.write_char('\'')?;
    let mut parts = text.split('\'');
    if let Some(first) = parts.next() {
        f.write_str(first)?;
    }
    for part in parts {
        f.write_str("''")?;
        f.write_str(part)?;
    }
    f.write_char('\'')
}

/// Conversion of plain Rust values into [`Value`]. Implemented for the
/// primitives, for the temporal and decimal types and for `Option` of all
/// of those (where `None` becomes `Value::Null`).
pub trait AsValue {
    fn as_value(self) -> Value;
}

macro_rules! impl_as_value {
    ($type:ty, $variant:ident) => {
        impl_as_value!($type, $variant, |v: $type| v);
    };
    ($type:ty, $variant:ident, $conv:expr) => {
        impl AsValue for $type {
            fn as_value(self) -> Value {
                Value::$variant(($conv)(self))
            }
        }
        impl AsValue for Option<$type> {
            fn as_value(self) -> Value {
                match self {
                    Some(v) => v.as_value(),
                    None => Value::Null,
                }
            }
        }
    };
}

impl_as_value!(bool, Bool);
impl_as_value!(i8, Int, |v| v as i64);
impl_as_value!(i16, Int, |v| v as i64);
impl_as_value!(i32, Int, |v| v as i64);
impl_as_value!(i64, Int);
impl_as_value!(u8, Int, |v| v as i64);
impl_as_value!(u16, Int, |v| v as i64);
impl_as_value!(u32, Int, |v| v as i64);
impl_as_value!(f32, Float, |v| v as f64);
impl_as_value!(f64, Float);
impl_as_value!(Decimal, Decimal);
impl_as_value!(String, Text);
impl_as_value!(&str, Text, |v: &str| v.to_string());
impl_as_value!(Vec<u8>, Bytes, Vec::into_boxed_slice);
impl_as_value!(&[u8], Bytes, |v: &[u8]| v.to_vec().into_boxed_slice());
impl_as_value!(Date, Date);
impl_as_value!(Time, Time);
impl_as_value!(OffsetDateTime, DateTime);
impl_as_value!(Duration, TimeDelta);
impl_as_value!(Uuid, Uuid);
impl_as_value!(serde_json::Value, Json);
impl_as_value!(Vec<Value>, List);

impl AsValue for Value {
    fn as_value(self) -> Value {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_values_hash_consistently() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Value::Float(1.5));
        assert!(set.contains(&1.5f64.as_value()));
        assert!(!set.contains(&Value::Float(2.5)));
    }

    #[test]
    fn display_escapes_quotes() {
        assert_eq!(Value::Text("it's".into()).as_value().to_string(), "'it''s'");
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Bool(true).to_string(), "TRUE");
    }

    #[test]
    fn option_none_becomes_null() {
        let v: Option<i32> = None;
        assert!(v.as_value().is_null());
        assert_eq!(Some(7).as_value(), Value::Int(7));
    }
}
