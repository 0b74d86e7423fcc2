use crate::{BinOp, Error, Expr, Result, Value};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use std::cmp::Ordering;

/// Evaluates an expression against in-memory column values instead of the
/// database. This is how bulk updates are replayed onto cached objects and
/// how `cached()` filters the identity map. Supports parameters, columns,
/// boolean connectives, comparisons, IN and basic arithmetic; anything
/// else (subqueries, LIKE, SQL functions) reports a compile error so the
/// caller can fall back to invalidation.
pub fn eval_local(expr: &Expr, get: &dyn Fn(&str) -> Option<Value>) -> Result<Value> {
    match expr {
        Expr::Param { value, .. } => Ok(value.clone()),
        Expr::Column(column) => Ok(get(&column.name).unwrap_or(Value::Null)),
        Expr::And(items) => {
            for item in items {
                if !truthy(&eval_local(item, get)?)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        Expr::Or(items) => {
            for item in items {
                if truthy(&eval_local(item, get)?)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval_local(inner, get)?)?)),
        Expr::Neg(inner) => match eval_local(inner, get)? {
            Value::Int(v) => v
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| unsupported("arithmetic out of range")),
            Value::Float(v) => Ok(Value::Float(-v)),
            Value::Decimal(v) => Ok(Value::Decimal(-v)),
            other => Err(unsupported(&format!("negating a {}", other.type_name()))),
        },
        Expr::In { left, items } => {
            let needle = eval_local(left, get)?;
            for item in items {
                if eval_local(item, get)? == needle {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Expr::Bin { op, left, right } => {
            let left = eval_local(left, get)?;
            let right = eval_local(right, get)?;
            eval_bin(*op, left, right)
        }
        other => Err(unsupported(&format!("{:?} nodes", other.kind()))),
    }
}

/// [`eval_local`] reduced to a predicate.
pub fn match_local(expr: &Expr, get: &dyn Fn(&str) -> Option<Value>) -> Result<bool> {
    truthy(&eval_local(expr, get)?)
}

fn unsupported(what: &str) -> Error {
    Error::compile(format!("cannot evaluate {what} locally"))
}

fn truthy(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(v) => Ok(*v),
        Value::Null => Ok(false),
        Value::Int(v) => Ok(*v != 0),
        Value::Float(v) => Ok(*v != 0.0),
        other => Err(unsupported(&format!(
            "a {} as a condition",
            other.type_name()
        ))),
    }
}

fn eval_bin(op: BinOp, left: Value, right: Value) -> Result<Value> {
    match op {
        // NULL compares equal to NULL here: this mirrors in-memory
        // semantics, where an unset column genuinely is nothing.
        BinOp::Eq => Ok(Value::Bool(left == right)),
        BinOp::Ne => Ok(Value::Bool(left != right)),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let Some(ordering) = compare(&left, &right) else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering == Ordering::Less,
                BinOp::Gt => ordering == Ordering::Greater,
                BinOp::Le => ordering != Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            arithmetic(op, left, right)
        }
        BinOp::LShift | BinOp::RShift => match (left, right) {
            (Value::Int(a), Value::Int(b)) => u32::try_from(b)
                .ok()
                .and_then(|amount| match op {
                    BinOp::LShift => a.checked_shl(amount),
                    _ => a.checked_shr(amount),
                })
                .map(Value::Int)
                .ok_or_else(|| unsupported("a shift out of range")),
            _ => Err(unsupported("shifts on non-integers")),
        },
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
        (Value::Decimal(a), Value::Int(b)) => Some(a.cmp(&Decimal::from(*b))),
        (Value::Int(a), Value::Decimal(b)) => Some(Decimal::from(*a).cmp(b)),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        (Value::TimeDelta(a), Value::TimeDelta(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn arithmetic(op: BinOp, left: Value, right: Value) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            if b == 0 && matches!(op, BinOp::Div | BinOp::Mod) {
                return Err(unsupported("a division by zero"));
            }
            match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => a.checked_div(b),
                _ => a.checked_rem(b),
            }
            .map(Value::Int)
            .ok_or_else(|| unsupported("arithmetic out of range"))
        }
        (Value::Decimal(a), Value::Decimal(b)) => {
            if b.is_zero() && matches!(op, BinOp::Div | BinOp::Mod) {
                return Err(unsupported("a division by zero"));
            }
            match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => a.checked_div(b),
                _ => a.checked_rem(b),
            }
            .map(Value::Decimal)
            .ok_or_else(|| unsupported("arithmetic out of range"))
        }
        (a, b) => {
            let (a, b) = (as_float(&a), as_float(&b));
            match (a, b) {
                (Some(a), Some(b)) => Ok(Value::Float(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    _ => a % b,
                })),
                _ => Err(unsupported("arithmetic on non-numbers")),
            }
        }
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(v) => Some(*v as f64),
        Value::Float(v) => Some(*v),
        Value::Decimal(v) => v.to_f64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_columns(_: &str) -> Option<Value> {
        None
    }

    fn eval(expr: &Expr) -> Result<Value> {
        eval_local(expr, &no_columns)
    }

    #[test]
    fn integer_division_by_zero_is_an_error() {
        let division = Expr::value(1) / Expr::value(0);
        assert!(matches!(eval(&division), Err(Error::Compile(..))));
        let remainder = Expr::value(1) % Expr::value(0);
        assert!(matches!(eval(&remainder), Err(Error::Compile(..))));
    }

    #[test]
    fn decimal_division_by_zero_is_an_error() {
        let division = Expr::value(Decimal::ONE) / Expr::value(Decimal::ZERO);
        assert!(matches!(eval(&division), Err(Error::Compile(..))));
        let remainder = Expr::value(Decimal::ONE) % Expr::value(Decimal::ZERO);
        assert!(matches!(eval(&remainder), Err(Error::Compile(..))));
    }

    #[test]
    fn decimal_arithmetic_stays_decimal() {
        let quotient = Expr::value(Decimal::from(5)) / Expr::value(Decimal::from(2));
        assert_eq!(
            eval(&quotient).unwrap(),
            Value::Decimal(Decimal::from(5) / Decimal::from(2)),
        );
    }

    #[test]
    fn mixed_operands_fall_back_to_float() {
        let sum = Expr::value(Decimal::from(2)) + Expr::value(3);
        assert_eq!(eval(&sum).unwrap(), Value::Float(5.0));
    }

    #[test]
    fn overflowing_arithmetic_is_an_error() {
        let division = Expr::value(i64::MIN) / Expr::value(-1);
        assert!(matches!(eval(&division), Err(Error::Compile(..))));
        let negation = Expr::Neg(Box::new(Expr::value(i64::MIN)));
        assert!(matches!(eval(&negation), Err(Error::Compile(..))));
        let product = Expr::value(i64::MAX) * Expr::value(2);
        assert!(matches!(eval(&product), Err(Error::Compile(..))));
    }

    #[test]
    fn oversized_shifts_are_an_error() {
        let shift = Expr::value(1) << Expr::value(64);
        assert!(matches!(eval(&shift), Err(Error::Compile(..))));
        let negative = Expr::value(1) >> Expr::value(-1);
        assert!(matches!(eval(&negative), Err(Error::Compile(..))));
        let shift = Expr::value(1) << Expr::value(3);
        assert_eq!(eval(&shift).unwrap(), Value::Int(8));
    }
}
