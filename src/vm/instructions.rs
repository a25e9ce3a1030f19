//! Operator semantics
//!
//! Integers wrap on overflow; `/` and `^` always produce floats; `//` and
//! `%` round toward negative infinity. Numeric strings are coerced for
//! arithmetic but not for comparison.

use std::cmp::Ordering;

use crate::middle::bytecode::BinOp;
use crate::runtime::value::Value;
use crate::vm::errors::{VMError, VMResult};

fn arith_error(
    a: &Value,
    b: &Value,
) -> VMError {
    let culprit = if a.to_numeric().is_none() { a } else { b };
    VMError::Runtime(format!(
        "attempt to perform arithmetic on a {} value",
        culprit.type_name()
    ))
}

fn floor_div(
    a: i64,
    b: i64,
) -> i64 {
    let q = a.wrapping_div(b);
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn floor_mod(
    a: i64,
    b: i64,
) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

fn float_mod(
    a: f64,
    b: f64,
) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

/// Arithmetic operators
pub fn arith(
    op: BinOp,
    a: &Value,
    b: &Value,
) -> VMResult<Value> {
    let (Some(x), Some(y)) = (a.to_numeric(), b.to_numeric()) else {
        return Err(arith_error(a, b));
    };
    if let (Value::Int(x), Value::Int(y)) = (&x, &y) {
        let (x, y) = (*x, *y);
        match op {
            BinOp::Add => return Ok(Value::Int(x.wrapping_add(y))),
            BinOp::Sub => return Ok(Value::Int(x.wrapping_sub(y))),
            BinOp::Mul => return Ok(Value::Int(x.wrapping_mul(y))),
            BinOp::IDiv => {
                if y == 0 {
                    return Err(VMError::runtime("attempt to perform 'n//0'"));
                }
                return Ok(Value::Int(floor_div(x, y)));
            }
            BinOp::Mod => {
                if y == 0 {
                    return Err(VMError::runtime("attempt to perform 'n%%0'"));
                }
                return Ok(Value::Int(floor_mod(x, y)));
            }
            _ => {}
        }
    }
    let (Some(x), Some(y)) = (x.as_number(), y.as_number()) else {
        return Err(arith_error(a, b));
    };
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::IDiv => (x / y).floor(),
        BinOp::Mod => float_mod(x, y),
        BinOp::Pow => x.powf(y),
        other => {
            return Err(VMError::Runtime(format!(
                "operator {:?} is not arithmetic",
                other
            )))
        }
    };
    Ok(Value::Float(result))
}

/// Ordering comparisons, numbers with numbers and strings with strings
pub fn compare(
    op: BinOp,
    a: &Value,
    b: &Value,
) -> VMResult<bool> {
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.as_bytes().cmp(y.as_bytes())),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (Some(x), Some(y)) = (a.as_number(), b.as_number()) else {
                return Ok(false);
            };
            x.partial_cmp(&y)
        }
        _ => {
            return Err(VMError::Runtime(format!(
                "attempt to compare {} with {}",
                a.type_name(),
                b.type_name()
            )))
        }
    };
    // NaN compares false with everything
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        BinOp::Lt => ordering == Ordering::Less,
        BinOp::Le => ordering != Ordering::Greater,
        BinOp::Gt => ordering == Ordering::Greater,
        BinOp::Ge => ordering != Ordering::Less,
        _ => false,
    })
}

pub fn concat(
    a: &Value,
    b: &Value,
) -> VMResult<Value> {
    match (a, b) {
        (Value::Str(_) | Value::Int(_) | Value::Float(_), Value::Str(_) | Value::Int(_) | Value::Float(_)) => {
            let mut out = a.to_string();
            out.push_str(&b.to_string());
            Ok(Value::from(out))
        }
        _ => {
            let culprit = if matches!(a, Value::Str(_) | Value::Int(_) | Value::Float(_)) {
                b
            } else {
                a
            };
            Err(VMError::Runtime(format!(
                "attempt to concatenate a {} value",
                culprit.type_name()
            )))
        }
    }
}

pub fn negate(a: &Value) -> VMResult<Value> {
    match a.to_numeric() {
        Some(Value::Int(v)) => Ok(Value::Int(v.wrapping_neg())),
        Some(Value::Float(v)) => Ok(Value::Float(-v)),
        _ => Err(VMError::Runtime(format!(
            "attempt to perform arithmetic on a {} value",
            a.type_name()
        ))),
    }
}
