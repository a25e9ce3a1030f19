//! Tests for core value types

use crate::runtime::value::*;

fn id(index: u32) -> ObjId {
    ObjId {
        index,
        generation: 0,
    }
}

#[test]
fn test_truthiness() {
    assert!(!Value::Nil.is_truthy());
    assert!(!Value::Bool(false).is_truthy());
    assert!(Value::Bool(true).is_truthy());
    assert!(Value::Int(0).is_truthy());
    assert!(Value::str("").is_truthy());
}

#[test]
fn test_numeric_equality_across_representations() {
    assert_eq!(Value::Int(3), Value::Float(3.0));
    assert_ne!(Value::Int(3), Value::Float(3.5));
    assert_ne!(Value::Int(1), Value::str("1"));
}

#[test]
fn test_reference_equality_respects_type() {
    assert_eq!(Value::Table(id(1)), Value::Table(id(1)));
    assert_ne!(Value::Table(id(1)), Value::Table(id(2)));
    assert_ne!(Value::Table(id(1)), Value::Function(id(1)));
}

#[test]
fn test_float_keys_normalize_to_integers() {
    assert_eq!(
        TableKey::from_value(&Value::Float(2.0)),
        Ok(TableKey::Int(2))
    );
    assert!(matches!(
        TableKey::from_value(&Value::Float(2.5)),
        Ok(TableKey::Float(_))
    ));
    assert_eq!(TableKey::from_value(&Value::Nil), Err(KeyError::Nil));
    assert_eq!(
        TableKey::from_value(&Value::Float(f64::NAN)),
        Err(KeyError::NaN)
    );
}

#[test]
fn test_string_coercion() {
    assert_eq!(Value::str("42").as_integer(), Some(42));
    assert_eq!(Value::str(" 0x10 ").as_integer(), Some(16));
    assert_eq!(Value::str("2.5").as_number(), Some(2.5));
    assert_eq!(Value::str("abc").as_number(), None);
    assert_eq!(Value::Float(7.0).as_integer(), Some(7));
    assert_eq!(Value::Float(7.5).as_integer(), None);
}

#[test]
fn test_display() {
    assert_eq!(Value::Float(1.0).to_string(), "1.0");
    assert_eq!(Value::Float(0.25).to_string(), "0.25");
    assert_eq!(Value::Int(-3).to_string(), "-3");
    assert_eq!(Value::Float(f64::INFINITY).to_string(), "inf");
    assert_eq!(Value::Nil.to_string(), "nil");
}

#[test]
fn test_type_names() {
    assert_eq!(Value::Int(1).type_name(), "number");
    assert_eq!(Value::Float(1.0).type_name(), "number");
    assert_eq!(Value::Table(id(0)).type_name(), "table");
    assert_eq!(Value::Thread(id(0)).type_name(), "thread");
}
