//! Table tests

use crate::runtime::table::Table;
use crate::runtime::value::{KeyError, TableKey, Value};

fn keys(table: &Table) -> Vec<Value> {
    table.iter().map(|(k, _)| k).collect()
}

#[test]
fn test_sequence_lives_in_array_part() {
    let mut t = Table::new();
    for i in 1..=5 {
        t.set_int(i, Value::Int(i * 10));
    }
    assert_eq!(t.len(), 5);
    assert_eq!(t.array().len(), 5);
    assert_eq!(t.get_int(3), Value::Int(30));
}

#[test]
fn test_hash_keys_migrate_when_array_reaches_them() {
    let mut t = Table::new();
    t.set_int(3, Value::from("c"));
    t.set_int(2, Value::from("b"));
    assert_eq!(t.len(), 0);
    t.set_int(1, Value::from("a"));
    assert_eq!(t.len(), 3);
    assert_eq!(t.get_int(3), Value::from("c"));
}

#[test]
fn test_float_keys_normalize_to_integers() {
    let mut t = Table::new();
    t.set_value(&Value::Float(1.0), Value::from("one")).unwrap();
    assert_eq!(t.get_int(1), Value::from("one"));
    t.set_value(&Value::Float(1.5), Value::from("half")).unwrap();
    assert_eq!(t.get_value(&Value::Float(1.5)), Value::from("half"));
}

#[test]
fn test_nil_and_nan_keys_are_rejected() {
    let mut t = Table::new();
    assert_eq!(t.set_value(&Value::Nil, Value::Int(1)), Err(KeyError::Nil));
    assert_eq!(
        t.set_value(&Value::Float(f64::NAN), Value::Int(1)),
        Err(KeyError::NaN)
    );
    assert_eq!(t.get_value(&Value::Nil), Value::Nil);
}

#[test]
fn test_iteration_follows_insertion_order() {
    let mut t = Table::new();
    t.set_str("zeta", Value::Int(1));
    t.set_str("alpha", Value::Int(2));
    t.set_str("mid", Value::Int(3));
    t.set_int(1, Value::Bool(true));
    assert_eq!(
        keys(&t),
        vec![
            Value::Int(1),
            Value::from("zeta"),
            Value::from("alpha"),
            Value::from("mid"),
        ]
    );
}

#[test]
fn test_next_survives_clearing_during_traversal() {
    let mut t = Table::new();
    t.set_str("a", Value::Int(1));
    t.set_str("b", Value::Int(2));
    t.set_str("c", Value::Int(3));

    let (k, _) = t.next(&Value::Nil).unwrap().unwrap();
    assert_eq!(k, Value::from("a"));
    t.set_str("a", Value::Nil);
    let (k, _) = t.next(&k).unwrap().unwrap();
    assert_eq!(k, Value::from("b"));
    t.set_str("b", Value::Nil);
    let (k, _) = t.next(&k).unwrap().unwrap();
    assert_eq!(k, Value::from("c"));
    assert_eq!(t.next(&k), Ok(None));
}

#[test]
fn test_next_with_unknown_key_fails() {
    let mut t = Table::new();
    t.set_str("a", Value::Int(1));
    assert!(t.next(&Value::from("missing")).is_err());
}

#[test]
fn test_insert_and_remove_shift_the_sequence() {
    let mut t = Table::new();
    for v in ["a", "c"] {
        let len = t.len() as i64;
        t.set_int(len + 1, Value::from(v));
    }
    t.insert(2, Value::from("b"));
    assert_eq!(t.get_int(2), Value::from("b"));
    assert_eq!(t.len(), 3);
    assert_eq!(t.remove(1), Value::from("a"));
    assert_eq!(t.get_int(1), Value::from("b"));
    assert_eq!(t.len(), 2);
}

#[test]
fn test_clearing_last_element_shrinks_border() {
    let mut t = Table::new();
    t.set_int(1, Value::Int(1));
    t.set_int(2, Value::Int(2));
    t.set_int(2, Value::Nil);
    assert_eq!(t.len(), 1);
    assert!(!t.is_empty());
    t.set_int(1, Value::Nil);
    assert!(t.is_empty());
}

#[test]
fn test_tombstones_are_invisible() {
    let mut t = Table::new();
    t.set(TableKey::str("gone"), Value::Int(1));
    t.set(TableKey::str("gone"), Value::Nil);
    assert!(t.is_empty());
    assert!(keys(&t).is_empty());
    t.compact();
    assert!(t.is_empty());
}
