//! 堆与垃圾回收测试

use std::sync::Arc;

use crate::middle::Proto;
use crate::runtime::gc::{Closure, Heap, HeapObject};
use crate::runtime::table::Table;
use crate::runtime::value::Value;
use crate::vm::{Thread, VMError};

fn empty_proto() -> Arc<Proto> {
    Arc::new(Proto {
        name: "test".to_string(),
        chunk: Arc::from("test"),
        line: 1,
        num_params: 0,
        code: Vec::new(),
        lines: Vec::new(),
        constants: Vec::new(),
        protos: Vec::new(),
        captures: Vec::new(),
    })
}

#[test]
fn test_unreachable_objects_are_freed() {
    let mut heap = Heap::new();
    let root = heap.alloc_table(Table::new());
    let garbage = heap.alloc_table(Table::new());
    let stats = heap.collect(&[Value::Table(root)]);
    assert_eq!(stats.freed, 1);
    assert_eq!(stats.live, 1);
    assert!(heap.contains(root));
    assert!(!heap.contains(garbage));
}

#[test]
fn test_stale_ids_are_detected_after_reuse() {
    let mut heap = Heap::new();
    let old = heap.alloc_table(Table::new());
    heap.collect(&[]);
    let new = heap.alloc_table(Table::new());
    assert_eq!(old.index, new.index);
    assert_ne!(old.generation, new.generation);
    assert!(matches!(heap.table(old), Err(VMError::Dangling(id)) if id == old));
}

#[test]
fn test_marking_follows_tables_closures_cells_and_threads() {
    let mut heap = Heap::new();
    let payload = heap.alloc_table(Table::new());
    let cell = heap.alloc(HeapObject::Cell(Value::Table(payload)));
    let closure = heap.alloc(HeapObject::Closure(Closure {
        proto: empty_proto(),
        upvalues: vec![cell],
    }));
    let thread = heap.alloc(HeapObject::Thread(Some(Box::new(Thread::new(
        Value::Function(closure),
    )))));
    let key_table = heap.alloc_table(Table::new());

    let mut root = Table::new();
    root.set_str("co", Value::Thread(thread));
    root.set_value(&Value::Table(key_table), Value::Bool(true))
        .unwrap();
    let root = heap.alloc_table(root);

    let stats = heap.collect(&[Value::Table(root)]);
    assert_eq!(stats.freed, 0);
    for id in [payload, cell, closure, thread, key_table] {
        assert!(heap.contains(id));
    }
}

#[test]
fn test_cycles_are_collected() {
    let mut heap = Heap::new();
    let a = heap.alloc_table(Table::new());
    let b = heap.alloc_table(Table::new());
    heap.table_mut(a).unwrap().set_str("b", Value::Table(b));
    heap.table_mut(b).unwrap().set_str("a", Value::Table(a));
    let stats = heap.collect(&[]);
    assert_eq!(stats.freed, 2);
    assert_eq!(heap.live_count(), 0);
}

#[test]
fn test_take_thread_twice_reports_running() {
    let mut heap = Heap::new();
    let id = heap.alloc(HeapObject::Thread(Some(Box::new(Thread::new(Value::Nil)))));
    let thread = heap.take_thread(id).unwrap();
    assert!(heap.take_thread(id).is_err());
    heap.put_thread(id, thread).unwrap();
    assert!(heap.thread(id).unwrap().is_some());
}

#[test]
fn test_type_mismatch_is_an_error() {
    let mut heap = Heap::new();
    let id = heap.alloc_table(Table::new());
    assert!(heap.closure(id).is_err());
    assert!(heap.cell(id).is_err());
}
