//! Standard library tests

use std::collections::HashMap;
use std::sync::Arc;

use crate::frontend;
use crate::middle::Proto;
use crate::runtime::value::Value;
use crate::std::{install, modules};
use crate::vm::{HostServices, LocalHost, VMResult, VM};

fn run_with(
    host: &mut dyn HostServices,
    src: &str,
) -> VMResult<Vec<Value>> {
    let mut vm = VM::new();
    install(&mut vm).unwrap();
    let function = vm.load(frontend::compile(src, "std").unwrap()).unwrap();
    vm.call(function, Vec::new(), host)
}

fn run(src: &str) -> VMResult<Vec<Value>> {
    run_with(&mut LocalHost::default(), src)
}

fn first(src: &str) -> Value {
    run(src).unwrap().into_iter().next().unwrap_or_default()
}

/// Serves `include` from an in-memory file map
#[derive(Default)]
struct FileHost {
    files: HashMap<&'static str, &'static str>,
}

impl HostServices for FileHost {
    fn random_u32(&mut self) -> u32 {
        4
    }

    fn gametime(&self) -> u64 {
        0
    }

    fn player_numbers(&self) -> Vec<u8> {
        Vec::new()
    }

    fn send_message(
        &mut self,
        _player: u8,
        _title: &str,
        _body: &str,
    ) -> Result<(), String> {
        Ok(())
    }

    fn load_chunk(
        &mut self,
        path: &str,
    ) -> Result<Arc<Proto>, String> {
        let source = self
            .files
            .get(path)
            .ok_or_else(|| format!("no such file '{}'", path))?;
        frontend::compile(source, path).map_err(|e| e.to_string())
    }
}

#[test]
fn test_every_export_is_installed() {
    let mut vm = VM::new();
    install(&mut vm).unwrap();
    for module in modules() {
        let holder = match module.module_path() {
            Some(path) => match vm.global(path).unwrap() {
                Value::Table(id) => id,
                other => panic!("{} is a {}", path, other.type_name()),
            },
            None => vm.globals(),
        };
        for export in module.exports() {
            let value = vm.heap.table(holder).unwrap().get_str(export.short_name);
            assert_eq!(value, Value::Native(export.native), "{}", export.native.name);
        }
    }
    assert!(matches!(first("return math.pi"), Value::Float(p) if p == std::f64::consts::PI));
}

#[test]
fn test_hidden_iterators_are_not_globals() {
    assert_eq!(first("return pairs_iterator"), Value::Nil);
    let values = run("local f = pairs({}) return type(f), f == next").unwrap();
    assert_eq!(values, vec![Value::from("function"), Value::Bool(false)]);
}

#[test]
fn test_select() {
    assert_eq!(first("return select('#', 'a', nil, 'c')"), Value::Int(3));
    assert_eq!(
        run("return select(-1, 'a', 'b')").unwrap(),
        vec![Value::from("b")]
    );
    assert_eq!(run("return select(5, 'a')").unwrap(), Vec::<Value>::new());
    let err = run("return select(0, 'a')").unwrap_err().to_string();
    assert!(err.contains("bad argument #1 to 'select' (index out of range)"), "{}", err);
}

#[test]
fn test_next_walks_whole_table() {
    let src = "
        local t = {10, 20, x = 'y'}
        local count, k = 0, nil
        repeat
            k = next(t, k)
            if k ~= nil then count = count + 1 end
        until k == nil
        return count, next({})
    ";
    assert_eq!(run(src).unwrap(), vec![Value::Int(3), Value::Nil]);
}

#[test]
fn test_tostring_of_reference_types() {
    let text = first("return tostring({})");
    assert!(text.as_str().unwrap().starts_with("table: "));
    assert_eq!(first("return tostring(nil) .. tostring(true)"), Value::from("niltrue"));
}

#[test]
fn test_error_with_table_value_keeps_identity() {
    let src = "
        local marker = {}
        local ok, e = pcall(function() error(marker) end)
        return ok, e == marker
    ";
    assert_eq!(run(src).unwrap(), vec![Value::Bool(false), Value::Bool(true)]);
}

#[test]
fn test_include_runs_chunk_with_shared_globals() {
    let mut host = FileHost::default();
    host.files.insert("lib.lua", "shared = 'from lib' return 1, 2");
    let values = run_with(&mut host, "local a, b = include('lib.lua') return a + b, shared").unwrap();
    assert_eq!(values, vec![Value::Int(3), Value::from("from lib")]);

    let err = run_with(&mut host, "include('missing.lua')").unwrap_err();
    assert_eq!(err.to_string(), "std:1: no such file 'missing.lua'");
}

#[test]
fn test_include_without_loader_fails() {
    let err = run("include('x.lua')").unwrap_err().to_string();
    assert!(err.contains("no script loader"), "{}", err);
}

#[test]
fn test_format_conversions() {
    assert_eq!(first("return string.format('%x %X %o', 255, 255, 8)"), Value::from("ff FF 10"));
    assert_eq!(first("return string.format('%q', 'a\"b')"), Value::from("\"a\\\"b\""));
    assert_eq!(first("return string.format('%.3e', 1234.56)"), Value::from("1.235e+03"));
    assert_eq!(first("return string.format('%+d %5s|', 3, 'ab')"), Value::from("+3    ab|"));
    assert_eq!(first("return string.format('%c%c', 72, 105)"), Value::from("Hi"));
    assert_eq!(first("return string.format('100%%')"), Value::from("100%"));
    let err = run("return string.format('%y', 1)").unwrap_err().to_string();
    assert!(err.contains("invalid conversion '%y'"), "{}", err);
}

#[test]
fn test_format_reports_missing_argument() {
    let err = run("return string.format('%d')").unwrap_err().to_string();
    assert!(err.contains("bad argument #2 to 'format'"), "{}", err);
}

#[test]
fn test_find_is_literal() {
    assert_eq!(
        run("return string.find('a.b.c', '.', 3)").unwrap(),
        vec![Value::Int(4), Value::Int(4)]
    );
    assert_eq!(first("return string.find('abc', 'z')"), Value::Nil);
}

#[test]
fn test_concat_rejects_non_strings() {
    let err = run("return table.concat({1, {}, 3})").unwrap_err().to_string();
    assert!(err.contains("invalid value (at index 2) in table for 'concat' (table)"), "{}", err);
}

#[test]
fn test_remove_from_empty_and_out_of_bounds() {
    assert_eq!(first("return table.remove({})"), Value::Nil);
    let err = run("return table.remove({1, 2}, 7)").unwrap_err().to_string();
    assert!(err.contains("position out of bounds"), "{}", err);
}

#[test]
fn test_random_stays_in_bounds() {
    let values = run("return math.random(10), math.random(0, 1)").unwrap();
    let a = values[0].as_integer().unwrap();
    let b = values[1].as_integer().unwrap();
    assert!((1..=10).contains(&a));
    assert!((0..=1).contains(&b));

    let err = run("return math.random(5, 1)").unwrap_err().to_string();
    assert!(err.contains("interval is empty"), "{}", err);
}

#[test]
fn test_coroutine_create_needs_script_function() {
    let err = run("coroutine.create(print)").unwrap_err().to_string();
    assert!(err.contains("bad argument #1 to 'create' (script function expected)"), "{}", err);
}

#[test]
fn test_unpack_limits() {
    assert_eq!(run("return table.unpack({1, 2, 3}, 2)").unwrap(), vec![Value::Int(2), Value::Int(3)]);
    let err = run("return table.unpack({}, 1, 1e7)").unwrap_err().to_string();
    assert!(err.contains("too many results to unpack"), "{}", err);
}

#[test]
fn test_string_methods_through_metatable_free_lookup() {
    assert_eq!(first("local s = 'Hello' return s:lower() .. s:len()"), Value::from("hello5"));
}

#[test]
fn test_module_tables_are_distinct() {
    let values = run("return string ~= table, type(math.huge)").unwrap();
    assert_eq!(values, vec![Value::Bool(true), Value::from("number")]);
}
