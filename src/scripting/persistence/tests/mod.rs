//! Environment persistence tests

use crate::frontend;
use crate::game::MemoryFilesystem;
use crate::runtime::value::Value;
use crate::scripting::{CoroutineHandle, CoroutineStatus, GameDataError, ScriptEngineState};
use crate::util::config::ScriptingConfig;
use crate::vm::LocalHost;

fn engine() -> ScriptEngineState {
    ScriptEngineState::new(&ScriptingConfig::default(), Box::new(MemoryFilesystem::new())).unwrap()
}

/// Run a chunk directly in the engine's interpreter
fn exec(
    engine: &mut ScriptEngineState,
    src: &str,
) -> Vec<Value> {
    let vm = engine.vm_mut();
    let function = vm.load(frontend::compile(src, "persist").unwrap()).unwrap();
    vm.call(function, Vec::new(), &mut LocalHost::default())
        .unwrap()
}

fn exec_one(
    engine: &mut ScriptEngineState,
    src: &str,
) -> Value {
    exec(engine, src).into_iter().next().unwrap_or_default()
}

fn dump(engine: &mut ScriptEngineState) -> Vec<u8> {
    let mut out = Vec::new();
    let written = engine.write_global_env(&mut out).unwrap();
    assert_eq!(written, out.len());
    out
}

fn restored(data: &[u8]) -> ScriptEngineState {
    let mut engine = engine();
    engine.read_global_env(data).unwrap();
    engine
}

/// Coroutine over global `name`, resumed once
fn started(
    engine: &mut ScriptEngineState,
    name: &str,
) -> CoroutineHandle {
    let f = engine.vm().global(name).unwrap();
    let mut handle = engine.new_coroutine(f).unwrap();
    engine.resume(&mut handle, &mut LocalHost::default()).unwrap();
    handle
}

fn save_coroutine(
    engine: &ScriptEngineState,
    handle: &CoroutineHandle,
) -> Vec<u8> {
    let mut out = Vec::new();
    engine.write_coroutine(handle, &mut out).unwrap();
    out
}

#[test]
fn test_tables_keep_shape_and_sharing() {
    let mut source = engine();
    exec(
        &mut source,
        r#"
data = { 1, 2.5, "three", true, nested = { deep = "yes" }, [10] = "sparse" }
data.self = data
data.alias = data.nested
negzero = -0.0
big = 9007199254740993
"#,
    );
    let blob = dump(&mut source);
    let mut target = restored(&blob);

    let checks = exec(
        &mut target,
        r#"
return data[1], data[2], data[3], data[4], data.nested.deep, data[10],
       data.self == data, data.alias == data.nested, 1 / negzero, big
"#,
    );
    assert_eq!(
        checks,
        vec![
            Value::Int(1),
            Value::Float(2.5),
            Value::str("three"),
            Value::Bool(true),
            Value::str("yes"),
            Value::str("sparse"),
            Value::Bool(true),
            Value::Bool(true),
            Value::Float(f64::NEG_INFINITY),
            Value::Int(9007199254740993),
        ]
    );
}

#[test]
fn test_libraries_are_relinked_not_copied() {
    let mut source = engine();
    exec(&mut source, "my_math = math my_print = print my_upper_holder = string");
    let blob = dump(&mut source);
    let mut target = restored(&blob);
    assert_eq!(
        exec(
            &mut target,
            "return my_math == math, my_print == print, my_upper_holder.upper('x')"
        ),
        vec![Value::Bool(true), Value::Bool(true), Value::str("X")]
    );
}

#[test]
fn test_closures_share_upvalues_after_restore() {
    let mut source = engine();
    exec(
        &mut source,
        r#"
local n = 40
function inc() n = n + 1 return n end
function get() return n end
inc()
"#,
    );
    let blob = dump(&mut source);
    let mut target = restored(&blob);
    assert_eq!(exec_one(&mut target, "inc() return get()"), Value::Int(42));
    // the source interpreter is untouched
    assert_eq!(exec_one(&mut source, "return get()"), Value::Int(41));
}

#[test]
fn test_suspended_coroutine_resumes_after_restore() {
    let mut source = engine();
    exec(
        &mut source,
        r#"
function count_up()
  local total = 0
  for i = 1, 3 do
    total = total + i
    coroutine.yield(total)
  end
  return "done"
end
"#,
    );
    let mut handle = started(&mut source, "count_up");
    assert_eq!(handle.pop_uint32(source.vm_mut()).unwrap(), 1);
    let env = dump(&mut source);
    let sub = save_coroutine(&source, &handle);

    let mut target = restored(&env);
    let mut copy = target.read_coroutine(&mut sub.as_slice()).unwrap();
    assert_eq!(copy.registry_index(), handle.registry_index());
    let host = &mut LocalHost::default();
    for expected in [3, 6] {
        assert_eq!(target.resume(&mut copy, host).unwrap(), CoroutineStatus::Suspended);
        assert_eq!(copy.pop_uint32(target.vm_mut()).unwrap(), expected);
    }
    assert_eq!(target.resume(&mut copy, host).unwrap(), CoroutineStatus::Completed);
    assert_eq!(copy.pop_string(target.vm_mut()).unwrap(), "done");

    // the original keeps running independently
    source.resume(&mut handle, host).unwrap();
    assert_eq!(handle.pop_uint32(source.vm_mut()).unwrap(), 3);
}

#[test]
fn test_pending_returns_survive_restore() {
    let mut source = engine();
    exec(&mut source, "function pair() coroutine.yield('first', 'second') end");
    let mut handle = started(&mut source, "pair");
    assert_eq!(handle.pop_string(source.vm_mut()).unwrap(), "second");
    let env = dump(&mut source);
    let sub = save_coroutine(&source, &handle);

    let mut target = restored(&env);
    let mut copy = target.read_coroutine(&mut sub.as_slice()).unwrap();
    assert_eq!(copy.pending_returns(), 1);
    assert_eq!(copy.pop_string(target.vm_mut()).unwrap(), "first");
}

#[test]
fn test_pairs_loop_survives_removal_and_restore() {
    let mut source = engine();
    exec(
        &mut source,
        r#"
function drain()
  local t = { a = 1, b = 2, c = 3 }
  for k in pairs(t) do
    t[k] = nil
    coroutine.yield(k)
  end
end
"#,
    );
    let mut handle = started(&mut source, "drain");
    assert_eq!(handle.pop_string(source.vm_mut()).unwrap(), "a");
    let env = dump(&mut source);
    let sub = save_coroutine(&source, &handle);

    let mut target = restored(&env);
    let mut copy = target.read_coroutine(&mut sub.as_slice()).unwrap();
    let host = &mut LocalHost::default();
    let mut keys = Vec::new();
    while target.resume(&mut copy, host).unwrap() == CoroutineStatus::Suspended {
        keys.push(copy.pop_string(target.vm_mut()).unwrap());
    }
    assert_eq!(keys, vec!["b", "c"]);
}

#[test]
fn test_textdomains_persist_with_coroutine() {
    let mut source = engine();
    exec(
        &mut source,
        "function domain() push_textdomain('campaign') coroutine.yield() coroutine.yield(current_textdomain()) end",
    );
    let handle = started(&mut source, "domain");
    let env = dump(&mut source);
    let sub = save_coroutine(&source, &handle);

    let mut target = restored(&env);
    let mut copy = target.read_coroutine(&mut sub.as_slice()).unwrap();
    assert_eq!(copy.textdomains(), ["campaign".to_string()]);
    target.resume(&mut copy, &mut LocalHost::default()).unwrap();
    assert_eq!(copy.pop_string(target.vm_mut()).unwrap(), "campaign");
}

#[test]
fn test_engine_objects_restore_through_restorer() {
    let mut source = engine();
    exec(&mut source, "home = wl.Field(3, 4) again = home");
    let blob = dump(&mut source);
    let mut target = restored(&blob);
    let checks = exec(
        &mut target,
        "local n = home:neighbour(1, 1) return home.x, home.y, n.x, n.y, again == home",
    );
    assert_eq!(
        checks,
        vec![
            Value::Int(3),
            Value::Int(4),
            Value::Int(4),
            Value::Int(5),
            Value::Bool(true),
        ]
    );
}

#[test]
fn test_loose_native_cannot_be_persisted() {
    let mut source = engine();
    exec(&mut source, "shout = string.upper");
    let mut out = Vec::new();
    let err = source.write_global_env(&mut out).unwrap_err();
    assert!(matches!(err, GameDataError::Persistence(_)));
    assert!(err.to_string().contains("cannot persist native function 'string.upper'"));
}

#[test]
fn test_header_checks() {
    let mut source = engine();
    let blob = dump(&mut source);
    let mut target = engine();

    let mut bad_magic = blob.clone();
    bad_magic[0] = b'X';
    assert!(target
        .read_global_env(&bad_magic)
        .unwrap_err()
        .to_string()
        .contains("not an environment dump"));

    let mut bad_version = blob.clone();
    bad_version[4] = 2;
    assert!(matches!(
        target.read_global_env(&bad_version),
        Err(GameDataError::Version(_))
    ));

    let mut long_list = blob.clone();
    long_list[7..9].copy_from_slice(&999u16.to_le_bytes());
    assert!(matches!(
        target.read_global_env(&long_list),
        Err(GameDataError::Version(_))
    ));

    let mut trailing = blob.clone();
    trailing.push(0);
    assert!(target
        .read_global_env(&trailing)
        .unwrap_err()
        .to_string()
        .contains("bytes left"));

    assert!(target.read_global_env(&blob[..blob.len() - 1]).is_err());
}

#[test]
fn test_failed_restore_keeps_current_environment() {
    let mut source = engine();
    exec(&mut source, "payload = { 'from the blob' }");
    let mut blob = dump(&mut source);
    blob.truncate(blob.len() - 3);

    let mut target = engine();
    exec(&mut target, "marker = 'still here'");
    assert!(target.read_global_env(&blob).is_err());
    assert_eq!(exec_one(&mut target, "return marker"), Value::str("still here"));
    assert!(exec_one(&mut target, "return payload").is_nil());
}

#[test]
fn test_dump_is_deterministic() {
    let mut a = engine();
    let mut b = engine();
    let src = "t = { x = 1, y = { 2, 3 } } function f() return t end";
    exec(&mut a, src);
    exec(&mut b, src);
    assert_eq!(dump(&mut a), dump(&mut b));
}

#[test]
fn test_corrupt_instruction_fails_restore() {
    let mut source = engine();
    exec(&mut source, "function relay() return tostring(7) end");
    let mut blob = dump(&mut source);

    // Return { count: 1, multi: true } -> count 0
    let needle = [25u8, 1, 0, 1];
    let mut patched = 0;
    let mut i = 0;
    while i + needle.len() <= blob.len() {
        if blob[i..i + needle.len()] == needle {
            blob[i + 1] = 0;
            patched += 1;
        }
        i += 1;
    }
    assert!(patched > 0);

    let mut target = engine();
    assert!(matches!(
        target.read_global_env(&blob),
        Err(GameDataError::Persistence(_)) | Err(GameDataError::Script(_))
    ));
    assert!(exec_one(&mut target, "return relay").is_nil());
}
