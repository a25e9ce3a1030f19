//! Script-level coroutines
//!
//! `resume` and `yield` never run anything themselves; they return a request
//! the executor carries out by switching threads.

use crate::runtime::gc::HeapObject;
use crate::runtime::value::Value;
use crate::std::{NativeExport, StdModule};
use crate::vm::{NativeCtx, NativeReturn, Thread, VMError, VMResult};

/// Coroutine module implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoroutineModule;

impl StdModule for CoroutineModule {
    fn module_path(&self) -> Option<&'static str> {
        Some("coroutine")
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new("create", "coroutine.create", native_create),
            NativeExport::new("isyieldable", "coroutine.isyieldable", native_isyieldable),
            NativeExport::new("resume", "coroutine.resume", native_resume),
            NativeExport::new("status", "coroutine.status", native_status),
            NativeExport::new("yield", "coroutine.yield", native_yield),
        ]
    }
}

fn native_create(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    match args.first() {
        Some(function @ Value::Function(_)) => {
            let thread = Thread::new(function.clone());
            let id = ctx.heap.alloc(HeapObject::Thread(Some(Box::new(thread))));
            Ok(NativeReturn::one(Value::Thread(id)))
        }
        _ => Err(ctx.arg_error(1, "script function expected")),
    }
}

fn native_resume(
    ctx: &mut NativeCtx<'_>,
    mut args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let thread = ctx.check_thread(&args, 1)?;
    args.remove(0);
    Ok(NativeReturn::Resume { thread, args })
}

fn native_yield(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    if !ctx.is_yieldable() {
        return Err(VMError::runtime("attempt to yield from outside a coroutine"));
    }
    Ok(NativeReturn::Yield(args))
}

fn native_status(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let thread = ctx.check_thread(&args, 1)?;
    Ok(NativeReturn::one(ctx.thread_status(thread)?.as_str()))
}

fn native_isyieldable(
    ctx: &mut NativeCtx<'_>,
    _args: Vec<Value>,
) -> VMResult<NativeReturn> {
    Ok(NativeReturn::one(ctx.is_yieldable()))
}
