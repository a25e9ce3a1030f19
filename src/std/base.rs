//! Base functions (`print`, `pairs`, `pcall`, ...)

use tracing::info;

use crate::runtime::gc::{Closure, HeapObject};
use crate::runtime::value::{parse_number, NativeRef, Value};
use crate::std::{NativeExport, StdModule};
use crate::vm::{NativeCtx, NativeReturn, VMError, VMResult};

/// Iterator returned by `pairs`
pub const PAIRS_ITERATOR: NativeRef = NativeRef::new("pairs_iterator", native_pairs_iterator);

/// Iterator returned by `ipairs`
pub const IPAIRS_ITERATOR: NativeRef = NativeRef::new("ipairs_iterator", native_ipairs_iterator);

/// Base module implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseModule;

impl StdModule for BaseModule {
    fn module_path(&self) -> Option<&'static str> {
        None
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new("assert", "assert", native_assert),
            NativeExport::new("error", "error", native_error),
            NativeExport::new("include", "include", native_include),
            NativeExport::new("ipairs", "ipairs", native_ipairs),
            NativeExport::new("next", "next", native_next),
            NativeExport::new("pairs", "pairs", native_pairs),
            NativeExport::new("pcall", "pcall", native_pcall),
            NativeExport::new("print", "print", native_print),
            NativeExport::new("select", "select", native_select),
            NativeExport::new("tonumber", "tonumber", native_tonumber),
            NativeExport::new("tostring", "tostring", native_tostring),
            NativeExport::new("type", "type", native_type),
        ]
    }

    fn hidden(&self) -> Vec<NativeRef> {
        vec![PAIRS_ITERATOR, IPAIRS_ITERATOR]
    }
}

/// Error carrying an arbitrary script value
pub(crate) fn throw(value: Value) -> VMError {
    VMError::Thrown {
        message: VMError::describe(&value),
        value,
        traceback: Vec::new(),
    }
}

fn native_assert(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let value = ctx.check_any(&args, 1)?;
    if value.is_truthy() {
        return Ok(NativeReturn::values(args));
    }
    match args.get(1) {
        Some(message) if !message.is_nil() => Err(throw(message.clone())),
        _ => Err(VMError::runtime("assertion failed!")),
    }
}

/// `error(value [, level])`, level 0 omits the position
fn native_error(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let level = ctx.opt_int(&args, 2, 1)?;
    let value = match args.first() {
        Some(Value::Str(s)) if level > 0 => match ctx.position() {
            Some(position) => Value::from(format!("{} {}", position, s)),
            None => Value::Str(s.clone()),
        },
        Some(value) => value.clone(),
        None => Value::Nil,
    };
    Err(throw(value))
}

/// Run another script file and return its results
fn native_include(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let path = ctx.check_str(&args, 1)?;
    let proto = ctx.host.load_chunk(&path).map_err(VMError::Runtime)?;
    let closure = ctx.heap.alloc(HeapObject::Closure(Closure {
        proto,
        upvalues: Vec::new(),
    }));
    Ok(NativeReturn::Call {
        callee: Value::Function(closure),
        args: Vec::new(),
        protected: false,
    })
}

fn native_ipairs(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let table = ctx.check_table(&args, 1)?;
    Ok(NativeReturn::values([
        Value::Native(IPAIRS_ITERATOR),
        Value::Table(table),
        Value::Int(0),
    ]))
}

fn native_ipairs_iterator(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let table = ctx.check_table(&args, 1)?;
    let i = ctx.check_int(&args, 2)?.wrapping_add(1);
    let value = ctx.heap.table(table)?.get_int(i);
    if value.is_nil() {
        return Ok(NativeReturn::one(Value::Nil));
    }
    Ok(NativeReturn::values([Value::Int(i), value]))
}

fn native_next(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let table = ctx.check_table(&args, 1)?;
    let key = args.get(1).cloned().unwrap_or_default();
    match ctx.heap.table(table)?.next(&key) {
        Ok(Some((k, v))) => Ok(NativeReturn::values([k, v])),
        Ok(None) => Ok(NativeReturn::one(Value::Nil)),
        Err(()) => Err(VMError::runtime("invalid key to 'next'")),
    }
}

fn native_pairs(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let table = ctx.check_table(&args, 1)?;
    Ok(NativeReturn::values([
        Value::Native(PAIRS_ITERATOR),
        Value::Table(table),
        Value::Nil,
    ]))
}

fn native_pairs_iterator(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    native_next(ctx, args)
}

fn native_pcall(
    ctx: &mut NativeCtx<'_>,
    mut args: Vec<Value>,
) -> VMResult<NativeReturn> {
    ctx.check_any(&args, 1)?;
    let callee = args.remove(0);
    Ok(NativeReturn::Call {
        callee,
        args,
        protected: true,
    })
}

fn native_print(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let line = args
        .iter()
        .map(|v| ctx.tostring(v))
        .collect::<Vec<_>>()
        .join("\t");
    info!(target: "ludus::script", "{}", line);
    Ok(NativeReturn::none())
}

fn native_select(
    ctx: &mut NativeCtx<'_>,
    mut args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let count = args.len().saturating_sub(1) as i64;
    if args.first().and_then(Value::as_str) == Some("#") {
        return Ok(NativeReturn::one(count));
    }
    let n = ctx.check_int(&args, 1)?;
    let start = if n < 0 {
        if -n > count {
            return Err(ctx.arg_error(1, "index out of range"));
        }
        count + n + 1
    } else if n == 0 {
        return Err(ctx.arg_error(1, "index out of range"));
    } else {
        n.min(count + 1)
    };
    Ok(NativeReturn::values(args.drain(start as usize..)))
}

fn native_tonumber(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let value = ctx.check_any(&args, 1)?;
    if args.get(1).is_some_and(|b| !b.is_nil()) {
        let base = ctx.check_int(&args, 2)?;
        if !(2..=36).contains(&base) {
            return Err(ctx.arg_error(2, "base out of range"));
        }
        let text = ctx.check_str(&args, 1)?.trim().to_ascii_lowercase();
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.as_str()),
        };
        let result = match i64::from_str_radix(digits, base as u32) {
            Ok(v) if negative => Value::Int(v.wrapping_neg()),
            Ok(v) => Value::Int(v),
            Err(_) => Value::Nil,
        };
        return Ok(NativeReturn::one(result));
    }
    let result = match &value {
        Value::Int(_) | Value::Float(_) => value.clone(),
        Value::Str(s) => parse_number(s).unwrap_or_default(),
        _ => Value::Nil,
    };
    Ok(NativeReturn::one(result))
}

fn native_tostring(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let value = ctx.check_any(&args, 1)?;
    Ok(NativeReturn::one(ctx.tostring(&value)))
}

fn native_type(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let value = ctx.check_any(&args, 1)?;
    Ok(NativeReturn::one(value.type_name()))
}
