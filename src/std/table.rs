//! Standard Table library

use crate::runtime::value::Value;
use crate::std::{NativeExport, StdModule};
use crate::vm::{NativeCtx, NativeReturn, VMError, VMResult};

/// Most values `table.unpack` may spread onto the stack
const MAX_UNPACK: i64 = 1 << 16;

/// Table module implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TableModule;

impl StdModule for TableModule {
    fn module_path(&self) -> Option<&'static str> {
        Some("table")
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new("concat", "table.concat", native_concat),
            NativeExport::new("insert", "table.insert", native_insert),
            NativeExport::new("remove", "table.remove", native_remove),
            NativeExport::new("unpack", "table.unpack", native_unpack),
        ]
    }
}

/// `table.insert(t, v)` or `table.insert(t, pos, v)`
fn native_insert(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let id = ctx.check_table(&args, 1)?;
    let len = ctx.heap.table(id)?.len();
    match args.len() {
        2 => {
            let value = args[1].clone();
            ctx.heap.table_mut(id)?.set_int(len as i64 + 1, value);
        }
        3 => {
            let pos = ctx.check_int(&args, 2)?;
            if pos < 1 || pos as u64 > len as u64 + 1 {
                return Err(ctx.arg_error(2, "position out of bounds"));
            }
            let value = args[2].clone();
            let table = ctx.heap.table_mut(id)?;
            if value.is_nil() {
                // nil cannot be shifted into the sequence
                table.set_int(pos, value);
            } else {
                table.insert(pos as usize, value);
            }
        }
        _ => return Err(VMError::runtime("wrong number of arguments to 'insert'")),
    }
    Ok(NativeReturn::none())
}

fn native_remove(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let id = ctx.check_table(&args, 1)?;
    let len = ctx.heap.table(id)?.len() as i64;
    let pos = ctx.opt_int(&args, 2, len)?;
    if args.len() > 1 && !(len == 0 && pos == 0) && !(1..=len + 1).contains(&pos) {
        return Err(ctx.arg_error(2, "position out of bounds"));
    }
    let table = ctx.heap.table_mut(id)?;
    if pos < 1 || pos > len {
        let value = table.get_int(pos);
        if !value.is_nil() {
            table.set_int(pos, Value::Nil);
        }
        return Ok(NativeReturn::one(value));
    }
    Ok(NativeReturn::one(table.remove(pos as usize)))
}

fn native_concat(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let id = ctx.check_table(&args, 1)?;
    let sep = ctx.opt_str(&args, 2)?;
    let len = ctx.heap.table(id)?.len() as i64;
    let first = ctx.opt_int(&args, 3, 1)?;
    let last = ctx.opt_int(&args, 4, len)?;

    let table = ctx.heap.table(id)?;
    let mut out = String::new();
    let mut i = first;
    while i <= last {
        match table.get_int(i) {
            value @ (Value::Str(_) | Value::Int(_) | Value::Float(_)) => {
                out.push_str(&value.to_string())
            }
            other => {
                return Err(VMError::Runtime(format!(
                    "invalid value (at index {}) in table for 'concat' ({})",
                    i,
                    other.type_name()
                )))
            }
        }
        if i < last {
            if let Some(sep) = &sep {
                out.push_str(sep);
            }
        }
        i += 1;
    }
    Ok(NativeReturn::one(out))
}

fn native_unpack(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let id = ctx.check_table(&args, 1)?;
    let len = ctx.heap.table(id)?.len() as i64;
    let first = ctx.opt_int(&args, 2, 1)?;
    let last = ctx.opt_int(&args, 3, len)?;
    if first > last {
        return Ok(NativeReturn::none());
    }
    if last.saturating_sub(first) >= MAX_UNPACK {
        return Err(VMError::runtime("too many results to unpack"));
    }
    let table = ctx.heap.table(id)?;
    Ok(NativeReturn::values((first..=last).map(|i| table.get_int(i))))
}
