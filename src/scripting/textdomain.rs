//! Textdomain natives
//!
//! Scripts bracket translatable strings with `push_textdomain` and
//! `pop_textdomain`. The stack belongs to the running coroutine and travels
//! with it into savegames.

use crate::runtime::value::Value;
use crate::std::{NativeExport, StdModule};
use crate::vm::{NativeCtx, NativeReturn, VMError, VMResult};

#[derive(Debug, Default, Clone, Copy)]
pub struct TextdomainModule;

impl StdModule for TextdomainModule {
    fn module_path(&self) -> Option<&'static str> {
        None
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new("push_textdomain", "push_textdomain", native_push),
            NativeExport::new("pop_textdomain", "pop_textdomain", native_pop),
            NativeExport::new("_", "_", native_translate),
            NativeExport::new("current_textdomain", "current_textdomain", native_current),
        ]
    }
}

fn native_push(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let domain = ctx.check_str(&args, 1)?;
    ctx.textdomains.push(domain.to_string());
    Ok(NativeReturn::none())
}

fn native_pop(
    ctx: &mut NativeCtx<'_>,
    _args: Vec<Value>,
) -> VMResult<NativeReturn> {
    match ctx.textdomains.pop() {
        Some(_) => Ok(NativeReturn::none()),
        None => Err(VMError::runtime("textdomain stack is empty")),
    }
}

/// `_(text)`: no catalogs are loaded, so text comes back unchanged
fn native_translate(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let text = ctx.check_str(&args, 1)?;
    Ok(NativeReturn::one(Value::Str(text)))
}

fn native_current(
    ctx: &mut NativeCtx<'_>,
    _args: Vec<Value>,
) -> VMResult<NativeReturn> {
    Ok(match ctx.textdomains.last() {
        Some(domain) => NativeReturn::one(domain.as_str()),
        None => NativeReturn::one(Value::Nil),
    })
}
