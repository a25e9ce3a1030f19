//! Standard Math library

use std::sync::Mutex;

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::runtime::value::{float_to_int, Value};
use crate::std::{NativeExport, StdModule};
use crate::vm::{NativeCtx, NativeReturn, VMError, VMResult};

/// Generator behind the stock `math.random`, seeded from local entropy
static LOCAL_RNG: Lazy<Mutex<StdRng>> = Lazy::new(|| Mutex::new(StdRng::from_os_rng()));

/// Math module implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct MathModule;

impl StdModule for MathModule {
    fn module_path(&self) -> Option<&'static str> {
        Some("math")
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new("abs", "math.abs", native_abs),
            NativeExport::new("ceil", "math.ceil", native_ceil),
            NativeExport::new("floor", "math.floor", native_floor),
            NativeExport::new("max", "math.max", native_max),
            NativeExport::new("min", "math.min", native_min),
            NativeExport::new("random", "math.random", native_random),
            NativeExport::new("randomseed", "math.randomseed", native_randomseed),
            NativeExport::new("sqrt", "math.sqrt", native_sqrt),
        ]
    }

    fn constants(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("huge", Value::Float(f64::INFINITY)),
            ("maxinteger", Value::Int(i64::MAX)),
            ("mininteger", Value::Int(i64::MIN)),
            ("pi", Value::Float(std::f64::consts::PI)),
        ]
    }
}

/// Shape a raw 32-bit draw the way `math.random` promises
///
/// No arguments gives a float in `[0, 1)`, `(m)` an integer in `[1, m]` and
/// `(m, n)` an integer in `[m, n]`.
pub fn random_value(
    ctx: &NativeCtx<'_>,
    args: &[Value],
    draw: u32,
) -> VMResult<Value> {
    let (low, high) = match args.len() {
        0 => return Ok(Value::Float(f64::from(draw) / 4_294_967_296.0)),
        1 => (1, ctx.check_int(args, 1)?),
        2 => (ctx.check_int(args, 1)?, ctx.check_int(args, 2)?),
        _ => return Err(VMError::runtime("wrong number of arguments to 'random'")),
    };
    if low > high {
        return Err(ctx.arg_error(args.len(), "interval is empty"));
    }
    let span = (high as i128 - low as i128 + 1) as u128;
    let offset = (u128::from(draw) % span) as i128;
    Ok(Value::Int((low as i128 + offset) as i64))
}

fn native_random(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let draw = LOCAL_RNG
        .lock()
        .map_err(|_| VMError::runtime("random generator poisoned"))?
        .random::<u32>();
    Ok(NativeReturn::one(random_value(ctx, &args, draw)?))
}

fn native_randomseed(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let seed = ctx.check_number(&args, 1)?;
    let mut rng = LOCAL_RNG
        .lock()
        .map_err(|_| VMError::runtime("random generator poisoned"))?;
    *rng = StdRng::seed_from_u64(seed.to_bits());
    Ok(NativeReturn::none())
}

fn rounded(value: f64) -> Value {
    float_to_int(value)
        .map(Value::Int)
        .unwrap_or(Value::Float(value))
}

fn native_floor(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    match args.first() {
        Some(Value::Int(v)) => Ok(NativeReturn::one(*v)),
        _ => Ok(NativeReturn::one(rounded(ctx.check_number(&args, 1)?.floor()))),
    }
}

fn native_ceil(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    match args.first() {
        Some(Value::Int(v)) => Ok(NativeReturn::one(*v)),
        _ => Ok(NativeReturn::one(rounded(ctx.check_number(&args, 1)?.ceil()))),
    }
}

fn native_abs(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    match args.first() {
        Some(Value::Int(v)) => Ok(NativeReturn::one(v.wrapping_abs())),
        _ => Ok(NativeReturn::one(ctx.check_number(&args, 1)?.abs())),
    }
}

fn native_sqrt(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    Ok(NativeReturn::one(ctx.check_number(&args, 1)?.sqrt()))
}

/// Shared by `max` and `min`; keeps the winning argument's int/float kind
fn extreme(
    ctx: &NativeCtx<'_>,
    args: &[Value],
    pick_later: fn(f64, f64) -> bool,
) -> VMResult<Value> {
    let mut best = ctx.check_number(args, 1)?;
    let mut best_idx = 0;
    for i in 1..args.len() {
        let candidate = ctx.check_number(args, i + 1)?;
        if pick_later(candidate, best) {
            best = candidate;
            best_idx = i;
        }
    }
    Ok(args[best_idx].to_numeric().unwrap_or(Value::Float(best)))
}

fn native_max(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    Ok(NativeReturn::one(extreme(ctx, &args, |a, b| a > b)?))
}

fn native_min(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    Ok(NativeReturn::one(extreme(ctx, &args, |a, b| a < b)?))
}
