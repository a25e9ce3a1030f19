//! Standard String library
//!
//! Indices are byte offsets starting at 1; negative indices count from the
//! end. Strings are also the receiver of `s:method()` calls, which the VM
//! resolves through this table.

use crate::runtime::value::{format_float, Value};
use crate::std::{NativeExport, StdModule};
use crate::vm::{NativeCtx, NativeReturn, VMError, VMResult};

// ============================================================================
// StringModule - StdModule Implementation
// ============================================================================

/// String module implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringModule;

impl StdModule for StringModule {
    fn module_path(&self) -> Option<&'static str> {
        Some("string")
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new("find", "string.find", native_find),
            NativeExport::new("format", "string.format", native_format),
            NativeExport::new("len", "string.len", native_len),
            NativeExport::new("lower", "string.lower", native_lower),
            NativeExport::new("rep", "string.rep", native_rep),
            NativeExport::new("sub", "string.sub", native_sub),
            NativeExport::new("upper", "string.upper", native_upper),
        ]
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Translate a 1-based, possibly negative index into a byte offset
fn start_index(
    i: i64,
    len: usize,
) -> usize {
    let len = len as i64;
    let i = if i < 0 { (len + i + 1).max(1) } else { i.max(1) };
    (i - 1).min(len) as usize
}

fn end_index(
    j: i64,
    len: usize,
) -> usize {
    let len = len as i64;
    let j = if j < 0 { len + j + 1 } else { j.min(len) };
    j.max(0) as usize
}

fn from_bytes(bytes: &[u8]) -> Value {
    Value::from(String::from_utf8_lossy(bytes).into_owned())
}

// ============================================================================
// Native function implementations
// ============================================================================

fn native_len(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let s = ctx.check_str(&args, 1)?;
    Ok(NativeReturn::one(s.len() as i64))
}

fn native_sub(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let s = ctx.check_str(&args, 1)?;
    let i = ctx.opt_int(&args, 2, 1)?;
    let j = ctx.opt_int(&args, 3, -1)?;
    let bytes = s.as_bytes();
    let start = start_index(i, bytes.len());
    let end = end_index(j, bytes.len());
    if start >= end {
        return Ok(NativeReturn::one(""));
    }
    Ok(NativeReturn::one(from_bytes(&bytes[start..end])))
}

fn native_upper(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let s = ctx.check_str(&args, 1)?;
    Ok(NativeReturn::one(s.to_uppercase()))
}

fn native_lower(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let s = ctx.check_str(&args, 1)?;
    Ok(NativeReturn::one(s.to_lowercase()))
}

fn native_rep(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let s = ctx.check_str(&args, 1)?;
    let n = ctx.check_int(&args, 2)?;
    let sep = ctx.opt_str(&args, 3)?;
    if n <= 0 {
        return Ok(NativeReturn::one(""));
    }
    let n = n as usize;
    let total = (s.len() + sep.as_ref().map_or(0, |p| p.len())).saturating_mul(n);
    if total > 1 << 28 {
        return Err(VMError::runtime("resulting string too large"));
    }
    let out = match sep {
        Some(sep) => vec![s.as_ref(); n].join(&*sep),
        None => s.repeat(n),
    };
    Ok(NativeReturn::one(out))
}

/// `string.find(s, needle [, init [, plain]])`
///
/// Matching is always literal; pattern items are not interpreted.
fn native_find(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let s = ctx.check_str(&args, 1)?;
    let needle = ctx.check_str(&args, 2)?;
    let init = ctx.opt_int(&args, 3, 1)?;
    let start = start_index(init, s.len());
    if start > s.len() {
        return Ok(NativeReturn::one(Value::Nil));
    }
    let haystack = &s.as_bytes()[start..];
    let found = if needle.is_empty() {
        Some(0)
    } else {
        haystack
            .windows(needle.len())
            .position(|w| w == needle.as_bytes())
    };
    Ok(match found {
        Some(pos) => {
            let first = (start + pos + 1) as i64;
            NativeReturn::values([Value::Int(first), Value::Int(first + needle.len() as i64 - 1)])
        }
        None => NativeReturn::one(Value::Nil),
    })
}

/// One `%...` directive
#[derive(Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    width: usize,
    precision: Option<usize>,
}

impl Spec {
    fn pad(
        &self,
        body: String,
    ) -> String {
        if body.len() >= self.width {
            return body;
        }
        let fill = self.width - body.len();
        if self.left {
            format!("{}{}", body, " ".repeat(fill))
        } else if self.zero {
            let (sign, digits) = match body.strip_prefix(['-', '+']) {
                Some(rest) => (&body[..1], rest),
                None => ("", body.as_str()),
            };
            format!("{}{}{}", sign, "0".repeat(fill), digits)
        } else {
            format!("{}{}", " ".repeat(fill), body)
        }
    }

    fn sign(
        &self,
        negative: bool,
    ) -> &'static str {
        if negative {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn native_format(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let template = ctx.check_str(&args, 1)?;
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut arg = 1;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '#' => {}
                _ => break,
            }
            chars.next();
        }
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            spec.width = spec.width * 10 + d as usize;
            chars.next();
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut precision = 0;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                precision = precision * 10 + d as usize;
                chars.next();
            }
            spec.precision = Some(precision);
        }
        if spec.width > 99 || spec.precision.is_some_and(|p| p > 99) {
            return Err(VMError::runtime("invalid conversion (width or precision too long)"));
        }

        let Some(conversion) = chars.next() else {
            return Err(VMError::runtime("invalid conversion '%' to 'format'"));
        };
        arg += 1;
        let body = match conversion {
            'd' | 'i' => {
                let v = ctx.check_int(&args, arg)?;
                let digits = v.unsigned_abs().to_string();
                let digits = match spec.precision {
                    Some(p) if digits.len() < p => format!("{}{}", "0".repeat(p - digits.len()), digits),
                    _ => digits,
                };
                format!("{}{}", spec.sign(v < 0), digits)
            }
            'x' => format!("{:x}", ctx.check_int(&args, arg)?),
            'X' => format!("{:X}", ctx.check_int(&args, arg)?),
            'o' => format!("{:o}", ctx.check_int(&args, arg)?),
            'c' => {
                let code = ctx.check_int(&args, arg)?;
                u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .ok_or_else(|| ctx.arg_error(arg, "value out of range"))?
            }
            'f' | 'F' => {
                let v = ctx.check_number(&args, arg)?;
                let p = spec.precision.unwrap_or(6);
                format!("{}{:.*}", spec.sign(v.is_sign_negative() && v != 0.0), p, v.abs())
            }
            'e' | 'E' => {
                let v = ctx.check_number(&args, arg)?;
                let p = spec.precision.unwrap_or(6);
                let text = format!("{:.*e}", p, v.abs());
                // C prints at least two exponent digits
                let text = match text.split_once('e') {
                    Some((m, e)) => {
                        let (sign, digits) = match e.strip_prefix('-') {
                            Some(d) => ('-', d),
                            None => ('+', e),
                        };
                        format!("{}e{}{:0>2}", m, sign, digits)
                    }
                    None => text,
                };
                let text = if conversion == 'E' { text.to_uppercase() } else { text };
                format!("{}{}", spec.sign(v.is_sign_negative() && v != 0.0), text)
            }
            'g' | 'G' => {
                let v = ctx.check_number(&args, arg)?;
                let text = match spec.precision {
                    Some(p) => format!("{:.*}", p, v),
                    None => match Value::Float(v).as_integer() {
                        Some(i) => i.to_string(),
                        None => format_float(v),
                    },
                };
                if conversion == 'G' { text.to_uppercase() } else { text }
            }
            's' => {
                let value = ctx.check_any(&args, arg)?;
                let text = ctx.tostring(&value);
                match spec.precision {
                    Some(p) => text.chars().take(p).collect(),
                    None => text,
                }
            }
            'q' => quote(&ctx.check_str(&args, arg)?),
            other => {
                return Err(VMError::Runtime(format!(
                    "invalid conversion '%{}' to 'format'",
                    other
                )))
            }
        };
        out.push_str(&spec.pad(body));
    }
    Ok(NativeReturn::one(out))
}
