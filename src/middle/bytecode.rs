//! Bytecode for the stack machine
//!
//! A [`Proto`] is the compiled form of one function body. Locals live in
//! fixed stack slots relative to the frame base; temporaries sit above them.
//! Instruction operands are absolute jump targets, slot numbers and indices
//! into the constant and child-prototype tables.
//!
//! Prototypes are plain data and can be written to and read from byte
//! streams, which is how suspended coroutines carry their code into a
//! savegame.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

pub use crate::frontend::parser::ast::{BinOp, UnOp};

/// Constant pool entry
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Str(Arc<str>),
}

/// How many results a call site wants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Want {
    /// Exactly `n` values, padded with nil or truncated
    Fixed(u16),
    /// Every result, the count is left in the thread's multi register
    Multi,
}

/// Where a closure finds one of its upvalue cells at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Cell stored in a local slot of the enclosing frame
    Local(u16),
    /// Upvalue of the enclosing closure
    Upvalue(u16),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instr {
    Nil,
    True,
    False,
    Const(u32),
    Pop(u16),

    GetLocal(u16),
    SetLocal(u16),
    /// Box the slot's value into a fresh cell
    NewCell(u16),
    GetCell(u16),
    SetCell(u16),
    GetUpval(u16),
    SetUpval(u16),
    GetGlobal(u32),
    SetGlobal(u32),

    /// `[t, k] -> [t[k]]`
    GetIndex,
    /// `[t] -> [t.name]`
    GetField(u32),
    /// `[v, t, k] -> []`
    SetIndex,
    /// `[v, t] -> []`
    SetField(u32),

    NewTable,
    /// `[t, v1..vn] -> [t]`, stores at `start..start+n`
    SetList { start: u32, count: u16, multi: bool },
    /// `[t, v] -> [t]`
    InitField(u32),
    /// `[t, k, v] -> [t]`
    InitIndex,

    Closure(u32),
    /// `[o] -> [o.name, o]`
    SelfMethod(u32),
    /// `[f, a1..an] -> results`
    Call { argc: u16, want: Want, multi_tail: bool },
    Return { count: u16, multi: bool },

    Jump(u32),
    /// Pops the condition
    JumpIfFalse(u32),
    /// Keeps the value and jumps when falsy, pops otherwise
    And(u32),
    /// Keeps the value and jumps when truthy, pops otherwise
    Or(u32),

    Binary(BinOp),
    Unary(UnOp),

    /// Hidden slots `slot..slot+3` hold index, limit and step, `slot+3` the variable
    ForPrep { slot: u16, exit: u32 },
    ForLoop { slot: u16, body: u32 },
    /// Iterator results sit on top of the stack
    TForCheck { slot: u16, nvars: u16, exit: u32 },
}

/// Compiled function body
#[derive(Debug, Clone, PartialEq)]
pub struct Proto {
    pub name: String,
    pub chunk: Arc<str>,
    pub line: u32,
    pub num_params: u16,
    pub code: Vec<Instr>,
    /// Source line of each instruction
    pub lines: Vec<u32>,
    pub constants: Vec<Constant>,
    pub protos: Vec<Arc<Proto>>,
    pub captures: Vec<Capture>,
}

impl Proto {
    /// Line of the instruction at `pc`
    pub fn line_at(
        &self,
        pc: usize,
    ) -> u32 {
        self.lines.get(pc).copied().unwrap_or(self.line)
    }

    /// Constant as a string, for name operands
    pub fn string_constant(
        &self,
        idx: u32,
    ) -> Option<&Arc<str>> {
        match self.constants.get(idx as usize) {
            Some(Constant::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Check every operand against the tables it indexes
    ///
    /// Prototypes read from a savegame are validated before use.
    pub fn validate(&self) -> Result<(), String> {
        let code_len = self.code.len() as u32;
        if self.lines.len() != self.code.len() {
            return Err(format!("{}: line table length mismatch", self.name));
        }
        let jump = |target: u32| {
            if target <= code_len {
                Ok(())
            } else {
                Err(format!("{}: jump target {} out of range", self.name, target))
            }
        };
        let name = |idx: u32| {
            if self.string_constant(idx).is_some() {
                Ok(())
            } else {
                Err(format!("{}: constant {} is not a name", self.name, idx))
            }
        };
        for instr in &self.code {
            match *instr {
                Instr::Const(idx) => {
                    if idx as usize >= self.constants.len() {
                        return Err(format!("{}: constant {} out of range", self.name, idx));
                    }
                }
                Instr::GetGlobal(idx)
                | Instr::SetGlobal(idx)
                | Instr::GetField(idx)
                | Instr::SetField(idx)
                | Instr::InitField(idx)
                | Instr::SelfMethod(idx) => name(idx)?,
                Instr::Closure(idx) => {
                    if idx as usize >= self.protos.len() {
                        return Err(format!("{}: prototype {} out of range", self.name, idx));
                    }
                }
                Instr::Jump(t) | Instr::JumpIfFalse(t) | Instr::And(t) | Instr::Or(t) => jump(t)?,
                Instr::ForPrep { exit, .. } | Instr::TForCheck { exit, .. } => jump(exit)?,
                Instr::ForLoop { body, .. } => jump(body)?,
                // 多值展开至少包含产生多值的那个表达式
                Instr::Call {
                    argc: 0,
                    multi_tail: true,
                    ..
                }
                | Instr::Return {
                    count: 0,
                    multi: true,
                }
                | Instr::SetList {
                    count: 0,
                    multi: true,
                    ..
                } => {
                    return Err(format!("{}: {:?} expands an empty list", self.name, instr));
                }
                _ => {}
            }
        }
        self.protos.iter().try_for_each(|p| p.validate())
    }
}

impl fmt::Display for Proto {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        writeln!(
            f,
            "function <{}:{}> {} ({} params, {} instructions)",
            self.chunk,
            self.line,
            self.name,
            self.num_params,
            self.code.len()
        )?;
        for (pc, instr) in self.code.iter().enumerate() {
            writeln!(f, "  [{:4}] line {:4}  {:?}", pc, self.line_at(pc), instr)?;
        }
        for proto in &self.protos {
            write!(f, "{}", proto)?;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Binary encoding
// ----------------------------------------------------------------------

fn bin_op_tag(op: BinOp) -> u8 {
    match op {
        BinOp::Add => 0,
        BinOp::Sub => 1,
        BinOp::Mul => 2,
        BinOp::Div => 3,
        BinOp::IDiv => 4,
        BinOp::Mod => 5,
        BinOp::Pow => 6,
        BinOp::Concat => 7,
        BinOp::Eq => 8,
        BinOp::Ne => 9,
        BinOp::Lt => 10,
        BinOp::Le => 11,
        BinOp::Gt => 12,
        BinOp::Ge => 13,
    }
}

fn bin_op_from_tag(tag: u8) -> io::Result<BinOp> {
    let op = match tag {
        0 => BinOp::Add,
        1 => BinOp::Sub,
        2 => BinOp::Mul,
        3 => BinOp::Div,
        4 => BinOp::IDiv,
        5 => BinOp::Mod,
        6 => BinOp::Pow,
        7 => BinOp::Concat,
        8 => BinOp::Eq,
        9 => BinOp::Ne,
        10 => BinOp::Lt,
        11 => BinOp::Le,
        12 => BinOp::Gt,
        13 => BinOp::Ge,
        other => return Err(invalid(format!("unknown binary operator {}", other))),
    };
    Ok(op)
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

pub fn write_want<W: Write>(
    w: &mut W,
    want: Want,
) -> io::Result<()> {
    match want {
        Want::Fixed(n) => {
            w.write_u8(0)?;
            w.write_u16::<LittleEndian>(n)
        }
        Want::Multi => w.write_u8(1),
    }
}

pub fn read_want<R: Read>(r: &mut R) -> io::Result<Want> {
    match r.read_u8()? {
        0 => Ok(Want::Fixed(r.read_u16::<LittleEndian>()?)),
        1 => Ok(Want::Multi),
        other => Err(invalid(format!("unknown call arity tag {}", other))),
    }
}

fn read_u16<R: Read>(r: &mut R) -> io::Result<u16> {
    r.read_u16::<LittleEndian>()
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    r.read_u32::<LittleEndian>()
}

fn read_bool<R: Read>(r: &mut R) -> io::Result<bool> {
    match r.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(invalid(format!("invalid boolean byte {}", other))),
    }
}

impl Instr {
    /// Opcode byte
    fn opcode(&self) -> u8 {
        match self {
            Instr::Nil => 0,
            Instr::True => 1,
            Instr::False => 2,
            Instr::Const(_) => 3,
            Instr::Pop(_) => 4,
            Instr::GetLocal(_) => 5,
            Instr::SetLocal(_) => 6,
            Instr::NewCell(_) => 7,
            Instr::GetCell(_) => 8,
            Instr::SetCell(_) => 9,
            Instr::GetUpval(_) => 10,
            Instr::SetUpval(_) => 11,
            Instr::GetGlobal(_) => 12,
            Instr::SetGlobal(_) => 13,
            Instr::GetIndex => 14,
            Instr::GetField(_) => 15,
            Instr::SetIndex => 16,
            Instr::SetField(_) => 17,
            Instr::NewTable => 18,
            Instr::SetList { .. } => 19,
            Instr::InitField(_) => 20,
            Instr::InitIndex => 21,
            Instr::Closure(_) => 22,
            Instr::SelfMethod(_) => 23,
            Instr::Call { .. } => 24,
            Instr::Return { .. } => 25,
            Instr::Jump(_) => 26,
            Instr::JumpIfFalse(_) => 27,
            Instr::And(_) => 28,
            Instr::Or(_) => 29,
            Instr::Binary(_) => 30,
            Instr::Unary(_) => 31,
            Instr::ForPrep { .. } => 32,
            Instr::ForLoop { .. } => 33,
            Instr::TForCheck { .. } => 34,
        }
    }

    pub fn write_to<W: Write>(
        &self,
        w: &mut W,
    ) -> io::Result<()> {
        w.write_u8(self.opcode())?;
        match *self {
            Instr::Nil
            | Instr::True
            | Instr::False
            | Instr::GetIndex
            | Instr::SetIndex
            | Instr::NewTable
            | Instr::InitIndex => Ok(()),
            Instr::Pop(n)
            | Instr::GetLocal(n)
            | Instr::SetLocal(n)
            | Instr::NewCell(n)
            | Instr::GetCell(n)
            | Instr::SetCell(n)
            | Instr::GetUpval(n)
            | Instr::SetUpval(n) => w.write_u16::<LittleEndian>(n),
            Instr::Const(i)
            | Instr::GetGlobal(i)
            | Instr::SetGlobal(i)
            | Instr::GetField(i)
            | Instr::SetField(i)
            | Instr::InitField(i)
            | Instr::Closure(i)
            | Instr::SelfMethod(i)
            | Instr::Jump(i)
            | Instr::JumpIfFalse(i)
            | Instr::And(i)
            | Instr::Or(i) => w.write_u32::<LittleEndian>(i),
            Instr::SetList {
                start,
                count,
                multi,
            } => {
                w.write_u32::<LittleEndian>(start)?;
                w.write_u16::<LittleEndian>(count)?;
                w.write_u8(multi as u8)
            }
            Instr::Call {
                argc,
                want,
                multi_tail,
            } => {
                w.write_u16::<LittleEndian>(argc)?;
                write_want(w, want)?;
                w.write_u8(multi_tail as u8)
            }
            Instr::Return { count, multi } => {
                w.write_u16::<LittleEndian>(count)?;
                w.write_u8(multi as u8)
            }
            Instr::Binary(op) => w.write_u8(bin_op_tag(op)),
            Instr::Unary(op) => w.write_u8(match op {
                UnOp::Neg => 0,
                UnOp::Not => 1,
                UnOp::Len => 2,
            }),
            Instr::ForPrep { slot, exit } => {
                w.write_u16::<LittleEndian>(slot)?;
                w.write_u32::<LittleEndian>(exit)
            }
            Instr::ForLoop { slot, body } => {
                w.write_u16::<LittleEndian>(slot)?;
                w.write_u32::<LittleEndian>(body)
            }
            Instr::TForCheck { slot, nvars, exit } => {
                w.write_u16::<LittleEndian>(slot)?;
                w.write_u16::<LittleEndian>(nvars)?;
                w.write_u32::<LittleEndian>(exit)
            }
        }
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Instr> {
        let opcode = r.read_u8()?;
        let instr = match opcode {
            0 => Instr::Nil,
            1 => Instr::True,
            2 => Instr::False,
            3 => Instr::Const(read_u32(r)?),
            4 => Instr::Pop(read_u16(r)?),
            5 => Instr::GetLocal(read_u16(r)?),
            6 => Instr::SetLocal(read_u16(r)?),
            7 => Instr::NewCell(read_u16(r)?),
            8 => Instr::GetCell(read_u16(r)?),
            9 => Instr::SetCell(read_u16(r)?),
            10 => Instr::GetUpval(read_u16(r)?),
            11 => Instr::SetUpval(read_u16(r)?),
            12 => Instr::GetGlobal(read_u32(r)?),
            13 => Instr::SetGlobal(read_u32(r)?),
            14 => Instr::GetIndex,
            15 => Instr::GetField(read_u32(r)?),
            16 => Instr::SetIndex,
            17 => Instr::SetField(read_u32(r)?),
            18 => Instr::NewTable,
            19 => Instr::SetList {
                start: read_u32(r)?,
                count: read_u16(r)?,
                multi: read_bool(r)?,
            },
            20 => Instr::InitField(read_u32(r)?),
            21 => Instr::InitIndex,
            22 => Instr::Closure(read_u32(r)?),
            23 => Instr::SelfMethod(read_u32(r)?),
            24 => Instr::Call {
                argc: read_u16(r)?,
                want: read_want(r)?,
                multi_tail: read_bool(r)?,
            },
            25 => Instr::Return {
                count: read_u16(r)?,
                multi: read_bool(r)?,
            },
            26 => Instr::Jump(read_u32(r)?),
            27 => Instr::JumpIfFalse(read_u32(r)?),
            28 => Instr::And(read_u32(r)?),
            29 => Instr::Or(read_u32(r)?),
            30 => Instr::Binary(bin_op_from_tag(r.read_u8()?)?),
            31 => Instr::Unary(match r.read_u8()? {
                0 => UnOp::Neg,
                1 => UnOp::Not,
                2 => UnOp::Len,
                other => return Err(invalid(format!("unknown unary operator {}", other))),
            }),
            32 => Instr::ForPrep {
                slot: read_u16(r)?,
                exit: read_u32(r)?,
            },
            33 => Instr::ForLoop {
                slot: read_u16(r)?,
                body: read_u32(r)?,
            },
            34 => Instr::TForCheck {
                slot: read_u16(r)?,
                nvars: read_u16(r)?,
                exit: read_u32(r)?,
            },
            other => return Err(invalid(format!("unknown opcode {}", other))),
        };
        Ok(instr)
    }
}

impl Constant {
    pub fn write_to<W: Write>(
        &self,
        w: &mut W,
    ) -> io::Result<()> {
        match self {
            Constant::Int(v) => {
                w.write_u8(0)?;
                w.write_i64::<LittleEndian>(*v)
            }
            Constant::Float(v) => {
                w.write_u8(1)?;
                w.write_u64::<LittleEndian>(v.to_bits())
            }
            Constant::Str(s) => {
                w.write_u8(2)?;
                write_str(w, s)
            }
        }
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Constant> {
        match r.read_u8()? {
            0 => Ok(Constant::Int(r.read_i64::<LittleEndian>()?)),
            1 => Ok(Constant::Float(f64::from_bits(r.read_u64::<LittleEndian>()?))),
            2 => Ok(Constant::Str(read_str(r)?.into())),
            other => Err(invalid(format!("unknown constant tag {}", other))),
        }
    }
}

impl Capture {
    pub fn write_to<W: Write>(
        &self,
        w: &mut W,
    ) -> io::Result<()> {
        let (tag, idx) = match *self {
            Capture::Local(i) => (0, i),
            Capture::Upvalue(i) => (1, i),
        };
        w.write_u8(tag)?;
        w.write_u16::<LittleEndian>(idx)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Capture> {
        let tag = r.read_u8()?;
        let idx = r.read_u16::<LittleEndian>()?;
        match tag {
            0 => Ok(Capture::Local(idx)),
            1 => Ok(Capture::Upvalue(idx)),
            other => Err(invalid(format!("unknown capture tag {}", other))),
        }
    }
}

/// Length-prefixed UTF-8 string
pub fn write_str<W: Write>(
    w: &mut W,
    s: &str,
) -> io::Result<()> {
    let len = u32::try_from(s.len()).map_err(|_| invalid("string too long".to_string()))?;
    w.write_u32::<LittleEndian>(len)?;
    w.write_all(s.as_bytes())
}

pub fn read_str<R: Read>(r: &mut R) -> io::Result<String> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut buf = Vec::new();
    r.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated string",
        ));
    }
    String::from_utf8(buf).map_err(|e| invalid(e.to_string()))
}
