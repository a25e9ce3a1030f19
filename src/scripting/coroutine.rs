//! 协程句柄
//!
//! A [`CoroutineHandle`] owns one suspended thread registered in the
//! `__coroutines` table of the globals, which keeps it reachable for the
//! collector and for the environment dump.
//!
//! Pending input arguments and unpopped return values sit on top of the
//! thread's own value stack, returns below inputs:
//!
//! ```text
//! [ ... thread state ... | r1 .. rN | a1 .. aM ]
//! ```
//!
//! so the coroutine sub-blob only needs the two counts.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::trace;

use crate::middle::bytecode::{read_str, write_str};
use crate::runtime::table::Table;
use crate::runtime::value::{ObjId, Value};
use crate::scripting::errors::{GameDataError, ScriptError, VersionMismatchError};
use crate::scripting::objects::{new_field, new_player};
use crate::vm::{HostServices, ResumeOutcome, ThreadStatus, VM};

/// Global holding every registered coroutine thread
pub const REGISTRY_NAME: &str = "__coroutines";

/// Oldest coroutine sub-blob version still read
pub const MIN_SUBBLOB_VERSION: u8 = 4;
/// Version written; 5 added the textdomain stack
pub const SUBBLOB_VERSION: u8 = 5;

/// Coroutine status as the scheduler sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    /// Not started yet or yielded
    Suspended,
    /// Returned or died with an error
    Completed,
}

/// Argument the host hands to a coroutine
#[derive(Debug, Clone, PartialEq)]
pub enum CoroutineArg {
    Player(u8),
    Coords { x: i32, y: i32 },
    Str(String),
    Int(i64),
}

/// Handle to one registered coroutine
#[derive(Debug)]
pub struct CoroutineHandle {
    thread: ObjId,
    registry_index: u32,
    ninputs: u32,
    nreturns: u32,
    status: CoroutineStatus,
    textdomains: Vec<String>,
}

/// The registry table, created on first use
pub fn registry(vm: &mut VM) -> Result<ObjId, ScriptError> {
    match vm.global(REGISTRY_NAME)? {
        Value::Table(id) => Ok(id),
        Value::Nil => {
            let id = vm.heap.alloc_table(Table::new());
            vm.set_global(REGISTRY_NAME, Value::Table(id))?;
            Ok(id)
        }
        other => Err(ScriptError::Corrupt(format!(
            "{} is a {} value",
            REGISTRY_NAME,
            other.type_name()
        ))),
    }
}

/// Store `thread` at the lowest free positive index
fn register(
    vm: &mut VM,
    thread: ObjId,
) -> Result<u32, ScriptError> {
    let registry = registry(vm)?;
    let table = vm.heap.table_mut(registry)?;
    let mut index: u32 = 1;
    while !table.get_int(i64::from(index)).is_nil() {
        index = index
            .checked_add(1)
            .ok_or_else(|| ScriptError::Corrupt("coroutine registry is full".to_string()))?;
    }
    table.set_int(i64::from(index), Value::Thread(thread));
    Ok(index)
}

impl CoroutineHandle {
    /// Wrap `callable` into a new registered coroutine
    ///
    /// Hooks, timers and restored savegames all come through here.
    pub fn create(
        vm: &mut VM,
        callable: Value,
    ) -> Result<Self, ScriptError> {
        let thread = vm
            .new_thread(callable)
            .map_err(|e| ScriptError::BadValue(e.to_string()))?;
        let registry_index = register(vm, thread)?;
        trace!(thread = %thread, index = registry_index, "coroutine registered");
        Ok(Self {
            thread,
            registry_index,
            ninputs: 0,
            nreturns: 0,
            status: CoroutineStatus::Suspended,
            textdomains: Vec::new(),
        })
    }

    pub fn status(&self) -> CoroutineStatus {
        self.status
    }

    pub fn registry_index(&self) -> u32 {
        self.registry_index
    }

    pub fn thread(&self) -> ObjId {
        self.thread
    }

    pub fn pending_args(&self) -> u32 {
        self.ninputs
    }

    pub fn pending_returns(&self) -> u32 {
        self.nreturns
    }

    /// Textdomain stack restored around every resume
    pub fn textdomains(&self) -> &[String] {
        &self.textdomains
    }

    fn stack<'v>(
        &self,
        vm: &'v mut VM,
    ) -> Result<&'v mut Vec<Value>, ScriptError> {
        vm.heap
            .thread_mut(self.thread)?
            .map(|t| &mut t.stack)
            .ok_or_else(|| ScriptError::BadValue("coroutine is running".to_string()))
    }

    /// Run the coroutine until it yields, returns or fails
    ///
    /// Only the pending input arguments are delivered; return values left
    /// from the previous resume are dropped.
    pub fn resume(
        &mut self,
        vm: &mut VM,
        host: &mut dyn HostServices,
    ) -> Result<CoroutineStatus, ScriptError> {
        if self.status == CoroutineStatus::Completed {
            return Err(ScriptError::BadValue(
                "cannot resume a completed coroutine".to_string(),
            ));
        }
        let ninputs = self.ninputs as usize;
        let nreturns = self.nreturns as usize;
        let args = {
            let stack = self.stack(vm)?;
            let len = stack.len();
            let args = stack.split_off(len - ninputs);
            stack.truncate(len - ninputs - nreturns);
            args
        };
        self.ninputs = 0;
        self.nreturns = 0;

        std::mem::swap(&mut vm.textdomains, &mut self.textdomains);
        let outcome = vm.resume(self.thread, args, host);
        std::mem::swap(&mut vm.textdomains, &mut self.textdomains);

        let (values, status) = match outcome {
            Ok(ResumeOutcome::Yielded(values)) => (values, CoroutineStatus::Suspended),
            Ok(ResumeOutcome::Returned(values)) => (values, CoroutineStatus::Completed),
            Err(err) => {
                self.status = CoroutineStatus::Completed;
                return Err(err.into());
            }
        };
        self.nreturns = values.len() as u32;
        self.stack(vm)?.extend(values);
        self.status = status;
        trace!(
            thread = %self.thread,
            returns = self.nreturns,
            completed = status == CoroutineStatus::Completed,
            "coroutine resumed"
        );
        Ok(status)
    }

    /// Queue an argument for the next resume
    pub fn push_arg(
        &mut self,
        vm: &mut VM,
        arg: CoroutineArg,
    ) -> Result<(), ScriptError> {
        let value = match arg {
            CoroutineArg::Player(n) => new_player(&mut vm.heap, n),
            CoroutineArg::Coords { x, y } => new_field(&mut vm.heap, x, y),
            CoroutineArg::Str(s) => Value::from(s),
            CoroutineArg::Int(i) => Value::Int(i),
        };
        self.stack(vm)?.push(value);
        self.ninputs += 1;
        Ok(())
    }

    /// Take the last remaining return value
    fn pop(
        &mut self,
        vm: &mut VM,
    ) -> Result<Value, ScriptError> {
        if self.nreturns == 0 {
            return Err(ScriptError::BadValue(
                "coroutine has no return value left".to_string(),
            ));
        }
        let ninputs = self.ninputs as usize;
        let stack = self.stack(vm)?;
        let idx = stack.len() - ninputs - 1;
        let value = stack.remove(idx);
        self.nreturns -= 1;
        Ok(value)
    }

    pub fn pop_string(
        &mut self,
        vm: &mut VM,
    ) -> Result<String, ScriptError> {
        match self.pop(vm)? {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(ScriptError::BadValue(format!(
                "expected a string return value, got {}",
                other.type_name()
            ))),
        }
    }

    /// Integer in `0..=u32::MAX`; integral floats are accepted
    pub fn pop_uint32(
        &mut self,
        vm: &mut VM,
    ) -> Result<u32, ScriptError> {
        let value = self.pop(vm)?;
        let number = match &value {
            Value::Int(_) | Value::Float(_) => value.as_integer(),
            _ => None,
        };
        number
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                ScriptError::BadValue(format!(
                    "expected an unsigned 32-bit integer return value, got {}",
                    value
                ))
            })
    }

    /// Table return value; the id stays valid until the next collection
    pub fn pop_table(
        &mut self,
        vm: &mut VM,
    ) -> Result<ObjId, ScriptError> {
        match self.pop(vm)? {
            Value::Table(id) => Ok(id),
            other => Err(ScriptError::BadValue(format!(
                "expected a table return value, got {}",
                other.type_name()
            ))),
        }
    }

    /// Write the coroutine sub-blob
    pub fn write<W: Write>(
        &self,
        out: &mut W,
    ) -> Result<(), GameDataError> {
        out.write_u8(SUBBLOB_VERSION)?;
        out.write_u32::<LittleEndian>(self.ninputs)?;
        out.write_u32::<LittleEndian>(self.nreturns)?;
        out.write_u32::<LittleEndian>(self.registry_index)?;
        out.write_u32::<LittleEndian>(self.textdomains.len() as u32)?;
        for domain in &self.textdomains {
            write_str(out, domain)?;
        }
        Ok(())
    }

    /// Read a sub-blob against a restored environment
    ///
    /// Nothing in `vm` is modified, whatever the outcome.
    pub fn read<R: Read>(
        input: &mut R,
        vm: &VM,
    ) -> Result<Self, GameDataError> {
        let version = input.read_u8()?;
        if !(MIN_SUBBLOB_VERSION..=SUBBLOB_VERSION).contains(&version) {
            return Err(VersionMismatchError::new(
                "coroutine",
                u32::from(version),
                format!("{}..={}", MIN_SUBBLOB_VERSION, SUBBLOB_VERSION),
            )
            .into());
        }
        let ninputs = input.read_u32::<LittleEndian>()?;
        let nreturns = input.read_u32::<LittleEndian>()?;
        let registry_index = input.read_u32::<LittleEndian>()?;
        let mut textdomains = Vec::new();
        if version >= 5 {
            let count = input.read_u32::<LittleEndian>()?;
            for _ in 0..count {
                textdomains.push(read_str(input)?);
            }
        }

        let corrupt = |message: String| GameDataError::Script(ScriptError::Corrupt(message));
        let registry = match vm.global(REGISTRY_NAME)? {
            Value::Table(id) => id,
            _ => return Err(corrupt("no coroutine registry in the environment".to_string())),
        };
        let thread = match vm.heap.table(registry)?.get_int(i64::from(registry_index)) {
            Value::Thread(id) => id,
            other => {
                return Err(corrupt(format!(
                    "registry slot {} holds a {} value",
                    registry_index,
                    other.type_name()
                )))
            }
        };
        let state = vm
            .heap
            .thread(thread)?
            .ok_or_else(|| corrupt("restored coroutine is marked running".to_string()))?;
        if (state.stack.len() as u64) < u64::from(ninputs) + u64::from(nreturns) {
            return Err(corrupt(format!(
                "coroutine {} has fewer stack values than its pending counts",
                registry_index
            )));
        }
        let status = match state.status {
            ThreadStatus::Dead => CoroutineStatus::Completed,
            _ => CoroutineStatus::Suspended,
        };
        Ok(Self {
            thread,
            registry_index,
            ninputs,
            nreturns,
            status,
            textdomains,
        })
    }

    /// Unregister the coroutine; the thread becomes collectable
    pub fn release(
        self,
        vm: &mut VM,
    ) -> Result<(), ScriptError> {
        let registry = registry(vm)?;
        vm.heap
            .table_mut(registry)?
            .set_int(i64::from(self.registry_index), Value::Nil);
        trace!(thread = %self.thread, index = self.registry_index, "coroutine released");
        Ok(())
    }
}
