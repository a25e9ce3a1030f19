//! Threads and call frames
//!
//! A thread is plain data: a value stack, a frame stack and the call site
//! it is parked at. Suspending never keeps anything on the Rust stack, which
//! is what makes a suspended coroutine serializable.

use std::sync::Arc;

use crate::middle::{Proto, Want};
use crate::runtime::value::{ObjId, Value};

/// Coroutine status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Created or yielded, waiting for a resume
    Suspended,
    Running,
    /// Resumed another coroutine and waits for it
    Normal,
    Dead,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Suspended => "suspended",
            ThreadStatus::Running => "running",
            ThreadStatus::Normal => "normal",
            ThreadStatus::Dead => "dead",
        }
    }
}

/// Call frame
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub closure: ObjId,
    pub proto: Arc<Proto>,
    pub pc: usize,
    /// Stack index of the callee; locals start right above it
    pub base: usize,
    /// Results the caller expects
    pub want: Want,
    /// Entered through `pcall`, catches errors raised inside
    pub protected: bool,
}

impl CallFrame {
    /// Absolute stack index of local `slot`
    #[inline]
    pub fn slot(
        &self,
        slot: u16,
    ) -> usize {
        self.base + 1 + slot as usize
    }
}

/// A native call the thread is parked in (yield or coroutine.resume)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCall {
    pub func_idx: usize,
    pub want: Want,
}

/// Script thread
#[derive(Debug, Clone)]
pub struct Thread {
    pub status: ThreadStatus,
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    /// Set while suspended inside a native call
    pub pending: Option<PendingCall>,
    /// Result count of the last multi-value call
    pub multi: usize,
    /// Host-level entry threads and coroutines may yield, plain calls may not
    pub yieldable: bool,
}

impl Thread {
    /// A fresh thread that will call `function` on its first resume
    pub fn new(function: Value) -> Self {
        Self {
            status: ThreadStatus::Suspended,
            stack: vec![function],
            frames: Vec::new(),
            pending: None,
            multi: 0,
            yieldable: true,
        }
    }

    /// Not yet started
    pub fn is_fresh(&self) -> bool {
        self.status == ThreadStatus::Suspended && self.frames.is_empty() && self.pending.is_none()
    }

    /// Heap objects referenced from the stack and frames
    pub fn references(&self) -> impl Iterator<Item = ObjId> + '_ {
        self.stack
            .iter()
            .filter_map(Value::obj_id)
            .chain(self.frames.iter().map(|f| f.closure))
    }

    /// Traceback lines, innermost first
    pub fn traceback(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let pc = frame.pc.saturating_sub(1);
                format!(
                    "{}:{}: in function '{}'",
                    frame.proto.chunk,
                    frame.proto.line_at(pc),
                    frame.proto.name
                )
            })
            .collect()
    }

    /// Position prefix of the innermost frame, `chunk:line:`
    pub fn position(&self) -> Option<String> {
        let frame = self.frames.last()?;
        let pc = frame.pc.saturating_sub(1);
        Some(format!("{}:{}:", frame.proto.chunk, frame.proto.line_at(pc)))
    }
}
