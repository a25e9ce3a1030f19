//! 原生函数调用接口
//!
//! 原生函数不直接操作线程栈，它们拿到参数向量和一个 [`NativeCtx`]，
//! 通过 [`NativeReturn`] 告诉执行器下一步做什么：返回值、让出、
//! 恢复另一个协程，或者代为调用一个脚本函数。

use std::sync::Arc;

use smallvec::SmallVec;

use crate::runtime::gc::Heap;
use crate::runtime::table::Table;
use crate::runtime::userdata::ObjectTypes;
use crate::runtime::value::{ObjId, Value};
use crate::vm::errors::{VMError, VMResult};
use crate::vm::frames::ThreadStatus;
use crate::vm::host::HostServices;

/// What a native asks the executor to do once it returns
#[derive(Debug)]
pub enum NativeReturn {
    Values(SmallVec<[Value; 4]>),
    /// Suspend the current coroutine
    Yield(Vec<Value>),
    /// Run another coroutine; its outcome becomes this call's results
    Resume { thread: ObjId, args: Vec<Value> },
    /// Call `callee` in place of the native; `protected` wraps the outcome
    /// like `pcall` does
    Call {
        callee: Value,
        args: Vec<Value>,
        protected: bool,
    },
}

impl NativeReturn {
    pub fn none() -> Self {
        NativeReturn::Values(SmallVec::new())
    }

    pub fn one(value: impl Into<Value>) -> Self {
        let mut values = SmallVec::new();
        values.push(value.into());
        NativeReturn::Values(values)
    }

    pub fn values(values: impl IntoIterator<Item = Value>) -> Self {
        NativeReturn::Values(values.into_iter().collect())
    }
}

/// 原生函数执行上下文
pub struct NativeCtx<'a> {
    pub heap: &'a mut Heap,
    pub globals: ObjId,
    pub host: &'a mut dyn HostServices,
    pub types: &'a ObjectTypes,
    /// Gettext domain stack of the running coroutine
    pub textdomains: &'a mut Vec<String>,
    pub(crate) current: ObjId,
    pub(crate) active: &'a [ObjId],
    pub(crate) yieldable: bool,
    pub(crate) position: Option<String>,
    pub(crate) name: &'static str,
}

impl<'a> NativeCtx<'a> {
    /// Thread the native runs on
    pub fn current_thread(&self) -> ObjId {
        self.current
    }

    pub fn is_yieldable(&self) -> bool {
        self.yieldable
    }

    /// `chunk:line:` of the calling script line
    pub fn position(&self) -> Option<&str> {
        self.position.as_deref()
    }

    /// Status of a coroutine as seen from the running one
    pub fn thread_status(
        &self,
        id: ObjId,
    ) -> VMResult<ThreadStatus> {
        if id == self.current {
            return Ok(ThreadStatus::Running);
        }
        if self.active.contains(&id) {
            return Ok(ThreadStatus::Normal);
        }
        match self.heap.thread(id)? {
            Some(thread) => Ok(thread.status),
            None => Ok(ThreadStatus::Running),
        }
    }

    pub fn global(
        &self,
        name: &str,
    ) -> VMResult<Value> {
        Ok(self.heap.table(self.globals)?.get_str(name))
    }

    pub fn new_table(
        &mut self,
        table: Table,
    ) -> Value {
        Value::Table(self.heap.alloc_table(table))
    }

    /// `tostring` conversion, userdata shows its type tag
    pub fn tostring(
        &self,
        value: &Value,
    ) -> String {
        match value {
            Value::Userdata(id) => match self.heap.userdata(*id) {
                Ok(object) => format!("{}.{}: {}", object.module(), object.class(), id),
                Err(_) => value.to_string(),
            },
            other => other.to_string(),
        }
    }

    /// `bad argument #n to 'name' (...)`
    pub fn arg_error(
        &self,
        n: usize,
        message: impl AsRef<str>,
    ) -> VMError {
        let short = self.name.rsplit('.').next().unwrap_or(self.name);
        VMError::Runtime(format!(
            "bad argument #{} to '{}' ({})",
            n,
            short,
            message.as_ref()
        ))
    }

    fn type_error(
        &self,
        args: &[Value],
        n: usize,
        expected: &str,
    ) -> VMError {
        let got = match args.get(n - 1) {
            Some(v) => v.type_name(),
            None => "no value",
        };
        self.arg_error(n, format!("{} expected, got {}", expected, got))
    }

    pub fn check_any(
        &self,
        args: &[Value],
        n: usize,
    ) -> VMResult<Value> {
        args.get(n - 1)
            .cloned()
            .ok_or_else(|| self.arg_error(n, "value expected"))
    }

    pub fn check_table(
        &self,
        args: &[Value],
        n: usize,
    ) -> VMResult<ObjId> {
        match args.get(n - 1) {
            Some(Value::Table(id)) => Ok(*id),
            _ => Err(self.type_error(args, n, "table")),
        }
    }

    pub fn check_thread(
        &self,
        args: &[Value],
        n: usize,
    ) -> VMResult<ObjId> {
        match args.get(n - 1) {
            Some(Value::Thread(id)) => Ok(*id),
            _ => Err(self.type_error(args, n, "coroutine")),
        }
    }

    pub fn check_int(
        &self,
        args: &[Value],
        n: usize,
    ) -> VMResult<i64> {
        match args.get(n - 1) {
            Some(v @ (Value::Int(_) | Value::Float(_) | Value::Str(_))) => v
                .as_integer()
                .ok_or_else(|| self.arg_error(n, "number has no integer representation")),
            _ => Err(self.type_error(args, n, "number")),
        }
    }

    pub fn opt_int(
        &self,
        args: &[Value],
        n: usize,
        default: i64,
    ) -> VMResult<i64> {
        match args.get(n - 1) {
            None | Some(Value::Nil) => Ok(default),
            Some(_) => self.check_int(args, n),
        }
    }

    pub fn check_number(
        &self,
        args: &[Value],
        n: usize,
    ) -> VMResult<f64> {
        args.get(n - 1)
            .and_then(Value::as_number)
            .ok_or_else(|| self.type_error(args, n, "number"))
    }

    /// String argument, numbers are converted
    pub fn check_str(
        &self,
        args: &[Value],
        n: usize,
    ) -> VMResult<Arc<str>> {
        match args.get(n - 1) {
            Some(Value::Str(s)) => Ok(s.clone()),
            Some(v @ (Value::Int(_) | Value::Float(_))) => Ok(Arc::from(v.to_string())),
            _ => Err(self.type_error(args, n, "string")),
        }
    }

    pub fn opt_str(
        &self,
        args: &[Value],
        n: usize,
    ) -> VMResult<Option<Arc<str>>> {
        match args.get(n - 1) {
            None | Some(Value::Nil) => Ok(None),
            Some(_) => self.check_str(args, n).map(Some),
        }
    }
}
