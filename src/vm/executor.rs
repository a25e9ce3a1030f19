//! Virtual Machine executor
//!
//! 栈式字节码执行器。一次宿主级 resume 在 [`VM::drive`] 中循环：
//! - 正在运行的线程从堆中取出，挂起或结束时放回
//! - 脚本里的 `coroutine.resume` 不会递归进入 Rust，而是把父线程压入链表
//! - 错误沿着帧栈回溯到最近的受保护帧（`pcall`），否则结束当前协程
//!
//! 因为 Rust 栈上从不保存脚本状态，任何挂起的协程都可以被序列化。

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::middle::bytecode::{BinOp, Capture, Constant, Instr, Proto, UnOp, Want};
use crate::runtime::gc::{Closure, CollectStats, Heap, HeapObject};
use crate::runtime::table::Table;
use crate::runtime::userdata::ObjectTypes;
use crate::runtime::value::{NativeRef, ObjId, Value};
use crate::util::config::ScriptingConfig;
use crate::vm::errors::{VMError, VMResult};
use crate::vm::extfunc::{NativeCtx, NativeReturn};
use crate::vm::frames::{CallFrame, PendingCall, Thread, ThreadStatus};
use crate::vm::host::HostServices;
use crate::vm::instructions;

/// VM 配置
#[derive(Debug, Clone)]
pub struct VMConfig {
    /// 最大调用深度
    pub max_call_depth: usize,
    /// Instructions one host-level resume may execute
    pub max_instructions: u64,
    /// Allocations between automatic collections
    pub gc_threshold: usize,
}

impl Default for VMConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 200,
            max_instructions: 50_000_000,
            gc_threshold: 100_000,
        }
    }
}

impl From<&ScriptingConfig> for VMConfig {
    fn from(config: &ScriptingConfig) -> Self {
        Self {
            max_call_depth: config.max_call_depth,
            max_instructions: config.max_instructions_per_resume,
            gc_threshold: config.gc_threshold,
        }
    }
}

/// How a host-level resume ended
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    Yielded(Vec<Value>),
    Returned(Vec<Value>),
}

/// Why the instruction loop handed control back to [`VM::drive`]
enum Step {
    Yield(Vec<Value>),
    Return(Vec<Value>),
    Resume { thread: ObjId, args: Vec<Value> },
    Error(VMError),
}

enum Flow {
    Continue,
    Step(Step),
}

/// 虚拟机：堆、全局表以及可实例化的对象类型
#[derive(Debug)]
pub struct VM {
    pub heap: Heap,
    globals: ObjId,
    pub config: VMConfig,
    pub types: ObjectTypes,
    /// Gettext domain stack of whatever coroutine is running
    pub textdomains: Vec<String>,
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

impl VM {
    pub fn new() -> Self {
        Self::new_with_config(VMConfig::default())
    }

    pub fn new_with_config(config: VMConfig) -> Self {
        let mut heap = Heap::new();
        let globals = heap.alloc_table(Table::new());
        Self {
            heap,
            globals,
            config,
            types: ObjectTypes::new(),
            textdomains: Vec::new(),
        }
    }

    pub fn globals(&self) -> ObjId {
        self.globals
    }

    /// Replace the global table, used when a savegame is restored
    pub fn set_globals(
        &mut self,
        globals: ObjId,
    ) -> VMResult<()> {
        self.heap.table(globals)?;
        self.globals = globals;
        Ok(())
    }

    pub fn global(
        &self,
        name: &str,
    ) -> VMResult<Value> {
        Ok(self.heap.table(self.globals)?.get_str(name))
    }

    pub fn set_global(
        &mut self,
        name: &str,
        value: Value,
    ) -> VMResult<()> {
        self.heap.table_mut(self.globals)?.set_str(name, value);
        Ok(())
    }

    /// Wrap a compiled chunk into a callable closure
    pub fn load(
        &mut self,
        proto: Arc<Proto>,
    ) -> VMResult<Value> {
        if !proto.captures.is_empty() {
            return Err(VMError::Runtime(format!(
                "chunk '{}' expects upvalues",
                proto.chunk
            )));
        }
        let id = self.heap.alloc(HeapObject::Closure(Closure {
            proto,
            upvalues: Vec::new(),
        }));
        Ok(Value::Function(id))
    }

    /// New suspended coroutine that will call `function`
    pub fn new_thread(
        &mut self,
        function: Value,
    ) -> VMResult<ObjId> {
        match function {
            Value::Function(id) => {
                self.heap.closure(id)?;
                Ok(self
                    .heap
                    .alloc(HeapObject::Thread(Some(Box::new(Thread::new(function))))))
            }
            other => Err(VMError::Runtime(format!(
                "coroutine body must be a script function, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn thread_status(
        &self,
        id: ObjId,
    ) -> VMResult<ThreadStatus> {
        Ok(self
            .heap
            .thread(id)?
            .map(|t| t.status)
            .unwrap_or(ThreadStatus::Running))
    }

    /// Resume a suspended coroutine from the host
    ///
    /// Values the host keeps outside the heap across this call must be
    /// reachable from the globals; an automatic collection may run first.
    pub fn resume(
        &mut self,
        id: ObjId,
        args: Vec<Value>,
        host: &mut dyn HostServices,
    ) -> VMResult<ResumeOutcome> {
        let mut roots = vec![Value::Thread(id)];
        roots.extend(args.iter().cloned());
        self.maybe_collect(&roots);

        let thread = self.heap.take_thread(id)?;
        if thread.status != ThreadStatus::Suspended {
            let status = thread.status;
            self.heap.put_thread(id, thread)?;
            return Err(VMError::Runtime(format!(
                "cannot resume {} coroutine",
                status.as_str()
            )));
        }
        self.drive(id, thread, args, host)
    }

    /// Call a function to completion; it may not yield
    pub fn call(
        &mut self,
        function: Value,
        args: Vec<Value>,
        host: &mut dyn HostServices,
    ) -> VMResult<Vec<Value>> {
        let mut roots = vec![function.clone()];
        roots.extend(args.iter().cloned());
        self.maybe_collect(&roots);

        match function {
            Value::Function(_) => {
                let mut thread = Thread::new(function);
                thread.yieldable = false;
                let id = self.heap.alloc(HeapObject::Thread(None));
                match self.drive(id, Box::new(thread), args, host)? {
                    ResumeOutcome::Returned(values) => Ok(values),
                    ResumeOutcome::Yielded(_) => Err(VMError::runtime(
                        "attempt to yield from outside a coroutine",
                    )),
                }
            }
            Value::Native(native) => {
                let mut ctx = NativeCtx {
                    heap: &mut self.heap,
                    globals: self.globals,
                    host,
                    types: &self.types,
                    textdomains: &mut self.textdomains,
                    current: self.globals,
                    active: &[],
                    yieldable: false,
                    position: None,
                    name: native.name,
                };
                match (native.func)(&mut ctx, args)? {
                    NativeReturn::Values(values) => Ok(values.into_vec()),
                    _ => Err(VMError::Runtime(format!(
                        "'{}' cannot be called from the host",
                        native.name
                    ))),
                }
            }
            other => Err(VMError::Runtime(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        }
    }

    /// Full collection rooted at the globals plus `extra`
    pub fn collect_garbage(
        &mut self,
        extra: &[Value],
    ) -> CollectStats {
        let mut roots = Vec::with_capacity(extra.len() + 1);
        roots.push(Value::Table(self.globals));
        roots.extend(extra.iter().cloned());
        self.heap.collect(&roots)
    }

    fn maybe_collect(
        &mut self,
        extra: &[Value],
    ) {
        if self.heap.allocated_since_collect() > self.config.gc_threshold {
            self.collect_garbage(extra);
        }
    }

    /// `tostring` for host-side display
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

    /// 驱动一次宿主级 resume，直到最外层协程让出、返回或出错
    fn drive(
        &mut self,
        id: ObjId,
        mut thread: Box<Thread>,
        args: Vec<Value>,
        host: &mut dyn HostServices,
    ) -> VMResult<ResumeOutcome> {
        let mut budget = self.config.max_instructions;
        let mut chain: Vec<(ObjId, Box<Thread>)> = Vec::new();
        let mut current = id;
        thread.status = ThreadStatus::Running;
        let mut entry_error = self.enter(&mut thread, args).err();

        loop {
            let step = match entry_error.take() {
                Some(err) => Step::Error(err),
                None => {
                    let active: SmallVec<[ObjId; 8]> = chain.iter().map(|(id, _)| *id).collect();
                    self.execute(&mut thread, current, &active, &mut budget, host)
                }
            };

            match step {
                Step::Resume { thread: co, args } => match self.take_resumable(co, current, &chain) {
                    Ok(next) => {
                        trace!(from = %current, to = %co, "coroutine resume");
                        thread.status = ThreadStatus::Normal;
                        chain.push((current, thread));
                        current = co;
                        thread = next;
                        thread.status = ThreadStatus::Running;
                        entry_error = self.enter(&mut thread, args).err();
                    }
                    Err(err) => {
                        Self::deliver(&mut thread, vec![Value::Bool(false), Value::from(err.to_string())]);
                    }
                },
                Step::Yield(values) => {
                    thread.status = ThreadStatus::Suspended;
                    self.heap.put_thread(current, thread)?;
                    match chain.pop() {
                        Some((parent_id, mut parent)) => {
                            let mut delivered = vec![Value::Bool(true)];
                            delivered.extend(values);
                            Self::deliver(&mut parent, delivered);
                            parent.status = ThreadStatus::Running;
                            current = parent_id;
                            thread = parent;
                        }
                        None => return Ok(ResumeOutcome::Yielded(values)),
                    }
                }
                Step::Return(values) => {
                    thread.status = ThreadStatus::Dead;
                    thread.stack.clear();
                    self.heap.put_thread(current, thread)?;
                    match chain.pop() {
                        Some((parent_id, mut parent)) => {
                            let mut delivered = vec![Value::Bool(true)];
                            delivered.extend(values);
                            Self::deliver(&mut parent, delivered);
                            parent.status = ThreadStatus::Running;
                            current = parent_id;
                            thread = parent;
                        }
                        None => return Ok(ResumeOutcome::Returned(values)),
                    }
                }
                Step::Error(err) => {
                    Self::kill(&mut thread);
                    self.heap.put_thread(current, thread)?;
                    if !err.is_catchable() {
                        for (parent_id, mut parent) in chain.drain(..).rev() {
                            Self::kill(&mut parent);
                            self.heap.put_thread(parent_id, parent)?;
                        }
                        return Err(err);
                    }
                    match chain.pop() {
                        Some((parent_id, mut parent)) => {
                            debug!(thread = %current, error = %err, "coroutine died");
                            Self::deliver(&mut parent, vec![Value::Bool(false), err.value()]);
                            parent.status = ThreadStatus::Running;
                            current = parent_id;
                            thread = parent;
                        }
                        None => return Err(err),
                    }
                }
            }
        }
    }

    fn kill(thread: &mut Thread) {
        thread.status = ThreadStatus::Dead;
        thread.frames.clear();
        thread.stack.clear();
        thread.pending = None;
    }

    fn take_resumable(
        &mut self,
        co: ObjId,
        current: ObjId,
        chain: &[(ObjId, Box<Thread>)],
    ) -> VMResult<Box<Thread>> {
        if co == current || chain.iter().any(|(id, _)| *id == co) {
            return Err(VMError::runtime("cannot resume non-suspended coroutine"));
        }
        let thread = self.heap.take_thread(co)?;
        if thread.status != ThreadStatus::Suspended {
            let status = thread.status;
            self.heap.put_thread(co, thread)?;
            return Err(VMError::Runtime(format!(
                "cannot resume {} coroutine",
                status.as_str()
            )));
        }
        Ok(thread)
    }

    /// Start a fresh thread or hand resume arguments to a parked one
    fn enter(
        &mut self,
        thread: &mut Thread,
        args: Vec<Value>,
    ) -> VMResult<()> {
        if thread.pending.is_some() {
            Self::deliver(thread, args);
            return Ok(());
        }
        let Some(Value::Function(closure)) = thread.stack.first().cloned() else {
            return Err(VMError::runtime("cannot resume dead coroutine"));
        };
        thread.stack.truncate(1);
        let nargs = args.len();
        thread.stack.extend(args);
        self.push_frame(thread, closure, 0, nargs, Want::Multi, false)
    }

    /// Complete the native call a thread is parked in
    fn deliver(
        thread: &mut Thread,
        values: Vec<Value>,
    ) {
        if let Some(pending) = thread.pending.take() {
            thread.stack.truncate(pending.func_idx);
            Self::place(thread, values, pending.want);
        }
    }

    /// Push call results as the call site wants them
    fn place(
        thread: &mut Thread,
        mut values: Vec<Value>,
        want: Want,
    ) {
        match want {
            Want::Fixed(n) => {
                values.resize(n as usize, Value::Nil);
                thread.stack.extend(values);
            }
            Want::Multi => {
                thread.multi = values.len();
                thread.stack.extend(values);
            }
        }
    }

    fn push_frame(
        &mut self,
        thread: &mut Thread,
        closure: ObjId,
        func_idx: usize,
        nargs: usize,
        want: Want,
        protected: bool,
    ) -> VMResult<()> {
        if thread.frames.len() >= self.config.max_call_depth {
            return Err(VMError::runtime("stack overflow"));
        }
        let proto = self.heap.closure(closure)?.proto.clone();
        let params = proto.num_params as usize;
        thread.stack.truncate(func_idx + 1 + nargs.min(params));
        thread.stack.resize(func_idx + 1 + params, Value::Nil);
        thread.frames.push(CallFrame {
            closure,
            proto,
            pc: 0,
            base: func_idx,
            want,
            protected,
        });
        Ok(())
    }

    /// Run until the thread yields, returns, resumes another or dies
    fn execute(
        &mut self,
        thread: &mut Thread,
        current: ObjId,
        active: &[ObjId],
        budget: &mut u64,
        host: &mut dyn HostServices,
    ) -> Step {
        loop {
            match self.run(thread, current, active, budget, host) {
                Ok(step) => return step,
                Err(err) => {
                    if let Err(err) = Self::catch(thread, err) {
                        return Step::Error(err);
                    }
                }
            }
        }
    }

    /// Unwind to the innermost protected frame and hand it `false, err`
    fn catch(
        thread: &mut Thread,
        err: VMError,
    ) -> VMResult<()> {
        if !err.is_catchable() {
            return Err(err);
        }
        let Some(idx) = thread.frames.iter().rposition(|f| f.protected) else {
            return Err(err);
        };
        let frame = thread.frames[idx].clone();
        thread.frames.truncate(idx);
        thread.stack.truncate(frame.base);
        thread.pending = None;
        Self::place(thread, vec![Value::Bool(false), err.value()], frame.want);
        Ok(())
    }

    /// Attach position and traceback to an error surfacing in script code
    fn positioned(
        thread: &Thread,
        err: VMError,
    ) -> VMError {
        match err {
            VMError::Runtime(_) | VMError::Dangling(_) => {
                let text = err.to_string();
                let message = match thread.position() {
                    Some(position) => format!("{} {}", position, text),
                    None => text,
                };
                VMError::Thrown {
                    value: Value::from(message.clone()),
                    message,
                    traceback: thread.traceback(),
                }
            }
            VMError::Thrown {
                value,
                message,
                traceback,
            } if traceback.is_empty() => VMError::Thrown {
                value,
                message,
                traceback: thread.traceback(),
            },
            other => other,
        }
    }

    fn run(
        &mut self,
        thread: &mut Thread,
        current: ObjId,
        active: &[ObjId],
        budget: &mut u64,
        host: &mut dyn HostServices,
    ) -> VMResult<Step> {
        loop {
            if *budget == 0 {
                return Err(VMError::BudgetExhausted(self.config.max_instructions));
            }
            *budget -= 1;
            let Some(frame) = thread.frames.last_mut() else {
                return Err(VMError::runtime("thread has no active frame"));
            };
            let Some(&instr) = frame.proto.code.get(frame.pc) else {
                return Err(VMError::runtime("program counter out of range"));
            };
            frame.pc += 1;
            match self.step(instr, thread, current, active, host) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Step(step)) => return Ok(step),
                Err(err) => return Err(Self::positioned(thread, err)),
            }
        }
    }

    /// 执行单条指令
    fn step(
        &mut self,
        instr: Instr,
        thread: &mut Thread,
        current: ObjId,
        active: &[ObjId],
        host: &mut dyn HostServices,
    ) -> VMResult<Flow> {
        let frame = frame_of(thread)?;
        let base = frame.base;
        let closure = frame.closure;
        let proto = frame.proto.clone();

        match instr {
            Instr::Nil => thread.stack.push(Value::Nil),
            Instr::True => thread.stack.push(Value::Bool(true)),
            Instr::False => thread.stack.push(Value::Bool(false)),
            Instr::Const(idx) => {
                let value = match proto.constants.get(idx as usize) {
                    Some(Constant::Int(v)) => Value::Int(*v),
                    Some(Constant::Float(v)) => Value::Float(*v),
                    Some(Constant::Str(s)) => Value::Str(s.clone()),
                    None => return Err(VMError::runtime("constant out of range")),
                };
                thread.stack.push(value);
            }
            Instr::Pop(n) => {
                let len = thread.stack.len().saturating_sub(n as usize);
                thread.stack.truncate(len);
            }

            Instr::GetLocal(slot) => {
                let value = local(thread, base, slot)?.clone();
                thread.stack.push(value);
            }
            Instr::SetLocal(slot) => {
                let value = pop(thread);
                *local_mut(thread, base, slot)? = value;
            }
            Instr::NewCell(slot) => {
                let value = std::mem::take(local_mut(thread, base, slot)?);
                let cell = self.heap.alloc(HeapObject::Cell(value));
                *local_mut(thread, base, slot)? = Value::Cell(cell);
            }
            Instr::GetCell(slot) => {
                let cell = cell_of(local(thread, base, slot)?)?;
                let value = self.heap.cell(cell)?.clone();
                thread.stack.push(value);
            }
            Instr::SetCell(slot) => {
                let value = pop(thread);
                let cell = cell_of(local(thread, base, slot)?)?;
                self.heap.set_cell(cell, value)?;
            }
            Instr::GetUpval(idx) => {
                let cell = self.upvalue(closure, idx)?;
                let value = self.heap.cell(cell)?.clone();
                thread.stack.push(value);
            }
            Instr::SetUpval(idx) => {
                let value = pop(thread);
                let cell = self.upvalue(closure, idx)?;
                self.heap.set_cell(cell, value)?;
            }
            Instr::GetGlobal(idx) => {
                let name = name_of(&proto, idx)?;
                let value = self.heap.table(self.globals)?.get_str(name);
                thread.stack.push(value);
            }
            Instr::SetGlobal(idx) => {
                let value = pop(thread);
                let name = name_of(&proto, idx)?;
                self.heap.table_mut(self.globals)?.set_str(name, value);
            }

            Instr::GetIndex => {
                let key = pop(thread);
                let object = pop(thread);
                let value = self.index(&object, &key)?;
                thread.stack.push(value);
            }
            Instr::GetField(idx) => {
                let object = pop(thread);
                let key = Value::Str(name_of(&proto, idx)?.clone());
                let value = self.index(&object, &key)?;
                thread.stack.push(value);
            }
            Instr::SetIndex => {
                let key = pop(thread);
                let object = pop(thread);
                let value = pop(thread);
                self.set_index(&object, &key, value)?;
            }
            Instr::SetField(idx) => {
                let object = pop(thread);
                let value = pop(thread);
                let key = Value::Str(name_of(&proto, idx)?.clone());
                self.set_index(&object, &key, value)?;
            }

            Instr::NewTable => {
                let table = self.heap.alloc_table(Table::new());
                thread.stack.push(Value::Table(table));
            }
            Instr::SetList { start, count, multi } => {
                let n = if multi {
                    expanded(count, thread)?
                } else {
                    count as usize
                };
                let values = split_top(thread, n)?;
                let Some(Value::Table(id)) = thread.stack.last() else {
                    return Err(VMError::runtime("table constructor lost its table"));
                };
                let table = self.heap.table_mut(*id)?;
                for (i, value) in values.into_iter().enumerate() {
                    table.set_int(start as i64 + i as i64, value);
                }
            }
            Instr::InitField(idx) => {
                let value = pop(thread);
                let name = name_of(&proto, idx)?;
                let Some(Value::Table(id)) = thread.stack.last() else {
                    return Err(VMError::runtime("table constructor lost its table"));
                };
                self.heap.table_mut(*id)?.set_str(name, value);
            }
            Instr::InitIndex => {
                let value = pop(thread);
                let key = pop(thread);
                let Some(Value::Table(id)) = thread.stack.last() else {
                    return Err(VMError::runtime("table constructor lost its table"));
                };
                self.heap
                    .table_mut(*id)?
                    .set_value(&key, value)
                    .map_err(|e| VMError::Runtime(e.to_string()))?;
            }

            Instr::Closure(idx) => {
                let Some(child) = proto.protos.get(idx as usize).cloned() else {
                    return Err(VMError::runtime("prototype out of range"));
                };
                let mut upvalues = Vec::with_capacity(child.captures.len());
                for capture in &child.captures {
                    let cell = match *capture {
                        Capture::Local(slot) => cell_of(local(thread, base, slot)?)?,
                        Capture::Upvalue(idx) => self.upvalue(closure, idx)?,
                    };
                    upvalues.push(cell);
                }
                let id = self.heap.alloc(HeapObject::Closure(Closure {
                    proto: child,
                    upvalues,
                }));
                thread.stack.push(Value::Function(id));
            }
            Instr::SelfMethod(idx) => {
                let object = pop(thread);
                let name = name_of(&proto, idx)?;
                let method = match &object {
                    Value::Userdata(id) => self
                        .heap
                        .userdata(*id)?
                        .method(name)
                        .map(Value::Native)
                        .unwrap_or_default(),
                    other => self.index(other, &Value::Str(name.clone()))?,
                };
                if method.is_nil() {
                    return Err(VMError::Runtime(format!(
                        "attempt to call method '{}' (a nil value)",
                        name
                    )));
                }
                thread.stack.push(method);
                thread.stack.push(object);
            }
            Instr::Call {
                argc,
                want,
                multi_tail,
            } => {
                let nargs = if multi_tail {
                    expanded(argc, thread)?
                } else {
                    argc as usize
                };
                let Some(func_idx) = thread.stack.len().checked_sub(nargs + 1) else {
                    return Err(VMError::runtime("call with missing arguments"));
                };
                return self.call_at(thread, func_idx, nargs, want, current, active, host);
            }
            Instr::Return { count, multi } => {
                let n = if multi {
                    expanded(count, thread)?
                } else {
                    count as usize
                };
                let mut results = split_top(thread, n)?;
                let Some(frame) = thread.frames.pop() else {
                    return Err(VMError::runtime("return without a frame"));
                };
                thread.stack.truncate(frame.base);
                if frame.protected {
                    results.insert(0, Value::Bool(true));
                }
                if thread.frames.is_empty() {
                    return Ok(Flow::Step(Step::Return(results)));
                }
                Self::place(thread, results, frame.want);
            }

            Instr::Jump(target) => jump(thread, target),
            Instr::JumpIfFalse(target) => {
                if !pop(thread).is_truthy() {
                    jump(thread, target);
                }
            }
            Instr::And(target) => {
                if thread.stack.last().is_some_and(|v| !v.is_truthy()) {
                    jump(thread, target);
                } else {
                    pop(thread);
                }
            }
            Instr::Or(target) => {
                if thread.stack.last().is_some_and(Value::is_truthy) {
                    jump(thread, target);
                } else {
                    pop(thread);
                }
            }

            Instr::Binary(op) => {
                let rhs = pop(thread);
                let lhs = pop(thread);
                let value = match op {
                    BinOp::Eq => Value::Bool(lhs.raw_eq(&rhs)),
                    BinOp::Ne => Value::Bool(!lhs.raw_eq(&rhs)),
                    BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                        Value::Bool(instructions::compare(op, &lhs, &rhs)?)
                    }
                    BinOp::Concat => instructions::concat(&lhs, &rhs)?,
                    _ => instructions::arith(op, &lhs, &rhs)?,
                };
                thread.stack.push(value);
            }
            Instr::Unary(op) => {
                let operand = pop(thread);
                let value = match op {
                    UnOp::Neg => instructions::negate(&operand)?,
                    UnOp::Not => Value::Bool(!operand.is_truthy()),
                    UnOp::Len => match &operand {
                        Value::Str(s) => Value::Int(s.len() as i64),
                        Value::Table(id) => Value::Int(self.heap.table(*id)?.len() as i64),
                        other => {
                            return Err(VMError::Runtime(format!(
                                "attempt to get length of a {} value",
                                other.type_name()
                            )))
                        }
                    },
                };
                thread.stack.push(value);
            }

            Instr::ForPrep { slot, exit } => {
                let s = base + 1 + slot as usize;
                let (start, limit, step) = for_values(thread, s)?;
                let Some(start) = for_prepare(start, limit, step)? else {
                    jump(thread, exit);
                    return Ok(Flow::Continue);
                };
                thread.stack[s] = start.0.clone();
                thread.stack[s + 1] = start.1;
                thread.stack[s + 3] = start.0;
            }
            Instr::ForLoop { slot, body } => {
                let s = base + 1 + slot as usize;
                let (idx, limit, step) = for_values(thread, s)?;
                let next = match (&idx, &limit, &step) {
                    (Value::Int(i), Value::Int(l), Value::Int(st)) => {
                        i.checked_add(*st)
                            .filter(|n| if *st > 0 { n <= l } else { n >= l })
                            .map(Value::Int)
                    }
                    _ => {
                        let (i, l, st) = (
                            idx.as_number().unwrap_or(f64::NAN),
                            limit.as_number().unwrap_or(f64::NAN),
                            step.as_number().unwrap_or(f64::NAN),
                        );
                        let n = i + st;
                        let go = if st > 0.0 { n <= l } else { n >= l };
                        go.then_some(Value::Float(n))
                    }
                };
                if let Some(next) = next {
                    thread.stack[s] = next.clone();
                    thread.stack[s + 3] = next;
                    jump(thread, body);
                }
            }
            Instr::TForCheck { slot, nvars, exit } => {
                let s = base + 1 + slot as usize;
                let results = split_top(thread, nvars as usize)?;
                if results.first().map_or(true, Value::is_nil) {
                    jump(thread, exit);
                    return Ok(Flow::Continue);
                }
                if thread.stack.len() < s + 3 + results.len() {
                    return Err(VMError::runtime("generic for lost its state"));
                }
                thread.stack[s + 2] = results[0].clone();
                for (i, value) in results.into_iter().enumerate() {
                    thread.stack[s + 3 + i] = value;
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn upvalue(
        &self,
        closure: ObjId,
        idx: u16,
    ) -> VMResult<ObjId> {
        self.heap
            .closure(closure)?
            .upvalues
            .get(idx as usize)
            .copied()
            .ok_or_else(|| VMError::runtime("upvalue out of range"))
    }

    /// `object[key]` without metatables
    pub fn index(
        &self,
        object: &Value,
        key: &Value,
    ) -> VMResult<Value> {
        match object {
            Value::Table(id) => Ok(self.heap.table(*id)?.get_value(key)),
            Value::Str(_) => match self.heap.table(self.globals)?.get_str("string") {
                Value::Table(lib) => Ok(self.heap.table(lib)?.get_value(key)),
                _ => Ok(Value::Nil),
            },
            Value::Userdata(id) => {
                let object = self.heap.userdata(*id)?;
                let Some(name) = key.as_str() else {
                    return Ok(Value::Nil);
                };
                Ok(object
                    .get(name)
                    .or_else(|| object.method(name).map(Value::Native))
                    .unwrap_or_default())
            }
            other => Err(VMError::Runtime(format!(
                "attempt to index a {} value",
                other.type_name()
            ))),
        }
    }

    fn set_index(
        &mut self,
        object: &Value,
        key: &Value,
        value: Value,
    ) -> VMResult<()> {
        match object {
            Value::Table(id) => self
                .heap
                .table_mut(*id)?
                .set_value(key, value)
                .map_err(|e| VMError::Runtime(e.to_string())),
            Value::Userdata(_) => Err(VMError::runtime("attempt to assign to a read-only object")),
            other => Err(VMError::Runtime(format!(
                "attempt to index a {} value",
                other.type_name()
            ))),
        }
    }

    /// 调用栈上 `func_idx` 处的函数
    #[allow(clippy::too_many_arguments)]
    fn call_at(
        &mut self,
        thread: &mut Thread,
        func_idx: usize,
        nargs: usize,
        want: Want,
        current: ObjId,
        active: &[ObjId],
        host: &mut dyn HostServices,
    ) -> VMResult<Flow> {
        let callee = thread
            .stack
            .get(func_idx)
            .cloned()
            .ok_or_else(|| VMError::runtime("call with missing function"))?;
        match callee {
            Value::Function(id) => {
                self.push_frame(thread, id, func_idx, nargs, want, false)?;
                Ok(Flow::Continue)
            }
            Value::Native(native) => {
                let args = thread.stack.split_off(func_idx + 1);
                thread.stack.truncate(func_idx);
                let ret = self.invoke(native, args, thread, current, active, host)?;
                self.finish_native(thread, func_idx, want, ret, current, active, host)
            }
            other => Err(VMError::Runtime(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        }
    }

    fn invoke(
        &mut self,
        native: NativeRef,
        args: Vec<Value>,
        thread: &Thread,
        current: ObjId,
        active: &[ObjId],
        host: &mut dyn HostServices,
    ) -> VMResult<NativeReturn> {
        let mut ctx = NativeCtx {
            heap: &mut self.heap,
            globals: self.globals,
            host,
            types: &self.types,
            textdomains: &mut self.textdomains,
            current,
            active,
            yieldable: thread.yieldable,
            position: thread.position(),
            name: native.name,
        };
        (native.func)(&mut ctx, args)
    }

    /// Act on what a native returned; its callee slot is already gone
    #[allow(clippy::too_many_arguments)]
    fn finish_native(
        &mut self,
        thread: &mut Thread,
        func_idx: usize,
        want: Want,
        ret: NativeReturn,
        current: ObjId,
        active: &[ObjId],
        host: &mut dyn HostServices,
    ) -> VMResult<Flow> {
        match ret {
            NativeReturn::Values(values) => {
                Self::place(thread, values.into_vec(), want);
                Ok(Flow::Continue)
            }
            NativeReturn::Yield(values) => {
                if !thread.yieldable {
                    return Err(VMError::runtime("attempt to yield from outside a coroutine"));
                }
                thread.pending = Some(PendingCall { func_idx, want });
                Ok(Flow::Step(Step::Yield(values)))
            }
            NativeReturn::Resume { thread: co, args } => {
                thread.pending = Some(PendingCall { func_idx, want });
                Ok(Flow::Step(Step::Resume { thread: co, args }))
            }
            NativeReturn::Call {
                callee,
                args,
                protected,
            } => match callee {
                Value::Function(id) => {
                    let nargs = args.len();
                    thread.stack.push(callee);
                    thread.stack.extend(args);
                    self.push_frame(thread, id, func_idx, nargs, want, protected)?;
                    Ok(Flow::Continue)
                }
                Value::Native(native) if !protected => {
                    let ret = self.invoke(native, args, thread, current, active, host)?;
                    self.finish_native(thread, func_idx, want, ret, current, active, host)
                }
                Value::Native(native) => {
                    let outcome = match self.invoke(native, args, thread, current, active, host) {
                        Ok(NativeReturn::Values(values)) => {
                            let mut out = vec![Value::Bool(true)];
                            out.extend(values);
                            out
                        }
                        Ok(_) => vec![
                            Value::Bool(false),
                            Value::from(format!(
                                "'{}' cannot be called through a protected call",
                                native.name
                            )),
                        ],
                        Err(err) if err.is_catchable() => {
                            vec![Value::Bool(false), Self::positioned(thread, err).value()]
                        }
                        Err(err) => return Err(err),
                    };
                    Self::place(thread, outcome, want);
                    Ok(Flow::Continue)
                }
                other => {
                    let err = VMError::Runtime(format!(
                        "attempt to call a {} value",
                        other.type_name()
                    ));
                    if protected {
                        let value = Self::positioned(thread, err).value();
                        Self::place(thread, vec![Value::Bool(false), value], want);
                        Ok(Flow::Continue)
                    } else {
                        Err(err)
                    }
                }
            },
        }
    }
}

fn frame_of(thread: &Thread) -> VMResult<&CallFrame> {
    thread
        .frames
        .last()
        .ok_or_else(|| VMError::runtime("thread has no active frame"))
}

fn pop(thread: &mut Thread) -> Value {
    thread.stack.pop().unwrap_or_default()
}

/// Values of a list ending in a multi-value expression
fn expanded(
    count: u16,
    thread: &Thread,
) -> VMResult<usize> {
    (count as usize)
        .checked_sub(1)
        .map(|fixed| fixed + thread.multi)
        .ok_or_else(|| VMError::runtime("multi-value list without a tail"))
}

fn split_top(
    thread: &mut Thread,
    n: usize,
) -> VMResult<Vec<Value>> {
    let at = thread
        .stack
        .len()
        .checked_sub(n)
        .ok_or_else(|| VMError::runtime("stack underflow"))?;
    Ok(thread.stack.split_off(at))
}

fn jump(
    thread: &mut Thread,
    target: u32,
) {
    if let Some(frame) = thread.frames.last_mut() {
        frame.pc = target as usize;
    }
}

fn local(
    thread: &Thread,
    base: usize,
    slot: u16,
) -> VMResult<&Value> {
    thread
        .stack
        .get(base + 1 + slot as usize)
        .ok_or_else(|| VMError::runtime("local slot out of range"))
}

fn local_mut(
    thread: &mut Thread,
    base: usize,
    slot: u16,
) -> VMResult<&mut Value> {
    thread
        .stack
        .get_mut(base + 1 + slot as usize)
        .ok_or_else(|| VMError::runtime("local slot out of range"))
}

fn cell_of(value: &Value) -> VMResult<ObjId> {
    match value {
        Value::Cell(id) => Ok(*id),
        other => Err(VMError::Runtime(format!(
            "expected a boxed local, found {}",
            other.type_name()
        ))),
    }
}

fn name_of(
    proto: &Proto,
    idx: u32,
) -> VMResult<&Arc<str>> {
    proto
        .string_constant(idx)
        .ok_or_else(|| VMError::runtime("name constant out of range"))
}

fn for_values(
    thread: &Thread,
    s: usize,
) -> VMResult<(Value, Value, Value)> {
    match thread.stack.get(s..s + 4) {
        Some(slots) => Ok((slots[0].clone(), slots[1].clone(), slots[2].clone())),
        None => Err(VMError::runtime("numeric for lost its state")),
    }
}

/// Normalize loop control values; `None` skips the loop entirely
///
/// Returns the initial index and the limit to store back.
fn for_prepare(
    start: Value,
    limit: Value,
    step: Value,
) -> VMResult<Option<(Value, Value)>> {
    let start = start
        .to_numeric()
        .ok_or_else(|| VMError::runtime("'for' initial value must be a number"))?;
    let limit = limit
        .to_numeric()
        .ok_or_else(|| VMError::runtime("'for' limit must be a number"))?;
    let step = step
        .to_numeric()
        .ok_or_else(|| VMError::runtime("'for' step must be a number"))?;

    if let (Value::Int(i), Value::Int(st)) = (&start, &step) {
        let (i, st) = (*i, *st);
        if st == 0 {
            return Err(VMError::runtime("'for' step is zero"));
        }
        let limit = match limit {
            Value::Int(l) => l,
            Value::Float(f) if f.is_nan() => return Ok(None),
            Value::Float(f) => {
                let bound = if st > 0 { f.floor() } else { f.ceil() };
                if bound >= 9.223_372_036_854_776e18 {
                    i64::MAX
                } else if bound < -9.223_372_036_854_776e18 {
                    i64::MIN
                } else {
                    bound as i64
                }
            }
            _ => return Ok(None),
        };
        let runs = if st > 0 { i <= limit } else { i >= limit };
        return Ok(runs.then_some((Value::Int(i), Value::Int(limit))));
    }

    let (Some(i), Some(l), Some(st)) = (start.as_number(), limit.as_number(), step.as_number())
    else {
        return Ok(None);
    };
    if st == 0.0 {
        return Err(VMError::runtime("'for' step is zero"));
    }
    let runs = if st > 0.0 { i <= l } else { i >= l };
    Ok(runs.then_some((
        Value::Float(i),
        Value::Float(l),
    )))
}
