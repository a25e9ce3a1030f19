//! 代码生成器
//!
//! 将解析后的 [`Chunk`] 转换为栈式字节码 [`Proto`]。
//!
//! 每个函数维护一个 [`FuncState`]：
//! - 局部变量占据帧内固定槽位，按声明顺序分配
//! - 被内部函数捕获的局部变量装箱为 cell，闭包共享同一个 cell
//! - 代码生成时静态跟踪栈高度，语句结束时栈高度等于活跃局部变量数

mod expr;
mod stmt;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::frontend::parser::ast::{BindingId, Chunk};
use crate::middle::bytecode::{Capture, Constant, Instr, Proto, Want};

/// Values pushed before a `SetList` flush
pub(crate) const FIELDS_PER_FLUSH: u16 = 50;

/// 代码生成错误
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {message}")]
pub struct CodegenError {
    pub line: u32,
    pub message: String,
}

pub type CodegenResult<T> = Result<T, CodegenError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Int(i64),
    Float(u64),
    Str(String),
}

struct LoopState {
    /// Stack height a `break` unwinds to
    height: u16,
    breaks: Vec<usize>,
}

/// 单个函数的生成状态
struct FuncState {
    proto: Proto,
    height: u16,
    locals: HashMap<BindingId, u16>,
    /// Bindings declared per open block, removed when it closes
    blocks: Vec<Vec<BindingId>>,
    upvalues: Vec<BindingId>,
    loops: Vec<LoopState>,
    constants: HashMap<ConstKey, u32>,
}

impl FuncState {
    fn new(
        name: String,
        chunk: Arc<str>,
        line: u32,
        num_params: u16,
    ) -> Self {
        Self {
            proto: Proto {
                name,
                chunk,
                line,
                num_params,
                code: Vec::new(),
                lines: Vec::new(),
                constants: Vec::new(),
                protos: Vec::new(),
                captures: Vec::new(),
            },
            height: 0,
            locals: HashMap::new(),
            blocks: Vec::new(),
            upvalues: Vec::new(),
            loops: Vec::new(),
            constants: HashMap::new(),
        }
    }
}

/// Where a resolved binding lives
pub(crate) enum VarLocation {
    Local { slot: u16, boxed: bool },
    Upvalue(u16),
}

/// 代码生成器
pub struct Codegen<'a> {
    chunk: &'a Chunk,
    chunk_name: Arc<str>,
    funcs: Vec<FuncState>,
}

/// Compile a parsed chunk into its top-level prototype
pub fn generate(
    chunk: &Chunk,
    chunk_name: &str,
) -> CodegenResult<Arc<Proto>> {
    Codegen::new(chunk, chunk_name).generate()
}

impl<'a> Codegen<'a> {
    pub fn new(
        chunk: &'a Chunk,
        chunk_name: &str,
    ) -> Self {
        Self {
            chunk,
            chunk_name: Arc::from(chunk_name),
            funcs: Vec::new(),
        }
    }

    /// 生成顶层函数
    pub fn generate(mut self) -> CodegenResult<Arc<Proto>> {
        let name = "main chunk".to_string();
        self.funcs
            .push(FuncState::new(name, self.chunk_name.clone(), 0, 0));
        let chunk = self.chunk;
        self.block(&chunk.body)?;
        self.emit(
            Instr::Return {
                count: 0,
                multi: false,
            },
            0,
        );
        let state = self.funcs.pop().ok_or_else(|| CodegenError {
            line: 0,
            message: "function state underflow".to_string(),
        })?;
        debug!(
            chunk = %self.chunk_name,
            instructions = state.proto.code.len(),
            functions = state.proto.protos.len(),
            "chunk compiled"
        );
        Ok(Arc::new(state.proto))
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    fn func(&mut self) -> &mut FuncState {
        // generate() pushes the top-level state before any emission
        let last = self.funcs.len() - 1;
        &mut self.funcs[last]
    }

    fn height(&self) -> u16 {
        self.funcs.last().map(|f| f.height).unwrap_or(0)
    }

    fn set_height(
        &mut self,
        height: u16,
    ) {
        self.func().height = height;
    }

    fn pc(&self) -> usize {
        self.funcs.last().map(|f| f.proto.code.len()).unwrap_or(0)
    }

    /// 发射指令并更新静态栈高度
    pub(crate) fn emit(
        &mut self,
        instr: Instr,
        line: u32,
    ) -> usize {
        let effect = stack_effect(&instr);
        let func = self.func();
        func.height = (i32::from(func.height) + effect).max(0) as u16;
        func.proto.code.push(instr);
        func.proto.lines.push(line);
        func.proto.code.len() - 1
    }

    /// Point the jump at `at` to `target`
    pub(crate) fn patch(
        &mut self,
        at: usize,
        target: usize,
    ) {
        let target = target as u32;
        if let Some(instr) = self.func().proto.code.get_mut(at) {
            match instr {
                Instr::Jump(t) | Instr::JumpIfFalse(t) | Instr::And(t) | Instr::Or(t) => *t = target,
                Instr::ForPrep { exit, .. } | Instr::TForCheck { exit, .. } => *exit = target,
                Instr::ForLoop { body, .. } => *body = target,
                _ => {}
            }
        }
    }

    pub(crate) fn pop(
        &mut self,
        n: u16,
        line: u32,
    ) {
        if n > 0 {
            self.emit(Instr::Pop(n), line);
        }
    }

    pub(crate) fn nils(
        &mut self,
        n: u16,
        line: u32,
    ) {
        for _ in 0..n {
            self.emit(Instr::Nil, line);
        }
    }

    pub(crate) fn constant(
        &mut self,
        value: Constant,
        line: u32,
    ) -> CodegenResult<u32> {
        let key = match &value {
            Constant::Int(v) => ConstKey::Int(*v),
            Constant::Float(v) => ConstKey::Float(v.to_bits()),
            Constant::Str(s) => ConstKey::Str(s.to_string()),
        };
        let func = self.func();
        if let Some(idx) = func.constants.get(&key) {
            return Ok(*idx);
        }
        let idx = u32::try_from(func.proto.constants.len()).map_err(|_| CodegenError {
            line,
            message: "too many constants".to_string(),
        })?;
        func.proto.constants.push(value);
        func.constants.insert(key, idx);
        Ok(idx)
    }

    pub(crate) fn name_constant(
        &mut self,
        name: &str,
        line: u32,
    ) -> CodegenResult<u32> {
        self.constant(Constant::Str(Arc::from(name)), line)
    }

    // ------------------------------------------------------------------
    // Scopes and variables
    // ------------------------------------------------------------------

    pub(crate) fn open_block(&mut self) {
        self.func().blocks.push(Vec::new());
    }

    /// Close the innermost block, popping its locals
    pub(crate) fn close_block(
        &mut self,
        entry_height: u16,
        line: u32,
    ) {
        let current = self.height();
        if current > entry_height {
            self.pop(current - entry_height, line);
        }
        self.forget_block();
    }

    /// Drop the innermost block's bindings without emitting code
    pub(crate) fn forget_block(&mut self) {
        let func = self.func();
        if let Some(bindings) = func.blocks.pop() {
            for id in bindings {
                func.locals.remove(&id);
            }
        }
    }

    pub(crate) fn is_captured(
        &self,
        id: BindingId,
    ) -> bool {
        self.chunk.is_captured(id)
    }

    /// Bind `id` to `slot`, boxing it when an inner function captures it
    pub(crate) fn declare_local(
        &mut self,
        id: BindingId,
        slot: u16,
        line: u32,
    ) {
        let func = self.func();
        func.locals.insert(id, slot);
        if let Some(block) = func.blocks.last_mut() {
            block.push(id);
        }
        if self.chunk.is_captured(id) {
            self.emit(Instr::NewCell(slot), line);
        }
    }

    pub(crate) fn resolve(
        &mut self,
        id: BindingId,
        line: u32,
    ) -> CodegenResult<VarLocation> {
        let level = self.funcs.len() - 1;
        if let Some(slot) = self.funcs[level].locals.get(&id) {
            return Ok(VarLocation::Local {
                slot: *slot,
                boxed: self.chunk.is_captured(id),
            });
        }
        self.resolve_upvalue(level, id)
            .map(VarLocation::Upvalue)
            .ok_or_else(|| CodegenError {
                line,
                message: format!("unresolved local binding {}", id.0),
            })
    }

    fn resolve_upvalue(
        &mut self,
        level: usize,
        id: BindingId,
    ) -> Option<u16> {
        if let Some(idx) = self.funcs[level].upvalues.iter().position(|b| *b == id) {
            return Some(idx as u16);
        }
        if level == 0 {
            return None;
        }
        let local = self.funcs[level - 1].locals.get(&id).copied();
        let capture = match local {
            Some(slot) => Capture::Local(slot),
            None => Capture::Upvalue(self.resolve_upvalue(level - 1, id)?),
        };
        let func = &mut self.funcs[level];
        func.upvalues.push(id);
        func.proto.captures.push(capture);
        Some((func.upvalues.len() - 1) as u16)
    }

    // ------------------------------------------------------------------
    // Loops
    // ------------------------------------------------------------------

    pub(crate) fn enter_loop(
        &mut self,
        height: u16,
    ) {
        self.func().loops.push(LoopState {
            height,
            breaks: Vec::new(),
        });
    }

    /// Patch pending breaks of the innermost loop to `exit`
    pub(crate) fn leave_loop(
        &mut self,
        exit: usize,
    ) {
        if let Some(state) = self.func().loops.pop() {
            for at in state.breaks {
                self.patch(at, exit);
            }
        }
    }

    pub(crate) fn emit_break(
        &mut self,
        line: u32,
    ) -> CodegenResult<()> {
        let Some(target) = self.func().loops.last().map(|l| l.height) else {
            return Err(CodegenError {
                line,
                message: "break outside a loop".to_string(),
            });
        };
        let height = self.height();
        self.pop(height.saturating_sub(target), line);
        let at = self.emit(Instr::Jump(0), line);
        // code after a break still sees the loop body's locals
        self.set_height(height);
        if let Some(state) = self.func().loops.last_mut() {
            state.breaks.push(at);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    pub(crate) fn begin_function(
        &mut self,
        name: String,
        line: u32,
        num_params: u16,
    ) {
        self.funcs.push(FuncState::new(
            name,
            self.chunk_name.clone(),
            line,
            num_params,
        ));
    }

    /// Finish the innermost function and register it with its parent
    pub(crate) fn end_function(
        &mut self,
        line: u32,
    ) -> CodegenResult<u32> {
        self.emit(
            Instr::Return {
                count: 0,
                multi: false,
            },
            line,
        );
        let state = self.funcs.pop().ok_or_else(|| CodegenError {
            line,
            message: "function state underflow".to_string(),
        })?;
        let parent = self.func();
        let idx = u32::try_from(parent.proto.protos.len()).map_err(|_| CodegenError {
            line,
            message: "too many nested functions".to_string(),
        })?;
        parent.proto.protos.push(Arc::new(state.proto));
        Ok(idx)
    }
}

/// 指令的静态栈效应
///
/// A multi-value call counts as one slot; its consumer knows to read the
/// actual count at run time.
fn stack_effect(instr: &Instr) -> i32 {
    match *instr {
        Instr::Nil
        | Instr::True
        | Instr::False
        | Instr::Const(_)
        | Instr::GetLocal(_)
        | Instr::GetCell(_)
        | Instr::GetUpval(_)
        | Instr::GetGlobal(_)
        | Instr::NewTable
        | Instr::Closure(_)
        | Instr::SelfMethod(_) => 1,
        Instr::Pop(n) => -i32::from(n),
        Instr::SetLocal(_)
        | Instr::SetCell(_)
        | Instr::SetUpval(_)
        | Instr::SetGlobal(_)
        | Instr::GetIndex
        | Instr::InitField(_)
        | Instr::JumpIfFalse(_)
        | Instr::And(_)
        | Instr::Or(_)
        | Instr::Binary(_) => -1,
        Instr::NewCell(_)
        | Instr::GetField(_)
        | Instr::Unary(_)
        | Instr::Jump(_)
        | Instr::ForPrep { .. }
        | Instr::ForLoop { .. } => 0,
        Instr::SetIndex => -3,
        Instr::SetField(_) | Instr::InitIndex => -2,
        Instr::SetList { count, .. } => -i32::from(count),
        Instr::Call { argc, want, .. } => {
            let out = match want {
                Want::Fixed(n) => i32::from(n),
                Want::Multi => 1,
            };
            out - i32::from(argc) - 1
        }
        Instr::Return { count, .. } => -i32::from(count),
        Instr::TForCheck { nvars, .. } => -i32::from(nvars),
    }
}

#[cfg(test)]
mod tests;
