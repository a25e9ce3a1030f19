//! 语句代码生成

use super::{Codegen, CodegenError, CodegenResult, VarLocation};
use crate::frontend::parser::ast::{Binding, Block, Expr, ExprKind, FunctionDef, Stmt, StmtKind};
use crate::middle::bytecode::{Constant, Instr, Want};

impl Codegen<'_> {
    /// 生成带独立作用域的语句块
    pub(crate) fn block(
        &mut self,
        stmts: &Block,
    ) -> CodegenResult<()> {
        let entry = self.height();
        self.open_block();
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        let line = stmts.last().map(|s| s.line).unwrap_or(0);
        self.close_block(entry, line);
        Ok(())
    }

    fn stmt(
        &mut self,
        stmt: &Stmt,
    ) -> CodegenResult<()> {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Local { names, values } => self.local_stmt(names, values, line),
            StmtKind::LocalFunction { name, func } => {
                self.emit(Instr::Nil, line);
                let slot = self.height() - 1;
                self.declare_local(name.id, slot, line);
                self.function(func)?;
                self.store_local(slot, name, line);
                Ok(())
            }
            StmtKind::Assign { targets, values } => {
                if targets.len() == 1 && values.len() == 1 {
                    self.expr(&values[0])?;
                } else {
                    self.expr_list(values, targets.len() as u16, line)?;
                }
                for target in targets.iter().rev() {
                    self.assign(target)?;
                }
                Ok(())
            }
            StmtKind::Call(call) => self.call(call, Want::Fixed(0)),
            StmtKind::Do(body) => self.block(body),
            StmtKind::While { cond, body } => {
                let top = self.pc();
                self.expr(cond)?;
                let exit_jump = self.emit(Instr::JumpIfFalse(0), line);
                self.enter_loop(self.height());
                self.block(body)?;
                self.emit(Instr::Jump(top as u32), line);
                let exit = self.pc();
                self.patch(exit_jump, exit);
                self.leave_loop(exit);
                Ok(())
            }
            StmtKind::Repeat { body, cond } => self.repeat_stmt(body, cond, line),
            StmtKind::If {
                branches,
                otherwise,
            } => {
                let mut end_jumps = Vec::new();
                for (i, (cond, body)) in branches.iter().enumerate() {
                    self.expr(cond)?;
                    let next = self.emit(Instr::JumpIfFalse(0), cond.line);
                    self.block(body)?;
                    if i + 1 < branches.len() || otherwise.is_some() {
                        end_jumps.push(self.emit(Instr::Jump(0), line));
                    }
                    let here = self.pc();
                    self.patch(next, here);
                }
                if let Some(body) = otherwise {
                    self.block(body)?;
                }
                let end = self.pc();
                for at in end_jumps {
                    self.patch(at, end);
                }
                Ok(())
            }
            StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                let base = self.height();
                self.expr(start)?;
                self.expr(limit)?;
                match step {
                    Some(step) => self.expr(step)?,
                    None => {
                        let one = self.constant(Constant::Int(1), line)?;
                        self.emit(Instr::Const(one), line);
                    }
                }
                self.emit(Instr::Nil, line);
                let prep = self.emit(Instr::ForPrep { slot: base, exit: 0 }, line);
                let body_start = self.pc();
                self.open_block();
                self.declare_local(var.id, base + 3, line);
                self.enter_loop(base + 4);
                self.block(body)?;
                self.emit(
                    Instr::ForLoop {
                        slot: base,
                        body: body_start as u32,
                    },
                    line,
                );
                let exit = self.pc();
                self.patch(prep, exit);
                self.leave_loop(exit);
                self.forget_block();
                self.pop(4, line);
                Ok(())
            }
            StmtKind::GenericFor { vars, exprs, body } => {
                let base = self.height();
                self.expr_list(exprs, 3, line)?;
                let nvars = vars.len() as u16;
                self.nils(nvars, line);
                let top = self.pc();
                for i in 0..3 {
                    self.emit(Instr::GetLocal(base + i), line);
                }
                self.emit(
                    Instr::Call {
                        argc: 2,
                        want: Want::Fixed(nvars),
                        multi_tail: false,
                    },
                    line,
                );
                let check = self.emit(
                    Instr::TForCheck {
                        slot: base,
                        nvars,
                        exit: 0,
                    },
                    line,
                );
                self.open_block();
                for (i, var) in vars.iter().enumerate() {
                    self.declare_local(var.id, base + 3 + i as u16, line);
                }
                self.enter_loop(base + 3 + nvars);
                self.block(body)?;
                self.emit(Instr::Jump(top as u32), line);
                let exit = self.pc();
                self.patch(check, exit);
                self.leave_loop(exit);
                self.forget_block();
                self.pop(3 + nvars, line);
                Ok(())
            }
            StmtKind::Return(values) => self.return_stmt(values, line),
            StmtKind::Break => self.emit_break(line),
        }
    }

    fn local_stmt(
        &mut self,
        names: &[Binding],
        values: &[Expr],
        line: u32,
    ) -> CodegenResult<()> {
        let base = self.height();
        self.expr_list(values, names.len() as u16, line)?;
        for (i, name) in names.iter().enumerate() {
            self.declare_local(name.id, base + i as u16, line);
        }
        Ok(())
    }

    fn repeat_stmt(
        &mut self,
        body: &Block,
        cond: &Expr,
        line: u32,
    ) -> CodegenResult<()> {
        let top = self.pc();
        let entry = self.height();
        self.enter_loop(entry);
        self.open_block();
        for stmt in body {
            self.stmt(stmt)?;
        }
        self.expr(cond)?;
        let locals = self.height() - 1 - entry;
        if locals == 0 {
            self.emit(Instr::JumpIfFalse(top as u32), line);
        } else {
            let again = self.emit(Instr::JumpIfFalse(0), line);
            self.pop(locals, line);
            let done = self.emit(Instr::Jump(0), line);
            let here = self.pc();
            self.patch(again, here);
            self.set_height(entry + locals);
            self.pop(locals, line);
            self.emit(Instr::Jump(top as u32), line);
            let exit = self.pc();
            self.patch(done, exit);
        }
        self.forget_block();
        let exit = self.pc();
        self.leave_loop(exit);
        Ok(())
    }

    fn return_stmt(
        &mut self,
        values: &[Expr],
        line: u32,
    ) -> CodegenResult<()> {
        let Some((last, init)) = values.split_last() else {
            self.emit(
                Instr::Return {
                    count: 0,
                    multi: false,
                },
                line,
            );
            return Ok(());
        };
        for value in init {
            self.expr(value)?;
        }
        let multi = last.is_multi();
        if multi {
            self.call(last, Want::Multi)?;
        } else {
            self.expr(last)?;
        }
        self.emit(
            Instr::Return {
                count: values.len() as u16,
                multi,
            },
            line,
        );
        Ok(())
    }

    /// Store the value on top of the stack into `target`
    fn assign(
        &mut self,
        target: &Expr,
    ) -> CodegenResult<()> {
        let line = target.line;
        match &target.kind {
            ExprKind::Local(id) => match self.resolve(*id, line)? {
                VarLocation::Local { slot, boxed: true } => {
                    self.emit(Instr::SetCell(slot), line);
                }
                VarLocation::Local { slot, boxed: false } => {
                    self.emit(Instr::SetLocal(slot), line);
                }
                VarLocation::Upvalue(idx) => {
                    self.emit(Instr::SetUpval(idx), line);
                }
            },
            ExprKind::Global(name) => {
                let idx = self.name_constant(name, line)?;
                self.emit(Instr::SetGlobal(idx), line);
            }
            ExprKind::Index { object, key } => {
                self.expr(object)?;
                if let ExprKind::Str(name) = &key.kind {
                    let idx = self.name_constant(name, line)?;
                    self.emit(Instr::SetField(idx), line);
                } else {
                    self.expr(key)?;
                    self.emit(Instr::SetIndex, line);
                }
            }
            _ => {
                return Err(CodegenError {
                    line,
                    message: "cannot assign to this expression".to_string(),
                })
            }
        }
        Ok(())
    }

    fn store_local(
        &mut self,
        slot: u16,
        binding: &Binding,
        line: u32,
    ) {
        if self.is_captured(binding.id) {
            self.emit(Instr::SetCell(slot), line);
        } else {
            self.emit(Instr::SetLocal(slot), line);
        }
    }

    /// 生成函数原型并在栈顶压入闭包
    pub(crate) fn function(
        &mut self,
        def: &FunctionDef,
    ) -> CodegenResult<()> {
        let num_params = u16::try_from(def.params.len()).map_err(|_| CodegenError {
            line: def.line,
            message: "too many parameters".to_string(),
        })?;
        self.begin_function(def.name.clone(), def.line, num_params);
        self.set_height(num_params);
        self.open_block();
        for (i, param) in def.params.iter().enumerate() {
            self.declare_local(param.id, i as u16, def.line);
        }
        for stmt in &def.body {
            self.stmt(stmt)?;
        }
        self.forget_block();
        let idx = self.end_function(def.line)?;
        self.emit(Instr::Closure(idx), def.line);
        Ok(())
    }
}
