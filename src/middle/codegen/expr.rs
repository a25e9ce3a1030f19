//! 表达式代码生成

use std::sync::Arc;

use super::{Codegen, CodegenError, CodegenResult, VarLocation, FIELDS_PER_FLUSH};
use crate::frontend::parser::ast::{Expr, ExprKind, TableField};
use crate::middle::bytecode::{Constant, Instr, Want};

impl Codegen<'_> {
    /// 生成恰好压入一个值的表达式
    pub(crate) fn expr(
        &mut self,
        expr: &Expr,
    ) -> CodegenResult<()> {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Nil => {
                self.emit(Instr::Nil, line);
            }
            ExprKind::True => {
                self.emit(Instr::True, line);
            }
            ExprKind::False => {
                self.emit(Instr::False, line);
            }
            ExprKind::Int(v) => {
                let idx = self.constant(Constant::Int(*v), line)?;
                self.emit(Instr::Const(idx), line);
            }
            ExprKind::Float(v) => {
                let idx = self.constant(Constant::Float(*v), line)?;
                self.emit(Instr::Const(idx), line);
            }
            ExprKind::Str(s) => {
                let idx = self.constant(Constant::Str(Arc::from(s.as_str())), line)?;
                self.emit(Instr::Const(idx), line);
            }
            ExprKind::Local(id) => match self.resolve(*id, line)? {
                VarLocation::Local { slot, boxed: true } => {
                    self.emit(Instr::GetCell(slot), line);
                }
                VarLocation::Local { slot, boxed: false } => {
                    self.emit(Instr::GetLocal(slot), line);
                }
                VarLocation::Upvalue(idx) => {
                    self.emit(Instr::GetUpval(idx), line);
                }
            },
            ExprKind::Global(name) => {
                let idx = self.name_constant(name, line)?;
                self.emit(Instr::GetGlobal(idx), line);
            }
            ExprKind::Index { object, key } => {
                self.expr(object)?;
                if let ExprKind::Str(name) = &key.kind {
                    let idx = self.name_constant(name, line)?;
                    self.emit(Instr::GetField(idx), line);
                } else {
                    self.expr(key)?;
                    self.emit(Instr::GetIndex, line);
                }
            }
            ExprKind::Call { .. } | ExprKind::Method { .. } => self.call(expr, Want::Fixed(1))?,
            ExprKind::Function(def) => self.function(def)?,
            ExprKind::Table(fields) => self.table(fields, line)?,
            ExprKind::Binary { op, lhs, rhs } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.emit(Instr::Binary(*op), line);
            }
            ExprKind::Unary { op, operand } => {
                self.expr(operand)?;
                self.emit(Instr::Unary(*op), line);
            }
            ExprKind::And(lhs, rhs) => {
                self.expr(lhs)?;
                let jump = self.emit(Instr::And(0), line);
                self.expr(rhs)?;
                let end = self.pc();
                self.patch(jump, end);
            }
            ExprKind::Or(lhs, rhs) => {
                self.expr(lhs)?;
                let jump = self.emit(Instr::Or(0), line);
                self.expr(rhs)?;
                let end = self.pc();
                self.patch(jump, end);
            }
            ExprKind::Paren(inner) => self.expr(inner)?,
        }
        Ok(())
    }

    /// Evaluate `exprs` adjusted to exactly `wanted` values
    pub(crate) fn expr_list(
        &mut self,
        exprs: &[Expr],
        wanted: u16,
        line: u32,
    ) -> CodegenResult<()> {
        let Some((last, init)) = exprs.split_last() else {
            self.nils(wanted, line);
            return Ok(());
        };
        for expr in init {
            self.expr(expr)?;
        }
        let mut have = init.len() as u16;
        if last.is_multi() {
            let rest = wanted.saturating_sub(have);
            self.call(last, Want::Fixed(rest))?;
            have += rest;
        } else {
            self.expr(last)?;
            have += 1;
        }
        if have > wanted {
            self.pop(have - wanted, line);
        } else {
            self.nils(wanted - have, line);
        }
        Ok(())
    }

    /// 生成函数调用或方法调用
    pub(crate) fn call(
        &mut self,
        expr: &Expr,
        want: Want,
    ) -> CodegenResult<()> {
        let line = expr.line;
        let (args, extra) = match &expr.kind {
            ExprKind::Call { callee, args } => {
                self.expr(callee)?;
                (args, 0)
            }
            ExprKind::Method { object, name, args } => {
                self.expr(object)?;
                let idx = self.name_constant(name, line)?;
                self.emit(Instr::SelfMethod(idx), line);
                (args, 1)
            }
            _ => {
                return Err(CodegenError {
                    line,
                    message: "expression is not a call".to_string(),
                })
            }
        };
        let mut multi_tail = false;
        if let Some((last, init)) = args.split_last() {
            for arg in init {
                self.expr(arg)?;
            }
            if last.is_multi() {
                self.call(last, Want::Multi)?;
                multi_tail = true;
            } else {
                self.expr(last)?;
            }
        }
        let argc = u16::try_from(args.len() + extra).map_err(|_| CodegenError {
            line,
            message: "too many arguments".to_string(),
        })?;
        self.emit(
            Instr::Call {
                argc,
                want,
                multi_tail,
            },
            line,
        );
        Ok(())
    }

    fn table(
        &mut self,
        fields: &[TableField],
        line: u32,
    ) -> CodegenResult<()> {
        self.emit(Instr::NewTable, line);
        let mut next_index: u32 = 1;
        let mut pending: u16 = 0;
        for (i, field) in fields.iter().enumerate() {
            let is_last = i + 1 == fields.len();
            match field {
                TableField::Positional(value) if is_last && value.is_multi() => {
                    self.call(value, Want::Multi)?;
                    self.emit(
                        Instr::SetList {
                            start: next_index,
                            count: pending + 1,
                            multi: true,
                        },
                        line,
                    );
                    pending = 0;
                }
                TableField::Positional(value) => {
                    self.expr(value)?;
                    pending += 1;
                    if pending == FIELDS_PER_FLUSH {
                        self.flush_list(&mut next_index, &mut pending, line);
                    }
                }
                TableField::Named(name, value) => {
                    self.flush_list(&mut next_index, &mut pending, line);
                    self.expr(value)?;
                    let idx = self.name_constant(name, line)?;
                    self.emit(Instr::InitField(idx), line);
                }
                TableField::Keyed(key, value) => {
                    self.flush_list(&mut next_index, &mut pending, line);
                    self.expr(key)?;
                    self.expr(value)?;
                    self.emit(Instr::InitIndex, line);
                }
            }
        }
        self.flush_list(&mut next_index, &mut pending, line);
        Ok(())
    }

    fn flush_list(
        &mut self,
        next_index: &mut u32,
        pending: &mut u16,
        line: u32,
    ) {
        if *pending == 0 {
            return;
        }
        self.emit(
            Instr::SetList {
                start: *next_index,
                count: *pending,
                multi: false,
            },
            line,
        );
        *next_index += u32::from(*pending);
        *pending = 0;
    }
}
