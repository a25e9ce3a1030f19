//! Recursive-descent parser with precedence climbing for binary operators
//!
//! Scoping is resolved while parsing, see [`ast`].

pub mod ast;

use crate::frontend::lexer::{Token, TokenKind};
use ast::*;

/// Parse error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub message: String,
}

pub type ParseResult<T> = Result<T, ParseError>;

const UNARY_PRIORITY: u8 = 12;

/// Left/right binding power, Lua style
fn binary_priority(kind: &TokenKind) -> Option<(BinOp, u8, u8)> {
    let entry = match kind {
        TokenKind::Plus => (BinOp::Add, 10, 10),
        TokenKind::Minus => (BinOp::Sub, 10, 10),
        TokenKind::Star => (BinOp::Mul, 11, 11),
        TokenKind::Slash => (BinOp::Div, 11, 11),
        TokenKind::SlashSlash => (BinOp::IDiv, 11, 11),
        TokenKind::Percent => (BinOp::Mod, 11, 11),
        TokenKind::Caret => (BinOp::Pow, 14, 13),
        TokenKind::DotDot => (BinOp::Concat, 9, 8),
        TokenKind::EqEq => (BinOp::Eq, 3, 3),
        TokenKind::Neq => (BinOp::Ne, 3, 3),
        TokenKind::Lt => (BinOp::Lt, 3, 3),
        TokenKind::Le => (BinOp::Le, 3, 3),
        TokenKind::Gt => (BinOp::Gt, 3, 3),
        TokenKind::Ge => (BinOp::Ge, 3, 3),
        _ => return None,
    };
    Some(entry)
}

#[derive(Default)]
struct FuncScope {
    blocks: Vec<Vec<(String, BindingId)>>,
}

/// Operator kind produced by [`Parser::sub_expr`]
enum Logical {
    And,
    Or,
}

/// Parser over a token vector
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    scopes: Vec<FuncScope>,
    captured: Vec<bool>,
    /// Function index that declared each binding
    owner: Vec<usize>,
}

/// Parse a token stream into a chunk
pub fn parse(tokens: Vec<Token>) -> ParseResult<Chunk> {
    let mut parser = Parser::new(tokens);
    parser.parse_chunk()
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            scopes: Vec::new(),
            captured: Vec::new(),
            owner: Vec::new(),
        }
    }

    pub fn parse_chunk(&mut self) -> ParseResult<Chunk> {
        self.scopes.push(FuncScope::default());
        self.open_block();
        let body = self.block()?;
        self.close_block();
        self.scopes.pop();
        if !self.check(&TokenKind::Eof) {
            return Err(self.unexpected("'<eof>'"));
        }
        Ok(Chunk {
            body,
            captured: std::mem::take(&mut self.captured),
        })
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn peek_at(
        &self,
        n: usize,
    ) -> &TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line())
            .unwrap_or(0)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn check(
        &self,
        kind: &TokenKind,
    ) -> bool {
        self.peek() == kind
    }

    fn eat(
        &mut self,
        kind: &TokenKind,
    ) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(
        &mut self,
        kind: TokenKind,
        what: &str,
    ) -> ParseResult<()> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    /// Expect the closing keyword of a construct opened on `open_line`
    fn expect_match(
        &mut self,
        kind: TokenKind,
        what: &str,
        opener: &str,
        open_line: u32,
    ) -> ParseResult<()> {
        if self.eat(&kind) {
            return Ok(());
        }
        if open_line == self.line() {
            Err(self.unexpected(what))
        } else {
            Err(self.error(format!(
                "{} expected (to close '{}' at line {}) near {}",
                what,
                opener,
                open_line,
                self.peek().describe()
            )))
        }
    }

    fn expect_name(&mut self) -> ParseResult<String> {
        match self.peek() {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("<name>")),
        }
    }

    fn error(
        &self,
        message: String,
    ) -> ParseError {
        ParseError {
            line: self.line(),
            message,
        }
    }

    fn unexpected(
        &self,
        what: &str,
    ) -> ParseError {
        self.error(format!("{} expected near {}", what, self.peek().describe()))
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    fn open_block(&mut self) {
        if let Some(func) = self.scopes.last_mut() {
            func.blocks.push(Vec::new());
        }
    }

    fn close_block(&mut self) {
        if let Some(func) = self.scopes.last_mut() {
            func.blocks.pop();
        }
    }

    fn declare(
        &mut self,
        name: String,
    ) -> Binding {
        let id = BindingId(self.captured.len() as u32);
        self.captured.push(false);
        self.owner.push(self.scopes.len().saturating_sub(1));
        if let Some(block) = self.scopes.last_mut().and_then(|f| f.blocks.last_mut()) {
            block.push((name.clone(), id));
        }
        Binding { name, id }
    }

    fn resolve(
        &mut self,
        name: &str,
    ) -> ExprKind {
        let current = self.scopes.len().saturating_sub(1);
        for (depth, func) in self.scopes.iter().enumerate().rev() {
            let found = func
                .blocks
                .iter()
                .rev()
                .flat_map(|block| block.iter().rev())
                .find(|(n, _)| n == name)
                .map(|(_, id)| *id);
            if let Some(id) = found {
                if depth != current {
                    self.captured[id.0 as usize] = true;
                }
                return ExprKind::Local(id);
            }
        }
        ExprKind::Global(name.to_string())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn block_follows(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Eof
                | TokenKind::KwEnd
                | TokenKind::KwElse
                | TokenKind::KwElseif
                | TokenKind::KwUntil
        )
    }

    fn block(&mut self) -> ParseResult<Block> {
        let mut stmts = Vec::new();
        while !self.block_follows() {
            if self.check(&TokenKind::KwReturn) {
                stmts.push(self.return_stmt()?);
                break;
            }
            if let Some(stmt) = self.statement()? {
                stmts.push(stmt);
            }
        }
        Ok(stmts)
    }

    /// Parse a block in its own scope
    fn scoped_block(&mut self) -> ParseResult<Block> {
        self.open_block();
        let block = self.block();
        self.close_block();
        block
    }

    fn return_stmt(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        self.advance();
        let values = if self.block_follows() || self.check(&TokenKind::Semicolon) {
            Vec::new()
        } else {
            self.expr_list()?
        };
        self.eat(&TokenKind::Semicolon);
        if !self.block_follows() {
            return Err(self.unexpected("'<eof>' or 'end'"));
        }
        Ok(Stmt {
            kind: StmtKind::Return(values),
            line,
        })
    }

    fn statement(&mut self) -> ParseResult<Option<Stmt>> {
        let line = self.line();
        let kind = match self.peek() {
            TokenKind::Semicolon => {
                self.advance();
                return Ok(None);
            }
            TokenKind::KwLocal => {
                self.advance();
                if self.eat(&TokenKind::KwFunction) {
                    let name = self.expect_name()?;
                    let binding = self.declare(name.clone());
                    let func = self.function_body(name, false, line)?;
                    StmtKind::LocalFunction {
                        name: binding,
                        func,
                    }
                } else {
                    self.local_stmt()?
                }
            }
            TokenKind::KwFunction => {
                self.advance();
                self.function_stmt(line)?
            }
            TokenKind::KwIf => self.if_stmt(line)?,
            TokenKind::KwWhile => {
                self.advance();
                let cond = self.expr()?;
                self.expect(TokenKind::KwDo, "'do'")?;
                let body = self.scoped_block()?;
                self.expect_match(TokenKind::KwEnd, "'end'", "while", line)?;
                StmtKind::While { cond, body }
            }
            TokenKind::KwRepeat => {
                self.advance();
                // the condition sees the body's locals
                self.open_block();
                let body = self.block()?;
                let cond = self
                    .expect_match(TokenKind::KwUntil, "'until'", "repeat", line)
                    .and_then(|_| self.expr());
                self.close_block();
                StmtKind::Repeat { body, cond: cond? }
            }
            TokenKind::KwFor => self.for_stmt(line)?,
            TokenKind::KwDo => {
                self.advance();
                let body = self.scoped_block()?;
                self.expect_match(TokenKind::KwEnd, "'end'", "do", line)?;
                StmtKind::Do(body)
            }
            TokenKind::KwBreak => {
                self.advance();
                StmtKind::Break
            }
            _ => self.expr_stmt()?,
        };
        Ok(Some(Stmt { kind, line }))
    }

    fn local_stmt(&mut self) -> ParseResult<StmtKind> {
        let mut names = vec![self.expect_name()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_name()?);
        }
        let values = if self.eat(&TokenKind::Assign) {
            self.expr_list()?
        } else {
            Vec::new()
        };
        // declared after the initializers: `local x = x` sees the outer x
        let names = names.into_iter().map(|n| self.declare(n)).collect();
        Ok(StmtKind::Local { names, values })
    }

    fn function_stmt(
        &mut self,
        line: u32,
    ) -> ParseResult<StmtKind> {
        let first = self.expect_name()?;
        let mut full_name = first.clone();
        let mut target = Expr::new(self.resolve(&first), line);
        let mut is_method = false;
        loop {
            let sep = if self.eat(&TokenKind::Dot) {
                "."
            } else if self.eat(&TokenKind::Colon) {
                is_method = true;
                ":"
            } else {
                break;
            };
            let key = self.expect_name()?;
            full_name.push_str(sep);
            full_name.push_str(&key);
            target = Expr::new(
                ExprKind::Index {
                    object: Box::new(target),
                    key: Box::new(Expr::new(ExprKind::Str(key), line)),
                },
                line,
            );
            if is_method {
                break;
            }
        }
        let func = self.function_body(full_name, is_method, line)?;
        Ok(StmtKind::Assign {
            targets: vec![target],
            values: vec![Expr::new(ExprKind::Function(Box::new(func)), line)],
        })
    }

    fn if_stmt(
        &mut self,
        line: u32,
    ) -> ParseResult<StmtKind> {
        self.advance();
        let mut branches = Vec::new();
        let cond = self.expr()?;
        self.expect(TokenKind::KwThen, "'then'")?;
        branches.push((cond, self.scoped_block()?));
        let mut otherwise = None;
        loop {
            if self.eat(&TokenKind::KwElseif) {
                let cond = self.expr()?;
                self.expect(TokenKind::KwThen, "'then'")?;
                branches.push((cond, self.scoped_block()?));
            } else if self.eat(&TokenKind::KwElse) {
                otherwise = Some(self.scoped_block()?);
                self.expect_match(TokenKind::KwEnd, "'end'", "if", line)?;
                break;
            } else {
                self.expect_match(TokenKind::KwEnd, "'end'", "if", line)?;
                break;
            }
        }
        Ok(StmtKind::If {
            branches,
            otherwise,
        })
    }

    fn for_stmt(
        &mut self,
        line: u32,
    ) -> ParseResult<StmtKind> {
        self.advance();
        let first = self.expect_name()?;
        if self.eat(&TokenKind::Assign) {
            let start = self.expr()?;
            self.expect(TokenKind::Comma, "','")?;
            let limit = self.expr()?;
            let step = if self.eat(&TokenKind::Comma) {
                Some(self.expr()?)
            } else {
                None
            };
            self.expect(TokenKind::KwDo, "'do'")?;
            self.open_block();
            let var = self.declare(first);
            let body = self.scoped_block();
            self.close_block();
            let body = body?;
            self.expect_match(TokenKind::KwEnd, "'end'", "for", line)?;
            return Ok(StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            });
        }

        let mut names = vec![first];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_name()?);
        }
        self.expect(TokenKind::KwIn, "'in'")?;
        let exprs = self.expr_list()?;
        self.expect(TokenKind::KwDo, "'do'")?;
        self.open_block();
        let vars = names.into_iter().map(|n| self.declare(n)).collect();
        let body = self.scoped_block();
        self.close_block();
        let body = body?;
        self.expect_match(TokenKind::KwEnd, "'end'", "for", line)?;
        Ok(StmtKind::GenericFor { vars, exprs, body })
    }

    fn expr_stmt(&mut self) -> ParseResult<StmtKind> {
        let first = self.suffixed_expr()?;
        if self.check(&TokenKind::Assign) || self.check(&TokenKind::Comma) {
            let mut targets = vec![first];
            while self.eat(&TokenKind::Comma) {
                targets.push(self.suffixed_expr()?);
            }
            self.expect(TokenKind::Assign, "'='")?;
            for target in &targets {
                if !matches!(
                    target.kind,
                    ExprKind::Local(_) | ExprKind::Global(_) | ExprKind::Index { .. }
                ) {
                    return Err(ParseError {
                        line: target.line,
                        message: "cannot assign to this expression".to_string(),
                    });
                }
            }
            let values = self.expr_list()?;
            return Ok(StmtKind::Assign { targets, values });
        }
        if !first.is_multi() {
            return Err(ParseError {
                line: first.line,
                message: "syntax error: expression is not a statement".to_string(),
            });
        }
        Ok(StmtKind::Call(first))
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn function_body(
        &mut self,
        name: String,
        is_method: bool,
        line: u32,
    ) -> ParseResult<FunctionDef> {
        self.scopes.push(FuncScope::default());
        self.open_block();
        let result = self.function_inner(name, is_method, line);
        self.close_block();
        self.scopes.pop();
        result
    }

    fn function_inner(
        &mut self,
        name: String,
        is_method: bool,
        line: u32,
    ) -> ParseResult<FunctionDef> {
        let mut params = Vec::new();
        if is_method {
            params.push(self.declare("self".to_string()));
        }
        self.expect(TokenKind::LParen, "'('")?;
        if !self.check(&TokenKind::RParen) {
            loop {
                let param = self.expect_name()?;
                params.push(self.declare(param));
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.block()?;
        self.expect_match(TokenKind::KwEnd, "'end'", "function", line)?;
        Ok(FunctionDef {
            name,
            params,
            body,
            line,
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expr_list(&mut self) -> ParseResult<Vec<Expr>> {
        let mut exprs = vec![self.expr()?];
        while self.eat(&TokenKind::Comma) {
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    pub fn expr(&mut self) -> ParseResult<Expr> {
        self.sub_expr(0)
    }

    fn sub_expr(
        &mut self,
        limit: u8,
    ) -> ParseResult<Expr> {
        let line = self.line();
        let unary = match self.peek() {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::KwNot => Some(UnOp::Not),
            TokenKind::Hash => Some(UnOp::Len),
            _ => None,
        };
        let mut lhs = if let Some(op) = unary {
            self.advance();
            let operand = self.sub_expr(UNARY_PRIORITY)?;
            fold_unary(op, operand, line)
        } else {
            self.simple_expr()?
        };

        loop {
            let line = self.line();
            let logical = match self.peek() {
                TokenKind::KwAnd => Some((Logical::And, 2u8)),
                TokenKind::KwOr => Some((Logical::Or, 1u8)),
                _ => None,
            };
            if let Some((kind, prio)) = logical {
                if prio <= limit {
                    break;
                }
                self.advance();
                let rhs = self.sub_expr(prio)?;
                let kind = match kind {
                    Logical::And => ExprKind::And(Box::new(lhs), Box::new(rhs)),
                    Logical::Or => ExprKind::Or(Box::new(lhs), Box::new(rhs)),
                };
                lhs = Expr::new(kind, line);
                continue;
            }
            let Some((op, left, right)) = binary_priority(self.peek()) else {
                break;
            };
            if left <= limit {
                break;
            }
            self.advance();
            let rhs = self.sub_expr(right)?;
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                line,
            );
        }
        Ok(lhs)
    }

    fn simple_expr(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let kind = match self.peek().clone() {
            TokenKind::KwNil => ExprKind::Nil,
            TokenKind::KwTrue => ExprKind::True,
            TokenKind::KwFalse => ExprKind::False,
            TokenKind::IntLiteral(v) => ExprKind::Int(v),
            TokenKind::FloatLiteral(v) => ExprKind::Float(v),
            TokenKind::StringLiteral(s) => ExprKind::Str(s),
            TokenKind::LBrace => return self.table_constructor(),
            TokenKind::KwFunction => {
                self.advance();
                let func = self.function_body("anonymous".to_string(), false, line)?;
                return Ok(Expr::new(ExprKind::Function(Box::new(func)), line));
            }
            _ => return self.suffixed_expr(),
        };
        self.advance();
        Ok(Expr::new(kind, line))
    }

    fn primary_expr(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        match self.peek().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::new(self.resolve(&name), line))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect_match(TokenKind::RParen, "')'", "(", line)?;
                Ok(Expr::new(ExprKind::Paren(Box::new(inner)), line))
            }
            _ => Err(self.unexpected("unexpected symbol; expression")),
        }
    }

    fn suffixed_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary_expr()?;
        loop {
            let line = self.line();
            match self.peek().clone() {
                TokenKind::Dot => {
                    self.advance();
                    let key = self.expect_name()?;
                    expr = Expr::new(
                        ExprKind::Index {
                            object: Box::new(expr),
                            key: Box::new(Expr::new(ExprKind::Str(key), line)),
                        },
                        line,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.expr()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr::new(
                        ExprKind::Index {
                            object: Box::new(expr),
                            key: Box::new(key),
                        },
                        line,
                    );
                }
                TokenKind::Colon => {
                    self.advance();
                    let name = self.expect_name()?;
                    let args = self.call_args()?;
                    expr = Expr::new(
                        ExprKind::Method {
                            object: Box::new(expr),
                            name,
                            args,
                        },
                        line,
                    );
                }
                TokenKind::LParen | TokenKind::StringLiteral(_) | TokenKind::LBrace => {
                    let args = self.call_args()?;
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        line,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> ParseResult<Vec<Expr>> {
        let line = self.line();
        match self.peek().clone() {
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(vec![Expr::new(ExprKind::Str(s), line)])
            }
            TokenKind::LBrace => Ok(vec![self.table_constructor()?]),
            TokenKind::LParen => {
                self.advance();
                if self.eat(&TokenKind::RParen) {
                    return Ok(Vec::new());
                }
                let args = self.expr_list()?;
                self.expect_match(TokenKind::RParen, "')'", "(", line)?;
                Ok(args)
            }
            _ => Err(self.unexpected("function arguments")),
        }
    }

    fn table_constructor(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let field = match (self.peek().clone(), self.peek_at(1)) {
                (TokenKind::Identifier(name), TokenKind::Assign) => {
                    self.advance();
                    self.advance();
                    TableField::Named(name, self.expr()?)
                }
                (TokenKind::LBracket, _) => {
                    self.advance();
                    let key = self.expr()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    self.expect(TokenKind::Assign, "'='")?;
                    TableField::Keyed(key, self.expr()?)
                }
                _ => TableField::Positional(self.expr()?),
            };
            fields.push(field);
            if !self.eat(&TokenKind::Comma) && !self.eat(&TokenKind::Semicolon) {
                break;
            }
        }
        self.expect_match(TokenKind::RBrace, "'}'", "{", line)?;
        Ok(Expr::new(ExprKind::Table(fields), line))
    }
}

/// Fold negative numeric literals so `-5` is a constant
fn fold_unary(
    op: UnOp,
    operand: Expr,
    line: u32,
) -> Expr {
    match (op, &operand.kind) {
        (UnOp::Neg, ExprKind::Int(v)) => Expr::new(ExprKind::Int(v.wrapping_neg()), line),
        (UnOp::Neg, ExprKind::Float(v)) => Expr::new(ExprKind::Float(-v), line),
        _ => Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            line,
        ),
    }
}

#[cfg(test)]
mod tests;
