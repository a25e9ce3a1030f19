//! Abstract syntax tree
//!
//! Names are resolved during parsing: every local declaration gets a
//! [`BindingId`] and every reference is either `Local(id)` or `Global(name)`.
//! `Chunk::captured` records which bindings are captured by an inner function.

/// Unique id of a local binding within one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub u32);

/// A declared local
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub id: BindingId,
}

/// Parsed chunk
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub body: Block,
    /// Indexed by `BindingId`
    pub captured: Vec<bool>,
}

impl Chunk {
    /// Whether an inner function captures this binding
    pub fn is_captured(
        &self,
        id: BindingId,
    ) -> bool {
        self.captured.get(id.0 as usize).copied().unwrap_or(false)
    }
}

pub type Block = Vec<Stmt>;

/// Statement with its source line
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Local {
        names: Vec<Binding>,
        values: Vec<Expr>,
    },
    LocalFunction {
        name: Binding,
        func: FunctionDef,
    },
    Assign {
        targets: Vec<Expr>,
        values: Vec<Expr>,
    },
    Call(Expr),
    Do(Block),
    While {
        cond: Expr,
        body: Block,
    },
    Repeat {
        body: Block,
        cond: Expr,
    },
    If {
        branches: Vec<(Expr, Block)>,
        otherwise: Option<Block>,
    },
    NumericFor {
        var: Binding,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        vars: Vec<Binding>,
        exprs: Vec<Expr>,
        body: Block,
    },
    Return(Vec<Expr>),
    Break,
}

/// Function literal body
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Binding>,
    pub body: Block,
    pub line: u32,
}

/// Expression with its source line
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Nil,
    True,
    False,
    Int(i64),
    Float(f64),
    Str(String),
    Local(BindingId),
    Global(String),
    Index {
        object: Box<Expr>,
        key: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Method {
        object: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Function(Box<FunctionDef>),
    Table(Vec<TableField>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    /// Parenthesized expression, truncates multiple results to one
    Paren(Box<Expr>),
}

impl Expr {
    pub fn new(
        kind: ExprKind,
        line: u32,
    ) -> Self {
        Self { kind, line }
    }

    /// Calls can produce multiple values
    pub fn is_multi(&self) -> bool {
        matches!(self.kind, ExprKind::Call { .. } | ExprKind::Method { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableField {
    Positional(Expr),
    Named(String, Expr),
    Keyed(Expr, Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}
