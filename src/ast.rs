use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::prelude::*;

/// Stable identity of a node the resolver annotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub usize);

static NEXT_EXPR_ID: AtomicUsize = AtomicUsize::new(1);

impl ExprId {
    pub fn fresh() -> Self {
        Self(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Token,
    pub mutable: bool,
}

/// Shared body of functions, lambdas, loops, branches and rescues.
#[derive(Debug, Default)]
pub struct Block {
    pub params: Vec<Param>,
    pub statements: Vec<Rc<Stmt>>,
    pub is_native: bool,
}

impl Block {
    pub fn new(params: Vec<Param>, statements: Vec<Rc<Stmt>>) -> Self {
        Self { params, statements, is_native: false }
    }

    pub fn native(params: Vec<Param>) -> Self {
        Self { params, statements: vec![], is_native: true }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal {
        value: Value,
    },
    Variable {
        id: ExprId,
        name: Token,
    },
    Assign {
        id: ExprId,
        name: Token,
        value: Box<Expr>,
        mutable: bool,
    },
    Binary {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },
    Logical {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },
    Unary {
        operator: Token,
        right: Box<Expr>,
    },
    Grouping {
        expr: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        paren: Token,
        arguments: Vec<Expr>,
    },
    /// `object.name`, `object.0` or `object.(key)`. `arity` is set when the
    /// access is immediately called.
    Get {
        object: Box<Expr>,
        name: Token,
        key: Option<Box<Expr>>,
        arity: Option<usize>,
    },
    Set {
        object: Box<Expr>,
        name: Token,
        key: Option<Box<Expr>>,
        value: Box<Expr>,
    },
    SelfRef {
        id: ExprId,
        keyword: Token,
    },
    Super {
        id: ExprId,
        keyword: Token,
        method: Token,
        arity: Option<usize>,
    },
    ObjectLiteral {
        bracket: Token,
        entries: Vec<(Option<Token>, Expr)>,
        mutable: bool,
    },
    Lambda {
        keyword: Token,
        block: Rc<Block>,
    },
}

impl Expr {
    pub fn int_literal(v: i64) -> Expr {
        Expr::Literal { value: Value::Integer(v) }
    }

    pub fn str_literal(s: &str) -> Expr {
        Expr::Literal { value: Value::Str(s.to_owned()) }
    }

    pub fn variable(name: Token) -> Expr {
        Expr::Variable { id: ExprId::fresh(), name }
    }
}

#[derive(Debug)]
pub enum Stmt {
    Expression {
        token: Token,
        expr: Expr,
    },
    Print {
        keyword: Token,
        exprs: Vec<Expr>,
    },
    /// `if`, its `elsif` arms and an optional `else`.
    If {
        keyword: Token,
        branches: Vec<(Expr, Rc<Block>)>,
        else_branch: Option<Rc<Block>>,
    },
    While {
        keyword: Token,
        condition: Expr,
        body: Rc<Block>,
    },
    For {
        keyword: Token,
        variable: Param,
        iterable: Expr,
        body: Rc<Block>,
    },
    Return {
        keyword: Token,
        value: Option<Expr>,
    },
    Yield {
        keyword: Token,
        value: Option<Expr>,
    },
    Break {
        keyword: Token,
    },
    Continue {
        keyword: Token,
    },
    Raise {
        keyword: Token,
        value: Expr,
    },
    /// Catches exceptions raised by the preceding statements of its block.
    /// The block has exactly one parameter bound to the exception.
    Rescue {
        keyword: Token,
        block: Rc<Block>,
    },
    Function {
        name: Token,
        block: Rc<Block>,
        annotations: Vec<Expr>,
    },
    Class {
        name: Token,
        superclasses: Vec<Expr>,
        body: Vec<Rc<Stmt>>,
        mutable: bool,
        annotations: Vec<Expr>,
    },
    /// `import Other` inside a class body.
    Mixin {
        keyword: Token,
        classes: Vec<Expr>,
    },
    Pass {
        keyword: Token,
    },
}

impl Stmt {
    /// First token of the statement's line, used for line numbers and
    /// breakpoint markers.
    pub fn token(&self) -> &Token {
        match self {
            Stmt::Expression { token, .. } => token,
            Stmt::Print { keyword, .. }
            | Stmt::If { keyword, .. }
            | Stmt::While { keyword, .. }
            | Stmt::For { keyword, .. }
            | Stmt::Return { keyword, .. }
            | Stmt::Yield { keyword, .. }
            | Stmt::Break { keyword }
            | Stmt::Continue { keyword }
            | Stmt::Raise { keyword, .. }
            | Stmt::Rescue { keyword, .. }
            | Stmt::Mixin { keyword, .. }
            | Stmt::Pass { keyword } => keyword,
            Stmt::Function { name, .. } | Stmt::Class { name, .. } => name,
        }
    }

    pub fn line(&self) -> u32 {
        self.token().line
    }
}

impl AsRef<Stmt> for Stmt {
    fn as_ref(&self) -> &Stmt {
        self
    }
}
