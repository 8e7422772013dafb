// VSL Statement AST Nodes

use serde::{Deserialize, Serialize};

use super::expr::{Expr, Identifier, PrintItem};
use crate::error::Span;

/// Kind of a null statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullKind {
    Continue,
    Break,
}

/// Declaration of one or more local variables: VAR a, b
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub variables: Vec<Identifier>,
}

impl Declaration {
    pub fn new(names: &[&str]) -> Self {
        Self {
            variables: names.iter().map(|n| Identifier::new(*n)).collect(),
        }
    }
}

/// Block: { declarations statements }
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub declarations: Vec<Declaration>,
    #[serde(default)]
    pub statements: Vec<Stmt>,
}

impl Block {
    pub fn new(declarations: Vec<Declaration>, statements: Vec<Stmt>) -> Self {
        Self {
            declarations,
            statements,
        }
    }

    /// Block with a single declaration line
    pub fn with_vars(names: &[&str], statements: Vec<Stmt>) -> Self {
        let declarations = if names.is_empty() {
            Vec::new()
        } else {
            vec![Declaration::new(names)]
        };
        Self::new(declarations, statements)
    }

    pub fn declared(&self) -> impl Iterator<Item = &Identifier> {
        self.declarations.iter().flat_map(|d| d.variables.iter())
    }
}

/// Statement nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Stmt {
    /// Nested block
    Block(Block),

    /// Assignment: x := expr
    Assign { target: Identifier, value: Expr },

    /// Return statement: RETURN expr
    Return {
        value: Expr,
        #[serde(default)]
        span: Span,
    },

    /// CONTINUE or BREAK
    Null {
        null_kind: NullKind,
        #[serde(default)]
        span: Span,
    },

    /// IF cond THEN stmt [ELSE stmt] FI
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        #[serde(default)]
        else_branch: Option<Box<Stmt>>,
        #[serde(default)]
        span: Span,
    },

    /// WHILE cond DO stmt DONE
    While {
        condition: Expr,
        body: Box<Stmt>,
        #[serde(default)]
        span: Span,
    },

    /// PRINT item, item, ...
    Print {
        items: Vec<PrintItem>,
        #[serde(default)]
        span: Span,
    },

    /// READ a, b, ...
    Input {
        targets: Vec<Identifier>,
        #[serde(default)]
        span: Span,
    },
}

impl Stmt {
    pub fn assign(target: &str, value: Expr) -> Self {
        Stmt::Assign {
            target: Identifier::new(target),
            value,
        }
    }

    pub fn ret(value: Expr) -> Self {
        Stmt::Return {
            value,
            span: Span::default(),
        }
    }

    pub fn brk() -> Self {
        Stmt::Null {
            null_kind: NullKind::Break,
            span: Span::default(),
        }
    }

    pub fn cont() -> Self {
        Stmt::Null {
            null_kind: NullKind::Continue,
            span: Span::default(),
        }
    }

    pub fn if_then(condition: Expr, then_branch: Stmt) -> Self {
        Stmt::If {
            condition,
            then_branch: Box::new(then_branch),
            else_branch: None,
            span: Span::default(),
        }
    }

    pub fn if_else(condition: Expr, then_branch: Stmt, else_branch: Stmt) -> Self {
        Stmt::If {
            condition,
            then_branch: Box::new(then_branch),
            else_branch: Some(Box::new(else_branch)),
            span: Span::default(),
        }
    }

    pub fn while_loop(condition: Expr, body: Stmt) -> Self {
        Stmt::While {
            condition,
            body: Box::new(body),
            span: Span::default(),
        }
    }

    pub fn print(items: Vec<PrintItem>) -> Self {
        Stmt::Print {
            items,
            span: Span::default(),
        }
    }

    pub fn input(targets: &[&str]) -> Self {
        Stmt::Input {
            targets: targets.iter().map(|t| Identifier::new(*t)).collect(),
            span: Span::default(),
        }
    }

    pub fn block(block: Block) -> Self {
        Stmt::Block(block)
    }
}

/// Function definition: FUNC name(params) body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: Identifier,
    #[serde(default)]
    pub params: Vec<Identifier>,
    pub body: Block,
}

impl Function {
    pub fn new(name: &str, params: &[&str], body: Block) -> Self {
        Self {
            name: Identifier::new(name),
            params: params.iter().map(|p| Identifier::new(*p)).collect(),
            body,
        }
    }
}
