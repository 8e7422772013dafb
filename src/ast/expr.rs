// VSL Expression AST Nodes

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Span;

/// Stable id of one identifier occurrence, assigned by `Program::new`.
/// Zero means "not numbered yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// An identifier occurrence (declaration, reference, call name, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    pub name: String,
    #[serde(skip)]
    pub id: NodeId,
    #[serde(default)]
    pub span: Span,
}

impl Identifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: NodeId::default(),
            span: Span::default(),
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// Binary and unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    // Comparison
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
}

impl Operator {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Operator::Equal
                | Operator::NotEqual
                | Operator::Less
                | Operator::LessEqual
                | Operator::Greater
                | Operator::GreaterEqual
        )
    }

    /// Logical negation of a comparison (`<` becomes `>=`).
    pub fn negated(self) -> Option<Operator> {
        match self {
            Operator::Equal => Some(Operator::NotEqual),
            Operator::NotEqual => Some(Operator::Equal),
            Operator::Less => Some(Operator::GreaterEqual),
            Operator::LessEqual => Some(Operator::Greater),
            Operator::Greater => Some(Operator::LessEqual),
            Operator::GreaterEqual => Some(Operator::Less),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "<>",
            Operator::Less => "<",
            Operator::LessEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterEqual => ">=",
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Expression nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Expr {
    /// Binary operation: a + b, a < b
    Binary {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
        #[serde(default)]
        span: Span,
    },

    /// Unary operation: -a
    Unary {
        op: Operator,
        operand: Box<Expr>,
        #[serde(default)]
        span: Span,
    },

    /// Function call: f(a, b)
    Call { callee: Identifier, args: Vec<Expr> },

    /// Integer constant
    Constant {
        value: i32,
        #[serde(default)]
        span: Span,
    },

    /// Variable or parameter read
    Variable { name: Identifier },
}

impl Expr {
    pub fn int(value: i32) -> Self {
        Expr::Constant {
            value,
            span: Span::default(),
        }
    }

    pub fn var(name: &str) -> Self {
        Expr::Variable {
            name: Identifier::new(name),
        }
    }

    pub fn binary(left: Expr, op: Operator, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
            span: Span::default(),
        }
    }

    pub fn unary(op: Operator, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
            span: Span::default(),
        }
    }

    pub fn neg(operand: Expr) -> Self {
        Self::unary(Operator::Sub, operand)
    }

    pub fn call(callee: &str, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Identifier::new(callee),
            args,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Expr::Binary { span, .. } | Expr::Unary { span, .. } | Expr::Constant { span, .. } => {
                *span
            }
            Expr::Call { callee, .. } => callee.span,
            Expr::Variable { name } => name.span,
        }
    }

    /// The comparison operator when this expression is a top-level comparison.
    pub fn as_comparison(&self) -> Option<(&Expr, Operator, &Expr)> {
        match self {
            Expr::Binary {
                left, op, right, ..
            } if op.is_comparison() => Some((left, *op, right)),
            _ => None,
        }
    }
}

/// One item of a print statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrintItem {
    Expr(Expr),
    Text(String),
}

impl PrintItem {
    pub fn text(value: impl Into<String>) -> Self {
        PrintItem::Text(value.into())
    }
}

impl From<Expr> for PrintItem {
    fn from(expr: Expr) -> Self {
        PrintItem::Expr(expr)
    }
}
