// VSL Error Handling Module
// Compile errors with source positions and colored reporting

#[cfg(not(target_arch = "wasm32"))]
use colored::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Represents a position in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

/// Represents a span in the source code (start to end position)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: Position,
    #[serde(default)]
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn single(line: usize, column: usize) -> Self {
        let pos = Position::new(line, column);
        Self {
            start: pos,
            end: pos,
        }
    }
}

/// Kinds of compile errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UndeclaredIdentifier,
    DuplicateDeclaration,
    NoEnclosingLoop,
    UnsupportedOperator,
    InvalidConditionShape,
    UnknownTarget,
    MissingEntryPoint,
    MalformedTree,
    InvalidConfig,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UndeclaredIdentifier => write!(f, "UndeclaredIdentifier"),
            ErrorKind::DuplicateDeclaration => write!(f, "DuplicateDeclaration"),
            ErrorKind::NoEnclosingLoop => write!(f, "NoEnclosingLoop"),
            ErrorKind::UnsupportedOperator => write!(f, "UnsupportedOperator"),
            ErrorKind::InvalidConditionShape => write!(f, "InvalidConditionShape"),
            ErrorKind::UnknownTarget => write!(f, "UnknownTarget"),
            ErrorKind::MissingEntryPoint => write!(f, "MissingEntryPoint"),
            ErrorKind::MalformedTree => write!(f, "MalformedTree"),
            ErrorKind::InvalidConfig => write!(f, "InvalidConfig"),
            ErrorKind::Io => write!(f, "IoError"),
        }
    }
}

/// Main error type for the compiler back end
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message} at {}:{}", span.start.line, span.start.column)]
pub struct VslError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub help: Option<String>,
}

impl VslError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Format the error for terminal display (with colors for native)
    #[cfg(not(target_arch = "wasm32"))]
    pub fn format(&self, file: &str) -> String {
        let mut output = format!(
            "{}: {} at {}:{}:{}\n",
            self.kind.to_string().red().bold(),
            self.message.white().bold(),
            file,
            self.span.start.line,
            self.span.start.column
        );
        if let Some(ref help) = self.help {
            output.push_str(&format!("\n      {}: {}\n", "Help".cyan().bold(), help));
        }
        output
    }

    /// Format the error for display (plain text for WASM)
    #[cfg(target_arch = "wasm32")]
    pub fn format(&self, file: &str) -> String {
        let mut output = format!(
            "{}: {} at {}:{}:{}\n",
            self.kind, self.message, file, self.span.start.line, self.span.start.column
        );
        if let Some(ref help) = self.help {
            output.push_str(&format!("\n      Help: {}\n", help));
        }
        output
    }
}

impl From<std::io::Error> for VslError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string(), Span::default())
    }
}

/// Result type for compiler operations
pub type VslResult<T> = Result<T, VslError>;

// Convenience constructors for common errors
impl VslError {
    pub fn undeclared(name: &str, span: Span) -> Self {
        Self::new(
            ErrorKind::UndeclaredIdentifier,
            format!("'{}' is not declared", name),
            span,
        )
    }

    pub fn duplicate(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::DuplicateDeclaration, message, span)
    }

    pub fn no_enclosing_loop(what: &str, span: Span) -> Self {
        Self::new(
            ErrorKind::NoEnclosingLoop,
            format!("'{}' outside of loop", what),
            span,
        )
    }

    pub fn unsupported_operator(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::UnsupportedOperator, message, span)
    }

    pub fn invalid_condition(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::InvalidConditionShape, message, span)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedTree, message, Span::default())
    }
}
