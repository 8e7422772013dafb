// VSL AST Module
// Syntax tree handed over by the front end, plus JSON interchange

mod expr;
mod stmt;

pub use expr::*;
pub use stmt::*;

use regex::Regex;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{ErrorKind, VslError, VslResult};

/// A whole program: an ordered list of functions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ProgramDef")]
pub struct Program {
    pub functions: Vec<Function>,
}

/// Wire shape of a program, numbered on conversion
#[derive(Deserialize)]
struct ProgramDef {
    functions: Vec<Function>,
}

impl From<ProgramDef> for Program {
    fn from(def: ProgramDef) -> Self {
        Program::new(def.functions)
    }
}

impl Program {
    /// Build a program and number every identifier occurrence in tree order.
    pub fn new(functions: Vec<Function>) -> Self {
        let mut program = Self { functions };
        program.renumber();
        program
    }

    /// Renumber identifiers after the function list was edited in place.
    pub fn renumber(&mut self) {
        let mut next = 0u32;
        self.visit_identifiers_mut(&mut |ident| {
            next += 1;
            ident.id = NodeId(next);
        });
    }

    /// Every identifier occurrence must carry a distinct non-zero id.
    pub fn check_numbering(&self) -> VslResult<()> {
        let mut identifiers = Vec::new();
        for function in &self.functions {
            identifiers.push(&function.name);
            identifiers.extend(function.params.iter());
            collect_block(&function.body, &mut identifiers);
        }

        let mut seen = FxHashSet::default();
        for ident in identifiers {
            let problem = if ident.id == NodeId(0) {
                format!("identifier '{}' has no node id", ident.name)
            } else if !seen.insert(ident.id) {
                format!("node id {} of '{}' is used more than once", ident.id.0, ident.name)
            } else {
                continue;
            };
            return Err(VslError::new(ErrorKind::MalformedTree, problem, ident.span)
                .with_help("build programs with Program::new or call Program::renumber after editing"));
        }
        Ok(())
    }

    /// Parse a JSON syntax tree produced by the front end
    pub fn from_json(json: &str) -> VslResult<Self> {
        let mut program: Program = serde_json::from_str(json)
            .map_err(|e| VslError::malformed(format!("invalid syntax tree: {}", e)))?;
        program.validate_names()?;
        Ok(program)
    }

    pub fn to_json(&self) -> VslResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| VslError::malformed(format!("cannot serialize syntax tree: {}", e)))
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name.name == name)
    }

    // Identifiers end up verbatim in every target's output.
    fn validate_names(&mut self) -> VslResult<()> {
        static IDENT: OnceLock<Regex> = OnceLock::new();
        let pattern = IDENT.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

        let mut bad = None;
        self.visit_identifiers_mut(&mut |ident| {
            if bad.is_none() && !pattern.is_match(&ident.name) {
                bad = Some(ident.clone());
            }
        });
        match bad {
            Some(ident) => Err(VslError::malformed(format!(
                "'{}' is not a valid identifier",
                ident.name
            ))
            .with_help("identifiers must match [A-Za-z_][A-Za-z0-9_]*")),
            None => Ok(()),
        }
    }

    fn visit_identifiers_mut(&mut self, f: &mut dyn FnMut(&mut Identifier)) {
        for function in &mut self.functions {
            f(&mut function.name);
            for param in &mut function.params {
                f(param);
            }
            visit_block(&mut function.body, f);
        }
    }
}

fn collect_block<'a>(block: &'a Block, out: &mut Vec<&'a Identifier>) {
    for declaration in &block.declarations {
        out.extend(declaration.variables.iter());
    }
    for stmt in &block.statements {
        collect_stmt(stmt, out);
    }
}

fn collect_stmt<'a>(stmt: &'a Stmt, out: &mut Vec<&'a Identifier>) {
    match stmt {
        Stmt::Block(block) => collect_block(block, out),
        Stmt::Assign { target, value } => {
            out.push(target);
            collect_expr(value, out);
        }
        Stmt::Return { value, .. } => collect_expr(value, out),
        Stmt::Null { .. } => {}
        Stmt::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            collect_expr(condition, out);
            collect_stmt(then_branch, out);
            if let Some(else_branch) = else_branch {
                collect_stmt(else_branch, out);
            }
        }
        Stmt::While {
            condition, body, ..
        } => {
            collect_expr(condition, out);
            collect_stmt(body, out);
        }
        Stmt::Print { items, .. } => {
            for item in items {
                if let PrintItem::Expr(expr) = item {
                    collect_expr(expr, out);
                }
            }
        }
        Stmt::Input { targets, .. } => out.extend(targets.iter()),
    }
}

fn collect_expr<'a>(expr: &'a Expr, out: &mut Vec<&'a Identifier>) {
    match expr {
        Expr::Binary { left, right, .. } => {
            collect_expr(left, out);
            collect_expr(right, out);
        }
        Expr::Unary { operand, .. } => collect_expr(operand, out),
        Expr::Call { callee, args } => {
            out.push(callee);
            for arg in args {
                collect_expr(arg, out);
            }
        }
        Expr::Constant { .. } => {}
        Expr::Variable { name } => out.push(name),
    }
}

fn visit_block(block: &mut Block, f: &mut dyn FnMut(&mut Identifier)) {
    for declaration in &mut block.declarations {
        for variable in &mut declaration.variables {
            f(variable);
        }
    }
    for stmt in &mut block.statements {
        visit_stmt(stmt, f);
    }
}

fn visit_stmt(stmt: &mut Stmt, f: &mut dyn FnMut(&mut Identifier)) {
    match stmt {
        Stmt::Block(block) => visit_block(block, f),
        Stmt::Assign { target, value } => {
            f(target);
            visit_expr(value, f);
        }
        Stmt::Return { value, .. } => visit_expr(value, f),
        Stmt::Null { .. } => {}
        Stmt::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            visit_expr(condition, f);
            visit_stmt(then_branch, f);
            if let Some(else_branch) = else_branch {
                visit_stmt(else_branch, f);
            }
        }
        Stmt::While {
            condition, body, ..
        } => {
            visit_expr(condition, f);
            visit_stmt(body, f);
        }
        Stmt::Print { items, .. } => {
            for item in items {
                if let PrintItem::Expr(expr) = item {
                    visit_expr(expr, f);
                }
            }
        }
        Stmt::Input { targets, .. } => {
            for target in targets {
                f(target);
            }
        }
    }
}

fn visit_expr(expr: &mut Expr, f: &mut dyn FnMut(&mut Identifier)) {
    match expr {
        Expr::Binary { left, right, .. } => {
            visit_expr(left, f);
            visit_expr(right, f);
        }
        Expr::Unary { operand, .. } => visit_expr(operand, f),
        Expr::Call { callee, args } => {
            f(callee);
            for arg in args {
                visit_expr(arg, f);
            }
        }
        Expr::Constant { .. } => {}
        Expr::Variable { name } => f(name),
    }
}
