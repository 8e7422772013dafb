// VSL Symbol Table
// Binds every identifier occurrence to its declaration and storage location

use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;
use tracing::{debug, trace};

use super::scope::ScopeStack;
use crate::ast::*;
use crate::error::{VslError, VslResult};

/// What kind of declaration an identifier resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SymbolKind {
    Variable,
    Parameter,
    Function,
}

/// Resolved binding of one identifier occurrence.
///
/// `location` is a zero-based index: variables count in declaration order across
/// all blocks of their function, parameters in signature order, functions in
/// program order. Backends derive their own addressing from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolEntry {
    pub label: String,
    pub kind: SymbolKind,
    pub location: usize,
}

impl SymbolEntry {
    fn new(label: &str, kind: SymbolKind, location: usize) -> Self {
        Self {
            label: label.to_string(),
            kind,
            location,
        }
    }
}

impl fmt::Display for SymbolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {}", self.label, self.kind, self.location)
    }
}

/// Per-function facts recorded by resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FunctionInfo {
    pub location: usize,
    pub params: usize,
    /// Total local variables over all nested blocks
    pub locals: usize,
}

/// Side table produced by `SymbolTable::resolve`; the tree stays untouched.
#[derive(Debug, Default)]
pub struct Resolution {
    bindings: FxHashMap<NodeId, SymbolEntry>,
    functions: FxHashMap<String, FunctionInfo>,
}

impl Resolution {
    pub fn get(&self, id: NodeId) -> Option<&SymbolEntry> {
        self.bindings.get(&id)
    }

    /// Binding of an occurrence; a miss means the tree was never resolved.
    pub fn entry(&self, ident: &Identifier) -> VslResult<&SymbolEntry> {
        self.bindings.get(&ident.id).ok_or_else(|| {
            VslError::undeclared(&ident.name, ident.span)
                .with_help("run symbol resolution before code generation")
        })
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(name)
    }

    pub fn local_count(&self, function: &str) -> usize {
        self.functions.get(function).map_or(0, |f| f.locals)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// All bindings ordered by occurrence
    pub fn bindings(&self) -> Vec<(NodeId, &SymbolEntry)> {
        let mut all: Vec<_> = self.bindings.iter().map(|(id, e)| (*id, e)).collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }
}

/// Two-pass resolver: functions first, then each function body.
pub struct SymbolTable {
    /// Function entries under their bare names
    functions: FxHashMap<String, SymbolEntry>,
    /// Parameter and variable entries under scope-qualified keys
    symbols: FxHashMap<String, SymbolEntry>,
    scopes: ScopeStack,
    resolution: Resolution,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            functions: FxHashMap::default(),
            symbols: FxHashMap::default(),
            scopes: ScopeStack::new(),
            resolution: Resolution::default(),
        }
    }

    /// Resolve a whole program. Fails on the first undeclared or duplicate name.
    pub fn resolve(mut self, program: &Program) -> VslResult<Resolution> {
        // Bindings are keyed by node id
        program.check_numbering()?;

        // Functions are callable regardless of declaration order
        for (index, function) in program.functions.iter().enumerate() {
            let name = &function.name;
            if self.functions.contains_key(&name.name) {
                return Err(VslError::duplicate(
                    format!("function '{}' is defined more than once", name.name),
                    name.span,
                ));
            }
            let entry = SymbolEntry::new(&name.name, SymbolKind::Function, index);
            self.functions.insert(name.name.clone(), entry.clone());
            self.resolution.bindings.insert(name.id, entry);
        }

        for (index, function) in program.functions.iter().enumerate() {
            self.resolve_function(function, index)?;
        }

        Ok(self.resolution)
    }

    fn resolve_function(&mut self, function: &Function, index: usize) -> VslResult<()> {
        self.scopes.push_named(&function.name.name);

        for (position, param) in function.params.iter().enumerate() {
            self.declare(param, SymbolKind::Parameter, position)?;
        }

        let mut next_local = 0;
        self.resolve_block(&function.body, &mut next_local)?;
        self.scopes.pop();

        debug!(
            function = %function.name.name,
            params = function.params.len(),
            locals = next_local,
            "resolved function"
        );
        self.resolution.functions.insert(
            function.name.name.clone(),
            FunctionInfo {
                location: index,
                params: function.params.len(),
                locals: next_local,
            },
        );
        Ok(())
    }

    fn resolve_block(&mut self, block: &Block, next_local: &mut usize) -> VslResult<()> {
        self.scopes.push_anonymous();
        for variable in block.declared() {
            self.declare(variable, SymbolKind::Variable, *next_local)?;
            *next_local += 1;
        }
        for stmt in &block.statements {
            self.resolve_stmt(stmt, next_local)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn resolve_stmt(&mut self, stmt: &Stmt, next_local: &mut usize) -> VslResult<()> {
        match stmt {
            Stmt::Block(block) => self.resolve_block(block, next_local)?,
            Stmt::Assign { target, value } => {
                self.bind_variable(target)?;
                self.resolve_expr(value)?;
            }
            Stmt::Return { value, .. } => self.resolve_expr(value)?,
            Stmt::Null { .. } => {}
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.resolve_expr(condition)?;
                self.resolve_stmt(then_branch, next_local)?;
                if let Some(else_branch) = else_branch {
                    self.resolve_stmt(else_branch, next_local)?;
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                self.resolve_expr(condition)?;
                self.resolve_stmt(body, next_local)?;
            }
            Stmt::Print { items, .. } => {
                for item in items {
                    if let PrintItem::Expr(expr) = item {
                        self.resolve_expr(expr)?;
                    }
                }
            }
            Stmt::Input { targets, .. } => {
                for target in targets {
                    self.bind_variable(target)?;
                }
            }
        }
        Ok(())
    }

    fn resolve_expr(&mut self, expr: &Expr) -> VslResult<()> {
        match expr {
            Expr::Binary { left, right, .. } => {
                self.resolve_expr(left)?;
                self.resolve_expr(right)?;
            }
            Expr::Unary { operand, .. } => self.resolve_expr(operand)?,
            Expr::Call { callee, args } => {
                let entry = self
                    .functions
                    .get(&callee.name)
                    .cloned()
                    .ok_or_else(|| VslError::undeclared(&callee.name, callee.span))?;
                trace!(name = %callee.name, id = callee.id.0, "bound call");
                self.resolution.bindings.insert(callee.id, entry);
                for arg in args {
                    self.resolve_expr(arg)?;
                }
            }
            Expr::Constant { .. } => {}
            Expr::Variable { name } => self.bind_variable(name)?,
        }
        Ok(())
    }

    fn declare(&mut self, ident: &Identifier, kind: SymbolKind, location: usize) -> VslResult<()> {
        let key = self.scopes.qualify_innermost(&ident.name);
        if self.symbols.contains_key(&key) {
            return Err(VslError::duplicate(
                format!("'{}' is already declared in this scope", ident.name),
                ident.span,
            ));
        }
        trace!(%key, ?kind, location, "declared");
        let entry = SymbolEntry::new(&ident.name, kind, location);
        self.symbols.insert(key, entry.clone());
        self.resolution.bindings.insert(ident.id, entry);
        Ok(())
    }

    // Innermost declaration wins.
    fn bind_variable(&mut self, ident: &Identifier) -> VslResult<()> {
        let entry = self
            .scopes
            .qualify(&ident.name)
            .iter()
            .find_map(|key| self.symbols.get(key))
            .cloned()
            .ok_or_else(|| VslError::undeclared(&ident.name, ident.span))?;
        trace!(name = %ident.name, id = ident.id.0, location = entry.location, "bound");
        self.resolution.bindings.insert(ident.id, entry);
        Ok(())
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve `program` with a fresh symbol table
pub fn resolve(program: &Program) -> VslResult<Resolution> {
    SymbolTable::new().resolve(program)
}
