// VSL Compiler
// Resolution followed by code generation for one target

use std::fmt::Write as _;
use tracing::info;

use super::symbols::{Resolution, SymbolTable};
use crate::ast::*;
use crate::codegen::{self, Target};
use crate::config::CodegenOptions;
use crate::error::VslResult;

/// The VSL compiler back end
pub struct Compiler {
    file: String,
    options: CodegenOptions,
}

impl Compiler {
    pub fn new(file: impl Into<String>, options: CodegenOptions) -> Self {
        Self {
            file: file.into(),
            options,
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn options(&self) -> &CodegenOptions {
        &self.options
    }

    /// Resolve every identifier; the tree is left untouched
    pub fn check(&self, program: &Program) -> VslResult<Resolution> {
        SymbolTable::new().resolve(program)
    }

    /// Compile a program to target text
    pub fn compile(&self, program: &Program, target: Target) -> VslResult<String> {
        let resolution = self.check(program)?;
        let text = codegen::generate(program, &resolution, target, &self.options)?;
        info!(file = %self.file, %target, "compiled");
        Ok(text)
    }

    /// Compile a JSON syntax tree
    pub fn compile_json(&self, json: &str, target: Target) -> VslResult<String> {
        let program = Program::from_json(json)?;
        self.compile(&program, target)
    }
}

/// Human-readable dump of the bindings of each function
pub fn symbol_listing(program: &Program, resolution: &Resolution) -> String {
    let bindings = resolution.bindings();
    let mut listing = String::new();

    for (index, function) in program.functions.iter().enumerate() {
        let start = function.name.id;
        let end = program.functions.get(index + 1).map(|f| f.name.id);
        let info = resolution.function(&function.name.name).copied().unwrap_or_default();
        let _ = writeln!(
            listing,
            "{} (params {}, locals {})",
            function.name.name, info.params, info.locals
        );
        for (id, entry) in &bindings {
            if *id > start && end.map_or(true, |end| *id < end) {
                let _ = writeln!(listing, "  #{:<4} {}", id.0, entry);
            }
        }
    }
    listing
}
