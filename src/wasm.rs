// VSL WASM Module
// Entry point for WebAssembly builds

use wasm_bindgen::prelude::*;

use crate::codegen::Target;
use crate::compiler::Compiler;
use crate::config::CodegenOptions;

/// Compile a JSON syntax tree for `target` and return the generated text,
/// or the formatted error.
#[wasm_bindgen]
pub fn compile_tree(tree: &str, target: &str) -> String {
    match compile_internal(tree, target) {
        Ok(text) => text,
        Err(e) => format!("Error: {}", e.format("<wasm>")),
    }
}

fn compile_internal(tree: &str, target: &str) -> crate::error::VslResult<String> {
    let target: Target = target.parse()?;
    Compiler::new("<wasm>", CodegenOptions::default()).compile_json(tree, target)
}

/// Get VSL version
#[wasm_bindgen]
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
