// VSL Compiler Back End
// Scope resolution and code generation for four execution targets

pub mod ast;
pub mod codegen;
pub mod compiler;
pub mod config;
pub mod error;

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub use codegen::{generate, CodeGenerator, Target};
pub use compiler::{resolve, Compiler, Resolution};
pub use config::{CodegenOptions, Config};
pub use error::{ErrorKind, VslError, VslResult};
