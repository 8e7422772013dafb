mod compiler;
pub mod scope;
pub mod symbols;

pub use compiler::{symbol_listing, Compiler};
pub use scope::ScopeStack;
pub use symbols::{resolve, FunctionInfo, Resolution, SymbolEntry, SymbolKind, SymbolTable};
