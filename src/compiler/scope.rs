// VSL Scope Stack
// Builds qualified lookup keys for shadowing-aware name resolution

use smallvec::SmallVec;

/// Joins scope names inside a qualified key. Never valid inside an identifier.
pub const SEPARATOR: &str = ".";

/// Stack of active scope names: the function name at the bottom,
/// numbered anonymous scopes for the nested blocks above it.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: SmallVec<[String; 8]>,
    /// Next anonymous scope number; unique for the lifetime of this stack
    anonymous_counter: usize,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_named(&mut self, name: &str) {
        self.scopes.push(name.to_string());
    }

    /// Push a block scope and return the number it was given
    pub fn push_anonymous(&mut self) -> usize {
        let number = self.anonymous_counter;
        self.scopes.push(number.to_string());
        self.anonymous_counter += 1;
        number
    }

    pub fn pop(&mut self) -> Option<String> {
        self.scopes.pop()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Key under which `name` is declared in the innermost scope
    pub fn qualify_innermost(&self, name: &str) -> String {
        self.key(self.scopes.len(), name)
    }

    /// Candidate keys for `name`, innermost scope first, ending with the bare name.
    pub fn qualify(&self, name: &str) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.scopes.len() + 1);
        for depth in (1..=self.scopes.len()).rev() {
            keys.push(self.key(depth, name));
        }
        keys.push(name.to_string());
        keys
    }

    fn key(&self, depth: usize, name: &str) -> String {
        if depth == 0 {
            return name.to_string();
        }
        let mut key = self.scopes[..depth].join(SEPARATOR);
        key.push_str(SEPARATOR);
        key.push_str(name);
        key
    }
}
