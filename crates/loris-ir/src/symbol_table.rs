use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

use crate::expr::Expr;
use crate::types::Type;

/// A named program object: variable, function, or engine-created auxiliary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
    /// Initial or constant value, when known.
    pub value: Option<Expr>,
    /// Lives for the whole program run (a global or static).
    pub is_static_lifetime: bool,
    /// Static, but one instance per thread.
    pub is_thread_local: bool,
    /// Source language mode, e.g. `C`.
    pub mode: String,
}

impl Symbol {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Symbol {
            name: name.into(),
            ty,
            value: None,
            is_static_lifetime: false,
            is_thread_local: false,
            mode: "C".into(),
        }
    }

    pub fn static_lifetime(mut self) -> Self {
        self.is_static_lifetime = true;
        self
    }

    pub fn thread_local(mut self) -> Self {
        self.is_static_lifetime = true;
        self.is_thread_local = true;
        self
    }

    pub fn with_value(mut self, value: Expr) -> Self {
        self.value = Some(value);
        self
    }

    /// Shared between program threads: static and not thread-local.
    pub fn is_shared(&self) -> bool {
        self.is_static_lifetime && !self.is_thread_local
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymbolTableError {
    #[error("duplicate symbol '{0}'")]
    Duplicate(String),
}

/// An insertion-ordered map of symbols.
///
/// Two instances exist during symbolic execution: the read-only outer table
/// from the front end, and the engine-owned table of dynamically created
/// objects (nondet choices, allocations, string-constant data).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SymbolTable {
    symbols: IndexMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn insert(&mut self, symbol: Symbol) -> Result<(), SymbolTableError> {
        if self.symbols.contains_key(&symbol.name) {
            return Err(SymbolTableError::Duplicate(symbol.name));
        }
        self.symbols.insert(symbol.name.clone(), symbol);
        Ok(())
    }

    /// Insert, replacing any existing entry. Used by the engine-owned table
    /// where re-registration of the same dynamic object is benign.
    pub fn insert_or_replace(&mut self, symbol: Symbol) {
        self.symbols.insert(symbol.name.clone(), symbol);
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    /// Copy every symbol of `other` into `self`, replacing collisions.
    pub fn absorb(&mut self, other: &SymbolTable) {
        for symbol in other.iter() {
            self.insert_or_replace(symbol.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_duplicates() {
        let mut table = SymbolTable::new();
        table.insert(Symbol::new("x", Type::signed_int())).unwrap();
        assert_eq!(
            table.insert(Symbol::new("x", Type::Bool)),
            Err(SymbolTableError::Duplicate("x".into()))
        );
        assert_eq!(table.lookup("x").unwrap().ty, Type::signed_int());
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut table = SymbolTable::new();
        for name in ["c", "a", "b"] {
            table.insert(Symbol::new(name, Type::Bool)).unwrap();
        }
        let names: Vec<&str> = table.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn shared_means_static_and_not_thread_local() {
        assert!(Symbol::new("g", Type::Bool).static_lifetime().is_shared());
        assert!(!Symbol::new("t", Type::Bool).thread_local().is_shared());
        assert!(!Symbol::new("l", Type::Bool).is_shared());
    }
}
