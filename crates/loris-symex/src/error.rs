use thiserror::Error;

/// Fatal engine errors.
///
/// Modeling failures (unknown pointer targets, missing function bodies) and
/// bound breaches are *not* errors; they become equation content and
/// execution continues. Everything here indicates a broken internal
/// invariant and aborts the analysis, so that no partial equation is ever
/// presented as sound.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymexError {
    #[error("internal invariant violated: {what}")]
    InvariantViolation { what: String },

    #[error("renaming inconsistency for '{name}': expected version >= {expected}, found {found}")]
    RenamingInconsistency {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("path guard corrupted: a reachable state carries an unsatisfiable guard")]
    GuardCorruption,

    #[error("unexpected {kind} instruction {context}")]
    UnexpectedInstruction { kind: String, context: String },

    #[error("nil expression reached the interpreter: {context}")]
    NilExpression { context: String },

    #[error("no function named '{identifier}'")]
    FunctionNotFound { identifier: String },
}

impl SymexError {
    pub fn invariant(what: impl Into<String>) -> Self {
        SymexError::InvariantViolation { what: what.into() }
    }

    pub fn nil(context: impl Into<String>) -> Self {
        SymexError::NilExpression {
            context: context.into(),
        }
    }

    pub fn unexpected(kind: &str, context: impl Into<String>) -> Self {
        SymexError::UnexpectedInstruction {
            kind: kind.into(),
            context: context.into(),
        }
    }

    pub fn function_not_found(identifier: impl Into<String>) -> Self {
        SymexError::FunctionNotFound {
            identifier: identifier.into(),
        }
    }
}
