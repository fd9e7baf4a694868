use serde::Serialize;
use std::fmt;

use loris_ir::{Expr, SourceLocation};

use crate::error::SymexError;

/// Classification of an assignment step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssignmentKind {
    /// A program-visible state update.
    State,
    /// Engine-internal bookkeeping; hidden from trace consumers.
    Hidden,
    /// Actual-to-formal parameter binding at a call site.
    Parameter,
    /// A merge-point phi selection.
    Phi,
}

/// One step of the SSA equation.
///
/// Every step carries the guard in force at its emission, already
/// materialized as a single level-2 expression. Steps are only ever
/// appended, never retracted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SsaStep {
    Assignment {
        guard: Expr,
        lhs: Expr,
        rhs: Expr,
        /// The left-hand side before renaming, for trace reconstruction.
        original_lhs: Expr,
        kind: AssignmentKind,
        source: SourceLocation,
    },
    Assume {
        guard: Expr,
        cond: Expr,
        source: SourceLocation,
    },
    Assert {
        guard: Expr,
        cond: Expr,
        msg: String,
        property_id: String,
        source: SourceLocation,
    },
    Goto {
        guard: Expr,
        cond: Expr,
        source: SourceLocation,
    },
    FunctionCall {
        guard: Expr,
        identifier: String,
        source: SourceLocation,
    },
    FunctionReturn {
        guard: Expr,
        identifier: String,
        source: SourceLocation,
    },
    /// A new program thread begins at the spawned location.
    Spawn {
        guard: Expr,
        source: SourceLocation,
    },
    Input {
        guard: Expr,
        id: String,
        values: Vec<Expr>,
        source: SourceLocation,
    },
    Output {
        guard: Expr,
        id: String,
        values: Vec<Expr>,
        source: SourceLocation,
    },
    /// Interleaving marker: a read of a shared object by the active thread.
    SharedRead {
        guard: Expr,
        object: Expr,
        source: SourceLocation,
    },
    /// Interleaving marker: a write of a shared object by the active thread.
    SharedWrite {
        guard: Expr,
        object: Expr,
        source: SourceLocation,
    },
    AtomicBegin {
        guard: Expr,
        source: SourceLocation,
    },
    AtomicEnd {
        guard: Expr,
        source: SourceLocation,
    },
}

impl SsaStep {
    pub fn guard(&self) -> &Expr {
        match self {
            SsaStep::Assignment { guard, .. }
            | SsaStep::Assume { guard, .. }
            | SsaStep::Assert { guard, .. }
            | SsaStep::Goto { guard, .. }
            | SsaStep::FunctionCall { guard, .. }
            | SsaStep::FunctionReturn { guard, .. }
            | SsaStep::Spawn { guard, .. }
            | SsaStep::Input { guard, .. }
            | SsaStep::Output { guard, .. }
            | SsaStep::SharedRead { guard, .. }
            | SsaStep::SharedWrite { guard, .. }
            | SsaStep::AtomicBegin { guard, .. }
            | SsaStep::AtomicEnd { guard, .. } => guard,
        }
    }

    pub fn source(&self) -> &SourceLocation {
        match self {
            SsaStep::Assignment { source, .. }
            | SsaStep::Assume { source, .. }
            | SsaStep::Assert { source, .. }
            | SsaStep::Goto { source, .. }
            | SsaStep::FunctionCall { source, .. }
            | SsaStep::FunctionReturn { source, .. }
            | SsaStep::Spawn { source, .. }
            | SsaStep::Input { source, .. }
            | SsaStep::Output { source, .. }
            | SsaStep::SharedRead { source, .. }
            | SsaStep::SharedWrite { source, .. }
            | SsaStep::AtomicBegin { source, .. }
            | SsaStep::AtomicEnd { source, .. } => source,
        }
    }

    pub fn is_assert(&self) -> bool {
        matches!(self, SsaStep::Assert { .. })
    }

    pub fn is_assignment(&self) -> bool {
        matches!(self, SsaStep::Assignment { .. })
    }

    /// All expressions carried by this step, guard included.
    fn expressions(&self) -> Vec<&Expr> {
        match self {
            SsaStep::Assignment {
                guard, lhs, rhs, ..
            } => vec![guard, lhs, rhs],
            SsaStep::Assume { guard, cond, .. }
            | SsaStep::Assert { guard, cond, .. }
            | SsaStep::Goto { guard, cond, .. } => vec![guard, cond],
            SsaStep::Input { guard, values, .. } | SsaStep::Output { guard, values, .. } => {
                let mut v = vec![guard];
                v.extend(values.iter());
                v
            }
            SsaStep::SharedRead { guard, object, .. }
            | SsaStep::SharedWrite { guard, object, .. } => vec![guard, object],
            SsaStep::FunctionCall { guard, .. }
            | SsaStep::FunctionReturn { guard, .. }
            | SsaStep::Spawn { guard, .. }
            | SsaStep::AtomicBegin { guard, .. }
            | SsaStep::AtomicEnd { guard, .. } => vec![guard],
        }
    }
}

impl fmt::Display for SsaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SsaStep::Assignment {
                guard, lhs, rhs, ..
            } => write!(f, "ASSIGN {lhs} := {rhs} [{guard}]"),
            SsaStep::Assume { guard, cond, .. } => write!(f, "ASSUME {cond} [{guard}]"),
            SsaStep::Assert {
                guard, cond, msg, ..
            } => write!(f, "ASSERT {cond} // {msg} [{guard}]"),
            SsaStep::Goto { guard, cond, .. } => write!(f, "GOTO {cond} [{guard}]"),
            SsaStep::FunctionCall {
                guard, identifier, ..
            } => write!(f, "CALL {identifier} [{guard}]"),
            SsaStep::FunctionReturn {
                guard, identifier, ..
            } => write!(f, "RETURN {identifier} [{guard}]"),
            SsaStep::Spawn { guard, .. } => write!(f, "SPAWN [{guard}]"),
            SsaStep::Input { guard, id, .. } => write!(f, "INPUT {id} [{guard}]"),
            SsaStep::Output { guard, id, .. } => write!(f, "OUTPUT {id} [{guard}]"),
            SsaStep::SharedRead { guard, object, .. } => {
                write!(f, "SHARED_READ {object} [{guard}]")
            }
            SsaStep::SharedWrite { guard, object, .. } => {
                write!(f, "SHARED_WRITE {object} [{guard}]")
            }
            SsaStep::AtomicBegin { guard, .. } => write!(f, "ATOMIC_BEGIN [{guard}]"),
            SsaStep::AtomicEnd { guard, .. } => write!(f, "ATOMIC_END [{guard}]"),
        }
    }
}

/// The target equation: an append-only ordered log of SSA steps.
///
/// This is the only artifact symbolic execution exports. No step depends on
/// a future step, so a partially filled equation is still well-formed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Equation {
    steps: Vec<SsaStep>,
}

impl Equation {
    pub fn new() -> Self {
        Equation::default()
    }

    pub fn append(&mut self, step: SsaStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[SsaStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SsaStep> {
        self.steps.iter()
    }

    pub fn count_assertions(&self) -> usize {
        self.steps.iter().filter(|s| s.is_assert()).count()
    }

    /// Check the global equation invariants: every symbol in every step is
    /// level-2 renamed. Quantifier- and let-bound variables are exempt.
    pub fn validate(&self) -> Result<(), SymexError> {
        for (index, step) in self.steps.iter().enumerate() {
            for expr in step.expressions() {
                for symbol in expr.free_symbols() {
                    if !symbol.is_l2_renamed() {
                        return Err(SymexError::invariant(format!(
                            "step {index}: symbol '{symbol}' is not L2-renamed"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "{i:4}: {step}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loris_ir::{SymbolId, Type};

    fn l2(name: &str, version: usize) -> Expr {
        Expr::symbol(
            SymbolId::new(name).with_thread(0).with_frame(1).with_version(version),
            Type::signed_int(),
        )
    }

    fn assignment(lhs: Expr, rhs: Expr) -> SsaStep {
        SsaStep::Assignment {
            guard: Expr::truth(),
            original_lhs: lhs.clone(),
            lhs,
            rhs,
            kind: AssignmentKind::State,
            source: SourceLocation::built_in(),
        }
    }

    #[test]
    fn append_preserves_order() {
        let mut eq = Equation::new();
        eq.append(assignment(l2("x", 1), Expr::int(1, Type::signed_int())));
        eq.append(assignment(l2("x", 2), Expr::int(2, Type::signed_int())));
        assert_eq!(eq.len(), 2);
        let lhs_versions: Vec<usize> = eq
            .iter()
            .filter_map(|s| match s {
                SsaStep::Assignment { lhs, .. } => lhs.as_symbol().and_then(|s| s.version),
                _ => None,
            })
            .collect();
        assert_eq!(lhs_versions, vec![1, 2]);
    }

    #[test]
    fn validate_accepts_l2_renamed_steps() {
        let mut eq = Equation::new();
        eq.append(assignment(l2("x", 1), l2("y", 3).add(l2("x", 0))));
        assert!(eq.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unrenamed_symbols() {
        let mut eq = Equation::new();
        eq.append(assignment(
            l2("x", 1),
            Expr::symbol_name("y", Type::signed_int()),
        ));
        assert!(eq.validate().is_err());
    }

    #[test]
    fn count_assertions_counts_only_asserts() {
        let mut eq = Equation::new();
        eq.append(assignment(l2("x", 1), Expr::int(0, Type::signed_int())));
        eq.append(SsaStep::Assert {
            guard: Expr::truth(),
            cond: l2("x", 1).eq_expr(Expr::int(0, Type::signed_int())),
            msg: "assertion".into(),
            property_id: "main.assertion.1".into(),
            source: SourceLocation::built_in(),
        });
        assert_eq!(eq.count_assertions(), 1);
    }
}
