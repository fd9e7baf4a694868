//! Declarations, lifetime ends, assumptions, assertions, I/O recording, and
//! the grab-bag of `Other` statements.

use tracing::warn;

use loris_ir::{Expr, OtherStatement, Symbol, SymbolId, Type};

use crate::equation::{AssignmentKind, Equation, SsaStep};
use crate::error::SymexError;
use crate::renaming::Level;
use crate::state::ExecState;
use crate::symex::Executor;
use crate::value_set::ValueSetTarget;

impl Executor<'_> {
    /// `DECL x`: a fresh frame number for the name. The new generation is
    /// left unconstrained; the first read picks up version 0 of the fresh
    /// level-1 name, which the downstream solver treats as nondeterministic.
    pub(crate) fn symex_decl(
        &mut self,
        state: &mut ExecState,
        symbol: &Expr,
    ) -> Result<(), SymexError> {
        let id = symbol
            .as_symbol()
            .ok_or_else(|| SymexError::nil("DECL operand"))?;
        state.declare(id);
        Ok(())
    }

    /// `DEAD x`: end the lifetime. Dynamic objects still aliased by the
    /// dying name get their deallocation flag raised in the equation.
    pub(crate) fn symex_dead(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        symbol: &Expr,
    ) -> Result<(), SymexError> {
        let renamed = state.rename(
            symbol.clone(),
            Level::L1,
            self.outer_symbol_table,
            false,
        );
        let id = renamed
            .as_symbol()
            .ok_or_else(|| SymexError::nil("DEAD operand"))?
            .clone();
        let dynamic_targets: Vec<Expr> = state
            .value_set
            .targets_of(&id.l1_key())
            .map(|targets| {
                targets
                    .iter()
                    .filter_map(|t| match t {
                        ValueSetTarget::Object(object) => object
                            .as_symbol()
                            .filter(|s| s.name.starts_with("symex_dynamic::"))
                            .map(|_| object.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        for object in dynamic_targets {
            self.emit_deallocation(state, equation, &object)?;
        }
        state.kill(&id);
        Ok(())
    }

    /// Raise the deallocation flag of a dynamic object.
    pub(crate) fn emit_deallocation(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        object: &Expr,
    ) -> Result<(), SymexError> {
        let Some(object_id) = object.as_symbol() else {
            return Ok(());
        };
        let flag_name = format!("{}::deallocated", object_id.name);
        if !state.symbol_table.contains(&flag_name) {
            state
                .symbol_table
                .insert_or_replace(Symbol::new(&flag_name, Type::Bool).static_lifetime());
        }
        let flag = SymbolId::new(flag_name).with_thread(0).with_frame(0);
        let version = self.fresh_l2_version(&flag);
        let flag_l2 = state.assignment(&flag, &Type::Bool, version)?;
        equation.append(SsaStep::Assignment {
            guard: state.guard.as_expr(),
            lhs: Expr::symbol(flag_l2, Type::Bool),
            rhs: Expr::truth(),
            original_lhs: Expr::symbol(flag, Type::Bool),
            kind: AssignmentKind::Hidden,
            source: state.source.clone(),
        });
        Ok(())
    }

    pub(crate) fn symex_assume(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        condition: Expr,
    ) -> Result<(), SymexError> {
        let cond = self.clean_read(state, equation, condition)?;
        self.emit_shared_reads(state, equation, &cond);
        if cond.is_true() {
            return Ok(());
        }
        self.assume_condition(state, equation, cond);
        Ok(())
    }

    pub(crate) fn symex_assert(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        condition: Expr,
        msg: &str,
        property_id: String,
    ) -> Result<(), SymexError> {
        let cond = self.clean_read(state, equation, condition)?;
        self.emit_shared_reads(state, equation, &cond);
        let property_id = if property_id.is_empty() {
            format!("{}.assertion.{}", state.pc.function, state.total_vccs + 1)
        } else {
            property_id
        };
        self.vcc(state, equation, cond, msg, property_id);
        Ok(())
    }

    /// `INPUT id, x, ...`: each operand receives a fresh nondeterministic
    /// value, recorded as an input step.
    pub(crate) fn symex_input(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        id: &str,
        arguments: Vec<Expr>,
    ) -> Result<(), SymexError> {
        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let ty = argument.ty().clone();
            self.symex_assign(state, equation, argument.clone(), Expr::nondet(ty))?;
            values.push(self.clean_read(state, equation, argument)?);
        }
        equation.append(SsaStep::Input {
            guard: state.guard.as_expr(),
            id: id.to_string(),
            values,
            source: state.source.clone(),
        });
        Ok(())
    }

    pub(crate) fn symex_output(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        id: &str,
        arguments: Vec<Expr>,
    ) -> Result<(), SymexError> {
        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            values.push(self.clean_read(state, equation, argument)?);
        }
        equation.append(SsaStep::Output {
            guard: state.guard.as_expr(),
            id: id.to_string(),
            values,
            source: state.source.clone(),
        });
        Ok(())
    }

    pub(crate) fn symex_other(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        statement: OtherStatement,
    ) -> Result<(), SymexError> {
        match statement {
            // Printf has no semantic effect; its arguments are recorded so
            // trace consumers can reproduce the output.
            OtherStatement::Printf { arguments } => {
                self.symex_output(state, equation, "printf", arguments)
            }
            OtherStatement::Trace { event, arguments } => {
                let id = format!("trace:{event}");
                self.symex_output(state, equation, &id, arguments)
            }
            OtherStatement::Fkt { identifier } => {
                if self.fkt_logged.insert(identifier.clone()) {
                    warn!(intrinsic = %identifier, "ignoring intrinsic pseudo-call");
                }
                Ok(())
            }
            OtherStatement::ArrayToPointerAssoc { array, pointer } => {
                let array_l1 = state.rename(
                    array,
                    Level::L1,
                    self.outer_symbol_table,
                    false,
                );
                let pointer_l1 = state.rename(
                    pointer,
                    Level::L1,
                    self.outer_symbol_table,
                    false,
                );
                if let Some(p) = pointer_l1.as_symbol() {
                    state.value_set.assign_targets(
                        p.l1_key(),
                        [ValueSetTarget::Object(array_l1)].into_iter().collect(),
                    );
                }
                Ok(())
            }
            OtherStatement::Delete { pointer } => {
                let pointer_l1 = state.rename(
                    pointer,
                    Level::L1,
                    self.outer_symbol_table,
                    false,
                );
                let targets: Vec<Expr> = state
                    .value_set
                    .read(&pointer_l1)
                    .iter()
                    .filter_map(|t| match t {
                        ValueSetTarget::Object(object) => Some(object.clone()),
                        _ => None,
                    })
                    .collect();
                for object in targets {
                    self.emit_deallocation(state, equation, &object)?;
                }
                if let Some(p) = pointer_l1.as_symbol() {
                    state.value_set.kill(&p.l1_key());
                }
                Ok(())
            }
            // Evaluated for side effects (lets, nondets) only.
            OtherStatement::Expression { expr } => {
                self.clean_read(state, equation, expr).map(|_| ())
            }
        }
    }
}
