//! Expression preparation ahead of interpretation.
//!
//! Every expression entering the interpreter is cleaned: let-bindings are
//! lifted into auxiliary instruction-local assignments, nondeterministic
//! choices become fresh unconstrained symbols, pointer dereferences are
//! resolved against the value set into if-then-else ladders, and the result
//! is renamed to level 2 and simplified.

use loris_ir::{simplify, Expr, ExprKind, SideEffect, Symbol, SymbolId};

use crate::equation::{AssignmentKind, Equation, SsaStep};
use crate::error::SymexError;
use crate::renaming::Level;
use crate::state::ExecState;
use crate::symex::Executor;
use crate::value_set::ValueSetTarget;

impl Executor<'_> {
    /// Clean an expression in read position: the result is level-2 renamed,
    /// dereference-free, and (optionally) simplified.
    pub(crate) fn clean_read(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        expr: Expr,
    ) -> Result<Expr, SymexError> {
        if expr.is_nil() {
            return Err(SymexError::nil("read operand"));
        }
        let expr = self.lift_lets(state, equation, expr)?;
        self.finish_read(state, equation, expr)
    }

    /// The read pipeline after let lifting; also used on let values, which
    /// cannot contain further lets.
    fn finish_read(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        expr: Expr,
    ) -> Result<Expr, SymexError> {
        let expr = self.replace_nondets(state, expr);
        let expr = state.rename(expr, Level::L1, self.outer_symbol_table, false);
        let expr = self.remove_dereferences(state, equation, expr, false)?;
        let expr = state.rename(
            expr,
            Level::L2,
            self.outer_symbol_table,
            self.config.constant_propagation,
        );
        Ok(if self.config.simplify_opt {
            simplify(expr)
        } else {
            expr
        })
    }

    /// Clean a left-hand side: level-1 renamed with dereferences expanded
    /// into guarded ladders, but *not* level-2 renamed; version bumping
    /// happens per assigned component.
    pub(crate) fn clean_write(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        expr: Expr,
    ) -> Result<Expr, SymexError> {
        if expr.is_nil() {
            return Err(SymexError::nil("assignment target"));
        }
        let expr = self.lift_lets(state, equation, expr)?;
        let expr = self.replace_nondets(state, expr);
        let expr = state.rename(expr, Level::L1, self.outer_symbol_table, false);
        self.remove_dereferences(state, equation, expr, true)
    }

    // ------------------------------------------------------------------
    // Let lifting
    // ------------------------------------------------------------------

    /// Rewrite every `let x = e in body` into an auxiliary assignment of a
    /// fresh instruction-local symbol, substituting the new level-2 name
    /// into the body. Bottom-up, so nested lets define their inner bindings
    /// first.
    fn lift_lets(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        expr: Expr,
    ) -> Result<Expr, SymexError> {
        let mut failure: Option<SymexError> = None;
        let lifted = expr.map_subexprs(&mut |sub| {
            if failure.is_some() {
                return sub;
            }
            let ExprKind::Let {
                binding,
                value,
                body,
            } = sub.kind()
            else {
                return sub;
            };
            match self.lift_let(state, equation, binding.clone(), (**value).clone()) {
                Ok(replacement) => substitute_base_name(
                    (**body).clone(),
                    &binding.name,
                    &replacement,
                ),
                Err(err) => {
                    failure = Some(err);
                    sub
                }
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(lifted),
        }
    }

    /// Define one let binding: emits the auxiliary assignment and returns
    /// the level-2 symbol to substitute for the binding.
    fn lift_let(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        binding: SymbolId,
        value: Expr,
    ) -> Result<Expr, SymexError> {
        let value = self.finish_read(state, equation, value)?;
        let ty = value.ty().clone();
        let l1 = state.declare(&binding);
        self.instruction_local_symbols.push(l1.clone());
        let version = self.fresh_l2_version(&l1);
        let lhs_id = state.assignment(&l1, &ty, version)?;
        let lhs = Expr::symbol(lhs_id, ty.clone());
        equation.append(SsaStep::Assignment {
            guard: state.guard.as_expr(),
            original_lhs: Expr::symbol(binding, ty),
            lhs: lhs.clone(),
            rhs: value,
            kind: AssignmentKind::Hidden,
            source: state.source.clone(),
        });
        Ok(lhs)
    }

    // ------------------------------------------------------------------
    // Nondeterminism
    // ------------------------------------------------------------------

    /// Replace each nondet side effect with a fresh unconstrained symbol,
    /// registered in the dynamic symbol table.
    pub(crate) fn replace_nondets(&mut self, state: &mut ExecState, expr: Expr) -> Expr {
        let thread = state.active_thread;
        expr.map_subexprs(&mut |sub| match sub.kind() {
            ExprKind::SideEffect(SideEffect::Nondet) => {
                let name = state.fresh_name("symex::nondet");
                state
                    .symbol_table
                    .insert_or_replace(Symbol::new(&name, sub.ty().clone()));
                Expr::symbol(
                    SymbolId::new(name)
                        .with_thread(thread)
                        .with_frame(0)
                        .with_version(0),
                    sub.ty().clone(),
                )
            }
            _ => sub,
        })
    }

    // ------------------------------------------------------------------
    // Dereferencing
    // ------------------------------------------------------------------

    /// Rewrite every dereference into a selection over its value-set
    /// targets. In write position the selection conditions are renamed to
    /// level 2 on the spot while the selected objects stay at level 1.
    fn remove_dereferences(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        expr: Expr,
        write: bool,
    ) -> Result<Expr, SymexError> {
        let mut failure: Option<SymexError> = None;
        let rewritten = expr.map_subexprs(&mut |sub| {
            if failure.is_some() {
                return sub;
            }
            if !matches!(sub.kind(), ExprKind::Dereference { .. }) {
                return sub;
            }
            match self.expand_dereference(state, equation, &sub, write) {
                Ok(replacement) => replacement,
                Err(err) => {
                    failure = Some(err);
                    sub
                }
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(rewritten),
        }
    }

    fn expand_dereference(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        deref: &Expr,
        write: bool,
    ) -> Result<Expr, SymexError> {
        let ExprKind::Dereference { pointer } = deref.kind() else {
            return Err(SymexError::invariant("expand_dereference on non-deref"));
        };
        let pointee_ty = deref.ty().clone();

        // First dereference of a pointer nothing was ever assigned to:
        // materialize an automatic object for it to target.
        if let Some(id) = pointer.as_symbol() {
            if state.value_set.targets_of(&id.l1_key()).is_none() {
                let auto = self.make_auto_object(state, &pointee_ty);
                state
                    .value_set
                    .assign_targets(id.l1_key(), [ValueSetTarget::Object(auto.clone())].into_iter().collect());
                return Ok(auto);
            }
        }

        let targets = state.value_set.read(pointer);
        let mut objects = Vec::new();
        let mut has_unknown = false;
        let mut has_null = false;
        for target in &targets {
            match target {
                ValueSetTarget::Object(object) => {
                    let object = if object.ty() == &pointee_ty {
                        object.clone()
                    } else {
                        object.clone().cast(pointee_ty.clone())
                    };
                    objects.push(object);
                }
                ValueSetTarget::Null => has_null = true,
                ValueSetTarget::Unknown => has_unknown = true,
            }
        }

        // The pointer is valid iff it targets one of the known objects; an
        // unknown target silences the check to avoid false alarms.
        if !self.config.allow_pointer_unsoundness && !has_unknown {
            let valid = objects.iter().fold(Expr::falsity(), |acc, object| {
                let cond = pointer_match(pointer, object);
                if acc.is_false() {
                    cond
                } else {
                    acc.or(cond)
                }
            });
            let valid = simplify(state.rename(
                valid,
                Level::L2,
                self.outer_symbol_table,
                self.config.constant_propagation,
            ));
            let property_id = format!(
                "{}.pointer_dereference.{}",
                state.pc.function,
                state.total_vccs + 1
            );
            let msg = format!("dereference failure: invalid pointer in *{pointer}");
            self.vcc(state, equation, valid, &msg, property_id);
        }

        let use_last_as_tail = !objects.is_empty() && !has_unknown && !has_null;
        let tail = if use_last_as_tail {
            objects.pop().map(Ok).unwrap_or_else(|| {
                Err(SymexError::invariant("dereference candidate vanished"))
            })?
        } else {
            self.make_failed_object(state, &pointee_ty)
        };

        let ladder = objects.into_iter().rev().fold(tail, |acc, object| {
            let mut cond = pointer_match(pointer, &object);
            if write {
                cond = simplify(state.rename(
                    cond,
                    Level::L2,
                    self.outer_symbol_table,
                    self.config.constant_propagation,
                ));
            }
            Expr::ite(cond, object, acc)
        });
        Ok(ladder)
    }

    fn make_auto_object(&mut self, state: &mut ExecState, ty: &loris_ir::Type) -> Expr {
        let name = state.fresh_name("symex::auto_object");
        state
            .symbol_table
            .insert_or_replace(Symbol::new(&name, ty.clone()));
        Expr::symbol(
            SymbolId::new(name)
                .with_thread(state.active_thread)
                .with_frame(0),
            ty.clone(),
        )
    }

    /// The designated stand-in for a dereference that resolved to nothing.
    fn make_failed_object(&mut self, state: &mut ExecState, ty: &loris_ir::Type) -> Expr {
        let name = state.fresh_name("symex::failed_object");
        state
            .symbol_table
            .insert_or_replace(Symbol::new(&name, ty.clone()));
        Expr::symbol(
            SymbolId::new(name)
                .with_thread(state.active_thread)
                .with_frame(0),
            ty.clone(),
        )
    }
}

/// `pointer == &object`, with the address cast to the pointer's type when
/// the object was re-typed by the dereference.
fn pointer_match(pointer: &Expr, object: &Expr) -> Expr {
    let stripped = match object.kind() {
        ExprKind::Cast { operand } => (**operand).clone(),
        _ => object.clone(),
    };
    let address = stripped.address_of();
    let address = if address.ty() == pointer.ty() {
        address
    } else {
        address.cast(pointer.ty().clone())
    };
    pointer.clone().eq_expr(address)
}

/// Replace free occurrences of `name` (any decoration) with `replacement`.
/// Shadowing binders suspend the substitution underneath themselves.
fn substitute_base_name(expr: Expr, name: &str, replacement: &Expr) -> Expr {
    match expr.kind() {
        ExprKind::Symbol(id) => {
            if id.name == name {
                replacement.clone()
            } else {
                expr
            }
        }
        ExprKind::Let { binding, .. } if binding.name == name => {
            let ty = expr.ty().clone();
            let (kind, _) = expr.into_parts();
            let ExprKind::Let {
                binding,
                value,
                body,
            } = kind
            else {
                unreachable!("kind changed between inspection and decomposition");
            };
            let value = substitute_base_name(*value, name, replacement);
            Expr::new(
                ExprKind::Let {
                    binding,
                    value: Box::new(value),
                    body,
                },
                ty,
            )
        }
        ExprKind::Quantifier { bound, .. } if bound.iter().any(|(b, _)| b.name == name) => expr,
        _ => {
            let ty = expr.ty().clone();
            let (kind, _) = expr.into_parts();
            let kind = crate::renaming::rename_children(kind, &mut |child| {
                substitute_base_name(child, name, replacement)
            });
            Expr::new(kind, ty)
        }
    }
}
