//! GOTO execution: forward-branch stash-and-merge, loop back-edges under
//! unwinding policy, condition propagation into the successor states, and
//! branch forking in path-exploration mode.

use tracing::debug;

use loris_ir::{simplify, BinOp, Expr, ExprKind};

use crate::equation::{Equation, SsaStep};
use crate::error::SymexError;
use crate::path_storage::PathEntry;
use crate::renaming::Level;
use crate::state::{ExecState, GotoState};
use crate::symex::{advance, Executor};
use crate::unwind::loop_id;

impl Executor<'_> {
    pub(crate) fn symex_goto(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        condition: Expr,
        target: usize,
    ) -> Result<(), SymexError> {
        let original_condition = condition.clone();
        let cond = self.clean_read(state, equation, condition)?;
        self.emit_shared_reads(state, equation, &cond);

        if !cond.is_true() && !cond.is_false() {
            equation.append(SsaStep::Goto {
                guard: state.guard.as_expr(),
                cond: cond.clone(),
                source: state.source.clone(),
            });
        }

        // A branch that cannot be taken, or a dead path walking to its merge
        // point: fall through.
        if cond.is_false() || !state.reachable {
            advance(state);
            return Ok(());
        }

        let backward = target <= state.pc.index;
        if backward {
            return self.symex_backward_goto(state, equation, original_condition, cond, target);
        }

        if cond.is_true() {
            if self.config.doing_path_exploration {
                // No merging to respect: jump directly.
                state.pc.index = target;
                return Ok(());
            }
            // The whole state moves to the target, but it must arrive there
            // through the merge map: stash it, then walk the skipped range
            // as an unreachable shell so intermediate merge points (e.g. the
            // other arm of an if-else) still fire in program order.
            let stashed = state.snapshot();
            let target_pc = state.pc.at(target);
            state.stash_goto_state(target_pc, stashed);
            state.guard.add(Expr::falsity());
            state.reachable = false;
            advance(state);
            return Ok(());
        }

        if self.config.doing_path_exploration {
            return self.fork_branch(state, equation, original_condition, cond, target);
        }

        // Eager fork-and-join: stash the taken branch for the merge at the
        // target, continue the fall-through.
        let mut taken = state.snapshot();
        taken.guard.add(cond.clone());
        taken.reachable = !taken.guard.is_false();
        self.apply_goto_condition(state, &mut taken, &original_condition, &cond);
        let target_pc = state.pc.at(target);
        state.stash_goto_state(target_pc, taken);

        let negated = simplify(cond.not());
        state.guard.add(negated);
        state.reachable = !state.guard.is_false();
        advance(state);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Loops
    // ------------------------------------------------------------------

    fn symex_backward_goto(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        original_condition: Expr,
        cond: Expr,
        target: usize,
    ) -> Result<(), SymexError> {
        let self_loop = target == state.pc.index;
        if self_loop && self.config.self_loops_to_assumptions {
            // The back-edge becomes an exit assumption; the loop body is
            // never re-entered.
            let negated = simplify(cond.not());
            self.assume_condition(state, equation, negated);
            advance(state);
            return Ok(());
        }

        let id = loop_id(&state.pc.function, target);
        let count = state.bump_loop_iteration(&id);
        if self.config.unwind.should_stop_unwind(&id, count) {
            debug!(loop_id = %id, count, "symex: unwinding bound reached");
            self.loop_bound_exceeded(state, equation, &id, count, cond)?;
            advance(state);
            return Ok(());
        }

        if self.config.doing_path_exploration {
            return self.fork_branch(state, equation, original_condition, cond, target);
        }

        if cond.is_true() {
            state.pc.index = target;
            return Ok(());
        }

        // Continue around the loop on the taken branch; the exit state is
        // stashed for the merge at the instruction after this jump. The
        // running state plays the not-taken role during refinement, then
        // adopts the refined taken side.
        let mut taken_refined = state.snapshot();
        self.apply_goto_condition(state, &mut taken_refined, &original_condition, &cond);
        let mut exit_state = state.snapshot();
        exit_state.guard.add(simplify(cond.clone().not()));
        exit_state.reachable = !exit_state.guard.is_false();
        let merge_pc = state.pc.next();
        state.restore(taken_refined);
        state.stash_goto_state(merge_pc, exit_state);

        state.guard.add(cond);
        state.reachable = !state.guard.is_false();
        state.pc.index = target;
        Ok(())
    }

    /// The configured reaction to a breached unwinding bound.
    pub(crate) fn loop_bound_exceeded(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        id: &str,
        count: usize,
        cond: Expr,
    ) -> Result<(), SymexError> {
        let negated = simplify(cond.not());
        if self.config.unwinding_assertions {
            let property_id = format!("{id}.unwind.{count}");
            self.vcc(
                state,
                equation,
                negated,
                &format!("unwinding assertion loop {id}"),
                property_id,
            );
        } else if !self.config.partial_loops {
            // Sound truncation: the back-edge is assumed untaken.
            self.assume_condition(state, equation, negated);
        }
        // With partial loops the fall-through continues unconstrained.
        Ok(())
    }

    /// Conjoin a condition to the path, emitting the assume step.
    pub(crate) fn assume_condition(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        cond: Expr,
    ) {
        equation.append(SsaStep::Assume {
            guard: state.guard.as_expr(),
            cond: cond.clone(),
            source: state.source.clone(),
        });
        if cond.is_false() {
            state.reachable = false;
        }
        state.guard.add(cond);
    }

    // ------------------------------------------------------------------
    // Path exploration
    // ------------------------------------------------------------------

    /// Fork at a branch: push the taken successor (state plus equation
    /// prefix) to path storage, continue with the fall-through, and pause so
    /// the caller can pick the next path.
    fn fork_branch(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        original_condition: Expr,
        cond: Expr,
        target: usize,
    ) -> Result<(), SymexError> {
        let mut taken = state.fork();
        let mut taken_refinement = taken.snapshot();
        self.apply_goto_condition(state, &mut taken_refinement, &original_condition, &cond);
        taken.restore(taken_refinement);
        taken.guard.add(cond.clone());
        taken.reachable = !taken.guard.is_false();
        taken.pc.index = target;
        self.path_storage.push(PathEntry {
            state: taken,
            equation: equation.clone(),
        });
        debug!(stored = self.path_storage.len(), "symex: branch forked, pausing");

        state.guard.add(simplify(cond.not()));
        state.reachable = !state.guard.is_false();
        advance(state);
        self.should_pause_symex = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Condition propagation
    // ------------------------------------------------------------------

    /// Propagate constants and points-to information implied by the branch
    /// condition into the taken snapshot and the (running) not-taken state.
    pub(crate) fn apply_goto_condition(
        &mut self,
        state: &mut ExecState,
        taken: &mut GotoState,
        original_condition: &Expr,
        cond: &Expr,
    ) {
        // x == const pins the constant on the taken side and invalidates a
        // matching binding on the not-taken side.
        if let ExprKind::Binary {
            op: BinOp::Eq,
            lhs,
            rhs,
        } = cond.kind()
        {
            let (symbol, constant) = if lhs.is_constant() {
                (rhs, lhs)
            } else {
                (lhs, rhs)
            };
            if let (Some(id), true) = (symbol.as_symbol(), constant.is_constant()) {
                let key = id.l1_key();
                taken.propagation.insert(key.clone(), (**constant).clone());
                if state.propagation.get(&key) == Some(&**constant) {
                    state.propagation.shift_remove(&key);
                }
            }
            if lhs.ty().is_pointer() {
                taken.value_set.apply_condition(cond);
                state.value_set.apply_negated_condition(cond);
            }
        }

        // Value-set filtering over a single free pointer symbol.
        let filter_condition = state.rename(
            original_condition.clone(),
            Level::L1,
            self.outer_symbol_table,
            false,
        );
        let original_value_set = state.value_set.clone();
        original_value_set.filter(
            &filter_condition,
            Some(&mut taken.value_set),
            Some(&mut state.value_set),
        );
    }
}
