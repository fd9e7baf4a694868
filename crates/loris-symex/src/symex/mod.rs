//! The instruction interpreter and path-exploration controller.
//!
//! `Executor` drives per-instruction symbolic execution over an
//! [`ExecState`], appending to the target [`Equation`]. State and equation
//! are threaded through every handler as explicit parameters; the executor
//! itself only holds configuration, the outer symbol table, path storage,
//! and run-level counters.

mod assign;
mod exceptions;
mod function;
mod goto;
mod other;
mod threads;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use loris_ir::{Expr, GotoFunction, InstructionKind, SymbolId, SymbolTable};

use crate::config::SymexConfig;
use crate::equation::{Equation, SsaStep};
use crate::error::SymexError;
use crate::merge::merge_goto;
use crate::path_storage::{PathEntry, PathStorage};
use crate::renaming::VersionCounter;
use crate::state::{ExecState, Pc};

/// Lazy loader for function bodies.
pub trait GotoFunctionProvider {
    fn get_function(&self, identifier: &str) -> Option<&GotoFunction>;
}

impl GotoFunctionProvider for IndexMap<String, GotoFunction> {
    fn get_function(&self, identifier: &str) -> Option<&GotoFunction> {
        self.get(identifier)
    }
}

/// The forward symbolic execution engine.
pub struct Executor<'a> {
    pub(crate) config: SymexConfig,
    pub(crate) outer_symbol_table: &'a SymbolTable,
    pub(crate) path_storage: &'a mut dyn PathStorage,
    /// Set when a branch was forked in path-exploration mode and the caller
    /// should pick the next path to resume.
    pub should_pause_symex: bool,
    /// VCCs generated since the last branch point (whole run when merging).
    pub path_segment_vccs: usize,
    /// Let-bound auxiliaries to kill when the current instruction concludes.
    pub(crate) instruction_local_symbols: Vec<SymbolId>,
    /// Global SSA version source, shared by every path of the run so forked
    /// branches never reuse a version.
    pub(crate) l2_counter: VersionCounter,
    pub(crate) total_vccs: Option<usize>,
    pub(crate) remaining_vccs: Option<usize>,
    pub(crate) fkt_logged: IndexSet<String>,
    pub(crate) no_body_logged: IndexSet<String>,
}

impl<'a> Executor<'a> {
    pub fn new(
        config: SymexConfig,
        outer_symbol_table: &'a SymbolTable,
        path_storage: &'a mut dyn PathStorage,
    ) -> Self {
        Executor {
            config,
            outer_symbol_table,
            path_storage,
            should_pause_symex: false,
            path_segment_vccs: 0,
            instruction_local_symbols: Vec::new(),
            l2_counter: VersionCounter::new(),
            total_vccs: None,
            remaining_vccs: None,
            fkt_logged: IndexSet::new(),
            no_body_logged: IndexSet::new(),
        }
    }

    pub fn config(&self) -> &SymexConfig {
        &self.config
    }

    /// Total VCCs of the last finished run, if one finished.
    pub fn get_total_vccs(&self) -> Option<usize> {
        self.total_vccs
    }

    /// Non-trivial VCCs of the last finished run, if one finished.
    pub fn get_remaining_vccs(&self) -> Option<usize> {
        self.remaining_vccs
    }

    /// Take the next stored path, if any.
    pub fn pop_path(&mut self) -> Option<PathEntry> {
        self.path_storage.pop()
    }

    /// Return a path (typically one paused mid-branch) to storage.
    pub fn push_path(&mut self, entry: PathEntry) {
        self.path_storage.push(entry);
    }

    /// Number of paths waiting in storage.
    pub fn stored_paths(&self) -> usize {
        self.path_storage.len()
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    /// Execute the whole program from the configured entry point and return
    /// the accumulated equation.
    pub fn symex_from_entry_point(
        &mut self,
        provider: &impl GotoFunctionProvider,
        new_symbol_table: &mut SymbolTable,
    ) -> Result<Equation, SymexError> {
        let mut state = self.initialize_entry_point_state(provider)?;
        let mut equation = Equation::new();
        self.symex_with_state(&mut state, provider, &mut equation, new_symbol_table)?;
        Ok(equation)
    }

    /// Push the initial state into path storage for later stepwise
    /// resumption.
    pub fn initialize_from_entry_point(
        &mut self,
        provider: &impl GotoFunctionProvider,
    ) -> Result<(), SymexError> {
        let state = self.initialize_entry_point_state(provider)?;
        self.path_storage.push(PathEntry {
            state,
            equation: Equation::new(),
        });
        Ok(())
    }

    /// Continue a paused path from its saved state and equation prefix.
    pub fn resume(
        &mut self,
        entry: PathEntry,
        provider: &impl GotoFunctionProvider,
        new_symbol_table: &mut SymbolTable,
    ) -> Result<(ExecState, Equation), SymexError> {
        let PathEntry {
            mut state,
            mut equation,
        } = entry;
        self.symex_with_state(&mut state, provider, &mut equation, new_symbol_table)?;
        Ok((state, equation))
    }

    pub(crate) fn initialize_entry_point_state(
        &self,
        provider: &impl GotoFunctionProvider,
    ) -> Result<ExecState, SymexError> {
        let entry = &self.config.entry_point;
        let function = provider
            .get_function(entry)
            .ok_or_else(|| SymexError::function_not_found(entry.clone()))?;
        let body = function
            .body
            .as_ref()
            .ok_or_else(|| SymexError::function_not_found(entry.clone()))?;
        let end = body.end_of_function().ok_or_else(|| {
            SymexError::invariant(format!("function '{entry}' has no END_FUNCTION"))
        })?;
        let mut state = ExecState::new(Pc::new(entry.clone(), 0), end);
        state.run_validation_checks = self.config.run_validation_checks;
        Ok(state)
    }

    /// Run until the work is done or a branch pauses execution.
    pub fn symex_with_state(
        &mut self,
        state: &mut ExecState,
        provider: &impl GotoFunctionProvider,
        equation: &mut Equation,
        new_symbol_table: &mut SymbolTable,
    ) -> Result<(), SymexError> {
        self.should_pause_symex = false;
        self.path_segment_vccs = 0;
        // A resumed state may carry versions this executor never allocated.
        self.l2_counter.ensure_at_least(&state.level2);
        loop {
            if self.should_pause_symex {
                break;
            }
            if !self.symex_threaded_step(state, provider, equation)? {
                break;
            }
        }
        new_symbol_table.absorb(&state.symbol_table);
        self.total_vccs = Some(state.total_vccs);
        self.remaining_vccs = Some(state.remaining_vccs);
        Ok(())
    }

    /// Advance execution by one threaded step: when the active program
    /// thread has terminated, switch to the next runnable one; otherwise
    /// execute its current instruction. Returns `false` once no thread has
    /// work left.
    pub fn symex_threaded_step(
        &mut self,
        state: &mut ExecState,
        provider: &impl GotoFunctionProvider,
        equation: &mut Equation,
    ) -> Result<bool, SymexError> {
        if state.active_thread_terminated() {
            let Some(thread) = state.next_runnable_thread() else {
                return Ok(false);
            };
            debug!(thread, "symex: switching to runnable thread");
            state.switch_thread(thread)?;
            return Ok(true);
        }
        self.step(state, provider, equation)?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Single step
    // ------------------------------------------------------------------

    /// Execute the instruction at `state.pc`.
    pub fn step(
        &mut self,
        state: &mut ExecState,
        provider: &impl GotoFunctionProvider,
        equation: &mut Equation,
    ) -> Result<(), SymexError> {
        if state.has_goto_states(&state.pc) {
            self.merge_gotos(state, equation)?;
        }
        // The reachable flag must track guard falsity at every mutation
        // site; a reachable state with an unsatisfiable guard means some
        // handler corrupted the path condition.
        if state.run_validation_checks && state.reachable && state.guard.is_false() {
            return Err(SymexError::GuardCorruption);
        }
        if self.config.max_depth > 0 && state.depth >= self.config.max_depth && state.reachable {
            self.truncate_path(state, equation);
        }

        let kind;
        {
            let function = provider.get_function(&state.pc.function).ok_or_else(|| {
                SymexError::invariant(format!("no body for function '{}'", state.pc.function))
            })?;
            let body = function.body.as_ref().ok_or_else(|| {
                SymexError::invariant(format!("function '{}' lost its body", state.pc.function))
            })?;
            let instruction = body.get(state.pc.index).ok_or_else(|| {
                SymexError::invariant(format!("pc {} out of range", state.pc))
            })?;
            state.source = instruction.source.clone();
            if self.config.show_symex_steps {
                debug!(
                    pc = %state.pc,
                    instruction = instruction.kind.name(),
                    guard_size = state.guard.conjuncts().len(),
                    call_depth = state.call_stack.len(),
                    "symex step"
                );
            }
            kind = instruction.kind.clone();
        }
        state.depth += 1;

        // A dead path only walks forward to reach merge points; its
        // instructions have no semantic effect. Frames still pop so the walk
        // terminates.
        if !state.reachable {
            match kind {
                InstructionKind::EndFunction => {
                    self.symex_end_of_function(state, equation)?;
                }
                _ => advance(state),
            }
            return Ok(());
        }

        match kind {
            InstructionKind::Assign { lhs, rhs } => {
                self.symex_assign(state, equation, lhs, rhs)?;
                advance(state);
            }
            InstructionKind::Decl { symbol } => {
                self.symex_decl(state, &symbol)?;
                advance(state);
            }
            InstructionKind::Dead { symbol } => {
                self.symex_dead(state, equation, &symbol)?;
                advance(state);
            }
            InstructionKind::Assume { condition } => {
                self.symex_assume(state, equation, condition)?;
                advance(state);
            }
            InstructionKind::Assert {
                condition,
                msg,
                property_id,
            } => {
                self.symex_assert(state, equation, condition, &msg, property_id)?;
                advance(state);
            }
            InstructionKind::Goto { condition, target } => {
                self.symex_goto(state, equation, condition, target)?;
            }
            InstructionKind::FunctionCall {
                lhs,
                function,
                arguments,
            } => {
                self.symex_function_call(state, provider, equation, lhs, function, arguments)?;
            }
            InstructionKind::Return { value } => {
                self.symex_return(state, equation, value)?;
            }
            InstructionKind::EndFunction => {
                self.symex_end_of_function(state, equation)?;
            }
            InstructionKind::StartThread { target } => {
                self.symex_start_thread(state, equation, target)?;
                advance(state);
            }
            InstructionKind::EndThread => {
                self.symex_end_thread(state)?;
                advance(state);
            }
            InstructionKind::AtomicBegin => {
                self.symex_atomic_begin(state, equation)?;
                advance(state);
            }
            InstructionKind::AtomicEnd => {
                self.symex_atomic_end(state, equation)?;
                advance(state);
            }
            InstructionKind::Skip => {
                advance(state);
            }
            InstructionKind::Other { statement } => {
                self.symex_other(state, equation, statement)?;
                advance(state);
            }
            InstructionKind::Throw { value, tags } => {
                self.symex_throw(state, provider, equation, value, tags)?;
            }
            InstructionKind::CatchPush { handlers } => {
                self.symex_catch_push(state, handlers)?;
                advance(state);
            }
            InstructionKind::CatchPop => {
                self.symex_catch_pop(state)?;
                advance(state);
            }
            InstructionKind::Landingpad { .. } => {
                // The exception value was assigned when the throw dispatched
                // here; on the fall-through path this is a no-op.
                advance(state);
            }
            InstructionKind::VaStart { lhs } => {
                self.symex_va_start(state, equation, lhs)?;
                advance(state);
            }
            InstructionKind::Input { id, arguments } => {
                self.symex_input(state, equation, &id, arguments)?;
                advance(state);
            }
            InstructionKind::Output { id, arguments } => {
                self.symex_output(state, equation, &id, arguments)?;
                advance(state);
            }
        }

        self.kill_instruction_local_symbols(state);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    /// Merge all contributors stashed for the current pc.
    pub(crate) fn merge_gotos(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
    ) -> Result<(), SymexError> {
        let pc = state.pc.clone();
        for contributor in state.take_goto_states(&pc) {
            merge_goto(contributor, state, equation, &mut self.l2_counter)?;
        }
        Ok(())
    }

    /// Allocate the next SSA version for a write to the given symbol.
    pub(crate) fn fresh_l2_version(&mut self, id: &SymbolId) -> usize {
        self.l2_counter.next(&id.l1_key())
    }

    /// Discard the current path at the depth bound.
    fn truncate_path(&mut self, state: &mut ExecState, equation: &mut Equation) {
        debug!(depth = state.depth, "symex: max depth reached, truncating path");
        if !self.config.silent_depth_truncation {
            equation.append(SsaStep::Assume {
                guard: state.guard.as_expr(),
                cond: Expr::falsity(),
                source: state.source.clone(),
            });
        }
        state.guard.add(Expr::falsity());
        state.reachable = false;
    }

    /// Count a verification condition and emit it unless trivially true.
    pub(crate) fn vcc(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        cond: Expr,
        msg: &str,
        property_id: String,
    ) {
        state.total_vccs += 1;
        self.path_segment_vccs += 1;
        if cond.is_true() {
            return;
        }
        state.remaining_vccs += 1;
        equation.append(SsaStep::Assert {
            guard: state.guard.as_expr(),
            cond,
            msg: msg.to_string(),
            property_id,
            source: state.source.clone(),
        });
    }

    /// Kill let-bound auxiliaries whose lifetime ends with this instruction.
    pub(crate) fn kill_instruction_local_symbols(&mut self, state: &mut ExecState) {
        for id in std::mem::take(&mut self.instruction_local_symbols) {
            state.kill(&id);
        }
    }

    /// Emit interleaving markers for shared objects read by `expr`.
    pub(crate) fn emit_shared_reads(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        expr: &Expr,
    ) {
        if !state.multi_threaded() || state.atomic_section_count > 0 {
            return;
        }
        let mut seen = IndexSet::new();
        let mut shared = Vec::new();
        expr.for_each_subexpr(&mut |sub| {
            if let Some(id) = sub.as_symbol() {
                if seen.insert(id.clone())
                    && state
                        .lookup(self.outer_symbol_table, &id.name)
                        .is_some_and(|s| s.is_shared())
                {
                    shared.push(sub.clone());
                }
            }
        });
        for object in shared {
            equation.append(SsaStep::SharedRead {
                guard: state.guard.as_expr(),
                object,
                source: state.source.clone(),
            });
        }
    }

    /// Emit an interleaving marker for a shared object about to be written.
    pub(crate) fn emit_shared_write(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        object: &Expr,
    ) {
        if !state.multi_threaded() || state.atomic_section_count > 0 {
            return;
        }
        let Some(id) = object.as_symbol() else {
            return;
        };
        if state
            .lookup(self.outer_symbol_table, &id.name)
            .is_some_and(|s| s.is_shared())
        {
            equation.append(SsaStep::SharedWrite {
                guard: state.guard.as_expr(),
                object: object.clone(),
                source: state.source.clone(),
            });
        }
    }
}

/// Fall through to the next instruction in program order.
pub(crate) fn advance(state: &mut ExecState) {
    state.pc.index += 1;
}
