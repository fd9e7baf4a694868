//! Thread spawning, termination, and atomic sections.
//!
//! The interpreter itself is single-threaded: exactly one program thread
//! advances at a time, and the equation carries spawn and interleaving
//! markers so the downstream solver can explore schedules.

use tracing::debug;

use crate::equation::{Equation, SsaStep};
use crate::error::SymexError;
use crate::state::ExecState;
use crate::symex::Executor;

impl Executor<'_> {
    pub(crate) fn symex_start_thread(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        target: usize,
    ) -> Result<(), SymexError> {
        let entry = state.pc.at(target);
        let thread = state.add_thread(entry);
        debug!(thread, target, "symex: thread spawned");
        equation.append(SsaStep::Spawn {
            guard: state.guard.as_expr(),
            source: state.source.clone(),
        });
        Ok(())
    }

    pub(crate) fn symex_end_thread(&mut self, state: &mut ExecState) -> Result<(), SymexError> {
        state.mark_thread_terminated();
        Ok(())
    }

    pub(crate) fn symex_atomic_begin(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
    ) -> Result<(), SymexError> {
        state.atomic_section_count += 1;
        equation.append(SsaStep::AtomicBegin {
            guard: state.guard.as_expr(),
            source: state.source.clone(),
        });
        Ok(())
    }

    pub(crate) fn symex_atomic_end(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
    ) -> Result<(), SymexError> {
        if state.atomic_section_count == 0 {
            return Err(SymexError::unexpected(
                "ATOMIC_END",
                "without a matching ATOMIC_BEGIN",
            ));
        }
        state.atomic_section_count -= 1;
        equation.append(SsaStep::AtomicEnd {
            guard: state.guard.as_expr(),
            source: state.source.clone(),
        });
        Ok(())
    }
}
