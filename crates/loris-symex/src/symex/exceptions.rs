//! Exception modeling: per-frame catch stacks, throw dispatch to the
//! nearest matching landing pad, and stack unwinding across frames.

use loris_ir::{Expr, InstructionKind};

use crate::equation::{AssignmentKind, Equation, SsaStep};
use crate::error::SymexError;
use crate::state::{CatchScope, ExecState, Pc};
use crate::symex::{advance, Executor, GotoFunctionProvider};

impl Executor<'_> {
    pub(crate) fn symex_catch_push(
        &mut self,
        state: &mut ExecState,
        handlers: Vec<(String, usize)>,
    ) -> Result<(), SymexError> {
        let frame = state
            .call_stack
            .last_mut()
            .ok_or_else(|| SymexError::unexpected("CATCH_PUSH", "outside any function frame"))?;
        frame.catch_stack.push(CatchScope { handlers });
        Ok(())
    }

    pub(crate) fn symex_catch_pop(&mut self, state: &mut ExecState) -> Result<(), SymexError> {
        let frame = state
            .call_stack
            .last_mut()
            .ok_or_else(|| SymexError::unexpected("CATCH_POP", "outside any function frame"))?;
        frame.catch_stack.pop().ok_or_else(|| {
            SymexError::unexpected("CATCH_POP", "without an active catch scope")
        })?;
        Ok(())
    }

    /// Dispatch a throw: linearly search the innermost matching landing
    /// pad, unwind intervening frames, and assign the exception value to
    /// the handler's variable. An unmatched throw is a verification failure
    /// and ends the path.
    pub(crate) fn symex_throw(
        &mut self,
        state: &mut ExecState,
        provider: &impl GotoFunctionProvider,
        equation: &mut Equation,
        value: Option<Expr>,
        tags: Vec<String>,
    ) -> Result<(), SymexError> {
        let value = value
            .map(|v| self.clean_read(state, equation, v))
            .transpose()?;

        let mut found: Option<(usize, usize)> = None;
        'search: for (frame_index, frame) in state.call_stack.iter().enumerate().rev() {
            for scope in frame.catch_stack.iter().rev() {
                for (tag, handler_pc) in &scope.handlers {
                    if tag == "..." || tags.is_empty() || tags.iter().any(|t| t == tag) {
                        found = Some((frame_index, *handler_pc));
                        break 'search;
                    }
                }
            }
        }

        let Some((frame_index, handler_pc)) = found else {
            let property_id = format!("{}.uncaught_exception", state.pc.function);
            self.vcc(
                state,
                equation,
                Expr::falsity(),
                "uncaught exception",
                property_id,
            );
            state.guard.add(Expr::falsity());
            state.reachable = false;
            advance(state);
            return Ok(());
        };

        // Unwind frames above the one holding the handler.
        while state.call_stack.len() > frame_index + 1 {
            let Some(frame) = state.call_stack.pop() else {
                return Err(SymexError::invariant("throw unwound past the stack root"));
            };
            for local in &frame.locals {
                state.kill(local);
            }
            state.level1 = frame.saved_level1.clone();
            equation.append(SsaStep::FunctionReturn {
                guard: state.guard.as_expr(),
                identifier: frame.function_identifier.clone(),
                source: state.source.clone(),
            });
        }

        let handler_function = state
            .call_stack
            .last()
            .map(|f| f.function_identifier.clone())
            .ok_or_else(|| SymexError::invariant("throw landed outside any frame"))?;
        let handler = Pc::new(handler_function, handler_pc);

        // Hand the exception value to the landing pad, when both exist.
        if let Some(value) = value {
            let landing_lhs = provider
                .get_function(&handler.function)
                .and_then(|f| f.body.as_ref())
                .and_then(|b| b.get(handler.index))
                .and_then(|i| match &i.kind {
                    InstructionKind::Landingpad { lhs } => Some(lhs.clone()),
                    _ => None,
                });
            if let Some(lhs) = landing_lhs {
                let mut value = value;
                if value.ty() != lhs.ty() {
                    value = value.cast(lhs.ty().clone());
                }
                let lhs_l1 = self.clean_write(state, equation, lhs.clone())?;
                self.assign_rec(
                    state,
                    equation,
                    lhs,
                    lhs_l1,
                    value,
                    Expr::truth(),
                    AssignmentKind::State,
                )?;
            }
        }

        state.pc = handler;
        Ok(())
    }
}
