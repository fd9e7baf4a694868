use crate::unwind::UnwindLimits;

/// Configuration of the symbolic execution.
#[derive(Debug, Clone)]
pub struct SymexConfig {
    /// Hard cap on steps per path; 0 means unlimited.
    pub max_depth: usize,
    /// Fork at branches and pause instead of eagerly merging forward gotos.
    pub doing_path_exploration: bool,
    /// Suppress the validity assertion on dereferences with an empty
    /// value set.
    pub allow_pointer_unsoundness: bool,
    /// Rewrite level-2 reads through the constant-propagation map.
    pub constant_propagation: bool,
    /// Replace a self-loop back-edge with `assume(false)` at the bound.
    pub self_loops_to_assumptions: bool,
    /// Run the simplifier on every renamed expression.
    pub simplify_opt: bool,
    /// Emit an assertion when a loop or recursion unwinding bound is hit.
    pub unwinding_assertions: bool,
    /// Allow continuing past an unwinding bound without the truncating
    /// assumption.
    pub partial_loops: bool,
    /// Extra renaming/assignment validation; violations abort.
    pub run_validation_checks: bool,
    /// Trace each executed instruction through the logger.
    pub show_symex_steps: bool,
    /// Diagnostic verbosity.
    pub debug_level: u32,
    /// Discard a path exceeding `max_depth` without emitting the truncating
    /// `assume(false)`.
    pub silent_depth_truncation: bool,
    /// Loop and recursion unwinding bounds.
    pub unwind: UnwindLimits,
    /// Identifier of the function execution starts from.
    pub entry_point: String,
}

impl Default for SymexConfig {
    fn default() -> Self {
        SymexConfig {
            max_depth: 0,
            doing_path_exploration: false,
            allow_pointer_unsoundness: false,
            constant_propagation: true,
            self_loops_to_assumptions: false,
            simplify_opt: true,
            unwinding_assertions: false,
            partial_loops: false,
            run_validation_checks: false,
            show_symex_steps: false,
            debug_level: 0,
            silent_depth_truncation: false,
            unwind: UnwindLimits::default(),
            entry_point: "main".into(),
        }
    }
}
