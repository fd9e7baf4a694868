use indexmap::IndexMap;

/// Loop and recursion unwinding bounds.
///
/// A loop is identified by its function and the pc of its head; a recursion
/// bound applies per function identifier. Specific bounds take precedence
/// over the global one; no bound at all means unlimited unwinding.
#[derive(Debug, Clone, Default)]
pub struct UnwindLimits {
    pub global: Option<usize>,
    pub per_loop: IndexMap<String, usize>,
    pub per_recursion: IndexMap<String, usize>,
}

/// Identifier for a loop head used in bound lookups and iteration counters.
pub fn loop_id(function: &str, head_pc: usize) -> String {
    format!("{function}.{head_pc}")
}

impl UnwindLimits {
    pub fn with_global(bound: usize) -> Self {
        UnwindLimits {
            global: Some(bound),
            ..Default::default()
        }
    }

    pub fn set_loop_bound(&mut self, function: &str, head_pc: usize, bound: usize) {
        self.per_loop.insert(loop_id(function, head_pc), bound);
    }

    pub fn set_recursion_bound(&mut self, function: &str, bound: usize) {
        self.per_recursion.insert(function.into(), bound);
    }

    pub fn loop_limit(&self, id: &str) -> Option<usize> {
        self.per_loop.get(id).copied().or(self.global)
    }

    pub fn recursion_limit(&self, function: &str) -> Option<usize> {
        self.per_recursion.get(function).copied().or(self.global)
    }

    /// True when taking a back-edge for the `count`-th time breaches the
    /// bound for this loop.
    pub fn should_stop_unwind(&self, id: &str, count: usize) -> bool {
        match self.loop_limit(id) {
            Some(bound) => count > bound,
            None => false,
        }
    }

    /// True when entering one more frame of `function` breaches the
    /// recursion bound, `depth` being the number of frames already active.
    pub fn should_stop_recursion(&self, function: &str, depth: usize) -> bool {
        match self.recursion_limit(function) {
            Some(bound) => depth >= bound.saturating_add(1),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specific_loop_bound_overrides_global() {
        let mut limits = UnwindLimits::with_global(10);
        limits.set_loop_bound("main", 3, 2);
        assert_eq!(limits.loop_limit(&loop_id("main", 3)), Some(2));
        assert_eq!(limits.loop_limit(&loop_id("main", 7)), Some(10));
    }

    #[test]
    fn unbounded_loops_never_stop() {
        let limits = UnwindLimits::default();
        assert!(!limits.should_stop_unwind("main.0", 1_000_000));
    }

    #[test]
    fn bound_zero_stops_first_back_edge() {
        let mut limits = UnwindLimits::default();
        limits.set_loop_bound("main", 0, 0);
        assert!(limits.should_stop_unwind(&loop_id("main", 0), 1));
    }

    #[test]
    fn recursion_bound_counts_active_frames() {
        let mut limits = UnwindLimits::default();
        limits.set_recursion_bound("fun", 0);
        // One frame of `fun` already active: a further self-call stops.
        assert!(limits.should_stop_recursion("fun", 1));
        // The initial (outermost) call is always allowed.
        assert!(!limits.should_stop_recursion("fun", 0));
    }
}
