use indexmap::{IndexMap, IndexSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use loris_ir::{Expr, SourceLocation, Symbol, SymbolId, SymbolTable};

use crate::error::SymexError;
use crate::guard::Guard;
use crate::renaming::{Level, Level1Map, Level2Map, RenameContext};
use crate::value_set::ValueSet;

/// A program counter: function identifier plus instruction index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pc {
    pub function: String,
    pub index: usize,
}

impl Pc {
    pub fn new(function: impl Into<String>, index: usize) -> Self {
        Pc {
            function: function.into(),
            index,
        }
    }

    pub fn next(&self) -> Pc {
        Pc {
            function: self.function.clone(),
            index: self.index + 1,
        }
    }

    pub fn at(&self, index: usize) -> Pc {
        Pc {
            function: self.function.clone(),
            index,
        }
    }
}

impl fmt::Display for Pc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.function, self.index)
    }
}

/// An active catch scope: exception tag to handler pc, in match order.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchScope {
    pub handlers: Vec<(String, usize)>,
}

/// One function activation.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub function_identifier: String,
    /// Caller's pc to resume at after `EndFunction`.
    pub return_pc: Pc,
    /// Index of the callee's `EndFunction` instruction.
    pub end_of_function: usize,
    /// The call's left-hand side, to be assigned from the return-value
    /// carrier once the frame pops.
    pub call_lhs: Option<Expr>,
    /// Hidden carrier for the return value, present when `call_lhs` is.
    pub return_value_symbol: Option<SymbolId>,
    /// Level-1 map as it was on entry; restored on pop.
    pub saved_level1: Level1Map,
    /// Locals declared in this frame, killed on exit.
    pub locals: IndexSet<SymbolId>,
    pub catch_stack: Vec<CatchScope>,
}

impl Frame {
    pub fn new(
        function_identifier: impl Into<String>,
        return_pc: Pc,
        end_of_function: usize,
        saved_level1: Level1Map,
    ) -> Self {
        Frame {
            function_identifier: function_identifier.into(),
            return_pc,
            end_of_function,
            call_lhs: None,
            return_value_symbol: None,
            saved_level1,
            locals: IndexSet::new(),
            catch_stack: Vec::new(),
        }
    }
}

/// The path-local portion of a state: what a merge contributor or a branch
/// fork carries besides the program counter.
#[derive(Debug, Clone, PartialEq)]
pub struct GotoState {
    pub guard: Guard,
    pub level2: Level2Map,
    pub propagation: IndexMap<String, Expr>,
    pub value_set: ValueSet,
    pub loop_iterations: IndexMap<String, usize>,
    pub atomic_section_count: usize,
    pub depth: usize,
    pub reachable: bool,
}

/// Saved context of an inactive program thread.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadState {
    pub pc: Pc,
    pub call_stack: Vec<Frame>,
    pub level1: Level1Map,
    pub terminated: bool,
}

/// Per-path execution state, threaded mutably through the interpreter.
///
/// The fields mirror one program thread's view (the active one); inactive
/// threads are parked in `threads` and swapped in by `switch_thread`.
#[derive(Debug, Clone)]
pub struct ExecState {
    pub pc: Pc,
    /// Location of the instruction being executed, stamped on steps.
    pub source: SourceLocation,
    pub guard: Guard,
    /// False once the guard is unsatisfiable by construction.
    pub reachable: bool,
    pub level1: Level1Map,
    pub level2: Level2Map,
    pub propagation: IndexMap<String, Expr>,
    pub value_set: ValueSet,
    pub call_stack: Vec<Frame>,
    pub threads: Vec<ThreadState>,
    pub active_thread: usize,
    /// Interleaving points are suppressed while this is positive.
    pub atomic_section_count: usize,
    /// Steps taken on this path, for `max_depth`.
    pub depth: usize,
    /// Back-edge counts per (loop head, call-stack context).
    pub loop_iterations: IndexMap<String, usize>,
    /// Pending merge contributors per forward-goto target.
    pub goto_merge_map: IndexMap<Pc, Vec<GotoState>>,
    /// Engine-owned table of dynamically created objects.
    pub symbol_table: SymbolTable,
    /// Numbering for fresh dynamic objects and auxiliaries.
    pub dynamic_counter: usize,
    /// Monotonic source of level-1 frame numbers.
    pub frame_counter: usize,
    pub total_vccs: usize,
    pub remaining_vccs: usize,
    pub run_validation_checks: bool,
}

impl ExecState {
    pub fn new(entry: Pc, end_of_function: usize) -> Self {
        let source = SourceLocation::new("<entry>", 0, entry.function.clone());
        let initial_frame = Frame::new(
            entry.function.clone(),
            entry.clone(),
            end_of_function,
            Level1Map::new(),
        );
        ExecState {
            pc: entry,
            source,
            guard: Guard::new(),
            reachable: true,
            level1: Level1Map::new(),
            level2: Level2Map::new(),
            propagation: IndexMap::new(),
            value_set: ValueSet::new(),
            call_stack: vec![initial_frame],
            threads: vec![ThreadState {
                pc: Pc::new("", 0),
                call_stack: Vec::new(),
                level1: Level1Map::new(),
                terminated: false,
            }],
            active_thread: 0,
            atomic_section_count: 0,
            depth: 0,
            loop_iterations: IndexMap::new(),
            goto_merge_map: IndexMap::new(),
            symbol_table: SymbolTable::new(),
            dynamic_counter: 0,
            frame_counter: 0,
            total_vccs: 0,
            remaining_vccs: 0,
            run_validation_checks: false,
        }
    }

    /// Deep copy for path exploration.
    pub fn fork(&self) -> ExecState {
        self.clone()
    }

    // ------------------------------------------------------------------
    // Symbols and renaming
    // ------------------------------------------------------------------

    /// Look up a symbol in the dynamic table first, then the outer one.
    pub fn lookup<'a>(&'a self, outer: &'a SymbolTable, name: &str) -> Option<&'a Symbol> {
        self.symbol_table.lookup(name).or_else(|| outer.lookup(name))
    }

    fn is_shared_name(&self, outer: &SymbolTable, name: &str) -> bool {
        self.lookup(outer, name).is_some_and(Symbol::is_shared)
    }

    /// Rename every free symbol of `expr` to the target level.
    pub fn rename(
        &self,
        expr: Expr,
        level: Level,
        outer: &SymbolTable,
        constant_propagation: bool,
    ) -> Expr {
        let is_shared = |name: &str| self.is_shared_name(outer, name);
        let context = RenameContext {
            thread: self.active_thread,
            level1: &self.level1,
            level2: &self.level2,
            propagation: if constant_propagation {
                Some(&self.propagation)
            } else {
                None
            },
            is_shared: &is_shared,
        };
        context.rename(expr, level)
    }

    /// Register an assignment to a level-1 symbol with a version allocated
    /// by the run's global [`crate::renaming::VersionCounter`]; returns the
    /// new level-2 left-hand side.
    pub fn assignment(
        &mut self,
        lhs_l1: &SymbolId,
        ty: &loris_ir::Type,
        version: usize,
    ) -> Result<SymbolId, SymexError> {
        let key = lhs_l1.l1_key();
        if self.run_validation_checks {
            self.level2.check_monotonic(&key, version)?;
        }
        self.level2.set_version(lhs_l1, ty, version);
        let mut renamed = lhs_l1.clone();
        renamed.version = Some(version);
        Ok(renamed)
    }

    /// Record or clear the constant-propagation binding for a name.
    pub fn propagate(&mut self, l1_key: &str, value: Option<Expr>) {
        match value {
            Some(v) => {
                self.propagation.insert(l1_key.to_string(), v);
            }
            None => {
                self.propagation.shift_remove(l1_key);
            }
        }
    }

    /// Fresh level-1 frame number.
    pub fn next_frame(&mut self) -> usize {
        self.frame_counter += 1;
        self.frame_counter
    }

    /// Fresh numbered name for dynamic objects and auxiliaries.
    pub fn fresh_name(&mut self, prefix: &str) -> String {
        self.dynamic_counter += 1;
        format!("{prefix}${}", self.dynamic_counter)
    }

    /// Introduce a local: give it a fresh frame and record it in the current
    /// activation so it is killed on exit.
    pub fn declare(&mut self, id: &SymbolId) -> SymbolId {
        let frame = self.next_frame();
        let l0 = SymbolId::new(id.name.clone()).with_thread(
            id.thread.unwrap_or(self.active_thread),
        );
        self.level1.set_frame(l0.l0_key(), frame);
        let l1 = l0.with_frame(frame);
        if let Some(top) = self.call_stack.last_mut() {
            top.locals.insert(l1.clone());
        }
        l1
    }

    /// End a local's lifetime: drop its level-1 entry and purge the points-to
    /// store of references to it.
    pub fn kill(&mut self, l1: &SymbolId) {
        self.level1.remove(&l1.l0_key());
        self.value_set.kill(&l1.l1_key());
        self.propagation.shift_remove(&l1.l1_key());
    }

    // ------------------------------------------------------------------
    // Snapshots, merge bookkeeping
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> GotoState {
        GotoState {
            guard: self.guard.clone(),
            level2: self.level2.clone(),
            propagation: self.propagation.clone(),
            value_set: self.value_set.clone(),
            loop_iterations: self.loop_iterations.clone(),
            atomic_section_count: self.atomic_section_count,
            depth: self.depth,
            reachable: self.reachable,
        }
    }

    pub fn restore(&mut self, snapshot: GotoState) {
        self.guard = snapshot.guard;
        self.level2 = snapshot.level2;
        self.propagation = snapshot.propagation;
        self.value_set = snapshot.value_set;
        self.loop_iterations = snapshot.loop_iterations;
        self.atomic_section_count = snapshot.atomic_section_count;
        self.depth = snapshot.depth;
        self.reachable = snapshot.reachable;
    }

    /// Stash a merge contributor for the given target pc.
    pub fn stash_goto_state(&mut self, target: Pc, contributor: GotoState) {
        self.goto_merge_map.entry(target).or_default().push(contributor);
    }

    pub fn take_goto_states(&mut self, target: &Pc) -> Vec<GotoState> {
        self.goto_merge_map.shift_remove(target).unwrap_or_default()
    }

    pub fn has_goto_states(&self, target: &Pc) -> bool {
        self.goto_merge_map
            .get(target)
            .is_some_and(|v| !v.is_empty())
    }

    // ------------------------------------------------------------------
    // Loops
    // ------------------------------------------------------------------

    /// Hash of the call-stack context, so the same loop head in different
    /// (e.g. recursive) activations counts separately.
    pub fn call_stack_context(&self) -> u64 {
        let mut h = std::collections::hash_map::DefaultHasher::new();
        for frame in &self.call_stack {
            frame.function_identifier.hash(&mut h);
        }
        self.call_stack.len().hash(&mut h);
        h.finish()
    }

    /// Increment and return the back-edge count for a loop head.
    pub fn bump_loop_iteration(&mut self, loop_id: &str) -> usize {
        let key = format!("{loop_id}:{:x}", self.call_stack_context());
        let entry = self.loop_iterations.entry(key).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Frames of `function` currently on the active call stack.
    pub fn recursion_depth(&self, function: &str) -> usize {
        self.call_stack
            .iter()
            .filter(|f| f.function_identifier == function)
            .count()
    }

    // ------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------

    /// Create a new program thread starting at `pc`, inheriting the current
    /// function context.
    pub fn add_thread(&mut self, pc: Pc) -> usize {
        self.threads.push(ThreadState {
            pc,
            call_stack: self.call_stack.clone(),
            level1: self.level1.clone(),
            terminated: false,
        });
        self.threads.len() - 1
    }

    /// Park the active thread and activate another.
    pub fn switch_thread(&mut self, id: usize) -> Result<(), SymexError> {
        if id >= self.threads.len() {
            return Err(SymexError::invariant(format!(
                "thread {id} does not exist"
            )));
        }
        self.threads[self.active_thread] = ThreadState {
            pc: self.pc.clone(),
            call_stack: std::mem::take(&mut self.call_stack),
            level1: std::mem::take(&mut self.level1),
            terminated: self.threads[self.active_thread].terminated,
        };
        let incoming = self.threads[id].clone();
        self.pc = incoming.pc;
        self.call_stack = incoming.call_stack;
        self.level1 = incoming.level1;
        self.active_thread = id;
        Ok(())
    }

    /// Index of the next thread with work remaining, if any.
    pub fn next_runnable_thread(&self) -> Option<usize> {
        self.threads
            .iter()
            .enumerate()
            .filter(|(i, t)| *i != self.active_thread && !t.terminated)
            .map(|(i, _)| i)
            .next()
    }

    pub fn mark_thread_terminated(&mut self) {
        let active = self.active_thread;
        self.threads[active].terminated = true;
    }

    pub fn active_thread_terminated(&self) -> bool {
        self.threads[self.active_thread].terminated
    }

    pub fn multi_threaded(&self) -> bool {
        self.threads.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loris_ir::Type;

    fn state() -> ExecState {
        ExecState::new(Pc::new("main", 0), 3)
    }

    #[test]
    fn assignment_records_allocated_versions() {
        let mut s = state();
        let l1 = SymbolId::new("x").with_thread(0).with_frame(0);
        let first = s.assignment(&l1, &Type::signed_int(), 1).unwrap();
        let second = s.assignment(&l1, &Type::signed_int(), 2).unwrap();
        assert_eq!(first.version, Some(1));
        assert_eq!(second.version, Some(2));
        assert_eq!(s.level2.current_version("x!0@0"), 2);
    }

    #[test]
    fn validation_checks_catch_version_regression() {
        let mut s = state();
        s.run_validation_checks = true;
        let l1 = SymbolId::new("x").with_thread(0).with_frame(0);
        assert!(s.assignment(&l1, &Type::signed_int(), 1).is_ok());
        assert!(s.assignment(&l1, &Type::signed_int(), 1).is_err());
        // Regressing the map behind the state's back must be caught.
        assert!(s.level2.check_monotonic("x!0@0", 1).is_err());
    }

    #[test]
    fn declare_assigns_fresh_frames() {
        let mut s = state();
        let a = s.declare(&SymbolId::new("x"));
        let b = s.declare(&SymbolId::new("x"));
        assert_ne!(a.frame, b.frame);
        assert_eq!(s.level1.frame_of("x!0"), b.frame.unwrap());
        assert!(s.call_stack[0].locals.contains(&b));
    }

    #[test]
    fn kill_removes_renaming_and_propagation() {
        let mut s = state();
        let l1 = s.declare(&SymbolId::new("x"));
        s.propagate(&l1.l1_key(), Some(Expr::int(1, Type::signed_int())));
        s.kill(&l1);
        assert!(!s.level1.contains(&l1.l0_key()));
        assert!(s.propagation.is_empty());
    }

    #[test]
    fn loop_iterations_distinguish_call_contexts() {
        let mut s = state();
        assert_eq!(s.bump_loop_iteration("main.2"), 1);
        assert_eq!(s.bump_loop_iteration("main.2"), 2);
        s.call_stack.push(Frame::new(
            "fun",
            Pc::new("main", 5),
            9,
            Level1Map::new(),
        ));
        assert_eq!(s.bump_loop_iteration("main.2"), 1);
    }

    #[test]
    fn switch_thread_swaps_context() {
        let mut s = state();
        let tid = s.add_thread(Pc::new("main", 7));
        let old_pc = s.pc.clone();
        s.switch_thread(tid).unwrap();
        assert_eq!(s.pc, Pc::new("main", 7));
        assert_eq!(s.active_thread, tid);
        s.switch_thread(0).unwrap();
        assert_eq!(s.pc, old_pc);
    }

    #[test]
    fn switch_to_missing_thread_is_an_invariant_violation() {
        let mut s = state();
        assert!(s.switch_thread(5).is_err());
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let mut s = state();
        s.guard.add(Expr::symbol_name("c", Type::Bool));
        s.depth = 17;
        let snap = s.snapshot();
        s.guard.add(Expr::symbol_name("d", Type::Bool));
        s.depth = 99;
        s.restore(snap);
        assert_eq!(s.guard.conjuncts().len(), 1);
        assert_eq!(s.depth, 17);
    }

    #[test]
    fn recursion_depth_counts_matching_frames() {
        let mut s = state();
        assert_eq!(s.recursion_depth("fun"), 0);
        s.call_stack
            .push(Frame::new("fun", Pc::new("main", 1), 4, Level1Map::new()));
        s.call_stack
            .push(Frame::new("fun", Pc::new("fun", 2), 4, Level1Map::new()));
        assert_eq!(s.recursion_depth("fun"), 2);
    }
}
