//! Thread spawning, shared-access interleaving markers, and atomic
//! sections.

mod common;
use common::*;

use loris_ir::{Symbol, SymbolTable};
use loris_symex::{SsaStep, SymexConfig};

fn shared_x() -> SymbolTable {
    let mut table = SymbolTable::new();
    table
        .insert(Symbol::new("x", int()).static_lifetime())
        .unwrap();
    table
}

/// Main writes x = 2 while a spawned thread writes x = 1.
///
/// ```text
/// 0: START_THREAD 3
/// 1: x := 2
/// 2: GOTO 5
/// 3: x := 1        <- thread body
/// 4: END_THREAD
/// 5: END_FUNCTION
/// ```
fn spawn_program() -> ProgramBuilder {
    ProgramBuilder::function("main")
        .start_thread(3)
        .assign(sym("x"), n(2))
        .goto(5)
        .assign(sym("x"), n(1))
        .end_thread()
}

#[test]
fn spawn_emits_marker_and_both_threads_write_x() {
    let functions = functions_of(vec![spawn_program().build()]);
    let equation = run(&functions, &shared_x(), SymexConfig::default());

    let spawns = equation
        .iter()
        .filter(|s| matches!(s, SsaStep::Spawn { .. }))
        .count();
    assert_eq!(spawns, 1);

    // Two distinct SSA versions of the shared x, one per thread.
    assert_eq!(versions_of(&equation, "x").len(), 2);
    let threads: Vec<Option<usize>> = assignments_to(&equation, "x")
        .iter()
        .filter_map(|s| match s {
            SsaStep::Assignment { lhs, .. } => lhs.as_symbol().map(|l| l.thread),
            _ => None,
        })
        .collect();
    // Shared objects are pinned to thread 0 in their renaming.
    assert!(threads.iter().all(|t| *t == Some(0)));
}

#[test]
fn shared_writes_get_interleaving_markers() {
    let functions = functions_of(vec![spawn_program().build()]);
    let equation = run(&functions, &shared_x(), SymexConfig::default());

    let shared_writes = equation
        .iter()
        .filter(|s| matches!(s, SsaStep::SharedWrite { .. }))
        .count();
    assert_eq!(shared_writes, 2);
}

#[test]
fn single_threaded_runs_have_no_interleaving_markers() {
    let main = ProgramBuilder::function("main")
        .assign(sym("x"), n(2))
        .build();
    let functions = functions_of(vec![main]);
    let equation = run(&functions, &shared_x(), SymexConfig::default());
    assert!(!equation
        .iter()
        .any(|s| matches!(s, SsaStep::SharedWrite { .. } | SsaStep::SharedRead { .. })));
}

#[test]
fn atomic_sections_suppress_markers_between_delimiters() {
    use loris_ir::InstructionKind;
    // Same shape as spawn_program, but main's write is atomic.
    let main = ProgramBuilder::function("main")
        .start_thread(5)
        .raw(InstructionKind::AtomicBegin)
        .assign(sym("x"), n(2))
        .raw(InstructionKind::AtomicEnd)
        .goto(7)
        .assign(sym("x"), n(1))
        .end_thread()
        .build();
    let functions = functions_of(vec![main]);
    let equation = run(&functions, &shared_x(), SymexConfig::default());

    // Only the spawned thread's write is an interleaving point.
    let shared_writes = equation
        .iter()
        .filter(|s| matches!(s, SsaStep::SharedWrite { .. }))
        .count();
    assert_eq!(shared_writes, 1);

    let begins = equation
        .iter()
        .filter(|s| matches!(s, SsaStep::AtomicBegin { .. }))
        .count();
    let ends = equation
        .iter()
        .filter(|s| matches!(s, SsaStep::AtomicEnd { .. }))
        .count();
    assert_eq!((begins, ends), (1, 1));
}

#[test]
fn shared_reads_are_marked_too() {
    let main = ProgramBuilder::function("main")
        .start_thread(3)
        .assume(sym("x").gt(n(0)))
        .goto(5)
        .assign(sym("x"), n(1))
        .end_thread()
        .build();
    let functions = functions_of(vec![main]);
    let equation = run(&functions, &shared_x(), SymexConfig::default());

    assert!(equation
        .iter()
        .any(|s| matches!(s, SsaStep::SharedRead { .. })));
}
