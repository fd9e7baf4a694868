//! Loop unwinding under the three bound policies.

mod common;
use common::*;

use loris_ir::SymbolTable;
use loris_symex::{AssignmentKind, SsaStep, SymexConfig, UnwindLimits};

/// `i = 0; while (i < n) i++;` in GOTO form.
///
/// ```text
/// 0: DECL i
/// 1: DECL n
/// 2: i := 0
/// 3: IF !(i < n) GOTO 7     <- loop head
/// 4: i := i + 1
/// 5: GOTO 3                 <- back-edge
/// 6: SKIP
/// 7: SKIP                   <- loop exit merge
/// 8: END_FUNCTION
/// ```
fn counting_loop() -> ProgramBuilder {
    ProgramBuilder::function("main")
        .decl(sym("i"))
        .decl(sym("n"))
        .assign(sym("i"), n(0))
        .goto_if(sym("i").lt(sym("n")).not(), 7)
        .assign(sym("i"), sym("i").add(n(1)))
        .goto(3)
        .skip()
        .skip()
}

fn with_loop_bound(bound: usize, unwinding_assertions: bool, partial_loops: bool) -> SymexConfig {
    let mut unwind = UnwindLimits::default();
    unwind.set_loop_bound("main", 3, bound);
    SymexConfig {
        unwind,
        unwinding_assertions,
        partial_loops,
        ..SymexConfig::default()
    }
}

#[test]
fn unwind_two_with_assertions_emits_two_iterations_and_one_unwind_assert() {
    let functions = functions_of(vec![counting_loop().build()]);
    let equation = run(
        &functions,
        &SymbolTable::new(),
        with_loop_bound(2, true, false),
    );

    // i := 0, then one increment per body entry: the initial entry plus the
    // two taken back-edges.
    let state_writes = assignments_to(&equation, "i")
        .into_iter()
        .filter(|s| matches!(s, SsaStep::Assignment { kind: AssignmentKind::State, .. }))
        .count();
    assert_eq!(state_writes, 4);

    let unwind_asserts: Vec<_> = asserts(&equation)
        .into_iter()
        .filter(|s| matches!(s, SsaStep::Assert { msg, .. } if msg.contains("unwinding assertion")))
        .collect();
    assert_eq!(unwind_asserts.len(), 1);

    // The loop exit still merges: at least one phi for i.
    assert!(equation.iter().any(|s| matches!(
        s,
        SsaStep::Assignment { kind: AssignmentKind::Phi, lhs, .. }
            if lhs.as_symbol().map(|l| l.name.as_str()) == Some("i")
    )));
}

#[test]
fn unwind_zero_takes_no_back_edge() {
    let functions = functions_of(vec![counting_loop().build()]);
    let equation = run(
        &functions,
        &SymbolTable::new(),
        with_loop_bound(0, false, false),
    );

    // Only the initialization writes i; the body may run at most once
    // before the back-edge, which is never taken.
    let increments = assignments_to(&equation, "i")
        .into_iter()
        .filter(|s| matches!(s, SsaStep::Assignment { kind: AssignmentKind::State, .. }))
        .count();
    assert!(increments <= 2, "found {increments} state writes to i");

    // Sound truncation: the back-edge turns into an assumption.
    assert!(equation
        .iter()
        .any(|s| matches!(s, SsaStep::Assume { .. })));
}

#[test]
fn partial_loops_neither_asserts_nor_assumes_at_the_bound() {
    let functions = functions_of(vec![counting_loop().build()]);
    let equation = run(
        &functions,
        &SymbolTable::new(),
        with_loop_bound(1, false, true),
    );

    assert!(asserts(&equation)
        .iter()
        .all(|s| !matches!(s, SsaStep::Assert { msg, .. } if msg.contains("unwinding"))));
    // No truncating assumption of the back-edge either.
    assert!(!equation
        .iter()
        .any(|s| matches!(s, SsaStep::Assume { cond, .. } if cond.is_false())));
}

#[test]
fn self_loop_becomes_an_exit_assumption() {
    // 0: DECL c   1: IF c GOTO 1 (self-loop)   2: SKIP
    let main = ProgramBuilder::function("main")
        .decl(bool_sym("c"))
        .goto_if(bool_sym("c"), 1)
        .skip()
        .build();
    let functions = functions_of(vec![main]);
    let config = SymexConfig {
        self_loops_to_assumptions: true,
        ..SymexConfig::default()
    };
    let equation = run(&functions, &SymbolTable::new(), config);

    // One assumption of the negated condition, no unwinding at all.
    let assumes: Vec<_> = equation
        .iter()
        .filter(|s| matches!(s, SsaStep::Assume { .. }))
        .collect();
    assert_eq!(assumes.len(), 1);
}

#[test]
fn bounded_loop_with_constant_trip_count_folds_completely() {
    // i = 0; while (i < 3) i++;  with a generous bound: the condition is
    // concrete on every iteration, so no phi and no assertion remain.
    let functions = functions_of(vec![ProgramBuilder::function("main")
        .decl(sym("i"))
        .assign(sym("i"), n(0))
        .goto_if(sym("i").lt(n(3)).not(), 6)
        .assign(sym("i"), sym("i").add(n(1)))
        .goto(2)
        .skip()
        .skip()
        .build()]);
    let config = SymexConfig {
        unwind: UnwindLimits::with_global(10),
        ..SymexConfig::default()
    };
    let (equation, _total, remaining) =
        run_counting_vccs(&functions, &SymbolTable::new(), config);

    assert_eq!(remaining, 0);
    // i := 0, 1, 2, 3, all constant-folded.
    let values: Vec<i64> = assignments_to(&equation, "i")
        .iter()
        .filter_map(|s| match s {
            SsaStep::Assignment { rhs, .. } => {
                rhs.as_int_constant().and_then(|v| i64::try_from(v).ok())
            }
            _ => None,
        })
        .collect();
    assert_eq!(values, vec![0, 1, 2, 3]);
}
