//! Straight-line programs: SSA versioning, constant propagation, guards,
//! and determinism.

mod common;
use common::*;

use loris_ir::{Expr, SymbolTable};
use loris_symex::{SsaStep, SymexConfig};

fn no_globals() -> SymbolTable {
    SymbolTable::new()
}

#[test]
fn single_assignment_emits_one_guarded_step() {
    let main = ProgramBuilder::function("main")
        .decl(sym("x"))
        .assign(sym("x"), n(5))
        .build();
    let functions = functions_of(vec![main]);
    let equation = run(&functions, &no_globals(), SymexConfig::default());

    let writes = assignments_to(&equation, "x");
    assert_eq!(writes.len(), 1);
    let SsaStep::Assignment { lhs, rhs, guard, .. } = writes[0] else {
        unreachable!()
    };
    let lhs_id = lhs.as_symbol().unwrap();
    assert!(lhs_id.is_l2_renamed());
    assert_eq!(lhs_id.version, Some(1));
    assert_eq!(*rhs, n(5));
    assert!(guard.is_true());
}

#[test]
fn constant_propagation_folds_chained_arithmetic() {
    let main = ProgramBuilder::function("main")
        .decl(sym("x"))
        .decl(sym("y"))
        .assign(sym("x"), n(5))
        .assign(sym("y"), sym("x").add(n(1)))
        .build();
    let functions = functions_of(vec![main]);
    let equation = run(&functions, &no_globals(), SymexConfig::default());

    let writes = assignments_to(&equation, "y");
    let SsaStep::Assignment { rhs, .. } = writes[0] else {
        unreachable!()
    };
    assert_eq!(*rhs, n(6));
}

#[test]
fn versions_increase_monotonically_along_the_path() {
    let main = ProgramBuilder::function("main")
        .decl(sym("x"))
        .assign(sym("x"), n(1))
        .assign(sym("x"), sym("x").add(n(1)))
        .assign(sym("x"), sym("x").add(n(1)))
        .build();
    let functions = functions_of(vec![main]);
    let equation = run(&functions, &no_globals(), SymexConfig::default());

    assert_eq!(versions_of(&equation, "x"), vec![1, 2, 3]);
}

#[test]
fn trivially_true_assertion_is_counted_but_not_emitted() {
    let main = ProgramBuilder::function("main")
        .decl(sym("x"))
        .assign(sym("x"), n(1))
        .assign(sym("x"), sym("x").add(n(1)))
        .assert(sym("x").eq_expr(n(2)), "x is two")
        .build();
    let functions = functions_of(vec![main]);
    let (equation, total, remaining) =
        run_counting_vccs(&functions, &no_globals(), SymexConfig::default());

    assert_eq!(total, 1);
    assert_eq!(remaining, 0);
    assert!(asserts(&equation).is_empty());
}

#[test]
fn without_constant_propagation_the_assertion_materializes() {
    let config = SymexConfig {
        constant_propagation: false,
        ..SymexConfig::default()
    };
    let main = ProgramBuilder::function("main")
        .decl(sym("x"))
        .assign(sym("x"), n(1))
        .assign(sym("x"), sym("x").add(n(1)))
        .assert(sym("x").eq_expr(n(2)), "x is two")
        .build();
    let functions = functions_of(vec![main]);
    let (equation, total, remaining) = run_counting_vccs(&functions, &no_globals(), config);

    assert_eq!(total, 1);
    assert_eq!(remaining, 1);
    let steps = asserts(&equation);
    assert_eq!(steps.len(), 1);
    let SsaStep::Assert { cond, msg, .. } = steps[0] else {
        unreachable!()
    };
    assert_eq!(msg, "x is two");
    // The condition reads the latest SSA version of x.
    let reads: Vec<usize> = cond
        .free_symbols()
        .iter()
        .filter(|s| s.name == "x")
        .filter_map(|s| s.version)
        .collect();
    assert_eq!(reads, vec![2]);
}

#[test]
fn assume_conjoins_the_guard_for_later_steps() {
    let main = ProgramBuilder::function("main")
        .decl(sym("x"))
        .decl(sym("y"))
        .assume(sym("x").gt(n(0)))
        .assign(sym("y"), n(1))
        .build();
    let functions = functions_of(vec![main]);
    let equation = run(&functions, &no_globals(), SymexConfig::default());

    let assume = equation
        .iter()
        .find(|s| matches!(s, SsaStep::Assume { .. }))
        .expect("assume step");
    let SsaStep::Assume { cond, guard, .. } = assume else {
        unreachable!()
    };
    assert!(guard.is_true());
    // Steps after the assume carry it as their guard.
    let writes = assignments_to(&equation, "y");
    let SsaStep::Assignment { guard: write_guard, .. } = writes[0] else {
        unreachable!()
    };
    assert_eq!(write_guard, cond);
}

#[test]
fn assume_false_makes_the_rest_of_the_path_unreachable() {
    let main = ProgramBuilder::function("main")
        .decl(sym("x"))
        .assume(Expr::falsity())
        .assign(sym("x"), n(1))
        .assert(Expr::falsity(), "never reached")
        .build();
    let functions = functions_of(vec![main]);
    let (equation, total, _remaining) =
        run_counting_vccs(&functions, &no_globals(), SymexConfig::default());

    // The dead tail emits nothing, not even the assertion.
    assert!(assignments_to(&equation, "x").is_empty());
    assert_eq!(total, 0);
}

#[test]
fn equations_serialize_for_diagnostic_dumps() {
    let main = ProgramBuilder::function("main")
        .decl(sym("x"))
        .assign(sym("x"), n(5))
        .build();
    let functions = functions_of(vec![main]);
    let equation = run(&functions, &no_globals(), SymexConfig::default());
    let dump = serde_json::to_string(&equation).expect("equation serializes");
    assert!(dump.contains("Assignment"));
    assert!(dump.contains("\"version\":1"));
}

#[test]
fn execution_is_deterministic() {
    let build = || {
        let main = ProgramBuilder::function("main")
            .decl(sym("x"))
            .decl(sym("y"))
            .assign(sym("x"), Expr::nondet(int()))
            .assign(sym("y"), sym("x").add(n(1)))
            .assert(sym("y").gt(sym("x")), "increment grows")
            .build();
        functions_of(vec![main])
    };
    let first = run(&build(), &no_globals(), SymexConfig::default());
    let second = run(&build(), &no_globals(), SymexConfig::default());
    assert_eq!(first, second);
}

#[test]
fn max_depth_one_truncates_with_an_assume() {
    let config = SymexConfig {
        max_depth: 2,
        ..SymexConfig::default()
    };
    let main = ProgramBuilder::function("main")
        .decl(sym("x"))
        .assign(sym("x"), n(1))
        .assign(sym("x"), n(2))
        .assign(sym("x"), n(3))
        .build();
    let functions = functions_of(vec![main]);
    let equation = run(&functions, &no_globals(), config);

    // Only the work before the bound lands in the equation, plus the
    // truncating assumption.
    assert_eq!(versions_of(&equation, "x"), vec![1]);
    let truncation = equation.iter().any(
        |s| matches!(s, SsaStep::Assume { cond, .. } if cond.is_false()),
    );
    assert!(truncation);
}

#[test]
fn silent_truncation_omits_the_assume() {
    let config = SymexConfig {
        max_depth: 2,
        silent_depth_truncation: true,
        ..SymexConfig::default()
    };
    let main = ProgramBuilder::function("main")
        .decl(sym("x"))
        .assign(sym("x"), n(1))
        .assign(sym("x"), n(2))
        .build();
    let functions = functions_of(vec![main]);
    let equation = run(&functions, &no_globals(), config);
    assert!(!equation
        .iter()
        .any(|s| matches!(s, SsaStep::Assume { cond, .. } if cond.is_false())));
}
