//! Forward branches: guarded fork, merge-point phi selection, and
//! condition-driven refinement of the successor states.

mod common;
use common::*;

use loris_ir::{Expr, ExprKind, SymbolTable, Type};
use loris_symex::{AssignmentKind, SsaStep, SymexConfig};

/// `if (c) y = 1; else y = 2;` in GOTO form.
///
/// ```text
/// 0: DECL c
/// 1: DECL y
/// 2: IF c GOTO 5
/// 3: y := 2
/// 4: GOTO 6
/// 5: y := 1
/// 6: SKIP            <- merge point
/// 7: END_FUNCTION
/// ```
fn if_else() -> ProgramBuilder {
    ProgramBuilder::function("main")
        .decl(bool_sym("c"))
        .decl(sym("y"))
        .goto_if(bool_sym("c"), 5)
        .assign(sym("y"), n(2))
        .goto(6)
        .assign(sym("y"), n(1))
        .skip()
}

#[test]
fn merge_emits_a_phi_over_both_arms() {
    let functions = functions_of(vec![if_else().build()]);
    let equation = run(&functions, &SymbolTable::new(), SymexConfig::default());

    let phi: Vec<_> = equation
        .iter()
        .filter(|s| matches!(s, SsaStep::Assignment { kind: AssignmentKind::Phi, .. }))
        .collect();
    assert_eq!(phi.len(), 1);
    let SsaStep::Assignment { lhs, rhs, guard, .. } = phi[0] else {
        unreachable!()
    };
    // Both arms already wrote y; the phi is a third, fresh version.
    let lhs_id = lhs.as_symbol().unwrap();
    assert_eq!(lhs_id.name, "y");
    assert_eq!(lhs_id.version, Some(3));
    // The guards of the two arms are exhaustive here, so the merged guard
    // collapses to true.
    assert!(guard.is_true());
    // The phi selects between the two written versions.
    let ExprKind::IfThenElse {
        then_case,
        else_case,
        ..
    } = rhs.kind()
    else {
        panic!("phi right-hand side should be a selection, got {rhs}");
    };
    let then_version = then_case.as_symbol().and_then(|s| s.version);
    let else_version = else_case.as_symbol().and_then(|s| s.version);
    let mut versions = [then_version, else_version];
    versions.sort();
    assert_eq!(versions, [Some(1), Some(2)]);
}

#[test]
fn arm_assignments_carry_their_branch_guards() {
    let functions = functions_of(vec![if_else().build()]);
    let equation = run(&functions, &SymbolTable::new(), SymexConfig::default());

    let state_writes: Vec<_> = assignments_to(&equation, "y")
        .into_iter()
        .filter(|s| matches!(s, SsaStep::Assignment { kind: AssignmentKind::State, .. }))
        .collect();
    assert_eq!(state_writes.len(), 2);
    for step in state_writes {
        let SsaStep::Assignment { guard, .. } = step else {
            unreachable!()
        };
        // Each arm is guarded by the branch condition or its negation.
        assert!(!guard.is_true(), "arm guard must not be trivial");
        let mentions_c = guard.free_symbols().iter().any(|s| s.name == "c");
        assert!(mentions_c, "arm guard should mention the condition");
    }
}

#[test]
fn phi_result_is_one_of_the_two_constants() {
    // The phi's selection collapses when the condition is known.
    let main = ProgramBuilder::function("main")
        .decl(bool_sym("c"))
        .decl(sym("y"))
        .assume(bool_sym("c"))
        .goto_if(bool_sym("c"), 6)
        .assign(sym("y"), n(2))
        .goto(7)
        .assign(sym("y"), n(1))
        .skip()
        .assert(sym("y").eq_expr(n(1)), "taken arm wins")
        .build();
    let functions = functions_of(vec![main]);
    let equation = run(&functions, &SymbolTable::new(), SymexConfig::default());
    equation.validate().unwrap();
    // The untaken arm's write still appears (under an unsatisfiable guard),
    // but the assertion's condition is about the phi version.
    let steps = asserts(&equation);
    assert_eq!(steps.len(), 1);
}

#[test]
fn equality_branch_propagates_the_constant_into_the_taken_arm() {
    // if (x == 4) y = x; else y = 0;   =>  taken arm folds y := 4.
    let main = ProgramBuilder::function("main")
        .decl(sym("x"))
        .decl(sym("y"))
        .goto_if(sym("x").eq_expr(n(4)), 5)
        .assign(sym("y"), n(0))
        .goto(6)
        .assign(sym("y"), sym("x"))
        .skip()
        .build();
    let functions = functions_of(vec![main]);
    let equation = run(&functions, &SymbolTable::new(), SymexConfig::default());

    let writes = assignments_to(&equation, "y");
    let folded = writes.iter().any(|s| {
        matches!(s, SsaStep::Assignment { kind: AssignmentKind::State, rhs, .. } if *rhs == n(4))
    });
    assert!(
        folded,
        "taken arm should fold y := x to y := 4 via condition propagation"
    );
}

#[test]
fn nested_branches_merge_in_program_order() {
    // if (a) { if (b) y = 1; else y = 2; } else y = 3;
    let main = ProgramBuilder::function("main")
        .decl(bool_sym("a"))
        .decl(bool_sym("b"))
        .decl(sym("y"))
        .goto_if(bool_sym("a"), 6)
        .assign(sym("y"), n(3))
        .goto(10)
        .goto_if(bool_sym("b"), 9)
        .assign(sym("y"), n(2))
        .goto(10)
        .assign(sym("y"), n(1))
        .skip()
        .build();
    let functions = functions_of(vec![main]);
    let equation = run(&functions, &SymbolTable::new(), SymexConfig::default());
    equation.validate().unwrap();

    let phi_count = equation
        .iter()
        .filter(|s| matches!(s, SsaStep::Assignment { kind: AssignmentKind::Phi, .. }))
        .count();
    // Three contributors fold into the join at 10: two pairwise merges.
    assert_eq!(phi_count, 2);
    assert_eq!(assignments_to(&equation, "y").len(), 3 + phi_count);
}

#[test]
fn pointer_equality_branch_filters_value_sets() {
    // p = c ? &a : &b; if (p == &a) *p = 7;
    let a = sym("a");
    let b = sym("b");
    let p = Expr::symbol_name("p", Type::pointer_to(int()));
    let main = ProgramBuilder::function("main")
        .decl(a.clone())
        .decl(b.clone())
        .decl(bool_sym("c"))
        .decl(p.clone())
        .assign(
            p.clone(),
            Expr::ite(bool_sym("c"), a.clone().address_of(), b.clone().address_of()),
        )
        .goto_if(p.clone().eq_expr(a.clone().address_of()), 7)
        .goto(8)
        .assign(p.clone().deref(), n(7))
        .skip()
        .build();
    let functions = functions_of(vec![main]);
    let equation = run(&functions, &SymbolTable::new(), SymexConfig::default());
    equation.validate().unwrap();

    // In the taken arm the value set is sharpened to {a}, so the store
    // writes a directly, with no selection over b.
    let writes_a = assignments_to(&equation, "a");
    assert!(!writes_a.is_empty(), "a should be written through *p");
    assert!(assignments_to(&equation, "b")
        .iter()
        .all(|s| !matches!(s, SsaStep::Assignment { kind: AssignmentKind::State, .. })));
}
