//! Joining divergent states at control-flow merge points.
//!
//! Contributors arrive one at a time (the executor folds the per-pc merge
//! bucket), so an n-way join is a chain of two-way merges; the resulting phi
//! right-hand sides form exactly the nested if-then-else ladder with the
//! pre-branch version as the final tail.

use indexmap::IndexMap;

use loris_ir::{simplify, Expr};

use crate::equation::{AssignmentKind, Equation, SsaStep};
use crate::error::SymexError;
use crate::guard::Guard;
use crate::renaming::VersionCounter;
use crate::state::{ExecState, GotoState};

/// Merge one stashed contributor into the running state.
pub fn merge_goto(
    contributor: GotoState,
    state: &mut ExecState,
    equation: &mut Equation,
    versions: &mut VersionCounter,
) -> Result<(), SymexError> {
    if !contributor.reachable || contributor.guard.is_false() {
        return Ok(());
    }
    if !state.reachable || state.guard.is_false() {
        state.restore(contributor);
        return Ok(());
    }

    let merged_guard = Guard::disjoin(&state.guard, &contributor.guard);
    phi_function(&contributor, &merged_guard, state, equation, versions)?;
    merge_value_sets(&contributor, state);
    merge_constant_propagation(&contributor, state);
    merge_loop_iterations(&contributor, state);

    state.depth = state.depth.max(contributor.depth);
    state.atomic_section_count = state
        .atomic_section_count
        .max(contributor.atomic_section_count);
    state.guard = merged_guard;
    state.reachable = !state.guard.is_false();
    Ok(())
}

/// Emit a phi assignment for every level-1 name whose SSA version diverged
/// between the contributor and the running state.
fn phi_function(
    contributor: &GotoState,
    merged_guard: &Guard,
    state: &mut ExecState,
    equation: &mut Equation,
    versions: &mut VersionCounter,
) -> Result<(), SymexError> {
    let diverging = state.level2.diverging_entries(&contributor.level2);
    if diverging.is_empty() {
        return Ok(());
    }

    // The selection condition: what distinguishes the contributor's path
    // from the fall-through, beyond their shared guard prefix.
    let selection = contributor.guard.tail_expr(&state.guard);

    // Values must be read against the pre-merge maps.
    let dest_level2 = state.level2.clone();
    let dest_propagation = state.propagation.clone();
    state.level2.merge_max(&contributor.level2);

    for entry in diverging {
        let key = entry.id.l1_key();
        let contributor_value = value_of(
            &key,
            &entry.id,
            &entry.ty,
            contributor.level2.current_version(&key),
            &contributor.propagation,
        );
        let dest_value = value_of(
            &key,
            &entry.id,
            &entry.ty,
            dest_level2.current_version(&key),
            &dest_propagation,
        );
        let rhs = if selection.is_true() {
            contributor_value
        } else {
            simplify(Expr::ite(
                selection.clone(),
                contributor_value,
                dest_value,
            ))
        };
        let version = versions.next(&key);
        let lhs_id = state.assignment(&entry.id, &entry.ty, version)?;
        let lhs = Expr::symbol(lhs_id, entry.ty.clone());
        equation.append(SsaStep::Assignment {
            guard: merged_guard.as_expr(),
            original_lhs: Expr::symbol(entry.id.clone(), entry.ty.clone()),
            lhs,
            rhs,
            kind: AssignmentKind::Phi,
            source: state.source.clone(),
        });
    }
    Ok(())
}

fn value_of(
    key: &str,
    id: &loris_ir::SymbolId,
    ty: &loris_ir::Type,
    version: usize,
    propagation: &IndexMap<String, Expr>,
) -> Expr {
    if let Some(constant) = propagation.get(key) {
        return constant.clone();
    }
    Expr::symbol(id.clone().with_version(version), ty.clone())
}

fn merge_value_sets(contributor: &GotoState, state: &mut ExecState) {
    state.value_set.merge(&contributor.value_set);
}

/// A constant binding survives the merge only when both sides agree on it.
fn merge_constant_propagation(contributor: &GotoState, state: &mut ExecState) {
    state
        .propagation
        .retain(|key, value| contributor.propagation.get(key) == Some(value));
}

fn merge_loop_iterations(contributor: &GotoState, state: &mut ExecState) {
    for (key, count) in &contributor.loop_iterations {
        let entry = state.loop_iterations.entry(key.clone()).or_insert(0);
        if *count > *entry {
            *entry = *count;
        }
    }
}
