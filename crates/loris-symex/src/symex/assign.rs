//! Assignment execution: left-hand-side decomposition, SSA version bumping,
//! allocation, and constant propagation of string builtins.

use num::BigInt;
use sha2::{Digest, Sha256};
use tracing::debug;

use loris_ir::{simplify, Expr, ExprKind, SideEffect, Symbol, SymbolId, Type};

use crate::equation::{AssignmentKind, Equation, SsaStep};
use crate::error::SymexError;
use crate::renaming::Level;
use crate::state::ExecState;
use crate::symex::Executor;

/// String builtins eligible for constant folding.
const STRING_CONCAT: &str = "string_concat";
const STRING_SUBSTRING: &str = "string_substring";
const STRING_EMPTY: &str = "string_empty";

impl Executor<'_> {
    pub(crate) fn symex_assign(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        lhs: Expr,
        rhs: Expr,
    ) -> Result<(), SymexError> {
        match rhs.kind() {
            ExprKind::SideEffect(SideEffect::Allocate { .. }) => {
                return self.symex_allocate(state, equation, lhs, rhs.clone());
            }
            ExprKind::SideEffect(SideEffect::FunctionCall { .. }) => {
                return Err(SymexError::invariant(
                    "function-call side effect must be lowered to a FUNCTION_CALL instruction",
                ));
            }
            ExprKind::SideEffect(SideEffect::Throw { .. })
            | ExprKind::SideEffect(SideEffect::StatementExpr) => {
                return Err(SymexError::invariant(
                    "unexpected side effect on assignment right-hand side",
                ));
            }
            ExprKind::FunctionApp { function, .. } if is_string_builtin(function) => {
                if self.constant_propagate_assignment_with_side_effects(
                    state, equation, &lhs, &rhs,
                )? {
                    return Ok(());
                }
            }
            _ => {}
        }

        let rhs_l2 = self.clean_read(state, equation, rhs)?;
        let lhs_l1 = self.clean_write(state, equation, lhs.clone())?;
        self.emit_shared_reads(state, equation, &rhs_l2);
        self.assign_rec(
            state,
            equation,
            lhs,
            lhs_l1,
            rhs_l2,
            Expr::truth(),
            AssignmentKind::State,
        )
    }

    /// Decompose the cleaned left-hand side into its base components.
    ///
    /// Selector chains (index, member, byte-extract) turn into functional
    /// updates of the enclosing object; if-then-else ladders from pointer
    /// expansion fan out into guarded assignments of each candidate.
    pub(crate) fn assign_rec(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        original_lhs: Expr,
        lhs: Expr,
        rhs: Expr,
        extra_guard: Expr,
        kind: AssignmentKind,
    ) -> Result<(), SymexError> {
        match lhs.kind() {
            ExprKind::Symbol(id) => {
                let id = id.clone();
                let ty = lhs.ty().clone();
                self.assign_symbol(state, equation, original_lhs, id, ty, rhs, extra_guard, kind)
            }
            ExprKind::Index { array, index } => {
                let array = (**array).clone();
                let current = self.read_current(state, equation, array.clone())?;
                let index_l2 = self.clean_read(state, equation, (**index).clone())?;
                let new_rhs = current.update_index(index_l2, rhs);
                self.assign_rec(state, equation, original_lhs, array, new_rhs, extra_guard, kind)
            }
            ExprKind::Member {
                compound,
                component,
            } => {
                let compound = (**compound).clone();
                let component = component.clone();
                let current = self.read_current(state, equation, compound.clone())?;
                let new_rhs = current.update_member(component, rhs);
                self.assign_rec(
                    state, equation, original_lhs, compound, new_rhs, extra_guard, kind,
                )
            }
            ExprKind::ByteExtract { container, offset } => {
                let container = (**container).clone();
                let current = self.read_current(state, equation, container.clone())?;
                let offset_l2 = self.clean_read(state, equation, (**offset).clone())?;
                let new_rhs = current.update_byte(offset_l2, rhs);
                self.assign_rec(
                    state, equation, original_lhs, container, new_rhs, extra_guard, kind,
                )
            }
            ExprKind::IfThenElse {
                cond,
                then_case,
                else_case,
            } => {
                let cond = (**cond).clone();
                let (then_lhs, else_lhs) = ((**then_case).clone(), (**else_case).clone());
                let then_guard = simplify(extra_guard.clone().and(cond.clone()));
                let else_guard = simplify(extra_guard.and(cond.not()));
                self.assign_rec(
                    state,
                    equation,
                    original_lhs.clone(),
                    then_lhs,
                    rhs.clone(),
                    then_guard,
                    kind,
                )?;
                self.assign_rec(state, equation, original_lhs, else_lhs, rhs, else_guard, kind)
            }
            ExprKind::Cast { operand } => {
                let operand = (**operand).clone();
                let rhs = rhs.cast(operand.ty().clone());
                self.assign_rec(state, equation, original_lhs, operand, rhs, extra_guard, kind)
            }
            ExprKind::Nil => Err(SymexError::nil("assignment target")),
            _ => Err(SymexError::invariant(format!(
                "unsupported assignment target: {lhs}"
            ))),
        }
    }

    /// The level-2 value an object holds before this assignment.
    fn read_current(
        &mut self,
        state: &mut ExecState,
        _equation: &mut Equation,
        object_l1: Expr,
    ) -> Result<Expr, SymexError> {
        Ok(state.rename(
            object_l1,
            Level::L2,
            self.outer_symbol_table,
            self.config.constant_propagation,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assign_symbol(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        original_lhs: Expr,
        id: SymbolId,
        ty: Type,
        mut rhs: Expr,
        extra_guard: Expr,
        kind: AssignmentKind,
    ) -> Result<(), SymexError> {
        if extra_guard.is_false() {
            return Ok(());
        }
        if !extra_guard.is_true() {
            let current = Expr::symbol(
                id.clone()
                    .with_version(state.level2.current_version(&id.l1_key())),
                ty.clone(),
            );
            rhs = Expr::ite(extra_guard.clone(), rhs, current);
        }
        if self.config.simplify_opt {
            rhs = simplify(rhs);
        }

        let key = id.l1_key();
        if ty.is_pointer() {
            state.value_set.assign(key.clone(), &rhs);
        }
        if self.config.constant_propagation && extra_guard.is_true() && is_propagatable(&rhs) {
            state.propagate(&key, Some(rhs.clone()));
        } else {
            state.propagate(&key, None);
        }

        let version = self.fresh_l2_version(&id);
        let lhs_id = state.assignment(&id, &ty, version)?;
        let lhs = Expr::symbol(lhs_id, ty);
        self.emit_shared_write(state, equation, &lhs);
        equation.append(SsaStep::Assignment {
            guard: state.guard.as_expr(),
            lhs,
            rhs,
            original_lhs,
            kind,
            source: state.source.clone(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// `lhs := allocate(size)`: register a fresh dynamic object and point
    /// the left-hand side at it.
    pub(crate) fn symex_allocate(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        lhs: Expr,
        rhs: Expr,
    ) -> Result<(), SymexError> {
        let ExprKind::SideEffect(SideEffect::Allocate { size, zeroed }) = rhs.kind() else {
            return Err(SymexError::invariant("symex_allocate on non-allocate"));
        };
        let zeroed = *zeroed;
        let size_l2 = self.clean_read(state, equation, (**size).clone())?;

        let element = Type::UnsignedBv { width: 8 };
        let object_ty = match size_l2.as_int_constant().and_then(|n| usize::try_from(n).ok()) {
            Some(n) => Type::array_of(element.clone(), Some(n)),
            None => Type::array_of(element.clone(), None),
        };
        let name = state.fresh_name("symex_dynamic::dynamic_object");
        state
            .symbol_table
            .insert_or_replace(Symbol::new(&name, object_ty.clone()).static_lifetime());
        let object = Expr::symbol(
            SymbolId::new(&*name).with_thread(0).with_frame(0),
            object_ty.clone(),
        );

        if zeroed {
            if let Some(n) = object_ty_size(&object_ty) {
                let zeros =
                    Expr::array_literal(vec![Expr::int(0, element.clone()); n], element.clone());
                let object_id = SymbolId::new(name).with_thread(0).with_frame(0);
                let version = self.fresh_l2_version(&object_id);
                let object_l2 = state.assignment(&object_id, &object_ty, version)?;
                equation.append(SsaStep::Assignment {
                    guard: state.guard.as_expr(),
                    lhs: Expr::symbol(object_l2, object_ty.clone()),
                    rhs: zeros,
                    original_lhs: object.clone(),
                    kind: AssignmentKind::Hidden,
                    source: state.source.clone(),
                });
            }
        }

        let mut address = object.clone().index(Expr::int(0, Type::signed_int())).address_of();
        if address.ty() != lhs.ty() {
            address = address.cast(lhs.ty().clone());
        }
        let lhs_l1 = self.clean_write(state, equation, lhs.clone())?;
        self.assign_rec(
            state,
            equation,
            lhs,
            lhs_l1,
            address,
            Expr::truth(),
            AssignmentKind::State,
        )
    }

    // ------------------------------------------------------------------
    // String builtins
    // ------------------------------------------------------------------

    /// Attempt to constant-fold a string builtin whose inputs are known
    /// constant character arrays. Returns `true` when the assignment was
    /// fully handled here.
    pub(crate) fn constant_propagate_assignment_with_side_effects(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<bool, SymexError> {
        let ExprKind::FunctionApp {
            function,
            arguments,
        } = rhs.kind()
        else {
            return Ok(false);
        };
        let folded: Option<Vec<BigInt>> = match function.as_str() {
            STRING_EMPTY => Some(Vec::new()),
            STRING_CONCAT => {
                let mut chars = Vec::new();
                let mut ok = true;
                for argument in arguments {
                    match self.try_evaluate_constant_string(state, argument) {
                        Some(mut part) => chars.append(&mut part),
                        None => {
                            ok = false;
                            break;
                        }
                    }
                }
                ok.then_some(chars)
            }
            STRING_SUBSTRING => {
                let text = arguments
                    .first()
                    .and_then(|a| self.try_evaluate_constant_string(state, a));
                let start = arguments
                    .get(1)
                    .and_then(|a| self.try_evaluate_constant(state, a))
                    .and_then(|c| usize::try_from(&c).ok());
                let end = arguments
                    .get(2)
                    .and_then(|a| self.try_evaluate_constant(state, a))
                    .and_then(|c| usize::try_from(&c).ok());
                match (text, start, end) {
                    (Some(text), Some(start), Some(end)) if start <= end && end <= text.len() => {
                        Some(text[start..end].to_vec())
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        let Some(chars) = folded else {
            return Ok(false);
        };
        if !string_constant_target(lhs.ty()) {
            debug!(lhs = %lhs, "string builtin target has no length/data shape");
            return Ok(false);
        }
        self.assign_string_constant(state, equation, lhs, &chars)?;
        Ok(true)
    }

    /// Materialize a constant character array as a named data symbol and
    /// assign the length/data pair to the destination.
    fn assign_string_constant(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        lhs: &Expr,
        chars: &[BigInt],
    ) -> Result<(), SymexError> {
        let element = Type::UnsignedBv { width: 8 };
        let literal = Expr::array_literal(
            chars
                .iter()
                .map(|c| Expr::int(c.clone(), element.clone()))
                .collect(),
            element.clone(),
        );
        let data_name = string_data_symbol_name(chars);
        let data_ty = literal.ty().clone();
        if !state.symbol_table.contains(&data_name) {
            state.symbol_table.insert_or_replace(
                Symbol::new(&data_name, data_ty.clone())
                    .static_lifetime()
                    .with_value(literal.clone()),
            );
        }
        let data_symbol = SymbolId::new(data_name).with_thread(0).with_frame(0);
        let version = self.fresh_l2_version(&data_symbol);
        let data_l2 = state.assignment(&data_symbol, &data_ty, version)?;
        equation.append(SsaStep::Assignment {
            guard: state.guard.as_expr(),
            lhs: Expr::symbol(data_l2, data_ty.clone()),
            rhs: literal,
            original_lhs: Expr::symbol(data_symbol.clone(), data_ty.clone()),
            kind: AssignmentKind::Hidden,
            source: state.source.clone(),
        });

        let object = Expr::symbol(data_symbol, data_ty);
        let length = Expr::int(chars.len() as i64, Type::signed_int());
        match lhs.ty().clone() {
            Type::Struct { ref components, .. }
                if components.iter().any(|(n, _)| n == "length")
                    && components.iter().any(|(n, _)| n == "data") =>
            {
                let length_lhs = lhs.clone().member("length");
                let data_lhs = lhs.clone().member("data");
                let length_lhs_l1 = self.clean_write(state, equation, length_lhs.clone())?;
                self.assign_rec(
                    state,
                    equation,
                    length_lhs,
                    length_lhs_l1,
                    length,
                    Expr::truth(),
                    AssignmentKind::State,
                )?;
                let mut pointer = object.index(Expr::int(0, Type::signed_int())).address_of();
                if pointer.ty() != data_lhs.ty() {
                    pointer = pointer.cast(data_lhs.ty().clone());
                }
                let data_lhs_l1 = self.clean_write(state, equation, data_lhs.clone())?;
                self.assign_rec(
                    state,
                    equation,
                    data_lhs,
                    data_lhs_l1,
                    pointer,
                    Expr::truth(),
                    AssignmentKind::State,
                )
            }
            Type::Array { .. } => {
                let object_l2 = state.rename(
                    object,
                    Level::L2,
                    self.outer_symbol_table,
                    self.config.constant_propagation,
                );
                let lhs_l1 = self.clean_write(state, equation, lhs.clone())?;
                self.assign_rec(
                    state,
                    equation,
                    lhs.clone(),
                    lhs_l1,
                    object_l2,
                    Expr::truth(),
                    AssignmentKind::State,
                )
            }
            _ => Err(SymexError::invariant(
                "string constant target shape changed mid-assignment",
            )),
        }
    }

    /// Resolve an argument to a constant character array, through the
    /// constant-propagation map if needed.
    pub(crate) fn try_evaluate_constant_string(
        &self,
        state: &ExecState,
        expr: &Expr,
    ) -> Option<Vec<BigInt>> {
        let resolved = self.resolve_constant(state, expr)?;
        let ExprKind::ArrayLiteral { elements } = resolved.kind() else {
            return None;
        };
        elements
            .iter()
            .map(|e| e.as_int_constant().cloned())
            .collect()
    }

    pub(crate) fn try_evaluate_constant(&self, state: &ExecState, expr: &Expr) -> Option<BigInt> {
        let resolved = self.resolve_constant(state, expr)?;
        resolved.as_int_constant().cloned()
    }

    fn resolve_constant(&self, state: &ExecState, expr: &Expr) -> Option<Expr> {
        match expr.kind() {
            ExprKind::Constant(_) | ExprKind::ArrayLiteral { .. } => Some(expr.clone()),
            ExprKind::Symbol(id) => {
                let l1 = state.rename(
                    expr.clone(),
                    Level::L1,
                    self.outer_symbol_table,
                    false,
                );
                let key = l1.as_symbol().map(SymbolId::l1_key)?;
                if let Some(propagated) = state.propagation.get(&key) {
                    return Some(propagated.clone());
                }
                state
                    .lookup(self.outer_symbol_table, &id.name)
                    .and_then(|s| s.value.clone())
            }
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Varargs
    // ------------------------------------------------------------------

    /// `va_start` havocs its target: the argument cursor is opaque to the
    /// equation.
    pub(crate) fn symex_va_start(
        &mut self,
        state: &mut ExecState,
        equation: &mut Equation,
        lhs: Expr,
    ) -> Result<(), SymexError> {
        let ty = lhs.ty().clone();
        self.symex_assign(state, equation, lhs, Expr::nondet(ty))
    }
}

fn is_string_builtin(function: &str) -> bool {
    matches!(function, STRING_CONCAT | STRING_SUBSTRING | STRING_EMPTY)
}

/// A foldable string target is either a (length, data) struct or a plain
/// character array.
fn string_constant_target(ty: &Type) -> bool {
    match ty {
        Type::Struct { components, .. } => {
            components.iter().any(|(n, _)| n == "length")
                && components.iter().any(|(n, _)| n == "data")
        }
        Type::Array { .. } => true,
        _ => false,
    }
}

/// Propagation keeps literal constants and stable addresses.
fn is_propagatable(e: &Expr) -> bool {
    match e.kind() {
        ExprKind::Constant(_) => true,
        ExprKind::AddressOf { .. } => true,
        ExprKind::ArrayLiteral { elements } => elements.iter().all(is_propagatable),
        _ => false,
    }
}

fn object_ty_size(ty: &Type) -> Option<usize> {
    match ty {
        Type::Array { size, .. } => *size,
        _ => None,
    }
}

/// Deterministic name for a constant string's data symbol, derived from its
/// contents: printable ASCII directly, anything else via a digest prefix.
fn string_data_symbol_name(chars: &[BigInt]) -> String {
    let printable: Option<String> = chars
        .iter()
        .map(|c| {
            u8::try_from(c)
                .ok()
                .filter(|b| b.is_ascii_alphanumeric() || *b == b'_')
                .map(char::from)
        })
        .collect();
    match printable {
        Some(text) if !text.is_empty() && text.len() <= 32 => {
            format!("{text}_constant_char_array")
        }
        Some(text) if text.is_empty() => "empty_constant_char_array".into(),
        _ => {
            let mut hasher = Sha256::new();
            for c in chars {
                hasher.update(c.to_signed_bytes_le());
            }
            let digest = hasher.finalize();
            let mut prefix = String::new();
            for byte in digest.iter().take(8) {
                prefix.push_str(&format!("{byte:02x}"));
            }
            format!("{prefix}_constant_char_array")
        }
    }
}
