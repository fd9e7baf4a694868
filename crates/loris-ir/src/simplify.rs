//! Semantics-preserving expression simplification.
//!
//! `simplify` is a pure bottom-up pass: constant folding for arithmetic,
//! comparisons, and boolean connectives, if-then-else collapsing, cast and
//! double-negation removal, and trivial pointer (dis)equalities on
//! address-of expressions. It is idempotent; the engine calls it after every
//! renaming when `simplify_opt` is on.

use num::{BigInt, Zero};

use crate::expr::{BinOp, ConstantValue, Expr, ExprKind, UnOp};
use crate::types::Type;

/// Simplify an expression. Pure; returns an equivalent expression.
pub fn simplify(expr: Expr) -> Expr {
    expr.map_subexprs(&mut simplify_node)
}

fn as_bool(e: &Expr) -> Option<bool> {
    match e.kind() {
        ExprKind::Constant(ConstantValue::Boolean(b)) => Some(*b),
        _ => None,
    }
}

fn as_int(e: &Expr) -> Option<&BigInt> {
    e.as_int_constant()
}

/// True when one operand is the negation of the other.
fn complementary(a: &Expr, b: &Expr) -> bool {
    let negates = |x: &Expr, y: &Expr| match x.kind() {
        ExprKind::Unary {
            op: UnOp::Not,
            operand,
        } => **operand == *y,
        _ => false,
    };
    negates(a, b) || negates(b, a)
}

/// The root object of an address-of operand, if it is a plain symbol.
fn address_root(e: &Expr) -> Option<&Expr> {
    match e.kind() {
        ExprKind::AddressOf { object } if object.is_symbol() => Some(object),
        _ => None,
    }
}

fn simplify_node(e: Expr) -> Expr {
    match e.kind() {
        ExprKind::Binary { op, lhs, rhs } => simplify_binary(*op, lhs, rhs, &e),
        ExprKind::Unary { op, operand } => simplify_unary(*op, operand, &e),
        ExprKind::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            if let Some(b) = as_bool(cond) {
                return if b {
                    (**then_case).clone()
                } else {
                    (**else_case).clone()
                };
            }
            if then_case == else_case {
                return (**then_case).clone();
            }
            // c ? true : false collapses to c itself.
            if e.ty().is_boolean() {
                if let (Some(true), Some(false)) = (as_bool(then_case), as_bool(else_case)) {
                    return (**cond).clone();
                }
            }
            e
        }
        ExprKind::Cast { operand } => {
            if operand.ty() == e.ty() {
                return (**operand).clone();
            }
            if let Some(i) = as_int(operand) {
                if matches!(e.ty(), Type::SignedBv { .. } | Type::UnsignedBv { .. }) {
                    return Expr::int(i.clone(), e.ty().clone());
                }
            }
            e
        }
        _ => e,
    }
}

fn simplify_binary(op: BinOp, lhs: &Expr, rhs: &Expr, original: &Expr) -> Expr {
    if let (Some(a), Some(b)) = (as_int(lhs), as_int(rhs)) {
        if let Some(folded) = fold_int(op, a, b, original.ty()) {
            return folded;
        }
    }

    match op {
        BinOp::And => match (as_bool(lhs), as_bool(rhs)) {
            (Some(false), _) | (_, Some(false)) => Expr::falsity(),
            (Some(true), _) => rhs.clone(),
            (_, Some(true)) => lhs.clone(),
            _ if lhs == rhs => lhs.clone(),
            _ if complementary(lhs, rhs) => Expr::falsity(),
            _ => original.clone(),
        },
        BinOp::Or => match (as_bool(lhs), as_bool(rhs)) {
            (Some(true), _) | (_, Some(true)) => Expr::truth(),
            (Some(false), _) => rhs.clone(),
            (_, Some(false)) => lhs.clone(),
            _ if lhs == rhs => lhs.clone(),
            _ if complementary(lhs, rhs) => Expr::truth(),
            _ => original.clone(),
        },
        BinOp::Implies => match (as_bool(lhs), as_bool(rhs)) {
            (Some(false), _) | (_, Some(true)) => Expr::truth(),
            (Some(true), _) => rhs.clone(),
            _ => original.clone(),
        },
        BinOp::Eq => simplify_equality(lhs, rhs, original),
        BinOp::Ne => {
            let eq = simplify_equality(lhs, rhs, original);
            match as_bool(&eq) {
                Some(b) => Expr::bool(!b),
                // Only rewrite when equality resolved; keep Ne intact.
                None => original.clone(),
            }
        }
        BinOp::Add | BinOp::Sub => {
            // x + 0 and x - 0.
            if as_int(rhs).is_some_and(|i| i.is_zero()) {
                return lhs.clone();
            }
            if op == BinOp::Add && as_int(lhs).is_some_and(|i| i.is_zero()) {
                return rhs.clone();
            }
            original.clone()
        }
        BinOp::Mul => {
            if as_int(rhs).is_some_and(|i| i.is_zero()) || as_int(lhs).is_some_and(|i| i.is_zero())
            {
                return Expr::int(BigInt::zero(), original.ty().clone());
            }
            original.clone()
        }
        _ => original.clone(),
    }
}

fn simplify_equality(lhs: &Expr, rhs: &Expr, original: &Expr) -> Expr {
    if lhs == rhs {
        return Expr::truth();
    }
    if let (Some(b1), Some(b2)) = (as_bool(lhs), as_bool(rhs)) {
        return Expr::bool(b1 == b2);
    }
    // Addresses of distinct named objects never compare equal, and an
    // address-of is never null.
    let null = |e: &Expr| matches!(e.kind(), ExprKind::Constant(ConstantValue::Null));
    match (address_root(lhs), address_root(rhs)) {
        (Some(a), Some(b)) => return Expr::bool(a == b),
        (Some(_), None) if null(rhs) => return Expr::falsity(),
        (None, Some(_)) if null(lhs) => return Expr::falsity(),
        _ => {}
    }
    if null(lhs) && null(rhs) {
        return Expr::truth();
    }
    original.clone()
}

fn fold_int(op: BinOp, a: &BigInt, b: &BigInt, ty: &Type) -> Option<Expr> {
    let int = |v: BigInt| Some(Expr::int(v, ty.clone()));
    match op {
        BinOp::Add => int(a + b),
        BinOp::Sub => int(a - b),
        BinOp::Mul => int(a * b),
        BinOp::Div if !b.is_zero() => int(a / b),
        BinOp::Rem if !b.is_zero() => int(a % b),
        BinOp::Eq => Some(Expr::bool(a == b)),
        BinOp::Ne => Some(Expr::bool(a != b)),
        BinOp::Lt => Some(Expr::bool(a < b)),
        BinOp::Le => Some(Expr::bool(a <= b)),
        BinOp::Gt => Some(Expr::bool(a > b)),
        BinOp::Ge => Some(Expr::bool(a >= b)),
        _ => None,
    }
}

fn simplify_unary(op: UnOp, operand: &Expr, original: &Expr) -> Expr {
    match op {
        UnOp::Not => {
            if let Some(b) = as_bool(operand) {
                return Expr::bool(!b);
            }
            if let ExprKind::Unary {
                op: UnOp::Not,
                operand: inner,
            } = operand.kind()
            {
                return (**inner).clone();
            }
            original.clone()
        }
        UnOp::Neg => {
            if let Some(i) = as_int(operand) {
                return Expr::int(-i.clone(), original.ty().clone());
            }
            original.clone()
        }
        UnOp::BitNot => original.clone(),
    }
}
