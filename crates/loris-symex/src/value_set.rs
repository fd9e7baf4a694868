use indexmap::{IndexMap, IndexSet};

use loris_ir::{simplify, ConstantValue, Expr, ExprKind, SideEffect, SymbolId};

/// One possible target of a pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueSetTarget {
    /// A named object the pointer may point into; the expression is the
    /// level-1 renamed object.
    Object(Expr),
    /// The null pointer.
    Null,
    /// An object the analysis could not identify.
    Unknown,
}

impl ValueSetTarget {
    pub fn is_unknown(&self) -> bool {
        matches!(self, ValueSetTarget::Unknown)
    }
}

/// The points-to store: for each level-1 pointer name, the set of objects it
/// may target.
///
/// This is the reference implementation of the pointer-analysis collaborator
/// interface; refinements here are correctness-preserving optimizations
/// only, so an always-`Unknown` store would still yield a satisfiable
/// equation, just a bigger one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueSet {
    map: IndexMap<String, IndexSet<ValueSetTarget>>,
}

fn singleton(target: ValueSetTarget) -> IndexSet<ValueSetTarget> {
    let mut set = IndexSet::new();
    set.insert(target);
    set
}

/// Intersection where `Unknown` acts as top.
fn intersect(
    a: &IndexSet<ValueSetTarget>,
    b: &IndexSet<ValueSetTarget>,
) -> IndexSet<ValueSetTarget> {
    if a.iter().any(ValueSetTarget::is_unknown) {
        return b.clone();
    }
    if b.iter().any(ValueSetTarget::is_unknown) {
        return a.clone();
    }
    a.iter().filter(|t| b.contains(*t)).cloned().collect()
}

/// The first symbol in an expression, if any; used to tie an object back to
/// the level-1 name it belongs to.
fn root_symbol(e: &Expr) -> Option<&SymbolId> {
    let mut found = None;
    e.for_each_subexpr(&mut |sub| {
        if found.is_none() {
            if let ExprKind::Symbol(id) = sub.kind() {
                found = Some(id);
            }
        }
    });
    found
}

impl ValueSet {
    pub fn new() -> Self {
        ValueSet::default()
    }

    /// The candidate targets of a pointer-valued expression.
    pub fn read(&self, pointer: &Expr) -> IndexSet<ValueSetTarget> {
        match pointer.kind() {
            ExprKind::AddressOf { object } => singleton(ValueSetTarget::Object((**object).clone())),
            ExprKind::Constant(ConstantValue::Null) => singleton(ValueSetTarget::Null),
            ExprKind::Symbol(id) => match self.map.get(&id.l1_key()) {
                Some(targets) => targets.clone(),
                None => singleton(ValueSetTarget::Unknown),
            },
            ExprKind::Cast { operand } => self.read(operand),
            ExprKind::IfThenElse {
                then_case,
                else_case,
                ..
            } => {
                let mut targets = self.read(then_case);
                targets.extend(self.read(else_case));
                targets
            }
            ExprKind::SideEffect(SideEffect::Nondet) => singleton(ValueSetTarget::Unknown),
            _ => singleton(ValueSetTarget::Unknown),
        }
    }

    /// Record an assignment `lhs := rhs` for a pointer-typed level-1 name.
    pub fn assign(&mut self, lhs_l1_key: impl Into<String>, rhs: &Expr) {
        let targets = self.read(rhs);
        self.map.insert(lhs_l1_key.into(), targets);
    }

    /// Record an assignment to an explicit target set.
    pub fn assign_targets(
        &mut self,
        lhs_l1_key: impl Into<String>,
        targets: IndexSet<ValueSetTarget>,
    ) {
        self.map.insert(lhs_l1_key.into(), targets);
    }

    pub fn targets_of(&self, l1_key: &str) -> Option<&IndexSet<ValueSetTarget>> {
        self.map.get(l1_key)
    }

    /// Drop the entry for a dead name and any object targets rooted in it.
    pub fn kill(&mut self, l1_key: &str) {
        self.map.shift_remove(l1_key);
        for targets in self.map.values_mut() {
            targets.retain(|t| match t {
                ValueSetTarget::Object(e) => {
                    root_symbol(e).map(|s| s.l1_key()) != Some(l1_key.to_string())
                }
                _ => true,
            });
        }
    }

    /// Pointwise union with another store, used at control-flow merges.
    pub fn merge(&mut self, other: &ValueSet) {
        for (key, targets) in &other.map {
            match self.map.get_mut(key) {
                Some(existing) => existing.extend(targets.iter().cloned()),
                None => {
                    self.map.insert(key.clone(), targets.clone());
                }
            }
        }
    }

    /// Sharpen the store by a branch condition known to hold.
    ///
    /// Only pointer equalities refine anything: `p == q` intersects the two
    /// target sets, `p == &o` and `p == NULL` pin the target.
    pub fn apply_condition(&mut self, cond: &Expr) {
        let ExprKind::Binary {
            op: loris_ir::BinOp::Eq,
            lhs,
            rhs,
        } = cond.kind()
        else {
            return;
        };
        if !lhs.ty().is_pointer() {
            return;
        }
        match (lhs.as_symbol(), rhs.as_symbol()) {
            (Some(p), Some(q)) => {
                let sharpened = intersect(&self.read(lhs), &self.read(rhs));
                self.map.insert(p.l1_key(), sharpened.clone());
                self.map.insert(q.l1_key(), sharpened);
            }
            (Some(p), None) => {
                let sharpened = intersect(&self.read(lhs), &self.read(rhs));
                self.map.insert(p.l1_key(), sharpened);
            }
            (None, Some(q)) => {
                let sharpened = intersect(&self.read(lhs), &self.read(rhs));
                self.map.insert(q.l1_key(), sharpened);
            }
            (None, None) => {}
        }
    }

    /// Refine the store by a pointer equality known *not* to hold: a
    /// singleton aliasing that would force the equality is dropped, since
    /// keeping it would contradict the branch.
    pub fn apply_negated_condition(&mut self, cond: &Expr) {
        let ExprKind::Binary {
            op: loris_ir::BinOp::Eq,
            lhs,
            rhs,
        } = cond.kind()
        else {
            return;
        };
        if !lhs.ty().is_pointer() {
            return;
        }
        let (Some(p), Some(q)) = (lhs.as_symbol(), rhs.as_symbol()) else {
            return;
        };
        let (vp, vq) = (self.read(lhs), self.read(rhs));
        let singleton_eq = vp.len() == 1
            && vp == vq
            && !vp.iter().any(ValueSetTarget::is_unknown);
        if singleton_eq {
            self.map.shift_remove(&p.l1_key());
            self.map.shift_remove(&q.l1_key());
        }
    }

    /// Value-set filtering at a branch.
    ///
    /// Applies only when `cond` has exactly one free pointer-typed symbol
    /// `p`. Each candidate target of `p` is substituted into `cond`; targets
    /// making the condition unconditionally false are dropped from the
    /// taken-branch store, targets making it unconditionally true from the
    /// not-taken store.
    pub fn filter(
        &self,
        cond: &Expr,
        taken: Option<&mut ValueSet>,
        not_taken: Option<&mut ValueSet>,
    ) {
        let pointer_symbols: IndexSet<&SymbolId> = cond.free_symbols().into_iter().collect();
        let mut pointers = pointer_symbols
            .into_iter()
            .filter(|id| symbol_is_pointer_typed(cond, id));
        let Some(pointer) = pointers.next() else {
            return;
        };
        if pointers.next().is_some() {
            return;
        }
        let key = pointer.l1_key();
        let Some(candidates) = self.map.get(&key) else {
            return;
        };

        let mut keep_taken = IndexSet::new();
        let mut keep_not_taken = IndexSet::new();
        for target in candidates {
            let substituted = match target {
                ValueSetTarget::Object(object) => {
                    substitute_symbol(cond.clone(), pointer, &object.clone().address_of())
                }
                ValueSetTarget::Null => {
                    let null = Expr::null(symbol_type(cond, pointer));
                    substitute_symbol(cond.clone(), pointer, &null)
                }
                ValueSetTarget::Unknown => {
                    keep_taken.insert(target.clone());
                    keep_not_taken.insert(target.clone());
                    continue;
                }
            };
            let outcome = simplify(substituted);
            if !outcome.is_false() {
                keep_taken.insert(target.clone());
            }
            if !outcome.is_true() {
                keep_not_taken.insert(target.clone());
            }
        }
        if let Some(taken) = taken {
            taken.map.insert(key.clone(), keep_taken);
        }
        if let Some(not_taken) = not_taken {
            not_taken.map.insert(key, keep_not_taken);
        }
    }
}

fn symbol_is_pointer_typed(cond: &Expr, id: &SymbolId) -> bool {
    let mut pointer = false;
    cond.for_each_subexpr(&mut |sub| {
        if let ExprKind::Symbol(s) = sub.kind() {
            if s == id && sub.ty().is_pointer() {
                pointer = true;
            }
        }
    });
    pointer
}

fn symbol_type(cond: &Expr, id: &SymbolId) -> loris_ir::Type {
    let mut ty = loris_ir::Type::Empty;
    cond.for_each_subexpr(&mut |sub| {
        if let ExprKind::Symbol(s) = sub.kind() {
            if s == id {
                ty = sub.ty().clone();
            }
        }
    });
    ty
}

fn substitute_symbol(e: Expr, id: &SymbolId, replacement: &Expr) -> Expr {
    e.map_subexprs(&mut |sub| match sub.kind() {
        ExprKind::Symbol(s) if s == id => replacement.clone(),
        _ => sub,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use loris_ir::Type;

    fn int_ptr() -> Type {
        Type::pointer_to(Type::signed_int())
    }

    fn obj(name: &str) -> Expr {
        Expr::symbol(
            SymbolId::new(name).with_thread(0).with_frame(0),
            Type::signed_int(),
        )
    }

    fn ptr(name: &str) -> Expr {
        Expr::symbol(SymbolId::new(name).with_thread(0).with_frame(0), int_ptr())
    }

    #[test]
    fn address_of_reads_as_singleton_object() {
        let vs = ValueSet::new();
        let targets = vs.read(&obj("a").address_of());
        assert_eq!(targets, singleton(ValueSetTarget::Object(obj("a"))));
    }

    #[test]
    fn unassigned_pointer_reads_unknown() {
        let vs = ValueSet::new();
        assert_eq!(
            vs.read(&ptr("p")),
            singleton(ValueSetTarget::Unknown)
        );
    }

    #[test]
    fn assign_then_read_roundtrips() {
        let mut vs = ValueSet::new();
        vs.assign("p!0@0", &obj("a").address_of());
        assert_eq!(
            vs.read(&ptr("p")),
            singleton(ValueSetTarget::Object(obj("a")))
        );
    }

    #[test]
    fn ite_reads_union_of_branches() {
        let mut vs = ValueSet::new();
        vs.assign("p!0@0", &obj("a").address_of());
        let cond = Expr::symbol_name("c", Type::Bool);
        let e = Expr::ite(cond, ptr("p"), obj("b").address_of());
        let targets = vs.read(&e);
        assert!(targets.contains(&ValueSetTarget::Object(obj("a"))));
        assert!(targets.contains(&ValueSetTarget::Object(obj("b"))));
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn merge_unions_pointwise() {
        let mut a = ValueSet::new();
        a.assign("p!0@0", &obj("a").address_of());
        let mut b = ValueSet::new();
        b.assign("p!0@0", &obj("b").address_of());
        b.assign("q!0@0", &obj("c").address_of());
        a.merge(&b);
        assert_eq!(a.targets_of("p!0@0").unwrap().len(), 2);
        assert_eq!(a.targets_of("q!0@0").unwrap().len(), 1);
    }

    #[test]
    fn apply_condition_intersects_pointer_equality() {
        let mut vs = ValueSet::new();
        let both = [
            ValueSetTarget::Object(obj("a")),
            ValueSetTarget::Object(obj("b")),
        ]
        .into_iter()
        .collect();
        vs.assign_targets("p!0@0", both);
        vs.assign("q!0@0", &obj("b").address_of());
        vs.apply_condition(&ptr("p").eq_expr(ptr("q")));
        assert_eq!(
            vs.targets_of("p!0@0").unwrap(),
            &singleton(ValueSetTarget::Object(obj("b")))
        );
    }

    #[test]
    fn kill_drops_entry_and_dangling_objects() {
        let mut vs = ValueSet::new();
        vs.assign("p!0@0", &obj("a").address_of());
        vs.assign("q!0@0", &{
            let a = obj("a");
            a.address_of()
        });
        vs.kill("a!0@0");
        assert!(vs.targets_of("a!0@0").is_none());
        assert!(vs.targets_of("q!0@0").unwrap().is_empty());
    }

    #[test]
    fn filter_drops_contradicted_targets_from_taken_branch() {
        let mut vs = ValueSet::new();
        let both: IndexSet<_> = [
            ValueSetTarget::Object(obj("a")),
            ValueSetTarget::Object(obj("b")),
        ]
        .into_iter()
        .collect();
        vs.assign_targets("p!0@0", both);

        // condition: p == &a
        let cond = ptr("p").eq_expr(obj("a").address_of());
        let mut taken = vs.clone();
        let mut not_taken = vs.clone();
        vs.filter(&cond, Some(&mut taken), Some(&mut not_taken));

        assert_eq!(
            taken.targets_of("p!0@0").unwrap(),
            &singleton(ValueSetTarget::Object(obj("a")))
        );
        assert_eq!(
            not_taken.targets_of("p!0@0").unwrap(),
            &singleton(ValueSetTarget::Object(obj("b")))
        );
    }

    #[test]
    fn filter_is_skipped_with_two_pointer_symbols() {
        let mut vs = ValueSet::new();
        vs.assign("p!0@0", &obj("a").address_of());
        vs.assign("q!0@0", &obj("b").address_of());
        let cond = ptr("p").eq_expr(ptr("q"));
        let mut taken = vs.clone();
        vs.filter(&cond, Some(&mut taken), None);
        assert_eq!(taken, vs);
    }
}
