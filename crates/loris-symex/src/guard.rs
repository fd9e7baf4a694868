use loris_ir::{Expr, ExprKind, BinOp};

/// A path condition: a conjunction of level-2 renamed boolean expressions.
///
/// Stored as a list of conjuncts rather than one nested expression so that
/// appending is cheap and merges can share the common prefix instead of
/// rebuilding the full conjunction on every step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Guard {
    conjuncts: Vec<Expr>,
}

impl Guard {
    /// The neutral (always-true) guard.
    pub fn new() -> Self {
        Guard::default()
    }

    pub fn is_true(&self) -> bool {
        self.conjuncts.is_empty()
    }

    pub fn is_false(&self) -> bool {
        self.conjuncts.iter().any(|c| c.is_false())
    }

    pub fn conjuncts(&self) -> &[Expr] {
        &self.conjuncts
    }

    /// Conjoin one condition. Trivially-true literals are dropped; a false
    /// literal collapses the guard.
    pub fn add(&mut self, condition: Expr) {
        if condition.is_true() {
            return;
        }
        if condition.is_false() {
            self.conjuncts.clear();
            self.conjuncts.push(Expr::falsity());
            return;
        }
        // Split conjunctions so the prefix-sharing in `disjoin` sees through
        // them.
        if let ExprKind::Binary {
            op: BinOp::And,
            lhs,
            rhs,
        } = condition.kind()
        {
            let (l, r) = ((**lhs).clone(), (**rhs).clone());
            self.add(l);
            self.add(r);
            return;
        }
        if !self.conjuncts.contains(&condition) {
            self.conjuncts.push(condition);
        }
    }

    /// Conjoin all of `other`'s conjuncts.
    pub fn append(&mut self, other: &Guard) {
        for c in &other.conjuncts {
            self.add(c.clone());
        }
    }

    /// The guard as a single expression.
    pub fn as_expr(&self) -> Expr {
        match self.conjuncts.split_first() {
            None => Expr::truth(),
            Some((first, rest)) => rest
                .iter()
                .fold(first.clone(), |acc, c| acc.and(c.clone())),
        }
    }

    /// Materialize `guard -> cond` as one expression.
    pub fn implies(&self, cond: Expr) -> Expr {
        if self.is_true() {
            cond
        } else {
            self.as_expr().implies(cond)
        }
    }

    /// Conjunction of this guard's conjuncts beyond the common prefix with
    /// `other`. Used as the phi selection condition at merges, where the
    /// shared prefix holds on both sides and carries no information.
    pub fn tail_expr(&self, other: &Guard) -> Expr {
        let shared = self
            .conjuncts
            .iter()
            .zip(other.conjuncts.iter())
            .take_while(|(x, y)| x == y)
            .count();
        match self.conjuncts[shared..].split_first() {
            None => Expr::truth(),
            Some((first, rest)) => rest
                .iter()
                .fold(first.clone(), |acc, c| acc.and(c.clone())),
        }
    }

    /// Disjunction of two guards, used at control-flow merges.
    ///
    /// The common conjunct prefix stays conjoined; only the divergent tails
    /// are or-ed. With one side's tail empty, the result is just the prefix.
    pub fn disjoin(a: &Guard, b: &Guard) -> Guard {
        if a.is_false() {
            return b.clone();
        }
        if b.is_false() {
            return a.clone();
        }
        let shared = a
            .conjuncts
            .iter()
            .zip(b.conjuncts.iter())
            .take_while(|(x, y)| x == y)
            .count();
        let mut merged = Guard {
            conjuncts: a.conjuncts[..shared].to_vec(),
        };
        let tail = |g: &Guard| -> Expr {
            match g.conjuncts[shared..].split_first() {
                None => Expr::truth(),
                Some((first, rest)) => rest
                    .iter()
                    .fold(first.clone(), |acc, c| acc.and(c.clone())),
            }
        };
        let (ta, tb) = (tail(a), tail(b));
        if ta.is_true() || tb.is_true() {
            return merged;
        }
        merged.add(loris_ir::simplify(ta.or(tb)));
        merged
    }
}
