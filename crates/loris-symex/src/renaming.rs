//! Three-tier name versioning.
//!
//! Level 0 pins a symbol to a program thread, level 1 distinguishes frames
//! of recursive or repeated function invocations, and level 2 is the SSA
//! version bumped on every write. Renaming is idempotent per level: a
//! decoration already present is never recomputed.

use indexmap::IndexMap;

use loris_ir::{Expr, ExprKind, SymbolId};

use crate::error::SymexError;

/// Renaming level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    L0,
    L1,
    L2,
}

/// Frame numbers per level-0 name of the active thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Level1Map {
    map: IndexMap<String, usize>,
}

impl Level1Map {
    pub fn new() -> Self {
        Level1Map::default()
    }

    pub fn frame_of(&self, l0_key: &str) -> usize {
        self.map.get(l0_key).copied().unwrap_or(0)
    }

    pub fn set_frame(&mut self, l0_key: impl Into<String>, frame: usize) {
        self.map.insert(l0_key.into(), frame);
    }

    pub fn remove(&mut self, l0_key: &str) -> Option<usize> {
        self.map.shift_remove(l0_key)
    }

    pub fn contains(&self, l0_key: &str) -> bool {
        self.map.contains_key(l0_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &usize)> {
        self.map.iter()
    }
}

/// One tracked level-1 name: its largest SSA version, the level-1 symbol it
/// belongs to, and the symbol's type (needed to rebuild phi assignments at
/// merges).
#[derive(Debug, Clone, PartialEq)]
pub struct VersionEntry {
    pub version: usize,
    pub id: SymbolId,
    pub ty: loris_ir::Type,
}

/// SSA versions per level-1 name.
///
/// Versions start at 0 (the unconstrained "before any write" generation) and
/// only ever increase; the stored version is always the largest ever
/// assigned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Level2Map {
    map: IndexMap<String, VersionEntry>,
}

impl Level2Map {
    pub fn new() -> Self {
        Level2Map::default()
    }

    pub fn current_version(&self, l1_key: &str) -> usize {
        self.map.get(l1_key).map(|e| e.version).unwrap_or(0)
    }

    pub fn entry_of(&self, l1_key: &str) -> Option<&VersionEntry> {
        self.map.get(l1_key)
    }

    /// Bump the version for a write; returns the new version. Only safe
    /// when no sibling branch shares the name; forked execution goes
    /// through [`VersionCounter`] and [`Level2Map::set_version`] instead.
    pub fn increase_generation(&mut self, id: &SymbolId, ty: &loris_ir::Type) -> usize {
        let mut l1 = id.clone();
        l1.version = None;
        let entry = self
            .map
            .entry(l1.l1_key())
            .or_insert_with(|| VersionEntry {
                version: 0,
                id: l1.clone(),
                ty: ty.clone(),
            });
        entry.version += 1;
        entry.version
    }

    /// Record a write with an externally allocated version.
    pub fn set_version(&mut self, id: &SymbolId, ty: &loris_ir::Type, version: usize) {
        let mut l1 = id.clone();
        l1.version = None;
        let entry = self
            .map
            .entry(l1.l1_key())
            .or_insert_with(|| VersionEntry {
                version: 0,
                id: l1,
                ty: ty.clone(),
            });
        entry.version = version;
    }

    /// Adopt the larger version of each entry; used when merging states.
    pub fn merge_max(&mut self, other: &Level2Map) {
        for (key, incoming) in &other.map {
            match self.map.get_mut(key) {
                Some(entry) => {
                    if incoming.version > entry.version {
                        entry.version = incoming.version;
                    }
                }
                None => {
                    self.map.insert(key.clone(), incoming.clone());
                }
            }
        }
    }

    /// Keys whose version differs between the two maps, with the symbol and
    /// type of each.
    pub fn diverging_entries(&self, other: &Level2Map) -> Vec<VersionEntry> {
        let mut out = Vec::new();
        let mut seen = indexmap::IndexSet::new();
        for (key, entry) in self.map.iter().chain(other.map.iter()) {
            if !seen.insert(key.clone()) {
                continue;
            }
            if self.current_version(key) != other.current_version(key) {
                out.push(entry.clone());
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VersionEntry)> {
        self.map.iter()
    }

    /// Validation hook: a write must move the version strictly forward.
    pub fn check_monotonic(&self, l1_key: &str, new_version: usize) -> Result<(), SymexError> {
        let current = self.current_version(l1_key);
        if new_version <= current {
            return Err(SymexError::RenamingInconsistency {
                name: l1_key.to_string(),
                expected: current + 1,
                found: new_version,
            });
        }
        Ok(())
    }
}

/// The global SSA version source.
///
/// Versions are allocated here, not in the per-path [`Level2Map`], so two
/// forked branches writing the same name can never hand out the same
/// version. An L2 name appearing in the equation is therefore globally
/// unique across all paths of a run.
#[derive(Debug, Clone, Default)]
pub struct VersionCounter {
    map: IndexMap<String, usize>,
}

impl VersionCounter {
    pub fn new() -> Self {
        VersionCounter::default()
    }

    /// Allocate the next version for a level-1 name.
    pub fn next(&mut self, l1_key: &str) -> usize {
        let entry = self.map.entry(l1_key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn peek(&self, l1_key: &str) -> usize {
        self.map.get(l1_key).copied().unwrap_or(0)
    }

    /// Raise the counter to at least each version in a resumed state's map,
    /// so versions allocated after a resume never collide with the saved
    /// equation prefix.
    pub fn ensure_at_least(&mut self, level2: &Level2Map) {
        for (key, entry) in level2.iter() {
            let counter = self.map.entry(key.clone()).or_insert(0);
            if entry.version > *counter {
                *counter = entry.version;
            }
        }
    }
}

/// Everything a read-side rename needs from the execution state.
pub struct RenameContext<'a> {
    /// Active program thread.
    pub thread: usize,
    pub level1: &'a Level1Map,
    pub level2: &'a Level2Map,
    /// Constant-propagation map, consulted on L2 reads when enabled.
    pub propagation: Option<&'a IndexMap<String, Expr>>,
    /// Whether a base name denotes a shared (static, not thread-local)
    /// object; shared objects live on thread 0 and frame 0.
    pub is_shared: &'a dyn Fn(&str) -> bool,
}

impl RenameContext<'_> {
    fn rename_id(&self, mut id: SymbolId, level: Level) -> SymbolId {
        let shared = (self.is_shared)(&id.name);
        if id.thread.is_none() {
            id.thread = Some(if shared { 0 } else { self.thread });
        }
        if level >= Level::L1 && id.frame.is_none() {
            id.frame = Some(if shared {
                0
            } else {
                self.level1.frame_of(&id.l0_key())
            });
        }
        if level == Level::L2 && id.version.is_none() {
            id.version = Some(self.level2.current_version(&id.l1_key()));
        }
        id
    }

    /// Rename a symbol for a read at the given level, possibly substituting
    /// a propagated constant in place of the L2 name.
    fn rename_symbol_expr(&self, e: &Expr, level: Level) -> Expr {
        let ExprKind::Symbol(id) = e.kind() else {
            unreachable!("rename_symbol_expr on non-symbol");
        };
        if level == Level::L2 && id.version.is_none() {
            let l1 = self.rename_id(id.clone(), Level::L1);
            if let Some(prop) = self.propagation {
                if let Some(constant) = prop.get(&l1.l1_key()) {
                    return constant.clone();
                }
            }
        }
        Expr::symbol(self.rename_id(id.clone(), level), e.ty().clone())
    }

    /// Rename every free symbol in an expression to the target level.
    ///
    /// Objects under an address-of stop at level 1: taking an address does
    /// not read the object's value, and the address is stable across SSA
    /// versions. Let- and quantifier-bound names are left untouched.
    pub fn rename(&self, expr: Expr, level: Level) -> Expr {
        self.rename_rec(expr, level, &mut Vec::new())
    }

    fn rename_rec(&self, expr: Expr, level: Level, bound: &mut Vec<String>) -> Expr {
        match expr.kind() {
            ExprKind::Symbol(id) => {
                if bound.iter().any(|b| *b == id.name) {
                    expr
                } else {
                    self.rename_symbol_expr(&expr, level)
                }
            }
            ExprKind::AddressOf { object } => {
                let renamed = self.rename_rec((**object).clone(), level.min(Level::L1), bound);
                renamed.address_of()
            }
            ExprKind::Let {
                binding,
                value,
                body,
            } => {
                let value = self.rename_rec((**value).clone(), level, bound);
                bound.push(binding.name.clone());
                let body = self.rename_rec((**body).clone(), level, bound);
                bound.pop();
                Expr::let_in(binding.clone(), value, body)
            }
            ExprKind::Quantifier {
                kind,
                bound: bs,
                body,
            } => {
                let n = bs.len();
                for (b, _) in bs {
                    bound.push(b.name.clone());
                }
                let body = self.rename_rec((**body).clone(), level, bound);
                for _ in 0..n {
                    bound.pop();
                }
                Expr::new(
                    ExprKind::Quantifier {
                        kind: *kind,
                        bound: bs.clone(),
                        body: Box::new(body),
                    },
                    expr.ty().clone(),
                )
            }
            // Everything else: rebuild with renamed children. The bound-name
            // stack threads through a shared mutable borrow, so the generic
            // visitor cannot be used here.
            _ => {
                let ty = expr.ty().clone();
                let (kind, _) = expr.into_parts();
                let kind = rename_children(kind, &mut |child| self.rename_rec(child, level, bound));
                Expr::new(kind, ty)
            }
        }
    }
}

/// Rebuild an expression kind with every direct child mapped through `f`.
/// Shared by renaming and substitution, which handle binders themselves
/// before delegating here.
pub(crate) fn rename_children(kind: ExprKind, f: &mut impl FnMut(Expr) -> Expr) -> ExprKind {
    use loris_ir::SideEffect;
    let map_box = |e: Box<Expr>, f: &mut dyn FnMut(Expr) -> Expr| Box::new(f(*e));
    match kind {
        k @ (ExprKind::Symbol(_) | ExprKind::Constant(_) | ExprKind::Nil) => k,
        ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
            op,
            lhs: map_box(lhs, f),
            rhs: map_box(rhs, f),
        },
        ExprKind::Unary { op, operand } => ExprKind::Unary {
            op,
            operand: map_box(operand, f),
        },
        ExprKind::IfThenElse {
            cond,
            then_case,
            else_case,
        } => ExprKind::IfThenElse {
            cond: map_box(cond, f),
            then_case: map_box(then_case, f),
            else_case: map_box(else_case, f),
        },
        ExprKind::Index { array, index } => ExprKind::Index {
            array: map_box(array, f),
            index: map_box(index, f),
        },
        ExprKind::Member {
            compound,
            component,
        } => ExprKind::Member {
            compound: map_box(compound, f),
            component,
        },
        ExprKind::Dereference { pointer } => ExprKind::Dereference {
            pointer: map_box(pointer, f),
        },
        ExprKind::AddressOf { object } => ExprKind::AddressOf {
            object: map_box(object, f),
        },
        ExprKind::Cast { operand } => ExprKind::Cast {
            operand: map_box(operand, f),
        },
        ExprKind::ByteExtract { container, offset } => ExprKind::ByteExtract {
            container: map_box(container, f),
            offset: map_box(offset, f),
        },
        ExprKind::FunctionApp {
            function,
            arguments,
        } => ExprKind::FunctionApp {
            function,
            arguments: arguments.into_iter().map(f).collect(),
        },
        ExprKind::SideEffect(se) => ExprKind::SideEffect(match se {
            SideEffect::Allocate { size, zeroed } => SideEffect::Allocate {
                size: map_box(size, f),
                zeroed,
            },
            SideEffect::FunctionCall {
                function,
                arguments,
            } => SideEffect::FunctionCall {
                function: map_box(function, f),
                arguments: arguments.into_iter().map(f).collect(),
            },
            SideEffect::Throw { value } => SideEffect::Throw {
                value: map_box(value, f),
            },
            other => other,
        }),
        ExprKind::ArrayLiteral { elements } => ExprKind::ArrayLiteral {
            elements: elements.into_iter().map(f).collect(),
        },
        ExprKind::Let {
            binding,
            value,
            body,
        } => ExprKind::Let {
            binding,
            value: map_box(value, f),
            body: map_box(body, f),
        },
        ExprKind::Quantifier { kind, bound, body } => ExprKind::Quantifier {
            kind,
            bound,
            body: map_box(body, f),
        },
        ExprKind::Update {
            compound,
            designator,
            value,
        } => {
            use loris_ir::Designator;
            ExprKind::Update {
                compound: map_box(compound, f),
                designator: match designator {
                    Designator::Index(i) => Designator::Index(map_box(i, f)),
                    Designator::Member(m) => Designator::Member(m),
                    Designator::Byte(o) => Designator::Byte(map_box(o, f)),
                },
                value: map_box(value, f),
            }
        }
    }
}
