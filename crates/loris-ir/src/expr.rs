use num::BigInt;
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::program::SourceLocation;
use crate::types::Type;

/// A (possibly SSA-decorated) symbol identifier.
///
/// Renaming attaches up to three decorations to a base name:
/// thread (`!t`), frame (`@f`), and SSA version (`#v`). A bare name is what
/// the front end produces; a fully decorated name is globally unique in the
/// emitted equation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SymbolId {
    pub name: String,
    pub thread: Option<usize>,
    pub frame: Option<usize>,
    pub version: Option<usize>,
}

impl SymbolId {
    pub fn new(name: impl Into<String>) -> Self {
        SymbolId {
            name: name.into(),
            thread: None,
            frame: None,
            version: None,
        }
    }

    pub fn with_thread(mut self, thread: usize) -> Self {
        self.thread = Some(thread);
        self
    }

    pub fn with_frame(mut self, frame: usize) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn with_version(mut self, version: usize) -> Self {
        self.version = Some(version);
        self
    }

    /// Strip all renaming decorations, keeping the base name.
    pub fn base(&self) -> SymbolId {
        SymbolId::new(self.name.clone())
    }

    /// True once the thread decoration is present.
    pub fn is_l0_renamed(&self) -> bool {
        self.thread.is_some()
    }

    /// True once thread and frame decorations are present.
    pub fn is_l1_renamed(&self) -> bool {
        self.thread.is_some() && self.frame.is_some()
    }

    /// True once all three decorations are present.
    pub fn is_l2_renamed(&self) -> bool {
        self.is_l1_renamed() && self.version.is_some()
    }

    /// Key identifying this symbol up to thread decoration.
    pub fn l0_key(&self) -> String {
        format!("{}!{}", self.name, self.thread.unwrap_or(0))
    }

    /// Key identifying this symbol up to frame decoration.
    pub fn l1_key(&self) -> String {
        format!(
            "{}!{}@{}",
            self.name,
            self.thread.unwrap_or(0),
            self.frame.unwrap_or(0)
        )
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(t) = self.thread {
            write!(f, "!{t}")?;
        }
        if let Some(fr) = self.frame {
            write!(f, "@{fr}")?;
        }
        if let Some(v) = self.version {
            write!(f, "#{v}")?;
        }
        Ok(())
    }
}

/// Constant payload of a [`ExprKind::Constant`] node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ConstantValue {
    Integer(BigInt),
    Boolean(bool),
    /// The null pointer constant.
    Null,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Implies,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or | BinOp::Implies)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnOp {
    Not,
    Neg,
    BitNot,
}

/// Quantifier kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QuantifierKind {
    Forall,
    Exists,
}

/// Side effects that may appear on the right-hand side of an assignment
/// before the interpreter strips them out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum SideEffect {
    /// A nondeterministic choice of the carrying expression's type.
    Nondet,
    /// Heap allocation of `size` bytes; `zeroed` requests zero-initialization.
    Allocate { size: Box<Expr>, zeroed: bool },
    /// A function call in expression position.
    FunctionCall {
        function: Box<Expr>,
        arguments: Vec<Expr>,
    },
    /// An exception throw in expression position.
    Throw { value: Box<Expr> },
    /// A statement expression; opaque to the engine.
    StatementExpr,
}

/// The tagged variant tree of symbolic expressions.
///
/// Shared fields (type, source location, structural hash) live on the
/// enclosing [`Expr`] record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExprKind {
    Symbol(SymbolId),
    Constant(ConstantValue),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    IfThenElse {
        cond: Box<Expr>,
        then_case: Box<Expr>,
        else_case: Box<Expr>,
    },
    Index {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        compound: Box<Expr>,
        component: String,
    },
    Dereference {
        pointer: Box<Expr>,
    },
    AddressOf {
        object: Box<Expr>,
    },
    Cast {
        operand: Box<Expr>,
    },
    ByteExtract {
        container: Box<Expr>,
        offset: Box<Expr>,
    },
    /// Application of a mathematical or builtin function by name.
    FunctionApp {
        function: String,
        arguments: Vec<Expr>,
    },
    Let {
        binding: SymbolId,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    Quantifier {
        kind: QuantifierKind,
        bound: Vec<(SymbolId, Type)>,
        body: Box<Expr>,
    },
    SideEffect(SideEffect),
    /// A literal array value, used for constant string data.
    ArrayLiteral {
        elements: Vec<Expr>,
    },
    /// A functional update of one component of a compound value; produced
    /// when assignments to indices, members, or byte ranges are rewritten
    /// into whole-object assignments.
    Update {
        compound: Box<Expr>,
        designator: Designator,
        value: Box<Expr>,
    },
    /// The absent expression. Rejected at the interpreter boundary.
    Nil,
}

/// Which component an [`ExprKind::Update`] replaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Designator {
    Index(Box<Expr>),
    Member(String),
    /// Byte-granular update at the given offset.
    Byte(Box<Expr>),
}

/// A symbolic expression: a kind, a type, an optional source location, and a
/// structural hash precomputed at construction.
///
/// Equality and hashing are structural and ignore the source location, so two
/// expressions built at different program points compare equal when their
/// trees match.
#[derive(Debug, Clone, Serialize)]
pub struct Expr {
    kind: ExprKind,
    ty: Type,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<SourceLocation>,
    #[serde(skip)]
    hash: u64,
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.ty == other.ty && self.kind == other.kind
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

fn hash_of(kind: &ExprKind, ty: &Type) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    let mut h = DefaultHasher::new();
    ty.hash(&mut h);
    hash_kind(kind, &mut h);
    h.finish()
}

fn hash_kind<H: Hasher>(kind: &ExprKind, h: &mut H) {
    match kind {
        ExprKind::Symbol(id) => {
            h.write_u8(0);
            id.hash(h);
        }
        ExprKind::Constant(c) => {
            h.write_u8(1);
            c.hash(h);
        }
        ExprKind::Binary { op, lhs, rhs } => {
            h.write_u8(2);
            op.hash(h);
            h.write_u64(lhs.hash);
            h.write_u64(rhs.hash);
        }
        ExprKind::Unary { op, operand } => {
            h.write_u8(3);
            op.hash(h);
            h.write_u64(operand.hash);
        }
        ExprKind::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            h.write_u8(4);
            h.write_u64(cond.hash);
            h.write_u64(then_case.hash);
            h.write_u64(else_case.hash);
        }
        ExprKind::Index { array, index } => {
            h.write_u8(5);
            h.write_u64(array.hash);
            h.write_u64(index.hash);
        }
        ExprKind::Member {
            compound,
            component,
        } => {
            h.write_u8(6);
            h.write_u64(compound.hash);
            component.hash(h);
        }
        ExprKind::Dereference { pointer } => {
            h.write_u8(7);
            h.write_u64(pointer.hash);
        }
        ExprKind::AddressOf { object } => {
            h.write_u8(8);
            h.write_u64(object.hash);
        }
        ExprKind::Cast { operand } => {
            h.write_u8(9);
            h.write_u64(operand.hash);
        }
        ExprKind::ByteExtract { container, offset } => {
            h.write_u8(10);
            h.write_u64(container.hash);
            h.write_u64(offset.hash);
        }
        ExprKind::FunctionApp {
            function,
            arguments,
        } => {
            h.write_u8(11);
            function.hash(h);
            for a in arguments {
                h.write_u64(a.hash);
            }
        }
        ExprKind::Let {
            binding,
            value,
            body,
        } => {
            h.write_u8(12);
            binding.hash(h);
            h.write_u64(value.hash);
            h.write_u64(body.hash);
        }
        ExprKind::Quantifier { kind, bound, body } => {
            h.write_u8(13);
            kind.hash(h);
            bound.hash(h);
            h.write_u64(body.hash);
        }
        ExprKind::SideEffect(se) => {
            h.write_u8(14);
            se.hash(h);
        }
        ExprKind::ArrayLiteral { elements } => {
            h.write_u8(15);
            for e in elements {
                h.write_u64(e.hash);
            }
        }
        ExprKind::Nil => h.write_u8(16),
        ExprKind::Update {
            compound,
            designator,
            value,
        } => {
            h.write_u8(17);
            h.write_u64(compound.hash);
            match designator {
                Designator::Index(i) => {
                    h.write_u8(0);
                    h.write_u64(i.hash);
                }
                Designator::Member(m) => {
                    h.write_u8(1);
                    m.hash(h);
                }
                Designator::Byte(o) => {
                    h.write_u8(2);
                    h.write_u64(o.hash);
                }
            }
            h.write_u64(value.hash);
        }
    }
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type) -> Self {
        let hash = hash_of(&kind, &ty);
        Expr {
            kind,
            ty,
            source: None,
            hash,
        }
    }

    pub fn with_source(mut self, source: SourceLocation) -> Self {
        self.source = Some(source);
        self
    }

    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn source(&self) -> Option<&SourceLocation> {
        self.source.as_ref()
    }

    pub fn structural_hash(&self) -> u64 {
        self.hash
    }

    /// Decompose into kind and type, discarding location and hash.
    pub fn into_parts(self) -> (ExprKind, Type) {
        (self.kind, self.ty)
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    pub fn symbol(id: SymbolId, ty: Type) -> Self {
        Expr::new(ExprKind::Symbol(id), ty)
    }

    pub fn symbol_name(name: impl Into<String>, ty: Type) -> Self {
        Expr::symbol(SymbolId::new(name), ty)
    }

    pub fn int(value: impl Into<BigInt>, ty: Type) -> Self {
        Expr::new(ExprKind::Constant(ConstantValue::Integer(value.into())), ty)
    }

    pub fn bool(value: bool) -> Self {
        Expr::new(ExprKind::Constant(ConstantValue::Boolean(value)), Type::Bool)
    }

    pub fn truth() -> Self {
        Expr::bool(true)
    }

    pub fn falsity() -> Self {
        Expr::bool(false)
    }

    pub fn null(ty: Type) -> Self {
        Expr::new(ExprKind::Constant(ConstantValue::Null), ty)
    }

    pub fn nondet(ty: Type) -> Self {
        Expr::new(ExprKind::SideEffect(SideEffect::Nondet), ty)
    }

    pub fn nil() -> Self {
        Expr::new(ExprKind::Nil, Type::Empty)
    }

    fn binary(op: BinOp, lhs: Expr, rhs: Expr, ty: Type) -> Self {
        Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
        )
    }

    pub fn add(self, other: Expr) -> Self {
        let ty = self.ty.clone();
        Expr::binary(BinOp::Add, self, other, ty)
    }

    pub fn sub(self, other: Expr) -> Self {
        let ty = self.ty.clone();
        Expr::binary(BinOp::Sub, self, other, ty)
    }

    pub fn mul(self, other: Expr) -> Self {
        let ty = self.ty.clone();
        Expr::binary(BinOp::Mul, self, other, ty)
    }

    pub fn eq_expr(self, other: Expr) -> Self {
        Expr::binary(BinOp::Eq, self, other, Type::Bool)
    }

    pub fn ne_expr(self, other: Expr) -> Self {
        Expr::binary(BinOp::Ne, self, other, Type::Bool)
    }

    pub fn lt(self, other: Expr) -> Self {
        Expr::binary(BinOp::Lt, self, other, Type::Bool)
    }

    pub fn le(self, other: Expr) -> Self {
        Expr::binary(BinOp::Le, self, other, Type::Bool)
    }

    pub fn gt(self, other: Expr) -> Self {
        Expr::binary(BinOp::Gt, self, other, Type::Bool)
    }

    pub fn ge(self, other: Expr) -> Self {
        Expr::binary(BinOp::Ge, self, other, Type::Bool)
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::binary(BinOp::And, self, other, Type::Bool)
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::binary(BinOp::Or, self, other, Type::Bool)
    }

    pub fn implies(self, other: Expr) -> Self {
        Expr::binary(BinOp::Implies, self, other, Type::Bool)
    }

    pub fn not(self) -> Self {
        Expr::new(
            ExprKind::Unary {
                op: UnOp::Not,
                operand: Box::new(self),
            },
            Type::Bool,
        )
    }

    pub fn neg(self) -> Self {
        let ty = self.ty.clone();
        Expr::new(
            ExprKind::Unary {
                op: UnOp::Neg,
                operand: Box::new(self),
            },
            ty,
        )
    }

    pub fn ite(cond: Expr, then_case: Expr, else_case: Expr) -> Self {
        let ty = then_case.ty.clone();
        Expr::new(
            ExprKind::IfThenElse {
                cond: Box::new(cond),
                then_case: Box::new(then_case),
                else_case: Box::new(else_case),
            },
            ty,
        )
    }

    pub fn index(self, index: Expr) -> Self {
        let ty = self.ty.element().cloned().unwrap_or(Type::Empty);
        Expr::new(
            ExprKind::Index {
                array: Box::new(self),
                index: Box::new(index),
            },
            ty,
        )
    }

    pub fn member(self, component: impl Into<String>) -> Self {
        let component = component.into();
        let ty = self.ty.component(&component).cloned().unwrap_or(Type::Empty);
        Expr::new(
            ExprKind::Member {
                compound: Box::new(self),
                component,
            },
            ty,
        )
    }

    pub fn deref(self) -> Self {
        let ty = self.ty.pointee().cloned().unwrap_or(Type::Empty);
        Expr::new(
            ExprKind::Dereference {
                pointer: Box::new(self),
            },
            ty,
        )
    }

    pub fn address_of(self) -> Self {
        let ty = Type::pointer_to(self.ty.clone());
        Expr::new(
            ExprKind::AddressOf {
                object: Box::new(self),
            },
            ty,
        )
    }

    pub fn cast(self, ty: Type) -> Self {
        Expr::new(
            ExprKind::Cast {
                operand: Box::new(self),
            },
            ty,
        )
    }

    pub fn byte_extract(self, offset: Expr, ty: Type) -> Self {
        Expr::new(
            ExprKind::ByteExtract {
                container: Box::new(self),
                offset: Box::new(offset),
            },
            ty,
        )
    }

    pub fn let_in(binding: SymbolId, value: Expr, body: Expr) -> Self {
        let ty = body.ty.clone();
        Expr::new(
            ExprKind::Let {
                binding,
                value: Box::new(value),
                body: Box::new(body),
            },
            ty,
        )
    }

    pub fn apply(function: impl Into<String>, arguments: Vec<Expr>, ty: Type) -> Self {
        Expr::new(
            ExprKind::FunctionApp {
                function: function.into(),
                arguments,
            },
            ty,
        )
    }

    pub fn update_index(self, index: Expr, value: Expr) -> Self {
        let ty = self.ty.clone();
        Expr::new(
            ExprKind::Update {
                compound: Box::new(self),
                designator: Designator::Index(Box::new(index)),
                value: Box::new(value),
            },
            ty,
        )
    }

    pub fn update_member(self, component: impl Into<String>, value: Expr) -> Self {
        let ty = self.ty.clone();
        Expr::new(
            ExprKind::Update {
                compound: Box::new(self),
                designator: Designator::Member(component.into()),
                value: Box::new(value),
            },
            ty,
        )
    }

    pub fn update_byte(self, offset: Expr, value: Expr) -> Self {
        let ty = self.ty.clone();
        Expr::new(
            ExprKind::Update {
                compound: Box::new(self),
                designator: Designator::Byte(Box::new(offset)),
                value: Box::new(value),
            },
            ty,
        )
    }

    pub fn array_literal(elements: Vec<Expr>, element_ty: Type) -> Self {
        let size = elements.len();
        Expr::new(
            ExprKind::ArrayLiteral { elements },
            Type::array_of(element_ty, Some(size)),
        )
    }

    // ------------------------------------------------------------------
    // Predicates
    // ------------------------------------------------------------------

    pub fn is_true(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Constant(ConstantValue::Boolean(true))
        )
    }

    pub fn is_false(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Constant(ConstantValue::Boolean(false))
        )
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Constant(_))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.kind, ExprKind::Nil)
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self.kind, ExprKind::Symbol(_))
    }

    pub fn as_symbol(&self) -> Option<&SymbolId> {
        match &self.kind {
            ExprKind::Symbol(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_int_constant(&self) -> Option<&BigInt> {
        match &self.kind {
            ExprKind::Constant(ConstantValue::Integer(i)) => Some(i),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Visit this expression and all subexpressions, pre-order.
    pub fn for_each_subexpr<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        for child in self.children() {
            child.for_each_subexpr(f);
        }
    }

    fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Symbol(_) | ExprKind::Constant(_) | ExprKind::Nil => vec![],
            ExprKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            ExprKind::Unary { operand, .. } => vec![operand],
            ExprKind::IfThenElse {
                cond,
                then_case,
                else_case,
            } => vec![cond, then_case, else_case],
            ExprKind::Index { array, index } => vec![array, index],
            ExprKind::Member { compound, .. } => vec![compound],
            ExprKind::Dereference { pointer } => vec![pointer],
            ExprKind::AddressOf { object } => vec![object],
            ExprKind::Cast { operand } => vec![operand],
            ExprKind::ByteExtract { container, offset } => vec![container, offset],
            ExprKind::FunctionApp { arguments, .. } => arguments.iter().collect(),
            ExprKind::Let { value, body, .. } => vec![value, body],
            ExprKind::Quantifier { body, .. } => vec![body],
            ExprKind::SideEffect(se) => match se {
                SideEffect::Nondet | SideEffect::StatementExpr => vec![],
                SideEffect::Allocate { size, .. } => vec![size],
                SideEffect::FunctionCall {
                    function,
                    arguments,
                } => {
                    let mut v: Vec<&Expr> = vec![function];
                    v.extend(arguments.iter());
                    v
                }
                SideEffect::Throw { value } => vec![value],
            },
            ExprKind::ArrayLiteral { elements } => elements.iter().collect(),
            ExprKind::Update {
                compound,
                designator,
                value,
            } => {
                let mut v: Vec<&Expr> = vec![compound];
                match designator {
                    Designator::Index(i) | Designator::Byte(i) => v.push(i),
                    Designator::Member(_) => {}
                }
                v.push(value);
                v
            }
        }
    }

    /// Rewrite the tree bottom-up: children are mapped first, then `f` is
    /// applied to the rebuilt node. Structural hashes are refreshed along the
    /// way.
    pub fn map_subexprs(self, f: &mut impl FnMut(Expr) -> Expr) -> Expr {
        let Expr {
            kind, ty, source, ..
        } = self;
        let map_box =
            |e: Box<Expr>, f: &mut dyn FnMut(Expr) -> Expr| Box::new(map_expr(*e, f));
        let kind = match kind {
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
                arguments: arguments.into_iter().map(|a| map_expr(a, f)).collect(),
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
                    arguments: arguments.into_iter().map(|a| map_expr(a, f)).collect(),
                },
                SideEffect::Throw { value } => SideEffect::Throw {
                    value: map_box(value, f),
                },
                other => other,
            }),
            ExprKind::ArrayLiteral { elements } => ExprKind::ArrayLiteral {
                elements: elements.into_iter().map(|e| map_expr(e, f)).collect(),
            },
            ExprKind::Update {
                compound,
                designator,
                value,
            } => ExprKind::Update {
                compound: map_box(compound, f),
                designator: match designator {
                    Designator::Index(i) => Designator::Index(map_box(i, f)),
                    Designator::Member(m) => Designator::Member(m),
                    Designator::Byte(o) => Designator::Byte(map_box(o, f)),
                },
                value: map_box(value, f),
            },
        };
        let mut rebuilt = Expr::new(kind, ty);
        if let Some(src) = source {
            rebuilt = rebuilt.with_source(src);
        }
        f(rebuilt)
    }

    /// Collect the symbols occurring free (not let- or quantifier-bound).
    pub fn free_symbols(&self) -> Vec<&SymbolId> {
        let mut out = Vec::new();
        collect_free(self, &mut Vec::new(), &mut out);
        out
    }
}

fn map_expr(e: Expr, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
    e.map_subexprs(&mut |x| f(x))
}

fn collect_free<'a>(e: &'a Expr, bound: &mut Vec<String>, out: &mut Vec<&'a SymbolId>) {
    match e.kind() {
        ExprKind::Symbol(id) => {
            if !bound.iter().any(|b| *b == id.name) {
                out.push(id);
            }
        }
        ExprKind::Let {
            binding,
            value,
            body,
        } => {
            collect_free(value, bound, out);
            bound.push(binding.name.clone());
            collect_free(body, bound, out);
            bound.pop();
        }
        ExprKind::Quantifier { bound: bs, body, .. } => {
            let n = bs.len();
            for (b, _) in bs {
                bound.push(b.name.clone());
            }
            collect_free(body, bound, out);
            for _ in 0..n {
                bound.pop();
            }
        }
        _ => {
            for child in e.children() {
                collect_free(child, bound, out);
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::Symbol(id) => write!(f, "{id}"),
            ExprKind::Constant(ConstantValue::Integer(i)) => write!(f, "{i}"),
            ExprKind::Constant(ConstantValue::Boolean(b)) => write!(f, "{b}"),
            ExprKind::Constant(ConstantValue::Null) => write!(f, "NULL"),
            ExprKind::Binary { op, lhs, rhs } => {
                let sym = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::Rem => "%",
                    BinOp::Eq => "==",
                    BinOp::Ne => "!=",
                    BinOp::Lt => "<",
                    BinOp::Le => "<=",
                    BinOp::Gt => ">",
                    BinOp::Ge => ">=",
                    BinOp::And => "&&",
                    BinOp::Or => "||",
                    BinOp::Implies => "=>",
                    BinOp::BitAnd => "&",
                    BinOp::BitOr => "|",
                    BinOp::BitXor => "^",
                    BinOp::Shl => "<<",
                    BinOp::Shr => ">>",
                };
                write!(f, "({lhs} {sym} {rhs})")
            }
            ExprKind::Unary { op, operand } => match op {
                UnOp::Not => write!(f, "!{operand}"),
                UnOp::Neg => write!(f, "-{operand}"),
                UnOp::BitNot => write!(f, "~{operand}"),
            },
            ExprKind::IfThenElse {
                cond,
                then_case,
                else_case,
            } => write!(f, "({cond} ? {then_case} : {else_case})"),
            ExprKind::Index { array, index } => write!(f, "{array}[{index}]"),
            ExprKind::Member {
                compound,
                component,
            } => write!(f, "{compound}.{component}"),
            ExprKind::Dereference { pointer } => write!(f, "*{pointer}"),
            ExprKind::AddressOf { object } => write!(f, "&{object}"),
            ExprKind::Cast { operand } => write!(f, "({}){}", self.ty, operand),
            ExprKind::ByteExtract { container, offset } => {
                write!(f, "byte_extract({container}, {offset})")
            }
            ExprKind::FunctionApp {
                function,
                arguments,
            } => {
                write!(f, "{function}(")?;
                for (i, a) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            ExprKind::Let {
                binding,
                value,
                body,
            } => write!(f, "(let {binding} = {value} in {body})"),
            ExprKind::Quantifier { kind, bound, body } => {
                let q = match kind {
                    QuantifierKind::Forall => "forall",
                    QuantifierKind::Exists => "exists",
                };
                write!(f, "({q} ")?;
                for (i, (b, _)) in bound.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{b}")?;
                }
                write!(f, ". {body})")
            }
            ExprKind::SideEffect(SideEffect::Nondet) => write!(f, "nondet({})", self.ty),
            ExprKind::SideEffect(SideEffect::Allocate { size, .. }) => {
                write!(f, "allocate({size})")
            }
            ExprKind::SideEffect(SideEffect::FunctionCall { function, .. }) => {
                write!(f, "call({function})")
            }
            ExprKind::SideEffect(SideEffect::Throw { value }) => write!(f, "throw({value})"),
            ExprKind::SideEffect(SideEffect::StatementExpr) => write!(f, "stmt_expr"),
            ExprKind::ArrayLiteral { elements } => {
                write!(f, "{{")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "}}")
            }
            ExprKind::Update {
                compound,
                designator,
                value,
            } => match designator {
                Designator::Index(i) => write!(f, "({compound} with [{i}] := {value})"),
                Designator::Member(m) => write!(f, "({compound} with .{m} := {value})"),
                Designator::Byte(o) => write!(f, "({compound} with byte {o} := {value})"),
            },
            ExprKind::Nil => write!(f, "nil"),
        }
    }
}
