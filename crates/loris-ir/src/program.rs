use serde::Serialize;
use std::fmt;

use crate::expr::Expr;
use crate::types::Type;

/// A source-language location attached to instructions and equation steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub function: String,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: usize, function: impl Into<String>) -> Self {
        SourceLocation {
            file: file.into(),
            line,
            function: function.into(),
        }
    }

    /// Placeholder for synthetic instructions with no source counterpart.
    pub fn built_in() -> Self {
        SourceLocation::new("<built-in>", 0, "")
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Statement forms folded into the `Other` instruction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OtherStatement {
    /// A printf-style call; arguments are recorded as an output step.
    Printf { arguments: Vec<Expr> },
    /// A trace event with a label and recorded values.
    Trace { event: String, arguments: Vec<Expr> },
    /// An intrinsic pseudo-call; ignored by the engine, logged once per id.
    Fkt { identifier: String },
    /// Associates a constant character array with a pointer in the points-to
    /// store.
    ArrayToPointerAssoc { array: Expr, pointer: Expr },
    /// Heap deallocation of the pointed-to object.
    Delete { pointer: Expr },
    /// An expression evaluated for its side effects only.
    Expression { expr: Expr },
}

/// One GOTO instruction.
///
/// Jump targets are indices into the enclosing function body; an edge whose
/// target does not exceed the jump's own index is a loop back-edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InstructionKind {
    Assign { lhs: Expr, rhs: Expr },
    /// Introduce a local; the operand is a symbol expression.
    Decl { symbol: Expr },
    /// End a local's lifetime.
    Dead { symbol: Expr },
    Assume { condition: Expr },
    Assert {
        condition: Expr,
        msg: String,
        property_id: String,
    },
    /// Conditional jump; `condition` is `true` for an unconditional goto.
    Goto { condition: Expr, target: usize },
    FunctionCall {
        lhs: Option<Expr>,
        function: Expr,
        arguments: Vec<Expr>,
    },
    Return { value: Option<Expr> },
    EndFunction,
    StartThread { target: usize },
    EndThread,
    AtomicBegin,
    AtomicEnd,
    Skip,
    Other { statement: OtherStatement },
    Throw { value: Option<Expr>, tags: Vec<String> },
    /// Push a catch scope: exception tag to handler pc, in match order.
    CatchPush { handlers: Vec<(String, usize)> },
    /// Pop the innermost catch scope.
    CatchPop,
    /// Handler entry; receives the caught exception value.
    Landingpad { lhs: Expr },
    VaStart { lhs: Expr },
    Input { id: String, arguments: Vec<Expr> },
    Output { id: String, arguments: Vec<Expr> },
}

impl InstructionKind {
    /// Short name used by step tracing.
    pub fn name(&self) -> &'static str {
        match self {
            InstructionKind::Assign { .. } => "ASSIGN",
            InstructionKind::Decl { .. } => "DECL",
            InstructionKind::Dead { .. } => "DEAD",
            InstructionKind::Assume { .. } => "ASSUME",
            InstructionKind::Assert { .. } => "ASSERT",
            InstructionKind::Goto { .. } => "GOTO",
            InstructionKind::FunctionCall { .. } => "FUNCTION_CALL",
            InstructionKind::Return { .. } => "RETURN",
            InstructionKind::EndFunction => "END_FUNCTION",
            InstructionKind::StartThread { .. } => "START_THREAD",
            InstructionKind::EndThread => "END_THREAD",
            InstructionKind::AtomicBegin => "ATOMIC_BEGIN",
            InstructionKind::AtomicEnd => "ATOMIC_END",
            InstructionKind::Skip => "SKIP",
            InstructionKind::Other { .. } => "OTHER",
            InstructionKind::Throw { .. } => "THROW",
            InstructionKind::CatchPush { .. } => "CATCH_PUSH",
            InstructionKind::CatchPop => "CATCH_POP",
            InstructionKind::Landingpad { .. } => "LANDINGPAD",
            InstructionKind::VaStart { .. } => "VA_START",
            InstructionKind::Input { .. } => "INPUT",
            InstructionKind::Output { .. } => "OUTPUT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub source: SourceLocation,
    pub labels: Vec<String>,
}

impl Instruction {
    pub fn new(kind: InstructionKind, source: SourceLocation) -> Self {
        Instruction {
            kind,
            source,
            labels: Vec::new(),
        }
    }

    pub fn stateless(kind: InstructionKind) -> Self {
        Instruction::new(kind, SourceLocation::built_in())
    }
}

/// A function parameter: base identifier plus declared type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub identifier: String,
    pub ty: Type,
}

impl Parameter {
    pub fn new(identifier: impl Into<String>, ty: Type) -> Self {
        Parameter {
            identifier: identifier.into(),
            ty,
        }
    }
}

/// A flat instruction list with explicit jump targets.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct GotoProgram {
    pub instructions: Vec<Instruction>,
}

impl GotoProgram {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        GotoProgram { instructions }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }

    /// Indices of instructions targeted by a back-edge (loop heads).
    pub fn loop_heads(&self) -> Vec<usize> {
        let mut heads = Vec::new();
        for (pc, instruction) in self.instructions.iter().enumerate() {
            if let InstructionKind::Goto { target, .. } = instruction.kind {
                if target <= pc && !heads.contains(&target) {
                    heads.push(target);
                }
            }
        }
        heads
    }

    /// Index of the `EndFunction` instruction.
    ///
    /// Every well-formed function body ends with one; front ends guarantee
    /// this the same way they guarantee jump targets are in range.
    pub fn end_of_function(&self) -> Option<usize> {
        self.instructions
            .iter()
            .rposition(|i| matches!(i.kind, InstructionKind::EndFunction))
    }
}

/// A GOTO function: identifier, parameters, and an optional body.
///
/// A missing body means the definition was unavailable to the front end; the
/// engine havocs the call's left-hand side in that case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GotoFunction {
    pub identifier: String,
    pub parameters: Vec<Parameter>,
    pub return_type: Type,
    pub body: Option<GotoProgram>,
}

impl GotoFunction {
    pub fn new(
        identifier: impl Into<String>,
        parameters: Vec<Parameter>,
        return_type: Type,
        body: GotoProgram,
    ) -> Self {
        GotoFunction {
            identifier: identifier.into(),
            parameters,
            return_type,
            body: Some(body),
        }
    }

    pub fn bodyless(
        identifier: impl Into<String>,
        parameters: Vec<Parameter>,
        return_type: Type,
    ) -> Self {
        GotoFunction {
            identifier: identifier.into(),
            parameters,
            return_type,
            body: None,
        }
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}
