//! Shared helpers: a small builder for GOTO programs and a one-call runner.

#![allow(dead_code)]

use indexmap::IndexMap;

use loris_ir::{
    Expr, GotoFunction, GotoProgram, Instruction, InstructionKind, Parameter, SourceLocation,
    SymbolTable, Type,
};
use loris_symex::{Equation, Executor, LifoPathStorage, SsaStep, SymexConfig};

pub fn int() -> Type {
    Type::signed_int()
}

pub fn int_ptr() -> Type {
    Type::pointer_to(int())
}

pub fn sym(name: &str) -> Expr {
    Expr::symbol_name(name, int())
}

pub fn bool_sym(name: &str) -> Expr {
    Expr::symbol_name(name, Type::Bool)
}

pub fn n(value: i64) -> Expr {
    Expr::int(value, int())
}

/// Builds one function body instruction by instruction.
pub struct ProgramBuilder {
    name: String,
    parameters: Vec<Parameter>,
    instructions: Vec<Instruction>,
    line: usize,
}

impl ProgramBuilder {
    pub fn function(name: &str) -> Self {
        ProgramBuilder {
            name: name.into(),
            parameters: Vec::new(),
            instructions: Vec::new(),
            line: 0,
        }
    }

    pub fn parameter(mut self, identifier: &str, ty: Type) -> Self {
        self.parameters.push(Parameter::new(identifier, ty));
        self
    }

    fn push(mut self, kind: InstructionKind) -> Self {
        self.line += 1;
        let source = SourceLocation::new("test.c", self.line, self.name.clone());
        self.instructions.push(Instruction::new(kind, source));
        self
    }

    pub fn decl(self, symbol: Expr) -> Self {
        self.push(InstructionKind::Decl { symbol })
    }

    pub fn dead(self, symbol: Expr) -> Self {
        self.push(InstructionKind::Dead { symbol })
    }

    pub fn assign(self, lhs: Expr, rhs: Expr) -> Self {
        self.push(InstructionKind::Assign { lhs, rhs })
    }

    pub fn assume(self, condition: Expr) -> Self {
        self.push(InstructionKind::Assume { condition })
    }

    pub fn assert(self, condition: Expr, msg: &str) -> Self {
        self.push(InstructionKind::Assert {
            condition,
            msg: msg.into(),
            property_id: String::new(),
        })
    }

    pub fn goto_if(self, condition: Expr, target: usize) -> Self {
        self.push(InstructionKind::Goto { condition, target })
    }

    pub fn goto(self, target: usize) -> Self {
        self.push(InstructionKind::Goto {
            condition: Expr::truth(),
            target,
        })
    }

    pub fn call(self, lhs: Option<Expr>, function: &str, arguments: Vec<Expr>) -> Self {
        let fn_ty = Type::code(vec![], int());
        self.push(InstructionKind::FunctionCall {
            lhs,
            function: Expr::symbol_name(function, fn_ty),
            arguments,
        })
    }

    pub fn ret(self, value: Expr) -> Self {
        self.push(InstructionKind::Return { value: Some(value) })
    }

    pub fn skip(self) -> Self {
        self.push(InstructionKind::Skip)
    }

    pub fn start_thread(self, target: usize) -> Self {
        self.push(InstructionKind::StartThread { target })
    }

    pub fn end_thread(self) -> Self {
        self.push(InstructionKind::EndThread)
    }

    pub fn raw(self, kind: InstructionKind) -> Self {
        self.push(kind)
    }

    pub fn build(self) -> GotoFunction {
        let mut this = self.push(InstructionKind::EndFunction);
        let body = GotoProgram::new(std::mem::take(&mut this.instructions));
        GotoFunction::new(this.name.clone(), this.parameters.clone(), int(), body)
    }
}

pub fn functions_of(list: Vec<GotoFunction>) -> IndexMap<String, GotoFunction> {
    list.into_iter().map(|f| (f.identifier.clone(), f)).collect()
}

/// Run a whole program in single-path (merging) mode.
pub fn run(
    functions: &IndexMap<String, GotoFunction>,
    outer: &SymbolTable,
    config: SymexConfig,
) -> Equation {
    let mut storage = LifoPathStorage::new();
    let mut executor = Executor::new(config, outer, &mut storage);
    let mut new_table = SymbolTable::new();
    let equation = executor
        .symex_from_entry_point(functions, &mut new_table)
        .expect("symbolic execution failed");
    equation.validate().expect("equation failed validation");
    equation
}

/// Run and also report (total, remaining) VCC counts.
pub fn run_counting_vccs(
    functions: &IndexMap<String, GotoFunction>,
    outer: &SymbolTable,
    config: SymexConfig,
) -> (Equation, usize, usize) {
    let mut storage = LifoPathStorage::new();
    let mut executor = Executor::new(config, outer, &mut storage);
    let mut new_table = SymbolTable::new();
    let equation = executor
        .symex_from_entry_point(functions, &mut new_table)
        .expect("symbolic execution failed");
    equation.validate().expect("equation failed validation");
    let total = executor.get_total_vccs().expect("run finished");
    let remaining = executor.get_remaining_vccs().expect("run finished");
    (equation, total, remaining)
}

/// State (non-hidden, non-phi) assignments to the given base name.
pub fn assignments_to<'a>(equation: &'a Equation, base: &str) -> Vec<&'a SsaStep> {
    equation
        .iter()
        .filter(|step| match step {
            SsaStep::Assignment { lhs, .. } => {
                lhs.as_symbol().map(|s| s.name.as_str()) == Some(base)
            }
            _ => false,
        })
        .collect()
}

/// SSA versions assigned to the given base name, in equation order.
pub fn versions_of(equation: &Equation, base: &str) -> Vec<usize> {
    assignments_to(equation, base)
        .iter()
        .filter_map(|step| match step {
            SsaStep::Assignment { lhs, .. } => lhs.as_symbol().and_then(|s| s.version),
            _ => None,
        })
        .collect()
}

pub fn asserts(equation: &Equation) -> Vec<&SsaStep> {
    equation.iter().filter(|s| s.is_assert()).collect()
}
