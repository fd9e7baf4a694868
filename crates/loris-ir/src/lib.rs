#![doc = include_str!("../README.md")]

//! GOTO-program IR: types, expressions, instructions, symbol table, and the
//! expression simplifier consumed by the symbolic execution engine.

pub mod expr;
pub mod program;
pub mod simplify;
pub mod symbol_table;
pub mod types;

pub use expr::{
    BinOp, ConstantValue, Designator, Expr, ExprKind, QuantifierKind, SideEffect, SymbolId, UnOp,
};
pub use program::{
    GotoFunction, GotoProgram, Instruction, InstructionKind, OtherStatement, Parameter,
    SourceLocation,
};
pub use simplify::simplify;
pub use symbol_table::{Symbol, SymbolTable};
pub use types::Type;
