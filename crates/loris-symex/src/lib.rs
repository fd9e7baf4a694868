#![doc = include_str!("../README.md")]

//! Symbolic execution engine: renaming, guards, the target equation,
//! execution state, dereferencing, the instruction interpreter, merging, and
//! the path-exploration controller.

pub mod clean;
pub mod config;
pub mod equation;
pub mod error;
pub mod guard;
pub mod merge;
pub mod path_storage;
pub mod renaming;
pub mod state;
pub mod symex;
pub mod unwind;
pub mod value_set;

pub use config::SymexConfig;
pub use equation::{AssignmentKind, Equation, SsaStep};
pub use error::SymexError;
pub use guard::Guard;
pub use path_storage::{FifoPathStorage, LifoPathStorage, PathEntry, PathStorage};
pub use state::{ExecState, Frame, GotoState, Pc};
pub use symex::{Executor, GotoFunctionProvider};
pub use unwind::UnwindLimits;
pub use value_set::{ValueSet, ValueSetTarget};
