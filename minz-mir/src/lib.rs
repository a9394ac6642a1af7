//! Middle intermediate representation for the MinZ compiler.
//!
//! MIR is the typed, register-based instruction form that sits between the
//! front-end's AST and the backend's assembly output. Every pass of the
//! optimizer (compile-time execution, peephole rewriting, code generation)
//! consumes and produces the structures defined here.

#![warn(missing_docs)]

mod cancel;
mod error;
mod instruction;
mod labels;
mod module;
mod opcode;
mod types;
mod value;

pub use cancel::CancelToken;
pub use error::ModuleError;
pub use instruction::{EmitHint, Instruction, VReg};
pub use labels::LabelMap;
pub use module::{
    CallConv, Function, Global, Local, LocalSlot, Module, Param, Purity, StringData,
};
pub use opcode::Op;
pub use types::Type;
pub use value::{eval_binary, eval_unary, EvalError, Value};

/// Commonly used MIR types, for glob import by the pass crates.
pub mod prelude {
    pub use crate::cancel::CancelToken;
    pub use crate::error::ModuleError;
    pub use crate::instruction::{EmitHint, Instruction, VReg};
    pub use crate::labels::LabelMap;
    pub use crate::module::{
        CallConv, Function, Global, Local, LocalSlot, Module, Param, Purity, StringData,
    };
    pub use crate::opcode::Op;
    pub use crate::types::Type;
    pub use crate::value::{eval_binary, eval_unary, EvalError, Value};
}
