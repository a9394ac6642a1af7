//! Compile-time interface execution (CTIE).
//!
//! The passes in this crate replace calls whose arguments are known at
//! compile time with their computed results. Three cooperating pieces:
//!
//! - [`PurityAnalyzer`] classifies every function as impure, pure or const;
//! - [`ConstTracker`] finds call sites whose arguments are all constants;
//! - [`Executor`] evaluates pure MIR functions on constant arguments.
//!
//! [`CtieEngine`] drives the three in order and rewrites the module in
//! place. Every interpreter failure is recoverable: the offending call is
//! simply left for runtime.

mod builtins;
mod engine;
mod error;
mod exec;
mod purity;
mod tracker;

pub use engine::{CtieConfig, CtieEngine, CtieStats};
pub use error::ExecError;
pub use exec::{ExecLimits, Executor};
pub use purity::PurityAnalyzer;
pub use tracker::{CallSite, ConstTracker};
