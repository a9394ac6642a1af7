//! Interpreter failure kinds.

use minz_mir::Op;
use thiserror::Error;

/// Failure while executing MIR at compile time.
///
/// Every variant is recoverable: the engine logs the failure and leaves the
/// original call in place for runtime evaluation. Nothing here aborts the
/// compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// A named local or parameter had no binding.
    #[error("unbound name `{0}` during compile-time execution")]
    UnboundName(String),
    /// The opcode has no compile-time semantics (indirect memory access,
    /// platform intrinsics, SMC pseudo-ops).
    #[error("opcode `{0}` is not supported in compile-time execution")]
    UnsupportedForCte(Op),
    /// A callee classified impure was reached.
    #[error("call to impure function `{0}` during compile-time execution")]
    ImpureCallDuringCte(String),
    /// Division or remainder by zero.
    #[error("division by zero during compile-time execution")]
    DivideByZero,
    /// The per-call instruction budget ran out.
    #[error("instruction budget exceeded during compile-time execution")]
    BudgetExceeded,
    /// Call depth exceeded the recursion cap.
    #[error("recursion too deep during compile-time execution")]
    RecursionTooDeep,
    /// The wall-clock cap for one top-level call ran out.
    #[error("time limit exceeded during compile-time execution")]
    TimeLimitExceeded,
    /// The operand stack was empty where a value was required.
    #[error("operand stack underflow during compile-time execution")]
    StackUnderflow,
    /// The callee resolves to nothing executable.
    #[error("unknown function `{0}` during compile-time execution")]
    UnknownFunction(String),
    /// A jump targeted a label with no definition. The module verifier
    /// reports this as a hard error before execution; seeing it here means
    /// the function was never verified.
    #[error("undefined label `{0}` during compile-time execution")]
    UndefinedLabel(String),
}
