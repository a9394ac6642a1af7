//! Pattern-rewriting optimizers.
//!
//! Two layers: window-based rewriting over MIR function bodies (strength
//! reduction, dead code, redundancy elimination, reordering, loop-invariant
//! hoisting), and a second, line-based peephole over emitted assembly text.
//! Every rewrite preserves the observable behavior of the function under
//! the backend's register semantics.

mod asm;
mod licm;
mod peephole;
mod reorder;

pub use asm::{optimize_asm, serialize, tokenize, Arch, AsmLine};
pub use licm::hoist_loop_invariants;
pub use peephole::{optimize_function, optimize_module, OptStats};
pub use reorder::sink_constants;
