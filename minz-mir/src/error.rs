//! Hard module-level errors.

use thiserror::Error;

/// Structural errors that stop compilation of the module.
///
/// Everything here is a hard error: unlike interpreter failures (which the
/// compile-time-execution engine recovers from), a module that fails these
/// checks cannot be lowered at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    /// A jump targets a label not defined in the same function.
    #[error("undefined label `{label}` in function `{function}`")]
    UndefinedLabel {
        /// Function containing the jump.
        function: String,
        /// The unresolved label.
        label: String,
    },
    /// Two labels with the same name in one function.
    #[error("duplicate label `{label}` in function `{function}`")]
    DuplicateLabel {
        /// Function containing the labels.
        function: String,
        /// The duplicated label.
        label: String,
    },
    /// An instruction references a symbol that resolves to nothing.
    #[error("undefined symbol `{symbol}` referenced from function `{function}`")]
    UndefinedSymbol {
        /// Function containing the reference.
        function: String,
        /// The unresolved symbol.
        symbol: String,
    },
}
