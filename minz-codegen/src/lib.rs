//! Pluggable backend framework.
//!
//! Every code generator consumes the same declarative substrate (a
//! [`Toolkit`] of instruction patterns, calling-convention descriptors,
//! register maps, type sizes and feature flags) and registers a
//! constructor under a name. The pipeline selects one by configuration.

use std::collections::HashMap;

use minz_mir::Module;
use thiserror::Error;

mod backends;
mod base;
mod toolkit;
mod z80;

pub use backends::{
    CBackend, GameBoyBackend, I8080Backend, LlvmBackend, M68kBackend, Mos6502Backend,
    WasmBackend,
};
pub use base::BaseGenerator;
pub use toolkit::{expand, Bindings, CallConvDesc, CallModel, Features, Toolkit};
pub use z80::Z80Backend;

/// Hard code-generation errors; soft problems surface as diagnostics on
/// the output instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    /// The requested backend name has no registered constructor.
    #[error("backend `{0}` is not registered")]
    BackendNotRegistered(String),
}

/// Result of one backend invocation: the output text plus soft
/// diagnostics (unknown opcodes and the like) gathered along the way.
#[derive(Debug, Clone, Default)]
pub struct GenOutput {
    /// Generated assembly (or C / LLVM IR / WebAssembly text).
    pub text: String,
    /// Soft diagnostics; the compile proceeds despite them.
    pub diagnostics: Vec<String>,
}

/// Knobs the orchestrator passes down to a backend.
#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// Permit the self-modifying-code calling convention (Z80).
    pub emit_smc: bool,
    /// Base address of the virtual-register spill area in RAM.
    pub spill_base: u16,
    /// Code origin for `ORG`-style targets.
    pub org: u16,
    /// Interrupt handlers end with `RETN` instead of `RETI`.
    pub use_retn: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            emit_smc: true,
            spill_base: 0xF000,
            org: 0x8000,
            use_retn: false,
        }
    }
}

/// A code generator for one target.
pub trait Backend {
    /// Registry name of the backend.
    fn name(&self) -> &'static str;

    /// The declarative substrate this backend was built from.
    fn toolkit(&self) -> &Toolkit;

    /// Generate target text for a whole module.
    fn generate(&mut self, module: &Module, opts: &CodegenOptions)
        -> Result<GenOutput, CodegenError>;
}

type Constructor = fn() -> Box<dyn Backend>;

/// Named backend constructors.
///
/// [`BackendRegistry::with_default_backends`] registers the eight in-tree
/// targets; embedders may add their own before pipeline selection.
#[derive(Default)]
pub struct BackendRegistry {
    map: HashMap<&'static str, Constructor>,
}

impl BackendRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every in-tree backend.
    pub fn with_default_backends() -> Self {
        let mut r = Self::new();
        r.register("z80", || Box::new(Z80Backend::new()));
        r.register("6502", || Box::new(Mos6502Backend::new()));
        r.register("i8080", || Box::new(I8080Backend::new()));
        r.register("gb", || Box::new(GameBoyBackend::new()));
        r.register("68000", || Box::new(M68kBackend::new()));
        r.register("c", || Box::new(CBackend::new()));
        r.register("llvm", || Box::new(LlvmBackend::new()));
        r.register("wasm", || Box::new(WasmBackend::new()));
        r
    }

    /// Register a constructor under `name`, replacing any previous one.
    pub fn register(&mut self, name: &'static str, ctor: Constructor) {
        self.map.insert(name, ctor);
    }

    /// Instantiate the backend registered under `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Backend>, CodegenError> {
        self.map
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| CodegenError::BackendNotRegistered(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.map.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_targets() {
        let r = BackendRegistry::with_default_backends();
        assert_eq!(
            r.names(),
            vec!["6502", "68000", "c", "gb", "i8080", "llvm", "wasm", "z80"]
        );
    }

    #[test]
    fn unknown_backend_is_a_hard_error() {
        let r = BackendRegistry::with_default_backends();
        assert_eq!(
            r.create("pdp11").unwrap_err(),
            CodegenError::BackendNotRegistered("pdp11".to_string())
        );
    }

    #[test]
    fn created_backend_reports_its_name() {
        let r = BackendRegistry::with_default_backends();
        assert_eq!(r.create("z80").unwrap().name(), "z80");
        assert_eq!(r.create("6502").unwrap().name(), "6502");
    }
}
