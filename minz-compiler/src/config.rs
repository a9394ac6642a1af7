//! Pipeline configuration.

use std::time::Duration;

use minz_ctie::CtieConfig;

/// The orchestrator's option record.
///
/// Everything the thin CLI wrapper or an embedder can turn: which CTIE
/// sub-passes run, the interpreter's wall clock, the optimization level
/// gating the peephole passes, and the target backend.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Run CTIE call replacement.
    pub enable_execute: bool,
    /// Reserved: interface specialization. Accepted and ignored.
    pub enable_specialize: bool,
    /// Reserved: proof obligations. Accepted and ignored.
    pub enable_proof: bool,
    /// Reserved: derived instances. Accepted and ignored.
    pub enable_derive: bool,
    /// Gather pass statistics.
    pub enable_analysis: bool,
    /// Interpreter wall clock per top-level compile-time call.
    pub max_execution_time: Duration,
    /// Reserved alongside `enable_specialize`.
    pub max_specializations: usize,
    /// 0 disables the MIR peephole; 1 enables folding and inc/dec; 2 adds
    /// reordering and loop-invariant hoisting; 3 adds the assembly
    /// peephole.
    pub optimization_level: u8,
    /// Registered backend to emit with.
    pub target_backend: String,
    /// Permit the Z80 backend to choose the SMC convention.
    pub emit_smc: bool,
    /// Verbose pass reports and MIR dumps.
    pub debug: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            enable_execute: true,
            enable_specialize: false,
            enable_proof: false,
            enable_derive: false,
            enable_analysis: true,
            max_execution_time: Duration::from_millis(1000),
            max_specializations: 100,
            optimization_level: 2,
            target_backend: "z80".to_string(),
            emit_smc: true,
            debug: false,
        }
    }
}

impl CompilerConfig {
    /// The CTIE slice of the configuration.
    pub fn ctie(&self) -> CtieConfig {
        CtieConfig {
            enable_execute: self.enable_execute,
            enable_specialize: self.enable_specialize,
            enable_proof: self.enable_proof,
            enable_derive: self.enable_derive,
            enable_analysis: self.enable_analysis,
            max_execution_time: self.max_execution_time,
            max_specializations: self.max_specializations,
            debug: self.debug,
        }
    }
}
