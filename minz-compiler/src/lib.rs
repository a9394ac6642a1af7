//! The MinZ optimization pipeline.
//!
//! Stages run strictly in order per module: verify, compile-time
//! execution, MIR peephole, backend emission, assembly peephole. The
//! passes share nothing across modules, so an embedder may compile
//! independent modules in parallel; within one module the purity cache
//! and constant tracker make the order load-bearing.

mod config;
mod diagnostics;

use minz_codegen::{BackendRegistry, CodegenError, CodegenOptions};
use minz_ctie::{CtieEngine, CtieStats};
use minz_mir::{CancelToken, Module, ModuleError};
use minz_opt::{optimize_asm, optimize_module, Arch, OptStats};
use thiserror::Error;
use tracing::{debug, info};

pub use config::CompilerConfig;
pub use diagnostics::{Diagnostic, Diagnostics, Severity};

/// Hard pipeline failures. Soft problems land in the diagnostics buffer
/// of the output instead.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The module failed structural verification.
    #[error(transparent)]
    Module(#[from] ModuleError),
    /// Backend selection or generation failed.
    #[error(transparent)]
    Codegen(#[from] CodegenError),
    /// The cancel signal fired; no output was produced.
    #[error("compilation cancelled")]
    Cancelled,
}

/// Result of one successful pipeline run.
#[derive(Debug)]
pub struct CompileOutput {
    /// Target text: assembly, C, LLVM IR or WebAssembly.
    pub text: String,
    /// Textual MIR dump, when `debug` asked for one.
    pub mir_dump: Option<String>,
    /// CTIE accounting.
    pub ctie: CtieStats,
    /// Peephole accounting.
    pub opt: OptStats,
    /// Soft diagnostics gathered along the way.
    pub diagnostics: Diagnostics,
}

/// The per-invocation pipeline driver.
pub struct Compiler {
    config: CompilerConfig,
    registry: BackendRegistry,
    cancel: CancelToken,
}

impl Compiler {
    /// Compiler over the default backend registry.
    pub fn new(config: CompilerConfig) -> Self {
        Self::with_registry(config, BackendRegistry::with_default_backends())
    }

    /// Compiler over a caller-supplied registry.
    pub fn with_registry(config: CompilerConfig, registry: BackendRegistry) -> Self {
        Compiler {
            config,
            registry,
            cancel: CancelToken::new(),
        }
    }

    /// Handle for cooperative cancellation; cancel it from any thread and
    /// the current module is discarded at the next pass boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Map a backend name to the assembly-peephole architecture tag.
    /// The portable targets (C, LLVM, WebAssembly) have no assembly pass.
    fn asm_arch(name: &str) -> Option<Arch> {
        match name {
            "z80" => Some(Arch::Z80),
            "i8080" => Some(Arch::I8080),
            "gb" => Some(Arch::GameBoy),
            "6502" => Some(Arch::Mos6502),
            "68000" => Some(Arch::M68k),
            _ => None,
        }
    }

    /// Run the whole pipeline on one module.
    pub fn compile(&self, mut module: Module) -> Result<CompileOutput, CompileError> {
        let mut diagnostics = Diagnostics::new();

        module.verify()?;
        if self.cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }

        // Compile-time execution.
        let mut engine = CtieEngine::new(self.config.ctie());
        let ctie = engine.run(&mut module, &self.cancel);
        debug!(?ctie, "ctie finished");

        // MIR peephole.
        let opt = optimize_module(&mut module, self.config.optimization_level, &self.cancel);
        debug!(rewrites = opt.total(), "mir peephole finished");

        if self.cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }

        let mir_dump = self.config.debug.then(|| module.dump());

        // Backend emission.
        let mut backend = self.registry.create(&self.config.target_backend)?;
        let opts = CodegenOptions {
            emit_smc: self.config.emit_smc,
            ..CodegenOptions::default()
        };
        let generated = backend.generate(&module, &opts)?;
        for message in generated.diagnostics {
            diagnostics.warn(message);
        }

        if self.cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }

        // Assembly peephole, level 3 and only for assembly targets.
        let text = if self.config.optimization_level >= 3 {
            match Self::asm_arch(&self.config.target_backend) {
                Some(arch) => optimize_asm(&generated.text, arch),
                None => generated.text,
            }
        } else {
            generated.text
        };

        if self.config.debug && ctie.values_computed > 0 {
            info!(
                "saved {} bytes through compile-time execution",
                ctie.bytes_eliminated
            );
            diagnostics.warn(format!(
                "saved {} bytes through compile-time execution",
                ctie.bytes_eliminated
            ));
        }

        Ok(CompileOutput {
            text,
            mir_dump,
            ctie,
            opt,
            diagnostics,
        })
    }
}
