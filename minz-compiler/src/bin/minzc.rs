//! The thin driver around the pipeline.
//!
//! Consumes a module file produced by the front-end (JSON module
//! descriptor), runs the pipeline, writes the target text. Exit codes:
//! 0 success, 1 compile error, 2 internal error.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use minz_compiler::{Compiler, CompilerConfig};
use minz_mir::Module;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "minzc", version, about = "MinZ optimizer and code generator")]
struct Args {
    /// Input module file (JSON module descriptor from the front-end).
    input: PathBuf,
    /// Output file; defaults to the input with the target's extension.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Optimization level (0-3).
    #[arg(short = 'O', long = "opt-level", default_value_t = 2)]
    optimization: u8,
    /// Target backend.
    #[arg(short = 'b', long, default_value = "z80")]
    backend: String,
    /// Disable the SMC calling convention.
    #[arg(long)]
    no_smc: bool,
    /// Write a MIR dump next to the output.
    #[arg(long)]
    dump_mir: bool,
    /// Informational logging.
    #[arg(short, long)]
    verbose: bool,
    /// Debug logging and verbose pass reports.
    #[arg(long)]
    debug: bool,
}

fn extension(backend: &str) -> &'static str {
    match backend {
        "c" => "c",
        "llvm" => "ll",
        "wasm" => "wat",
        _ => "a80",
    }
}

fn run(args: &Args) -> anyhow::Result<ExitCode> {
    let source = std::fs::read_to_string(&args.input)
        .with_context(|| format!("cannot read {}", args.input.display()))?;
    let module: Module = match serde_json::from_str(&source) {
        Ok(m) => m,
        Err(err) => {
            // Front-end handoff problems are compile errors, not crashes.
            eprintln!("error: {}: invalid module: {err}", args.input.display());
            return Ok(ExitCode::from(1));
        }
    };

    let config = CompilerConfig {
        optimization_level: args.optimization.min(3),
        target_backend: args.backend.clone(),
        emit_smc: !args.no_smc,
        debug: args.debug || args.dump_mir,
        ..CompilerConfig::default()
    };
    let compiler = Compiler::new(config);

    let output = match compiler.compile(module) {
        Ok(out) => out,
        Err(err) => {
            eprintln!("error: {err}");
            return Ok(ExitCode::from(1));
        }
    };

    if !output.diagnostics.is_empty() {
        eprint!("{}", output.diagnostics.render());
    }

    let path = args.output.clone().unwrap_or_else(|| {
        args.input.with_extension(extension(&args.backend))
    });
    std::fs::write(&path, &output.text)
        .with_context(|| format!("cannot write {}", path.display()))?;

    if args.dump_mir {
        if let Some(dump) = &output.mir_dump {
            let dump_path = path.with_extension("mir");
            std::fs::write(&dump_path, dump)
                .with_context(|| format!("cannot write {}", dump_path.display()))?;
        }
    }

    if args.verbose || args.debug {
        eprintln!(
            "compiled to {} ({} call(s) computed at compile time, {} rewrite(s))",
            path.display(),
            output.ctie.values_computed,
            output.opt.total()
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            // I/O and other unexpected failures are internal errors.
            eprintln!("internal error: {err:#}");
            ExitCode::from(2)
        }
    }
}
