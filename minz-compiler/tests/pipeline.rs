use minz_compiler::{CompileError, Compiler, CompilerConfig};
use minz_mir::{Function, Instruction, Module, Op, Param, Type, VReg};

fn square_and_main() -> Module {
    let mut m = Module::new("demo");

    let mut sq = Function::new(
        "square",
        vec![Param {
            name: "x".into(),
            ty: Type::U8,
        }],
        Type::U16,
    );
    sq.push(Instruction::load_param(VReg(1), "x"));
    sq.push(Instruction::load_param(VReg(2), "x"));
    sq.push(Instruction::binary(Op::Mul, VReg(3), VReg(1), VReg(2)));
    sq.push(Instruction::ret(VReg(3)));
    m.functions.push(sq);

    let mut main = Function::new("main", vec![], Type::U16);
    main.push(Instruction::load_const(VReg(1), 12, Type::U8));
    main.push(Instruction::call(VReg(2), "square", vec![VReg(1)]));
    main.push(Instruction::ret(VReg(2)));
    m.functions.push(main);

    m
}

fn compile_with(config: CompilerConfig, module: Module) -> minz_compiler::CompileOutput {
    Compiler::new(config).compile(module).unwrap()
}

/// The flagship flow: a pure call folds at compile time and the Z80
/// backend emits a bare load and return for `main`.
#[test]
fn pure_call_folds_to_a_constant_load() {
    let out = compile_with(CompilerConfig::default(), square_and_main());
    assert_eq!(out.ctie.values_computed, 1);
    assert_eq!(out.ctie.bytes_eliminated, 3);

    let main_at = out.text.find("main:").unwrap();
    let body = &out.text[main_at..];
    assert!(body.contains("    LD HL, 144"));
    assert!(body.contains("    RET"));
    assert!(!body.contains("CALL square"));
}

/// An impure callee survives the whole pipeline untouched.
#[test]
fn impure_call_survives_the_pipeline() {
    let mut m = Module::new("demo");
    m.externs.push("rand".into());
    let mut main = Function::new("main", vec![], Type::U8);
    main.push(Instruction::call(VReg(1), "rand", vec![]));
    main.push(Instruction::ret(VReg(1)));
    m.functions.push(main);

    let out = compile_with(CompilerConfig::default(), m);
    assert_eq!(out.ctie.values_computed, 0);
    assert!(out.text.contains("CALL rand"));
}

/// Optimization level 0 leaves the MIR untouched by the peephole.
#[test]
fn level_zero_disables_the_peephole() {
    let mut m = Module::new("demo");
    let mut f = Function::new("f", vec![], Type::U8);
    f.push(Instruction::load_const(VReg(1), 6, Type::U8));
    f.push(Instruction::load_const(VReg(2), 7, Type::U8));
    f.push(Instruction::binary(Op::Mul, VReg(3), VReg(1), VReg(2)));
    f.push(Instruction::ret(VReg(3)));
    m.functions.push(f);

    let config = CompilerConfig {
        optimization_level: 0,
        enable_execute: false,
        ..CompilerConfig::default()
    };
    let out = compile_with(config, m);
    assert_eq!(out.opt.total(), 0);
    // The multiply survived to codegen as a runtime helper call.
    assert!(out.text.contains("CALL __mul8"));
}

/// CTIE then peephole then CTIE adds nothing over CTIE then peephole.
#[test]
fn ctie_peephole_composition_is_stable() {
    use minz_ctie::CtieEngine;
    use minz_mir::CancelToken;
    use minz_opt::optimize_module;

    let mut m = square_and_main();
    let cancel = CancelToken::new();
    CtieEngine::with_defaults().run(&mut m, &cancel);
    optimize_module(&mut m, 2, &cancel);
    let settled = m.clone();

    let stats = CtieEngine::with_defaults().run(&mut m, &cancel);
    assert_eq!(stats.values_computed, 0);
    assert_eq!(m, settled);
}

/// Level 3 runs the assembly peephole over the backend's output.
#[test]
fn level_three_cleans_the_assembly() {
    let mut m = Module::new("demo");
    let mut f = Function::new("f", vec![], Type::U8);
    // Two branches of a diamond both jump to the same label directly
    // after the jump, which the assembly pass removes as fallthrough.
    f.push(Instruction::load_const(VReg(1), 1, Type::U8));
    f.push(Instruction::jump("end"));
    f.push(Instruction::label("end"));
    f.push(Instruction::ret(VReg(1)));
    m.functions.push(f);

    let relaxed = compile_with(
        CompilerConfig {
            optimization_level: 0,
            ..CompilerConfig::default()
        },
        m.clone(),
    );
    assert!(relaxed.text.contains("JP f_end"));

    let tight = compile_with(
        CompilerConfig {
            optimization_level: 3,
            ..CompilerConfig::default()
        },
        m,
    );
    assert!(!tight.text.contains("JP f_end"));
}

/// Unknown backends are a hard error.
#[test]
fn unknown_backend_is_rejected() {
    let config = CompilerConfig {
        target_backend: "pdp11".to_string(),
        ..CompilerConfig::default()
    };
    let err = Compiler::new(config)
        .compile(square_and_main())
        .unwrap_err();
    assert!(matches!(err, CompileError::Codegen(_)));
}

/// Undefined symbols are caught by verification before any pass runs.
#[test]
fn verification_rejects_undefined_symbols() {
    let mut m = Module::new("demo");
    let mut main = Function::new("main", vec![], Type::U8);
    main.push(Instruction::call(VReg(1), "missing", vec![]));
    main.push(Instruction::ret(VReg(1)));
    m.functions.push(main);

    let err = Compiler::new(CompilerConfig::default()).compile(m).unwrap_err();
    assert!(matches!(err, CompileError::Module(_)));
}

/// A cancelled compiler produces no output.
#[test]
fn cancellation_discards_the_module() {
    let compiler = Compiler::new(CompilerConfig::default());
    compiler.cancel_token().cancel();
    let err = compiler.compile(square_and_main()).unwrap_err();
    assert!(matches!(err, CompileError::Cancelled));
}

/// Debug mode produces a MIR dump reflecting the optimized module.
#[test]
fn debug_mode_dumps_mir() {
    let config = CompilerConfig {
        debug: true,
        ..CompilerConfig::default()
    };
    let out = compile_with(config, square_and_main());
    let dump = out.mir_dump.expect("dump requested");
    assert!(dump.contains("fn main() -> u16 {"));
    // The call was already replaced when the dump was taken.
    assert!(dump.contains("#144"));
    assert!(out
        .diagnostics
        .items()
        .iter()
        .any(|d| d.message.contains("saved 3 bytes")));
}

/// The same module compiles on every registered backend; the portable
/// targets carry the same wrap semantics in source form.
#[test]
fn cross_backend_compile_parity() {
    for backend in ["z80", "6502", "i8080", "gb", "68000", "c", "llvm", "wasm"] {
        let config = CompilerConfig {
            target_backend: backend.to_string(),
            ..CompilerConfig::default()
        };
        let out = compile_with(config, square_and_main());
        assert!(!out.text.is_empty(), "{backend} emitted nothing");
        // CTIE ran before backend selection, so every target sees the
        // folded constant.
        assert!(
            out.text.contains("144"),
            "{backend} lost the folded constant"
        );
    }
}

/// The front-end handoff format round-trips through serde.
#[test]
fn module_round_trips_through_json() {
    let m = square_and_main();
    let json = serde_json::to_string(&m).unwrap();
    let back: Module = serde_json::from_str(&json).unwrap();
    assert_eq!(m, back);
}
