use minz_codegen::{Backend, BackendRegistry, CodegenOptions, Z80Backend};
use minz_mir::{CallConv, Function, Instruction, Module, Op, Param, Type, VReg};

fn p8(name: &str) -> Param {
    Param {
        name: name.into(),
        ty: Type::U8,
    }
}

fn generate(m: &Module) -> String {
    Z80Backend::new()
        .generate(m, &CodegenOptions::default())
        .unwrap()
        .text
}

/// A constant-folded `main` compiles to a bare load and return.
#[test]
fn folded_main_is_two_instructions() {
    let mut m = Module::new("t");
    let mut main = Function::new("main", vec![], Type::U16);
    main.push(Instruction::load_const(VReg(2), 144, Type::U16));
    main.push(Instruction::ret(VReg(2)));
    m.functions.push(main);

    let out = generate(&m);
    assert!(out.contains("    LD HL, 144"));
    assert!(out.contains("    RET"));
}

fn smc_add_module() -> Module {
    let mut m = Module::new("t");

    let mut add = Function::new("add", vec![p8("a"), p8("b")], Type::U8);
    add.push(Instruction::load_param(VReg(1), "a"));
    add.push(Instruction::load_param(VReg(2), "b"));
    add.push(Instruction::binary(Op::Add, VReg(3), VReg(1), VReg(2)));
    add.push(Instruction::ret(VReg(3)));
    m.functions.push(add);

    let mut main = Function::new("main", vec![], Type::U8);
    main.push(Instruction::load_const(VReg(1), 3, Type::U8));
    main.push(Instruction::load_const(VReg(2), 4, Type::U8));
    main.push(Instruction::call(VReg(3), "add", vec![VReg(1), VReg(2)]));
    main.push(Instruction::ret(VReg(3)));
    m.functions.push(main);

    m
}

/// TRUE SMC: anchors with `$immOP`/`$imm0` labels, a bare `ADD A, B`
/// body, and caller-side patch stores before the `CALL`.
#[test]
fn smc_parameters_anchor_into_immediates() {
    let out = generate(&smc_add_module());

    // Callee anchors.
    assert!(out.contains("a$immOP:"));
    assert!(out.contains("a$imm0 EQU a$immOP + 1"));
    assert!(out.contains("b$immOP:"));
    assert!(out.contains("b$imm0 EQU b$immOP + 1"));
    assert!(out.contains("    ADD A, B"));

    // Caller patches, then calls.
    let patch_a = out.find("LD (a$imm0), A").expect("patch for a");
    let patch_b = out.find("LD (b$imm0), A").expect("patch for b");
    let call = out.rfind("CALL add").expect("call");
    assert!(patch_a < call && patch_b < call);
}

/// Sixteen-bit SMC parameters patch two consecutive bytes through HL.
#[test]
fn wide_smc_parameter_patches_through_hl() {
    let mut m = Module::new("t");
    let mut f = Function::new(
        "scale",
        vec![Param {
            name: "n".into(),
            ty: Type::U16,
        }],
        Type::U16,
    );
    f.push(Instruction::load_param(VReg(1), "n"));
    f.push(Instruction::binary_imm(Op::Add, VReg(2), VReg(1), 1));
    f.push(Instruction::ret(VReg(2)));
    m.functions.push(f);

    let mut main = Function::new("main", vec![], Type::U16);
    main.push(Instruction::load_const(VReg(1), 1000, Type::U16));
    main.push(Instruction::call(VReg(2), "scale", vec![VReg(1)]));
    main.push(Instruction::ret(VReg(2)));
    m.functions.push(main);

    let out = generate(&m);
    assert!(out.contains("n$immOP:"));
    assert!(out.contains("    LD HL, 0        ; SMC anchor n"));
    assert!(out.contains("n$imm0 EQU n$immOP + 2"));
    assert!(out.contains("LD (n$imm0), HL"));
}

/// Power-of-two strength reduction emits repeated `ADD A, A`.
#[test_case::test_case(1 ; "times two")]
#[test_case::test_case(3 ; "times eight")]
#[test_case::test_case(6 ; "times sixty-four")]
fn shifts_emit_repeated_adds(count: i64) {
    let mut m = Module::new("t");
    let mut f = Function::new("scaled", vec![p8("x")], Type::U8);
    f.push(Instruction::load_param(VReg(1), "x"));
    let mut shl = Instruction::binary_imm(Op::Shl, VReg(2), VReg(1), count);
    shl.ty = Some(Type::U8);
    f.push(shl);
    f.push(Instruction::ret(VReg(2)));
    m.functions.push(f);

    let out = generate(&m);
    assert_eq!(out.matches("    ADD A, A").count(), count as usize);
}

/// Signed right shifts keep the sign bit.
#[test]
fn signed_shift_uses_sra() {
    let mut m = Module::new("t");
    let mut f = Function::new(
        "halve",
        vec![Param {
            name: "x".into(),
            ty: Type::I8,
        }],
        Type::I8,
    );
    f.push(Instruction::load_param(VReg(1), "x"));
    let mut shr = Instruction::binary_imm(Op::Shr, VReg(2), VReg(1), 1);
    shr.ty = Some(Type::I8);
    f.push(shr);
    f.push(Instruction::ret(VReg(2)));
    m.functions.push(f);

    let out = generate(&m);
    assert!(out.contains("    SRA A"));
}

/// A function whose address is taken silently falls back to the stack
/// convention; no anchors are emitted.
#[test]
fn address_taken_disables_smc() {
    let mut m = Module::new("t");
    let mut f = Function::new("cb", vec![p8("x")], Type::U8);
    f.address_taken = true;
    f.push(Instruction::load_param(VReg(1), "x"));
    f.push(Instruction::ret(VReg(1)));
    m.functions.push(f);

    let out = generate(&m);
    assert!(out.contains("[stack convention]"));
    assert!(!out.contains("$immOP"));
    assert!(out.contains("PUSH IX"));
    assert!(out.contains("LD SP, IX"));
}

/// Recursion (direct or mutual) forces the stack convention.
#[test]
fn recursion_disables_smc() {
    let mut m = Module::new("t");
    for (name, next) in [("even", "odd"), ("odd", "even")] {
        let mut f = Function::new(name, vec![p8("n")], Type::U8);
        f.push(Instruction::load_param(VReg(1), "n"));
        f.push(Instruction::call(VReg(2), next, vec![VReg(1)]));
        f.push(Instruction::ret(VReg(2)));
        m.functions.push(f);
    }
    let out = generate(&m);
    assert!(!out.contains("$immOP"));
    assert_eq!(out.matches("[stack convention]").count(), 2);
}

/// Turning `emit_smc` off steers even eligible functions away from SMC.
#[test]
fn emit_smc_flag_is_respected() {
    let m = smc_add_module();
    let opts = CodegenOptions {
        emit_smc: false,
        ..CodegenOptions::default()
    };
    let out = Z80Backend::new().generate(&m, &opts).unwrap().text;
    assert!(!out.contains("$immOP"));
    assert!(out.contains("[register convention]"));
}

/// ROM placement disables SMC: code in ROM cannot patch itself.
#[test]
fn rom_placement_disables_smc() {
    let mut m = smc_add_module();
    m.function_mut("add").unwrap().in_rom = true;
    let out = generate(&m);
    assert!(!out.contains("$immOP"));
}

/// Interrupt handlers switch to the shadow set and return with RETI.
#[test]
fn interrupt_handlers_use_shadow_registers() {
    let mut m = Module::new("t");
    let mut f = Function::new("vblank", vec![], Type::Void);
    f.interrupt_handler = true;
    f.push(Instruction::ret(VReg::NONE));
    m.functions.push(f);

    let out = generate(&m);
    let exx = out.find("    EXX").unwrap();
    let swap = out.find("    EX AF, AF'").unwrap();
    let reti = out.find("    RETI").unwrap();
    assert!(exx < swap && swap < reti);

    let opts = CodegenOptions {
        use_retn: true,
        ..CodegenOptions::default()
    };
    let out = Z80Backend::new().generate(&m, &opts).unwrap().text;
    assert!(out.contains("    RETN"));
}

/// An explicit convention tag from the front-end is honored when legal.
#[test]
fn explicit_convention_tag_wins() {
    let mut m = smc_add_module();
    m.function_mut("add").unwrap().convention = Some(CallConv::Register);
    let out = generate(&m);
    assert!(out.contains("; fn add(a: u8, b: u8) -> u8 [register convention]"));
    assert!(!out.contains("a$immOP"));
}

/// The zero idiom hint produces `XOR A` instead of a load.
#[test]
fn zero_idiom_emits_xor() {
    let mut m = Module::new("t");
    let mut f = Function::new("zero", vec![], Type::U8);
    let mut lc = Instruction::load_const(VReg(1), 0, Type::U8);
    lc.hints.insert(minz_mir::EmitHint::ZERO_IDIOM);
    f.push(lc);
    f.push(Instruction::ret(VReg(1)));
    m.functions.push(f);

    let out = generate(&m);
    assert!(out.contains("    XOR A"));
    assert!(!out.contains("LD A, 0"));
}

/// SMC parameter reassignment degrades later reads to the patched bytes.
#[test]
fn reassigned_smc_parameter_reads_memory() {
    let mut m = Module::new("t");
    let mut f = Function::new("bump", vec![p8("x")], Type::U8);
    f.push(Instruction::load_const(VReg(1), 7, Type::U8));
    f.push(Instruction::store_var("x", VReg(1)));
    f.push(Instruction::load_param(VReg(2), "x"));
    f.push(Instruction::ret(VReg(2)));
    m.functions.push(f);

    let out = generate(&m);
    assert!(out.contains("LD (x$imm0), A"));
    assert!(out.contains("LD A, (x$imm0)"));
}

/// Registry round trip: select by name, reject the unknown.
#[test]
fn registry_selects_backends() {
    let registry = BackendRegistry::with_default_backends();
    let m = smc_add_module();
    for name in registry.names() {
        let mut backend = registry.create(name).unwrap();
        let out = backend.generate(&m, &CodegenOptions::default()).unwrap();
        assert!(!out.text.is_empty(), "{name} produced no output");
    }
    assert!(registry.create("vax").is_err());
}
