use minz_ctie::{CtieEngine, Executor, PurityAnalyzer};
use minz_mir::{
    CancelToken, Function, Instruction, Module, Op, Param, Purity, Type, VReg, Value,
};

fn param(name: &str, ty: Type) -> Param {
    Param {
        name: name.into(),
        ty,
    }
}

/// A module with a small pure call graph and one impure leaf.
fn mixed_module() -> Module {
    let mut m = Module::new("mixed");

    // add(a, b) = a + b
    let mut add = Function::new(
        "add",
        vec![param("a", Type::U8), param("b", Type::U8)],
        Type::U8,
    );
    add.push(Instruction::load_param(VReg(1), "a"));
    add.push(Instruction::load_param(VReg(2), "b"));
    add.push(Instruction::binary(Op::Add, VReg(3), VReg(1), VReg(2)));
    add.push(Instruction::ret(VReg(3)));
    m.functions.push(add);

    // twice(x) = add(x, x)
    let mut twice = Function::new("twice", vec![param("x", Type::U8)], Type::U8);
    twice.push(Instruction::load_param(VReg(1), "x"));
    twice.push(Instruction::load_param(VReg(2), "x"));
    twice.push(Instruction::call(VReg(3), "add", vec![VReg(1), VReg(2)]));
    twice.push(Instruction::ret(VReg(3)));
    m.functions.push(twice);

    // noisy(x) = print(x)
    let mut noisy = Function::new("noisy", vec![param("x", Type::U8)], Type::Void);
    noisy.push(Instruction::load_param(VReg(1), "x"));
    noisy.push(Instruction::call(VReg::NONE, "print", vec![VReg(1)]));
    noisy.push(Instruction::ret(VReg::NONE));
    m.functions.push(noisy);

    m.externs.push("print".into());
    m
}

#[test]
fn purity_is_monotone_over_the_call_graph() {
    let m = mixed_module();
    let cache = PurityAnalyzer::new(&m).analyze_all();

    // Every pure function only calls functions at least as pure.
    for func in &m.functions {
        if cache[&func.name] >= Purity::Pure {
            for callee in func.callees() {
                let callee_purity = cache.get(callee).copied().unwrap_or(Purity::Impure);
                assert!(
                    callee_purity >= Purity::Pure,
                    "{} is pure but calls impure {}",
                    func.name,
                    callee
                );
            }
        }
    }
}

#[test]
fn replacement_matches_direct_evaluation() {
    // Soundness: the constant substituted for a call equals what the
    // interpreter computes for the same callee and arguments.
    let mut m = mixed_module();
    let mut main = Function::new("main", vec![], Type::U8);
    main.push(Instruction::load_const(VReg(1), 21, Type::U8));
    main.push(Instruction::call(VReg(2), "twice", vec![VReg(1)]));
    main.push(Instruction::ret(VReg(2)));
    m.functions.push(main);

    let reference = {
        let purity = PurityAnalyzer::new(&m).analyze_all();
        let mut exec = Executor::new(&m, &purity);
        exec.call("twice", &[Value::int(21, Type::U8)]).unwrap().unwrap()
    };

    CtieEngine::with_defaults().run(&mut m, &CancelToken::new());

    let body = &m.function("main").unwrap().body;
    assert_eq!(body[1].op, Op::LoadConst);
    assert_eq!(body[1].imm, reference.to_int());
    assert_eq!(body[1].ty.clone().unwrap(), reference.ty());
    assert_eq!(reference, Value::int(42, Type::U8));
}

#[test]
fn rerunning_the_engine_changes_nothing() {
    let mut m = mixed_module();
    let mut main = Function::new("main", vec![], Type::U8);
    main.push(Instruction::load_const(VReg(1), 21, Type::U8));
    main.push(Instruction::call(VReg(2), "twice", vec![VReg(1)]));
    main.push(Instruction::ret(VReg(2)));
    m.functions.push(main);

    CtieEngine::with_defaults().run(&mut m, &CancelToken::new());
    let after_first = m.clone();
    let stats = CtieEngine::with_defaults().run(&mut m, &CancelToken::new());
    assert_eq!(m, after_first);
    assert_eq!(stats.values_computed, 0);
}

#[test]
fn nested_const_calls_collapse() {
    // add(1, 2) executes through the nested call to `add` inside `twice`.
    let mut m = mixed_module();
    let mut main = Function::new("main", vec![], Type::U8);
    main.push(Instruction::load_const(VReg(1), 1, Type::U8));
    main.push(Instruction::load_const(VReg(2), 2, Type::U8));
    main.push(Instruction::call(VReg(3), "add", vec![VReg(1), VReg(2)]));
    main.push(Instruction::ret(VReg(3)));
    m.functions.push(main);

    CtieEngine::with_defaults().run(&mut m, &CancelToken::new());
    let body = &m.function("main").unwrap().body;
    assert_eq!(body[2].op, Op::LoadConst);
    assert_eq!(body[2].imm, 3);
}

#[test]
fn memoized_const_callee_is_executed_once_per_engine_run() {
    let mut m = Module::new("t");
    let mut answer = Function::new("answer", vec![], Type::U8);
    answer.push(Instruction::load_const(VReg(1), 42, Type::U8));
    answer.push(Instruction::ret(VReg(1)));
    m.functions.push(answer);

    let mut main = Function::new("main", vec![], Type::U8);
    main.push(Instruction::call(VReg(1), "answer", vec![]));
    main.push(Instruction::call(VReg(2), "answer", vec![]));
    main.push(Instruction::binary(Op::Add, VReg(3), VReg(1), VReg(2)));
    main.push(Instruction::ret(VReg(3)));
    m.functions.push(main);

    let stats = CtieEngine::with_defaults().run(&mut m, &CancelToken::new());
    assert_eq!(stats.values_computed, 2);

    let body = &m.function("main").unwrap().body;
    assert_eq!(body[0].op, Op::LoadConst);
    assert_eq!(body[0].imm, 42);
    assert_eq!(body[1].op, Op::LoadConst);
    assert_eq!(body[1].imm, 42);
}
