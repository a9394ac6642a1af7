//! Stack-machine evaluation of pure MIR.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use minz_mir::{
    eval_binary, eval_unary, EvalError, Function, LabelMap, Module, Op, Purity, Value,
};
use tracing::trace;

use crate::builtins::builtin;
use crate::error::ExecError;

/// Resource limits for one top-level compile-time call.
#[derive(Debug, Clone, Copy)]
pub struct ExecLimits {
    /// Maximum call depth.
    pub max_depth: usize,
    /// Maximum executed instructions across the whole call tree.
    pub max_instructions: u64,
    /// Wall-clock cap, guarding pathological inputs.
    pub max_time: Duration,
}

impl Default for ExecLimits {
    fn default() -> Self {
        ExecLimits {
            max_depth: 100,
            max_instructions: 10_000,
            max_time: Duration::from_millis(1000),
        }
    }
}

/// How often the wall clock is consulted, in executed instructions.
const CLOCK_CHECK_INTERVAL: u64 = 1024;

/// Compile-time executor for pure MIR functions.
///
/// One operand stack per invocation, a locals map seeded from the
/// parameters, and a program counter over the body. Results of `Const`
/// callees are memoized for the lifetime of the executor, which the engine
/// scopes to a single pipeline invocation.
pub struct Executor<'m> {
    module: &'m Module,
    purity: &'m HashMap<String, Purity>,
    limits: ExecLimits,
    memo: HashMap<(String, Vec<Value>), Option<Value>>,
    executed: u64,
    depth: usize,
    deadline: Instant,
}

impl<'m> Executor<'m> {
    /// Executor with default limits.
    pub fn new(module: &'m Module, purity: &'m HashMap<String, Purity>) -> Self {
        Self::with_limits(module, purity, ExecLimits::default())
    }

    /// Executor with explicit limits.
    pub fn with_limits(
        module: &'m Module,
        purity: &'m HashMap<String, Purity>,
        limits: ExecLimits,
    ) -> Self {
        Executor {
            module,
            purity,
            limits,
            memo: HashMap::new(),
            executed: 0,
            depth: 0,
            deadline: Instant::now(),
        }
    }

    /// Seed the memoization cache from a previous executor over the same
    /// pipeline invocation.
    pub fn with_memo(mut self, memo: HashMap<(String, Vec<Value>), Option<Value>>) -> Self {
        self.memo = memo;
        self
    }

    /// Take the memoization cache out of the executor.
    pub fn into_memo(self) -> HashMap<(String, Vec<Value>), Option<Value>> {
        self.memo
    }

    /// Evaluate `name` on `args` as one top-level call.
    ///
    /// Returns `Ok(None)` for a void function. Every failure is typed and
    /// recoverable; the caller leaves the original call in place.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, ExecError> {
        self.executed = 0;
        self.depth = 0;
        self.deadline = Instant::now() + self.limits.max_time;
        self.invoke(name, args.to_vec())
    }

    fn invoke(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>, ExecError> {
        if self.depth >= self.limits.max_depth {
            return Err(ExecError::RecursionTooDeep);
        }

        if let Some(b) = builtin(name) {
            return match b.eval {
                Some(eval) if args.len() == b.arity => eval(&args).map(Some),
                Some(_) => Err(ExecError::StackUnderflow),
                None => Err(ExecError::ImpureCallDuringCte(name.to_string())),
            };
        }

        let func = self
            .module
            .function(name)
            .ok_or_else(|| ExecError::UnknownFunction(name.to_string()))?;

        let purity = self.purity.get(name).copied().unwrap_or(Purity::Impure);
        if !purity.is_executable() {
            return Err(ExecError::ImpureCallDuringCte(name.to_string()));
        }

        let memo_key = (purity == Purity::Const).then(|| (name.to_string(), args.clone()));
        if let Some(key) = &memo_key {
            if let Some(hit) = self.memo.get(key) {
                trace!(function = name, "memoized compile-time result");
                return Ok(hit.clone());
            }
        }

        self.depth += 1;
        let result = self.run(func, args);
        self.depth -= 1;

        if let (Some(key), Ok(value)) = (memo_key, &result) {
            self.memo.insert(key, value.clone());
        }
        result
    }

    fn run(&mut self, func: &Function, args: Vec<Value>) -> Result<Option<Value>, ExecError> {
        let labels =
            LabelMap::build(func).map_err(|_| ExecError::UnsupportedForCte(Op::Label))?;

        let mut locals: HashMap<String, Value> = func
            .params
            .iter()
            .zip(args)
            .map(|(p, v)| (p.name.clone(), v))
            .collect();
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0usize;

        while pc < func.body.len() {
            self.executed += 1;
            if self.executed > self.limits.max_instructions {
                return Err(ExecError::BudgetExceeded);
            }
            if self.executed % CLOCK_CHECK_INTERVAL == 0 && Instant::now() > self.deadline {
                return Err(ExecError::TimeLimitExceeded);
            }

            let ins = &func.body[pc];
            trace!(function = %func.name, pc, op = %ins.op, "cte step");
            pc += 1;

            match ins.op {
                Op::LoadConst => {
                    let ty = ins.ty.clone().unwrap_or(minz_mir::Type::U16);
                    stack.push(Value::int(ins.imm, ty));
                }
                Op::LoadVar | Op::LoadParam => {
                    let name = ins.symbol.as_deref().unwrap_or("");
                    let v = locals
                        .get(name)
                        .cloned()
                        .ok_or_else(|| ExecError::UnboundName(name.to_string()))?;
                    stack.push(v);
                }
                Op::StoreVar => {
                    let name = ins.symbol.clone().unwrap_or_default();
                    let v = stack.pop().ok_or(ExecError::StackUnderflow)?;
                    locals.insert(name, v);
                }
                // The value is already on the operand stack.
                Op::Move => {}
                Op::Neg | Op::Not => {
                    let v = stack.pop().ok_or(ExecError::StackUnderflow)?;
                    stack.push(eval_unary(ins.op, &v).map_err(Self::map_eval)?);
                }
                op if op.is_binary_alu() => {
                    let rhs = if ins.has_imm_operand() {
                        let lhs_ty = stack
                            .last()
                            .ok_or(ExecError::StackUnderflow)?
                            .ty();
                        Value::Int {
                            value: ins.imm,
                            ty: lhs_ty,
                        }
                    } else {
                        stack.pop().ok_or(ExecError::StackUnderflow)?
                    };
                    let lhs = stack.pop().ok_or(ExecError::StackUnderflow)?;
                    stack.push(eval_binary(ins.op, &lhs, &rhs).map_err(Self::map_eval)?);
                }
                Op::Jump => {
                    let target = ins.label.as_deref().unwrap_or("");
                    pc = labels
                        .resolve(target)
                        .ok_or_else(|| ExecError::UndefinedLabel(target.to_string()))?;
                }
                Op::JumpIf | Op::JumpIfNot | Op::JumpIfZero | Op::JumpIfNotZero => {
                    let cond = stack.pop().ok_or(ExecError::StackUnderflow)?;
                    let taken = match ins.op {
                        Op::JumpIf => cond.to_bool(),
                        Op::JumpIfNot => !cond.to_bool(),
                        Op::JumpIfZero => cond.to_int() == 0,
                        Op::JumpIfNotZero => cond.to_int() != 0,
                        _ => unreachable!(),
                    };
                    if taken {
                        let target = ins.label.as_deref().unwrap_or("");
                        pc = labels
                            .resolve(target)
                            .ok_or_else(|| ExecError::UndefinedLabel(target.to_string()))?;
                    }
                }
                Op::Label => {}
                Op::Return => {
                    if func.ret == minz_mir::Type::Void {
                        return Ok(None);
                    }
                    let v = stack.pop().ok_or(ExecError::StackUnderflow)?;
                    return Ok(Some(Self::convert_return(v, &func.ret)));
                }
                Op::Call => {
                    let callee = ins.symbol.as_deref().unwrap_or("");
                    let arity = self
                        .module
                        .function(callee)
                        .map(|f| f.params.len())
                        .or_else(|| builtin(callee).map(|b| b.arity))
                        .ok_or_else(|| ExecError::UnknownFunction(callee.to_string()))?;
                    if stack.len() < arity {
                        return Err(ExecError::StackUnderflow);
                    }
                    // Arguments were pushed left to right.
                    let args = stack.split_off(stack.len() - arity);
                    let callee = callee.to_string();
                    if let Some(v) = self.invoke(&callee, args)? {
                        stack.push(v);
                    }
                }
                Op::Load | Op::Store | Op::SmcParam | Op::SmcStore => {
                    return Err(ExecError::UnsupportedForCte(ins.op));
                }
                _ => return Err(ExecError::UnsupportedForCte(ins.op)),
            }
        }

        // Fell off the end of the body: a void function simply finishes.
        if func.ret == minz_mir::Type::Void {
            Ok(None)
        } else {
            stack
                .pop()
                .map(|v| Some(Self::convert_return(v, &func.ret)))
                .ok_or(ExecError::StackUnderflow)
        }
    }

    /// Widen or narrow a scalar result to the declared return type.
    fn convert_return(v: Value, ret: &minz_mir::Type) -> Value {
        match ret {
            minz_mir::Type::Bool => Value::Bool(v.to_bool()),
            minz_mir::Type::U8
            | minz_mir::Type::I8
            | minz_mir::Type::U16
            | minz_mir::Type::I16
            | minz_mir::Type::Pointer(_) => Value::int(v.to_int(), ret.clone()),
            _ => v,
        }
    }

    fn map_eval(e: EvalError) -> ExecError {
        match e {
            EvalError::DivideByZero => ExecError::DivideByZero,
            EvalError::TypeMismatch => ExecError::StackUnderflow,
            EvalError::Unsupported(op) => ExecError::UnsupportedForCte(op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minz_mir::{Instruction, Param, Type, VReg};

    fn purity_of(module: &Module) -> HashMap<String, Purity> {
        crate::PurityAnalyzer::new(module).analyze_all()
    }

    fn square_module() -> Module {
        let mut m = Module::new("t");
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
        m
    }

    #[test]
    fn evaluates_a_pure_call() {
        let m = square_module();
        let purity = purity_of(&m);
        let mut exec = Executor::new(&m, &purity);
        let v = exec.call("square", &[Value::int(12, Type::U8)]).unwrap();
        // The u8 product widens to the declared u16 return type.
        assert_eq!(v, Some(Value::int(144, Type::U16)));
    }

    #[test]
    fn division_by_zero_is_typed() {
        let mut m = Module::new("t");
        let mut f = Function::new(
            "div",
            vec![
                Param { name: "a".into(), ty: Type::U8 },
                Param { name: "b".into(), ty: Type::U8 },
            ],
            Type::U8,
        );
        f.push(Instruction::load_param(VReg(1), "a"));
        f.push(Instruction::load_param(VReg(2), "b"));
        f.push(Instruction::binary(Op::Div, VReg(3), VReg(1), VReg(2)));
        f.push(Instruction::ret(VReg(3)));
        m.functions.push(f);
        let purity = purity_of(&m);
        let mut exec = Executor::new(&m, &purity);
        let err = exec
            .call("div", &[Value::int(1, Type::U8), Value::int(0, Type::U8)])
            .unwrap_err();
        assert_eq!(err, ExecError::DivideByZero);
    }

    #[test]
    fn infinite_loop_exhausts_the_budget() {
        let mut m = Module::new("t");
        let mut f = Function::new("spin", vec![], Type::Void);
        f.push(Instruction::label("top"));
        f.push(Instruction::jump("top"));
        m.functions.push(f);
        let purity = purity_of(&m);
        let mut exec = Executor::new(&m, &purity);
        assert_eq!(exec.call("spin", &[]).unwrap_err(), ExecError::BudgetExceeded);
    }

    #[test]
    fn deep_recursion_is_capped() {
        let mut m = Module::new("t");
        let mut f = Function::new("down", vec![Param { name: "n".into(), ty: Type::U16 }], Type::U16);
        f.push(Instruction::load_param(VReg(1), "n"));
        f.push(Instruction::call(VReg(2), "down", vec![VReg(1)]));
        f.push(Instruction::ret(VReg(2)));
        m.functions.push(f);
        let purity = purity_of(&m);
        let mut exec = Executor::new(&m, &purity);
        assert_eq!(
            exec.call("down", &[Value::int(1, Type::U16)]).unwrap_err(),
            ExecError::RecursionTooDeep
        );
    }

    #[test]
    fn impure_callee_is_rejected() {
        let mut m = Module::new("t");
        m.externs.push("rand".into());
        let mut f = Function::new("lucky", vec![], Type::U8);
        f.push(Instruction::call(VReg(1), "rand", vec![]));
        f.push(Instruction::ret(VReg(1)));
        m.functions.push(f);
        let purity = purity_of(&m);
        let mut exec = Executor::new(&m, &purity);
        assert_eq!(
            exec.call("lucky", &[]).unwrap_err(),
            ExecError::ImpureCallDuringCte("lucky".to_string())
        );
    }

    #[test]
    fn builtins_evaluate_directly() {
        let m = Module::new("t");
        let purity = HashMap::new();
        let mut exec = Executor::new(&m, &purity);
        let v = exec
            .call("max", &[Value::int(3, Type::U8), Value::int(9, Type::U8)])
            .unwrap();
        assert_eq!(v, Some(Value::int(9, Type::U8)));
        let v = exec.call("abs", &[Value::int(-4, Type::I8)]).unwrap();
        assert_eq!(v, Some(Value::int(4, Type::I8)));
    }

    #[test]
    fn loops_terminate_with_computed_result() {
        // sum(n) = 0 + 1 + ... + n, with a conditional backward jump.
        let mut m = Module::new("t");
        let mut f = Function::new("sum", vec![Param { name: "n".into(), ty: Type::U16 }], Type::U16);
        f.add_local("acc", Type::U16);
        f.add_local("i", Type::U16);
        f.push(Instruction::load_const(VReg(1), 0, Type::U16));
        f.push(Instruction::store_var("acc", VReg(1)));
        f.push(Instruction::load_const(VReg(2), 0, Type::U16));
        f.push(Instruction::store_var("i", VReg(2)));
        f.push(Instruction::label("loop"));
        // acc += i
        f.push(Instruction::load_var(VReg(3), "acc"));
        f.push(Instruction::load_var(VReg(4), "i"));
        f.push(Instruction::binary(Op::Add, VReg(5), VReg(3), VReg(4)));
        f.push(Instruction::store_var("acc", VReg(5)));
        // i += 1
        f.push(Instruction::load_var(VReg(6), "i"));
        f.push(Instruction::binary_imm(Op::Add, VReg(7), VReg(6), 1));
        f.push(Instruction::store_var("i", VReg(7)));
        // if i <= n goto loop
        f.push(Instruction::load_var(VReg(8), "i"));
        f.push(Instruction::load_param(VReg(9), "n"));
        f.push(Instruction::binary(Op::Le, VReg(10), VReg(8), VReg(9)));
        f.push(Instruction::jump_cond(Op::JumpIf, VReg(10), "loop"));
        f.push(Instruction::load_var(VReg(11), "acc"));
        f.push(Instruction::ret(VReg(11)));
        m.functions.push(f);

        let purity = purity_of(&m);
        let mut exec = Executor::new(&m, &purity);
        let v = exec.call("sum", &[Value::int(10, Type::U16)]).unwrap();
        assert_eq!(v, Some(Value::int(55, Type::U16)));
    }

    #[test]
    fn const_results_are_memoized() {
        let mut m = Module::new("t");
        let mut f = Function::new("answer", vec![], Type::U8);
        f.push(Instruction::load_const(VReg(1), 42, Type::U8));
        f.push(Instruction::ret(VReg(1)));
        m.functions.push(f);
        let purity = purity_of(&m);
        let mut exec = Executor::new(&m, &purity);
        assert_eq!(exec.call("answer", &[]).unwrap(), Some(Value::int(42, Type::U8)));
        assert_eq!(exec.call("answer", &[]).unwrap(), Some(Value::int(42, Type::U8)));
        let memo = exec.into_memo();
        assert!(memo.contains_key(&("answer".to_string(), vec![])));
    }
}
