//! Per-function constant tracking.

use std::collections::HashMap;

use minz_mir::{eval_binary, Function, Instruction, Module, Op, Type, VReg, Value};
use tracing::trace;

use crate::builtins::builtin;

/// How far back from a call the tracker re-probes for argument-materializing
/// constant loads. A heuristic for the current MIR lowering; explicit
/// def-use edges would replace it if the builder is ever rewritten.
const LOOKBACK_WINDOW: usize = 10;

/// A call whose arguments the tracker resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    /// Function containing the call.
    pub function: String,
    /// Index of the `Call` instruction in the function body.
    pub index: usize,
    /// Callee symbol.
    pub callee: String,
    /// Argument values, in parameter order, for the ones that were known.
    pub args: Vec<Value>,
    /// Whether every parameter position held a known constant.
    pub is_const: bool,
}

/// Linear dataflow over one function body: which registers and variables
/// hold known constants, and which call sites are fully constant.
///
/// State is keyed by the string rendering of the register (`r1`, `r2`, …)
/// or the variable name, and is rebuilt for every function.
#[derive(Debug, Default)]
pub struct ConstTracker {
    known: HashMap<String, Value>,
}

impl ConstTracker {
    /// Fresh tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `func` and collect every call site with its argument knowledge.
    pub fn scan(&mut self, module: &Module, func: &Function) -> Vec<CallSite> {
        self.known.clear();
        let mut sites = Vec::new();

        for (index, ins) in func.body.iter().enumerate() {
            match ins.op {
                Op::LoadConst => {
                    let ty = ins.ty.clone().unwrap_or(Type::U16);
                    self.known
                        .insert(ins.dest.to_string(), Value::int(ins.imm, ty));
                }
                Op::StoreVar => {
                    let var = ins.symbol.clone().unwrap_or_default();
                    match self.known.get(&ins.src1.to_string()).cloned() {
                        Some(v) => {
                            self.known.insert(var, v);
                        }
                        None => {
                            self.known.remove(&var);
                        }
                    }
                }
                Op::LoadVar | Op::LoadParam => {
                    let var = ins.symbol.as_deref().unwrap_or_default();
                    match self.known.get(var).cloned() {
                        Some(v) => {
                            self.known.insert(ins.dest.to_string(), v);
                        }
                        None => {
                            self.known.remove(&ins.dest.to_string());
                        }
                    }
                }
                Op::Move => {
                    match self.known.get(&ins.src1.to_string()).cloned() {
                        Some(v) => {
                            self.known.insert(ins.dest.to_string(), v);
                        }
                        None => {
                            self.known.remove(&ins.dest.to_string());
                        }
                    }
                }
                Op::Add | Op::Sub | Op::Mul | Op::Div => {
                    self.fold_binary(ins);
                }
                Op::Call => {
                    let site = self.call_site(module, func, index, ins);
                    trace!(
                        callee = %site.callee,
                        index,
                        is_const = site.is_const,
                        "call site tracked"
                    );
                    sites.push(site);
                    // The result of the call is unknown to the tracker.
                    if ins.dest.is_some() {
                        self.known.remove(&ins.dest.to_string());
                    }
                }
                // Join point: states from other predecessors are unknown.
                Op::Label => self.known.clear(),
                _ => {
                    if let Some(dest) = ins.written_reg() {
                        self.known.remove(&dest.to_string());
                    }
                }
            }
        }
        sites
    }

    fn fold_binary(&mut self, ins: &Instruction) {
        let dest = ins.dest.to_string();
        let lhs = self.known.get(&ins.src1.to_string()).cloned();
        let rhs = if ins.has_imm_operand() {
            lhs.as_ref().map(|l| Value::Int {
                value: ins.imm,
                ty: l.ty(),
            })
        } else {
            self.known.get(&ins.src2.to_string()).cloned()
        };
        match (lhs, rhs) {
            (Some(a), Some(b)) => match eval_binary(ins.op, &a, &b) {
                Ok(v) => {
                    self.known.insert(dest, v);
                }
                // Division by zero: the fold is abandoned and the
                // destination forgotten; the interpreter will report it.
                Err(_) => {
                    self.known.remove(&dest);
                }
            },
            _ => {
                self.known.remove(&dest);
            }
        }
    }

    /// Parameter count of `callee`, when the tracker can determine it.
    fn callee_arity(module: &Module, callee: &str) -> Option<usize> {
        if let Some(f) = module.function(callee) {
            return Some(f.params.len());
        }
        builtin(callee).map(|b| b.arity)
    }

    fn call_site(
        &self,
        module: &Module,
        func: &Function,
        index: usize,
        ins: &Instruction,
    ) -> CallSite {
        let callee = ins.symbol.clone().unwrap_or_default();
        let arity = Self::callee_arity(module, &callee);

        // Zero-parameter callees are always const call sites.
        if arity == Some(0) {
            return CallSite {
                function: func.name.clone(),
                index,
                callee,
                args: Vec::new(),
                is_const: true,
            };
        }

        // Re-probe the look-back window for constant loads; an intervening
        // label wipes the main map, but an argument materialized right
        // before the call is still a constant at the call.
        let start = index.saturating_sub(LOOKBACK_WINDOW);
        let mut window: HashMap<VReg, Value> = HashMap::new();
        for w in &func.body[start..index] {
            if w.op == Op::LoadConst {
                let ty = w.ty.clone().unwrap_or(Type::U16);
                window.insert(w.dest, Value::int(w.imm, ty));
            } else if let Some(dest) = w.written_reg() {
                window.remove(&dest);
            }
        }

        let lookup = |reg: VReg| -> Option<Value> {
            self.known
                .get(&reg.to_string())
                .cloned()
                .or_else(|| window.get(&reg).cloned())
        };

        // Argument registers: the call's own list, or the fixed positional
        // registers r1, r2, ... when the lowering left the list empty.
        let arg_regs: Vec<VReg> = if !ins.args.is_empty() {
            ins.args.clone()
        } else {
            let n = arity.unwrap_or(0);
            (1..=n as u32).map(VReg).collect()
        };

        let mut args = Vec::new();
        for reg in &arg_regs {
            if let Some(v) = lookup(*reg) {
                args.push(v);
            }
        }

        let is_const = match arity {
            Some(n) => args.len() == arg_regs.len() && arg_regs.len() == n,
            None => false,
        };

        CallSite {
            function: func.name.clone(),
            index,
            callee,
            args,
            is_const,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minz_mir::Param;

    fn callee(name: &str, nparams: usize) -> Function {
        let params = (0..nparams)
            .map(|i| Param {
                name: format!("p{i}"),
                ty: Type::U8,
            })
            .collect();
        Function::new(name, params, Type::U8)
    }

    fn scan(caller: Function, callees: Vec<Function>) -> Vec<CallSite> {
        let mut m = Module::new("t");
        let name = caller.name.clone();
        m.functions.push(caller);
        m.functions.extend(callees);
        let func = m.function(&name).unwrap();
        ConstTracker::new().scan(&m, func)
    }

    #[test]
    fn all_const_args_make_a_const_site() {
        let mut f = Function::new("main", vec![], Type::U8);
        f.push(Instruction::load_const(VReg(1), 3, Type::U8));
        f.push(Instruction::load_const(VReg(2), 4, Type::U8));
        f.push(Instruction::call(VReg(3), "add2", vec![VReg(1), VReg(2)]));
        f.push(Instruction::ret(VReg(3)));

        let sites = scan(f, vec![callee("add2", 2)]);
        assert_eq!(sites.len(), 1);
        assert!(sites[0].is_const);
        assert_eq!(
            sites[0].args,
            vec![Value::int(3, Type::U8), Value::int(4, Type::U8)]
        );
    }

    #[test]
    fn unknown_arg_blocks_const() {
        let mut f = Function::new("main", vec![Param { name: "x".into(), ty: Type::U8 }], Type::U8);
        f.push(Instruction::load_param(VReg(1), "x"));
        f.push(Instruction::call(VReg(2), "sq", vec![VReg(1)]));
        f.push(Instruction::ret(VReg(2)));

        let sites = scan(f, vec![callee("sq", 1)]);
        assert_eq!(sites.len(), 1);
        assert!(!sites[0].is_const);
    }

    #[test]
    fn zero_param_callee_is_always_const() {
        let mut f = Function::new("main", vec![], Type::U8);
        f.push(Instruction::call(VReg(1), "answer", vec![]));
        f.push(Instruction::ret(VReg(1)));

        let sites = scan(f, vec![callee("answer", 0)]);
        assert!(sites[0].is_const);
        assert!(sites[0].args.is_empty());
    }

    #[test]
    fn positional_registers_probed_when_arg_list_empty() {
        let mut f = Function::new("main", vec![], Type::U8);
        f.push(Instruction::load_const(VReg(1), 9, Type::U8));
        f.push(Instruction::call(VReg(2), "sq", vec![]));
        f.push(Instruction::ret(VReg(2)));

        let sites = scan(f, vec![callee("sq", 1)]);
        assert!(sites[0].is_const);
        assert_eq!(sites[0].args, vec![Value::int(9, Type::U8)]);
    }

    #[test]
    fn argument_count_mismatch_blocks_const() {
        let mut f = Function::new("main", vec![], Type::U8);
        f.push(Instruction::load_const(VReg(1), 1, Type::U8));
        f.push(Instruction::call(VReg(2), "add2", vec![VReg(1)]));
        f.push(Instruction::ret(VReg(2)));

        let sites = scan(f, vec![callee("add2", 2)]);
        assert!(!sites[0].is_const);
    }

    #[test]
    fn folding_tracks_through_variables() {
        let mut f = Function::new("main", vec![], Type::U8);
        f.push(Instruction::load_const(VReg(1), 6, Type::U8));
        f.push(Instruction::store_var("a", VReg(1)));
        f.push(Instruction::load_var(VReg(2), "a"));
        f.push(Instruction::load_const(VReg(3), 7, Type::U8));
        f.push(Instruction::binary(Op::Mul, VReg(4), VReg(2), VReg(3)));
        f.push(Instruction::call(VReg(5), "sq", vec![VReg(4)]));
        f.push(Instruction::ret(VReg(5)));

        let mut m = Module::new("t");
        m.functions.push(f);
        m.functions.push(callee("sq", 1));
        m.functions[0].add_local("a", Type::U8);
        let func = m.function("main").unwrap();
        let sites = ConstTracker::new().scan(&m, func);
        assert!(sites[0].is_const);
        assert_eq!(sites[0].args, vec![Value::int(42, Type::U8)]);
    }

    #[test]
    fn division_by_zero_clears_the_destination() {
        let mut f = Function::new("main", vec![], Type::U8);
        f.push(Instruction::load_const(VReg(1), 8, Type::U8));
        f.push(Instruction::load_const(VReg(2), 0, Type::U8));
        f.push(Instruction::binary(Op::Div, VReg(3), VReg(1), VReg(2)));
        f.push(Instruction::call(VReg(4), "sq", vec![VReg(3)]));
        f.push(Instruction::ret(VReg(4)));

        let sites = scan(f, vec![callee("sq", 1)]);
        assert!(!sites[0].is_const);
    }
}
