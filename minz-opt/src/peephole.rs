//! MIR-level peephole rules.

use std::collections::HashMap;

use minz_mir::{
    eval_binary, eval_unary, CancelToken, EmitHint, Function, Instruction, LabelMap, Module,
    Op, Type, VReg, Value,
};
use tracing::debug;

use crate::licm::hoist_loop_invariants;
use crate::reorder::sink_constants;

/// Upper bound on rule-set iterations per function; the rules normally
/// reach a fixpoint in two or three.
const MAX_ITERATIONS: usize = 10;

/// Per-rule rewrite counts for one optimization run.
#[derive(Debug, Clone, Default)]
pub struct OptStats {
    /// Rule name to number of rewrites applied.
    pub rewrites: HashMap<&'static str, usize>,
}

impl OptStats {
    /// Total rewrites across all rules.
    pub fn total(&self) -> usize {
        self.rewrites.values().sum()
    }

    fn record(&mut self, rule: &'static str, count: usize) {
        if count > 0 {
            *self.rewrites.entry(rule).or_default() += count;
        }
    }
}

struct Rule {
    name: &'static str,
    apply: fn(&mut Function) -> usize,
}

/// The window rules, applied to fixpoint. Reordering and loop-invariant
/// hoisting are separate passes gated at a higher level.
const RULES: &[Rule] = &[
    Rule { name: "const_fold", apply: const_fold },
    Rule { name: "inc_dec", apply: inc_dec },
    Rule { name: "pow2_strength", apply: pow2_strength },
    Rule { name: "zero_idiom", apply: zero_idiom },
    Rule { name: "redundant_load", apply: redundant_load },
    Rule { name: "ptr_step", apply: ptr_step },
    Rule { name: "jump_threading", apply: jump_threading },
    Rule { name: "unreachable_code", apply: unreachable_code },
    Rule { name: "dead_const", apply: dead_const },
];

/// Optimize a single function at the given level.
///
/// Level 0 is a no-op; level 1 runs the window rules; level 2 adds
/// constant sinking and loop-invariant hoisting.
pub fn optimize_function(func: &mut Function, level: u8) -> OptStats {
    let mut stats = OptStats::default();
    if level == 0 {
        return stats;
    }

    for _ in 0..MAX_ITERATIONS {
        let mut changed = 0;
        for rule in RULES {
            let n = (rule.apply)(func);
            stats.record(rule.name, n);
            changed += n;
        }
        if changed == 0 {
            break;
        }
    }

    if level >= 2 {
        stats.record("sink_constants", sink_constants(func));
        stats.record("licm", hoist_loop_invariants(func));
    }

    debug!(function = %func.name, total = stats.total(), "peephole finished");
    stats
}

/// Optimize every function in the module, honoring cancellation between
/// functions.
pub fn optimize_module(module: &mut Module, level: u8, cancel: &CancelToken) -> OptStats {
    let mut stats = OptStats::default();
    for func in &mut module.functions {
        if cancel.is_cancelled() {
            break;
        }
        let fs = optimize_function(func, level);
        for (name, n) in fs.rewrites {
            *stats.rewrites.entry(name).or_default() += n;
        }
    }
    stats
}

/// Constants known in the current straight-line region, by defining
/// register. Wiped at labels (join points) and updated on every write.
fn region_consts(body: &[Instruction], upto: usize) -> HashMap<VReg, Value> {
    let mut known = HashMap::new();
    for ins in &body[..upto] {
        match ins.op {
            Op::Label => known.clear(),
            Op::LoadConst => {
                let ty = ins.ty.clone().unwrap_or(Type::U16);
                known.insert(ins.dest, Value::int(ins.imm, ty));
            }
            _ => {
                if let Some(dest) = ins.written_reg() {
                    known.remove(&dest);
                }
            }
        }
    }
    known
}

/// Fold ALU operations whose operands are all known constants into a
/// single constant load. Re-run after compile-time execution to pick up
/// opportunities exposed by call replacements.
fn const_fold(func: &mut Function) -> usize {
    let mut rewrites = 0;
    for i in 0..func.body.len() {
        let ins = &func.body[i];
        let folded = if ins.op.is_binary_alu() && ins.dest.is_some() {
            let known = region_consts(&func.body, i);
            let lhs = known.get(&ins.src1).cloned();
            let rhs = if ins.has_imm_operand() {
                lhs.as_ref().map(|l| Value::Int {
                    value: ins.imm,
                    ty: l.ty(),
                })
            } else {
                known.get(&ins.src2).cloned()
            };
            match (lhs, rhs) {
                (Some(a), Some(b)) => eval_binary(ins.op, &a, &b).ok(),
                _ => None,
            }
        } else if matches!(ins.op, Op::Neg | Op::Not) && ins.dest.is_some() {
            let known = region_consts(&func.body, i);
            known
                .get(&ins.src1)
                .and_then(|v| eval_unary(ins.op, v).ok())
        } else {
            None
        };

        if let Some(value) = folded {
            let dest = func.body[i].dest;
            func.body[i] = Instruction::load_const(dest, value.to_int(), value.ty());
            rewrites += 1;
        }
    }
    rewrites
}

/// Recognize add/subtract by one and flag them for single-instruction
/// emission. The materializing `LoadConst` is left for `dead_const`.
fn inc_dec(func: &mut Function) -> usize {
    let mut rewrites = 0;
    for i in 0..func.body.len() {
        let ins = &func.body[i];
        match ins.op {
            Op::Add | Op::Sub => {}
            _ => continue,
        }

        // Immediate form: just flag it.
        if ins.has_imm_operand() && ins.imm == 1 {
            let hint = if ins.op == Op::Add { EmitHint::INC } else { EmitHint::DEC };
            if !func.body[i].hints.contains(hint) {
                func.body[i].hints.insert(hint);
                rewrites += 1;
            }
            continue;
        }

        // Paired form: LoadConst t, 1 directly before the op.
        if i == 0 || ins.src2.is_none() {
            continue;
        }
        let prev = &func.body[i - 1];
        if prev.op == Op::LoadConst && prev.imm == 1 && prev.dest == ins.src2 {
            let op = ins.op;
            let (dest, src1) = (ins.dest, ins.src1);
            let hint = if op == Op::Add { EmitHint::INC } else { EmitHint::DEC };
            let mut rewritten = Instruction::binary_imm(op, dest, src1, 1);
            rewritten.hints.insert(hint);
            rewritten.ty = func.body[i].ty.clone();
            func.body[i] = rewritten;
            rewrites += 1;
        }
    }
    rewrites
}

/// Multiply/divide by a power of two becomes a shift.
///
/// Division only rewrites for unsigned operands: an arithmetic right
/// shift rounds toward negative infinity, division truncates toward zero.
fn pow2_strength(func: &mut Function) -> usize {
    let mut rewrites = 0;
    for i in 0..func.body.len() {
        let ins = &func.body[i];
        let (is_mul, is_div) = (ins.op == Op::Mul, ins.op == Op::Div);
        if !is_mul && !is_div {
            continue;
        }
        if is_div && ins.ty.as_ref().map(|t| t.is_signed()).unwrap_or(true) {
            continue;
        }

        let k = if ins.has_imm_operand() {
            Some(ins.imm)
        } else {
            region_consts(&func.body, i).get(&ins.src2).map(Value::to_int)
        };
        let Some(k) = k else { continue };
        if k < 2 || k & (k - 1) != 0 {
            continue;
        }
        let shift = k.trailing_zeros() as i64;

        let op = if is_mul { Op::Shl } else { Op::Shr };
        let (dest, src1) = (ins.dest, ins.src1);
        let mut rewritten = Instruction::binary_imm(op, dest, src1, shift);
        rewritten.ty = func.body[i].ty.clone();
        func.body[i] = rewritten;
        rewrites += 1;
    }
    rewrites
}

/// Flag zero constants so the backend may use the XOR-self idiom.
fn zero_idiom(func: &mut Function) -> usize {
    let mut rewrites = 0;
    for ins in &mut func.body {
        if ins.op == Op::LoadConst && ins.imm == 0 && !ins.hints.contains(EmitHint::ZERO_IDIOM)
        {
            ins.hints.insert(EmitHint::ZERO_IDIOM);
            rewrites += 1;
        }
    }
    rewrites
}

/// Two consecutive loads of the same variable: the second becomes a move
/// from the first.
fn redundant_load(func: &mut Function) -> usize {
    let mut rewrites = 0;
    for i in 1..func.body.len() {
        let (prev, ins) = (&func.body[i - 1], &func.body[i]);
        if prev.op == Op::LoadVar
            && ins.op == Op::LoadVar
            && prev.symbol == ins.symbol
            && prev.dest != ins.dest
        {
            let (dest, src) = (ins.dest, prev.dest);
            func.body[i] = Instruction::mov(dest, src);
            rewrites += 1;
        }
    }
    rewrites
}

/// Small constant offsets on pointer arithmetic: flag for emission as
/// successive increments.
fn ptr_step(func: &mut Function) -> usize {
    let mut rewrites = 0;
    for i in 0..func.body.len() {
        let ins = &func.body[i];
        if ins.op != Op::Add || !matches!(&ins.ty, Some(t) if t.is_pointer()) {
            continue;
        }

        if ins.has_imm_operand() {
            if (1..=3).contains(&ins.imm) && !ins.hints.contains(EmitHint::PTR_STEP) {
                func.body[i].hints.insert(EmitHint::PTR_STEP);
                rewrites += 1;
            }
            continue;
        }

        let k = region_consts(&func.body, i)
            .get(&ins.src2)
            .map(Value::to_int);
        if let Some(k) = k {
            if (1..=3).contains(&k) {
                let (dest, src1, ty) = (ins.dest, ins.src1, ins.ty.clone());
                let mut rewritten = Instruction::binary_imm(Op::Add, dest, src1, k);
                rewritten.ty = ty;
                rewritten.hints.insert(EmitHint::PTR_STEP);
                func.body[i] = rewritten;
                rewrites += 1;
            }
        }
    }
    rewrites
}

/// Redirect jumps whose target label is immediately followed by another
/// unconditional jump, then drop the label once nothing references it.
fn jump_threading(func: &mut Function) -> usize {
    let Ok(labels) = LabelMap::build(func) else {
        return 0;
    };

    // label -> final target, one step per rule invocation (the fixpoint
    // loop collapses chains).
    let mut forward: HashMap<String, String> = HashMap::new();
    for ins in &func.body {
        if ins.op != Op::Label {
            continue;
        }
        let Some(name) = ins.label.clone() else { continue };
        let Some(index) = labels.resolve(&name) else { continue };
        if let Some(next) = func.body.get(index + 1) {
            if next.op == Op::Jump {
                let target = next.label.clone().unwrap_or_default();
                if target != name {
                    forward.insert(name, target);
                }
            }
        }
    }

    let mut rewrites = 0;
    for ins in &mut func.body {
        if !ins.op.is_jump() {
            continue;
        }
        let Some(target) = ins.label.clone() else { continue };
        if let Some(next) = forward.get(&target) {
            ins.label = Some(next.clone());
            rewrites += 1;
        }
    }

    // Delete forwarded labels with no remaining references.
    let referenced: Vec<String> = func
        .body
        .iter()
        .filter(|i| i.op.is_jump())
        .filter_map(|i| i.label.clone())
        .collect();
    let before = func.body.len();
    func.body.retain(|ins| {
        !(ins.op == Op::Label
            && ins
                .label
                .as_ref()
                .is_some_and(|l| forward.contains_key(l) && !referenced.contains(l)))
    });
    rewrites += before - func.body.len();

    rewrites
}

/// Remove instructions that can only be reached by falling through from an
/// unconditional jump or return.
fn unreachable_code(func: &mut Function) -> usize {
    let mut keep = Vec::with_capacity(func.body.len());
    let mut reachable = true;
    let mut removed = 0;
    for ins in func.body.drain(..) {
        if ins.op == Op::Label {
            reachable = true;
        }
        if reachable {
            let ends_flow = matches!(ins.op, Op::Jump | Op::Return);
            keep.push(ins);
            if ends_flow {
                reachable = false;
            }
        } else {
            removed += 1;
        }
    }
    func.body = keep;
    removed
}

/// Remove constant loads and moves whose destination is provably never
/// read. Conservative: the forward scan gives up at labels and jumps.
fn dead_const(func: &mut Function) -> usize {
    let mut dead: Vec<usize> = Vec::new();
    for i in 0..func.body.len() {
        let ins = &func.body[i];
        if !matches!(ins.op, Op::LoadConst | Op::Move) || ins.dest.is_none() {
            continue;
        }
        let dest = ins.dest;
        let mut verdict = None;
        for later in &func.body[i + 1..] {
            if later.read_regs().contains(&dest) || (later.op == Op::Return && later.src1 == dest)
            {
                verdict = Some(false);
                break;
            }
            if later.op == Op::Label || later.op.is_jump() {
                // Another path may read it.
                verdict = Some(false);
                break;
            }
            if later.written_reg() == Some(dest) {
                verdict = Some(true);
                break;
            }
        }
        // Reaching the end of the function without a read is also dead.
        if verdict.unwrap_or(true) {
            dead.push(i);
        }
    }
    for &i in dead.iter().rev() {
        func.body.remove(i);
    }
    dead.len()
}
