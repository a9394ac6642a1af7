//! Z80 code generator with TRUE SMC.
//!
//! The primary backend. Parameters of functions compiled with the `smc`
//! convention live inside instruction immediates: the prologue emits one
//! anchor instruction per parameter, labeled so callers can patch the
//! immediate bytes directly before the `CALL`. Parameter loads inside the
//! body then cost nothing at all.

mod regs;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use minz_mir::{CallConv, EmitHint, Function, Instruction, Module, Op, Type, VReg};
use tracing::debug;

use crate::toolkit::{CallConvDesc, CallModel, Features, Toolkit};
use crate::{Backend, CodegenError, CodegenOptions, GenOutput};

use regs::{Loc, RegAlloc};

const Z80_TOOLKIT: Toolkit = Toolkit {
    name: "z80",
    comment: ";",
    instr: &[(Op::Return, "RET")],
    patterns: &[("header", "    ORG %value%")],
    call_conv: CallConvDesc {
        model: CallModel::Registers,
        return_location: "HL",
    },
    registers: &["A", "B", "C", "D", "E", "H", "L"],
    pointer_size: 2,
    features: Features::SELF_MODIFYING_CODE
        .union(Features::INTERRUPTS)
        .union(Features::SHADOW_REGISTERS)
        .union(Features::POINTERS_16BIT),
    extra_flags: &["little-endian"],
};

/// The Z80 backend.
#[derive(Debug)]
pub struct Z80Backend {
    toolkit: Toolkit,
}

impl Z80Backend {
    /// Fresh backend instance.
    pub fn new() -> Self {
        Z80Backend {
            toolkit: Z80_TOOLKIT,
        }
    }
}

impl Default for Z80Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for Z80Backend {
    fn name(&self) -> &'static str {
        "z80"
    }

    fn toolkit(&self) -> &Toolkit {
        &self.toolkit
    }

    fn generate(
        &mut self,
        module: &Module,
        opts: &CodegenOptions,
    ) -> Result<GenOutput, CodegenError> {
        let mut out = ModuleEmitter::new(module, opts);
        out.run();
        debug!(
            functions = module.functions.len(),
            diagnostics = out.diagnostics.len(),
            "z80 generation finished"
        );
        Ok(GenOutput {
            text: out.lines.join("\n") + "\n",
            diagnostics: out.diagnostics,
        })
    }
}

/// Pick the calling convention for one function.
///
/// An explicit front-end tag is honored when legal. Otherwise: functions
/// whose address escapes or that sit on a call-graph cycle take the stack;
/// interrupt handlers take registers; module-local functions get SMC when
/// the target and placement allow it; small arities go to registers and
/// larger ones to the hybrid convention.
pub(crate) fn choose_convention(
    module: &Module,
    func: &Function,
    opts: &CodegenOptions,
) -> CallConv {
    let smc_legal = opts.emit_smc
        && func.smc_enabled
        && !func.in_rom
        && !func.is_exported
        && !func.interrupt_handler
        && !func.address_taken
        && !is_recursive(module, &func.name)
        && !func.params.is_empty()
        && plan_anchors(func).is_some();

    if let Some(tag) = func.convention {
        match tag {
            CallConv::Smc if smc_legal => return CallConv::Smc,
            // An illegal SMC request falls through to the heuristics.
            CallConv::Smc => {}
            other => return other,
        }
    }

    if func.address_taken || is_recursive(module, &func.name) {
        return CallConv::Stack;
    }
    if func.interrupt_handler {
        return CallConv::Register;
    }
    if smc_legal {
        return CallConv::Smc;
    }
    if func.params.len() <= 3 {
        CallConv::Register
    } else {
        CallConv::Hybrid
    }
}

/// Whether `name` can reach itself through the module call graph.
pub(crate) fn is_recursive(module: &Module, name: &str) -> bool {
    let mut visited = HashSet::new();
    let mut stack: Vec<&str> = module
        .function(name)
        .map(|f| f.callees().collect())
        .unwrap_or_default();
    while let Some(callee) = stack.pop() {
        if callee == name {
            return true;
        }
        if visited.insert(callee.to_string()) {
            if let Some(f) = module.function(callee) {
                stack.extend(f.callees());
            }
        }
    }
    false
}

/// One SMC anchor: parameter name, wide flag, anchor register.
type Anchor = (String, bool, &'static str);

/// Assign anchor registers to the parameters, or `None` when they don't
/// fit (which disqualifies the SMC convention).
pub(crate) fn plan_anchors(func: &Function) -> Option<Vec<Anchor>> {
    let mut used: HashSet<&str> = HashSet::new();
    let mut anchors = Vec::new();
    for p in &func.params {
        let wide = matches!(p.ty.bits(), Some(16));
        if wide {
            let pair = [("HL", ["H", "L"]), ("DE", ["D", "E"]), ("BC", ["B", "C"])]
                .into_iter()
                .find(|(_, halves)| halves.iter().all(|h| !used.contains(h)))?;
            for h in pair.1 {
                used.insert(h);
            }
            anchors.push((p.name.clone(), true, pair.0));
        } else {
            let reg = ["A", "B", "C", "D", "E"]
                .into_iter()
                .find(|r| !used.contains(r))?;
            used.insert(reg);
            anchors.push((p.name.clone(), false, reg));
        }
    }
    Some(anchors)
}

/// Register-convention parameter homes: A/E/D/C/B for bytes, HL/DE/BC for
/// words, assigned in declaration order. Parameters past the register
/// budget are stack-resident (the hybrid convention).
fn register_homes(func: &Function) -> Vec<Anchor> {
    let mut used: HashSet<&str> = HashSet::new();
    let mut homes = Vec::new();
    for p in &func.params {
        let wide = matches!(p.ty.bits(), Some(16));
        let found = if wide {
            [("HL", vec!["H", "L"]), ("DE", vec!["D", "E"]), ("BC", vec!["B", "C"])]
                .into_iter()
                .find(|(_, halves)| halves.iter().all(|h| !used.contains(h)))
        } else {
            [
                ("A", vec!["A"]),
                ("E", vec!["E"]),
                ("D", vec!["D"]),
                ("C", vec!["C"]),
                ("B", vec!["B"]),
            ]
            .into_iter()
            .find(|(_, halves)| halves.iter().all(|h| !used.contains(h)))
        };
        if let Some((reg, halves)) = found {
            for h in halves {
                used.insert(h);
            }
            homes.push((p.name.clone(), wide, reg));
        }
    }
    homes
}

struct ModuleEmitter<'m> {
    module: &'m Module,
    opts: &'m CodegenOptions,
    lines: Vec<String>,
    diagnostics: Vec<String>,
    ram_locals: BTreeMap<String, u16>,
    helpers: BTreeSet<&'static str>,
}

impl<'m> ModuleEmitter<'m> {
    fn new(module: &'m Module, opts: &'m CodegenOptions) -> Self {
        ModuleEmitter {
            module,
            opts,
            lines: Vec::new(),
            diagnostics: Vec::new(),
            ram_locals: BTreeMap::new(),
            helpers: BTreeSet::new(),
        }
    }

    fn run(&mut self) {
        self.lines.push(format!(
            "; MinZ Z80 output for module {}",
            self.module.name
        ));
        self.lines.push(format!("    ORG {:#06x}", self.opts.org));
        self.lines.push(String::new());

        if !self.module.globals.is_empty() || !self.module.strings.is_empty() {
            self.lines.push("; data".to_string());
            for g in &self.module.globals {
                let size = Z80_TOOLKIT.size_of(&g.ty);
                let line = match (&g.init, size) {
                    (Some(v), 1) => format!("{}: DB {}", g.name, v.to_int()),
                    (Some(v), 2) => format!("{}: DW {}", g.name, v.to_int()),
                    (_, n) => format!("{}: DS {n}", g.name),
                };
                self.lines.push(line);
            }
            for s in &self.module.strings {
                self.lines.push(format!("{}: DB {:?}, 0", s.label, s.value));
            }
            self.lines.push(String::new());
        }

        for func in &self.module.functions {
            let mut emitter = FnEmitter::new(self.module, func, self.opts);
            emitter.run();
            self.lines.append(&mut emitter.lines);
            self.lines.push(String::new());
            self.diagnostics.append(&mut emitter.diags);
            for (label, size) in emitter.ram_locals {
                self.ram_locals.insert(label, size);
            }
            self.helpers.extend(emitter.helpers);
        }

        if !self.ram_locals.is_empty() {
            self.lines.push("; locals".to_string());
            for (label, size) in &self.ram_locals {
                self.lines.push(format!("{label}: DS {size}"));
            }
            self.lines.push(String::new());
        }
        if !self.helpers.is_empty() {
            let list = self.helpers.iter().copied().collect::<Vec<_>>().join(", ");
            self.lines.push(format!("; runtime helpers required: {list}"));
        }
    }
}

const SENTINEL_BASE: u32 = u32::MAX - 16;

struct FnEmitter<'m> {
    module: &'m Module,
    func: &'m Function,
    opts: &'m CodegenOptions,
    conv: CallConv,
    alloc: RegAlloc,
    lines: Vec<String>,
    diags: Vec<String>,
    label_seq: usize,
    /// Parameter name -> pinned sentinel register.
    param_sentinels: HashMap<String, VReg>,
    /// Parameters stored to at least once; their uses read memory.
    reassigned: HashSet<String>,
    /// Register-convention parameters backed by a RAM local.
    ram_params: HashSet<String>,
    ram_locals: BTreeMap<String, u16>,
    helpers: BTreeSet<&'static str>,
}

impl<'m> FnEmitter<'m> {
    fn new(module: &'m Module, func: &'m Function, opts: &'m CodegenOptions) -> Self {
        let conv = choose_convention(module, func, opts);
        FnEmitter {
            module,
            func,
            opts,
            conv,
            alloc: RegAlloc::new(func, opts.spill_base),
            lines: Vec::new(),
            diags: Vec::new(),
            label_seq: 0,
            param_sentinels: HashMap::new(),
            reassigned: HashSet::new(),
            ram_params: HashSet::new(),
            ram_locals: BTreeMap::new(),
            helpers: BTreeSet::new(),
        }
    }

    fn ins(&mut self, text: impl Into<String>) {
        self.lines.push(format!("    {}", text.into()));
    }

    fn raw(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    fn fresh_label(&mut self) -> String {
        let n = self.label_seq;
        self.label_seq += 1;
        format!("{}_l{n}", self.func.name)
    }

    fn mir_label(&self, name: &str) -> String {
        format!("{}_{name}", self.func.name)
    }

    fn diag(&mut self, msg: String) {
        self.diags.push(format!("z80: {}: {msg}", self.func.name));
    }

    fn run(&mut self) {
        let sig = self
            .func
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect::<Vec<_>>()
            .join(", ");
        self.raw(format!(
            "; fn {}({sig}) -> {} [{} convention]",
            self.func.name, self.func.ret, self.conv
        ));
        self.raw(format!("{}:", self.func.name));

        self.prologue();

        for i in 0..self.func.body.len() {
            self.instruction(i);
            self.alloc.free_dead(i);
        }
    }

    fn prologue(&mut self) {
        if self.func.interrupt_handler {
            // Shadow set: the handler body runs entirely in the primed
            // registers, so the interrupted code keeps its state.
            self.ins("EXX");
            self.ins("EX AF, AF'");
        }
        match self.conv {
            CallConv::Smc => {
                let anchors = plan_anchors(self.func).unwrap_or_default();
                for (name, wide, reg) in anchors {
                    let k = if wide { 2 } else { 1 };
                    self.raw(format!("{name}$immOP:"));
                    self.ins(format!("LD {reg}, 0        ; SMC anchor {name}"));
                    self.raw(format!("{name}$imm0 EQU {name}$immOP + {k}"));
                    let sentinel = self.sentinel_for(&name);
                    let loc = if wide { Loc::Reg16(reg) } else { Loc::Reg8(reg) };
                    self.alloc.bind_pinned(sentinel, loc);
                }
            }
            CallConv::Register | CallConv::Hybrid => {
                if self.conv == CallConv::Hybrid {
                    self.ins("PUSH IX");
                    self.ins("LD IX, 0");
                    self.ins("ADD IX, SP");
                }
                let homes = register_homes(self.func);
                let multi: Vec<String> = self
                    .func
                    .params
                    .iter()
                    .filter(|p| {
                        self.param_use_count(&p.name) > 1 || self.param_is_stored(&p.name)
                    })
                    .map(|p| p.name.clone())
                    .collect();
                for (name, wide, reg) in homes {
                    if multi.contains(&name) {
                        // Multi-use parameters get a RAM home up front.
                        let label = self.local_label(&name);
                        if wide {
                            self.ins(format!("LD ({label}), {reg}"));
                        } else if reg == "A" {
                            self.ins(format!("LD ({label}), A"));
                        } else {
                            let a_busy = !self.alloc.reg8_free("A");
                            if a_busy {
                                self.ins("PUSH AF");
                            }
                            self.ins(format!("LD A, {reg}"));
                            self.ins(format!("LD ({label}), A"));
                            if a_busy {
                                self.ins("POP AF");
                            }
                        }
                        self.ram_locals.insert(label, if wide { 2 } else { 1 });
                        self.ram_params.insert(name);
                    } else {
                        let sentinel = self.sentinel_for(&name);
                        let loc = if wide { Loc::Reg16(reg) } else { Loc::Reg8(reg) };
                        self.alloc.bind_pinned(sentinel, loc);
                    }
                }
            }
            CallConv::Stack => {
                self.ins("PUSH IX");
                self.ins("LD IX, 0");
                self.ins("ADD IX, SP");
            }
        }
    }

    fn sentinel_for(&mut self, param: &str) -> VReg {
        if let Some(v) = self.param_sentinels.get(param) {
            return *v;
        }
        let v = VReg(SENTINEL_BASE + self.param_sentinels.len() as u32);
        self.param_sentinels.insert(param.to_string(), v);
        v
    }

    fn local_label(&self, name: &str) -> String {
        format!("{}_{name}", self.func.name)
    }

    fn param_use_count(&self, name: &str) -> usize {
        self.func
            .body
            .iter()
            .filter(|i| i.op == Op::LoadParam && i.symbol.as_deref() == Some(name))
            .count()
    }

    fn param_is_stored(&self, name: &str) -> bool {
        self.func
            .body
            .iter()
            .any(|i| i.op == Op::StoreVar && i.symbol.as_deref() == Some(name))
    }

    fn param_index(&self, name: &str) -> Option<usize> {
        self.func.params.iter().position(|p| p.name == name)
    }

    fn param_is_wide(&self, name: &str) -> bool {
        self.func
            .params
            .iter()
            .find(|p| p.name == name)
            .is_some_and(|p| matches!(p.ty.bits(), Some(16)))
    }

    fn is_sentinel(v: VReg) -> bool {
        v.0 >= SENTINEL_BASE
    }

    /// Width of the value an instruction produces.
    fn wide_of(&self, ins: &Instruction) -> bool {
        match &ins.ty {
            Some(t) => matches!(t.bits(), Some(16)),
            None => match ins.op {
                Op::LoadParam => ins
                    .symbol
                    .as_deref()
                    .map(|n| self.param_is_wide(n))
                    .unwrap_or(false),
                Op::Call => {
                    let callee = ins.symbol.as_deref().unwrap_or("");
                    self.module
                        .function(callee)
                        .map(|f| matches!(f.ret.bits(), Some(16)))
                        .unwrap_or(false)
                }
                _ => self
                    .alloc
                    .loc(ins.src1)
                    .map(|l| l.is_wide())
                    .unwrap_or(false),
            },
        }
    }

    /// Relocate the live owner of an 8-bit register, freeing it.
    fn free_reg8(&mut self, phys: &'static str, index: usize, keep: Option<VReg>) {
        let Some(owner) = self.alloc.owner_of(phys) else {
            return;
        };
        if Some(owner) == keep {
            return;
        }
        if !Self::is_sentinel(owner) && !self.alloc.live_after(owner, index) {
            self.alloc.release(owner);
            return;
        }
        let new = self.alloc.rehome(owner, &[phys]);
        self.emit_byte_move(phys, new);
    }

    /// Move a byte from `from` to a freshly picked location.
    fn emit_byte_move(&mut self, from: &str, to: Loc) {
        match to {
            Loc::Reg8(r) => self.ins(format!("LD {r}, {from}")),
            Loc::Mem(addr) => {
                if from == "A" {
                    self.ins(format!("LD ({addr:#06x}), A"));
                } else if self.alloc.reg8_free("A") {
                    self.ins(format!("LD A, {from}"));
                    self.ins(format!("LD ({addr:#06x}), A"));
                } else {
                    // Only the accumulator stores to absolute addresses.
                    self.ins("PUSH AF");
                    self.ins(format!("LD A, {from}"));
                    self.ins(format!("LD ({addr:#06x}), A"));
                    self.ins("POP AF");
                }
            }
            Loc::Reg16(_) => {}
        }
    }

    fn free_a(&mut self, index: usize, keep: Option<VReg>) {
        self.free_reg8("A", index, keep);
    }

    /// Relocate the live owner of HL (wide or a stray half), freeing it.
    fn free_hl(&mut self, index: usize, keep: Option<VReg>) {
        for _ in 0..2 {
            let Some(owner) = self.alloc.owner_of("HL") else {
                return;
            };
            if Some(owner) == keep {
                return;
            }
            if !Self::is_sentinel(owner) && !self.alloc.live_after(owner, index) {
                self.alloc.release(owner);
                continue;
            }
            match self.alloc.loc(owner) {
                Some(Loc::Reg8(half)) => {
                    // A stray byte in H or L must leave both halves.
                    let new = self.alloc.rehome(owner, &["H", "L"]);
                    self.emit_byte_move(half, new);
                }
                Some(Loc::Reg16(_)) => {
                    let new = self.alloc.rehome_wide(owner);
                    match new {
                        Loc::Reg16(pair) => {
                            let (hi, lo) = pair_halves(pair);
                            self.ins(format!("LD {hi}, H"));
                            self.ins(format!("LD {lo}, L"));
                        }
                        Loc::Mem(addr) => self.ins(format!("LD ({addr:#06x}), HL")),
                        Loc::Reg8(_) => {}
                    }
                }
                _ => return,
            }
        }
    }

    /// Bring an 8-bit value into the accumulator.
    fn ensure_a(&mut self, v: VReg, index: usize) {
        match self.alloc.loc(v) {
            Some(Loc::Reg8("A")) => {}
            Some(Loc::Reg8(r)) => {
                self.free_a(index, Some(v));
                self.ins(format!("LD A, {r}"));
                self.alloc.release(v);
                self.alloc.bind(v, Loc::Reg8("A"));
            }
            Some(Loc::Reg16(pair)) => {
                let (_, lo) = pair_halves(pair);
                self.free_a(index, Some(v));
                self.ins(format!("LD A, {lo}"));
            }
            Some(Loc::Mem(addr)) => {
                self.free_a(index, Some(v));
                self.ins(format!("LD A, ({addr:#06x})"));
                self.alloc.release(v);
                self.alloc.bind(v, Loc::Reg8("A"));
            }
            None => {
                self.diag(format!("virtual register {v} read before any write"));
                self.free_a(index, Some(v));
                self.ins("XOR A");
                self.alloc.bind(v, Loc::Reg8("A"));
            }
        }
    }

    /// Bring a 16-bit value into HL.
    fn ensure_hl(&mut self, v: VReg, index: usize) {
        match self.alloc.loc(v) {
            Some(Loc::Reg16("HL")) => {}
            Some(Loc::Reg16(pair)) => {
                self.free_hl(index, Some(v));
                let (hi, lo) = pair_halves(pair);
                self.ins(format!("LD H, {hi}"));
                self.ins(format!("LD L, {lo}"));
                self.alloc.release(v);
                self.alloc.bind(v, Loc::Reg16("HL"));
            }
            Some(Loc::Mem(addr)) => {
                self.free_hl(index, Some(v));
                self.ins(format!("LD HL, ({addr:#06x})"));
                self.alloc.release(v);
                self.alloc.bind(v, Loc::Reg16("HL"));
            }
            Some(Loc::Reg8(r)) => {
                // Widen a byte: value into L, zero H.
                self.free_hl(index, Some(v));
                self.ins(format!("LD L, {r}"));
                self.ins("LD H, 0");
                self.alloc.release(v);
                self.alloc.bind(v, Loc::Reg16("HL"));
            }
            None => {
                self.diag(format!("virtual register {v} read before any write"));
                self.free_hl(index, Some(v));
                self.ins("LD HL, 0");
                self.alloc.bind(v, Loc::Reg16("HL"));
            }
        }
    }

    /// Address label for a named local or global.
    fn var_address(&mut self, name: &str) -> String {
        if let Some(local) = self.func.local(name) {
            if !local.is_param || self.ram_params.contains(name) {
                let label = self.local_label(name);
                let size = Z80_TOOLKIT.size_of(&local.ty).max(1);
                self.ram_locals.insert(label.clone(), size);
                return label;
            }
        }
        name.to_string()
    }

    fn var_is_wide(&self, name: &str) -> bool {
        self.func
            .local(name)
            .map(|l| matches!(l.ty.bits(), Some(16)))
            .or_else(|| {
                self.module
                    .global(name)
                    .map(|g| matches!(g.ty.bits(), Some(16)))
            })
            .unwrap_or(false)
    }

    fn instruction(&mut self, index: usize) {
        let ins = self.func.body[index].clone();
        if let Some(c) = &ins.comment {
            self.ins(format!("; {c}"));
        }
        match ins.op {
            Op::Label => {
                let l = self.mir_label(ins.label.as_deref().unwrap_or("?"));
                self.raw(format!("{l}:"));
            }
            Op::LoadConst => self.load_const(&ins),
            Op::Move => self.mov(&ins, index),
            Op::LoadVar => self.load_var(&ins, index),
            Op::StoreVar => self.store_var(&ins, index),
            Op::LoadParam => self.load_param(&ins, index),
            Op::Add | Op::Sub | Op::And | Op::Or | Op::Xor => self.binary(&ins, index),
            Op::Mul | Op::Div | Op::Mod => self.muldiv(&ins, index),
            Op::Shl | Op::Shr => self.shift(&ins, index),
            Op::Neg | Op::Not => self.unary(&ins, index),
            Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => self.compare(&ins, index),
            Op::Jump => {
                let l = self.mir_label(ins.label.as_deref().unwrap_or("?"));
                self.ins(format!("JP {l}"));
            }
            Op::JumpIf | Op::JumpIfNot | Op::JumpIfZero | Op::JumpIfNotZero => {
                self.cond_jump(&ins, index)
            }
            Op::Return => self.ret(&ins, index),
            Op::Call => self.call(&ins, index),
            Op::Load => self.load_indirect(&ins, index),
            Op::Store => self.store_indirect(&ins, index),
            Op::SmcParam => {
                let name = ins.symbol.as_deref().unwrap_or("?");
                self.ins(format!("; smc param {name} (anchored above)"));
            }
            Op::SmcStore => {
                let name = ins.symbol.clone().unwrap_or_default();
                let wide = self.param_is_wide(&name)
                    || self
                        .alloc
                        .loc(ins.src1)
                        .map(|l| l.is_wide())
                        .unwrap_or(false);
                if wide {
                    self.ensure_hl(ins.src1, index);
                    self.ins(format!("LD ({name}$imm0), HL"));
                } else {
                    self.ensure_a(ins.src1, index);
                    self.ins(format!("LD ({name}$imm0), A"));
                }
            }
        }
    }

    fn load_const(&mut self, ins: &Instruction) {
        let wide = matches!(ins.ty.as_ref().and_then(Type::bits), Some(16));
        if wide {
            let loc = self.alloc.define(ins.dest, true, Some("HL"));
            match loc {
                Loc::Reg16(pair) => self.ins(format!("LD {pair}, {}", ins.imm)),
                Loc::Mem(addr) => {
                    let hl_busy = !self.alloc.reg16_free("HL");
                    if hl_busy {
                        self.ins("PUSH HL");
                    }
                    self.ins(format!("LD HL, {}", ins.imm));
                    self.ins(format!("LD ({addr:#06x}), HL"));
                    if hl_busy {
                        self.ins("POP HL");
                    }
                }
                Loc::Reg8(_) => {}
            }
        } else {
            let loc = self.alloc.define(ins.dest, false, None);
            match loc {
                Loc::Reg8(r) => {
                    if ins.imm == 0 && ins.hints.contains(EmitHint::ZERO_IDIOM) && r == "A" {
                        self.ins("XOR A");
                    } else {
                        self.ins(format!("LD {r}, {}", ins.imm));
                    }
                }
                Loc::Mem(addr) => {
                    let a_busy = !self.alloc.reg8_free("A");
                    if a_busy {
                        self.ins("PUSH AF");
                    }
                    self.ins(format!("LD A, {}", ins.imm));
                    self.ins(format!("LD ({addr:#06x}), A"));
                    if a_busy {
                        self.ins("POP AF");
                    }
                }
                Loc::Reg16(_) => {}
            }
        }
    }

    fn mov(&mut self, ins: &Instruction, index: usize) {
        let wide = self
            .alloc
            .loc(ins.src1)
            .map(|l| l.is_wide())
            .unwrap_or(false);
        let src = self.alloc.loc(ins.src1);
        let dest = self.alloc.define(ins.dest, wide, None);
        match (src, dest) {
            (Some(Loc::Reg8(s)), Loc::Reg8(d)) => {
                if s != d {
                    self.ins(format!("LD {d}, {s}"));
                }
            }
            (Some(Loc::Reg16(s)), Loc::Reg16(d)) => {
                if s != d {
                    let (sh, sl) = pair_halves(s);
                    let (dh, dl) = pair_halves(d);
                    self.ins(format!("LD {dh}, {sh}"));
                    self.ins(format!("LD {dl}, {sl}"));
                }
            }
            (Some(Loc::Mem(addr)), Loc::Reg8(d)) => {
                if d == "A" {
                    self.ins(format!("LD A, ({addr:#06x})"));
                } else {
                    self.free_a(index, None);
                    self.ins(format!("LD A, ({addr:#06x})"));
                    self.ins(format!("LD {d}, A"));
                }
            }
            (Some(Loc::Mem(addr)), Loc::Reg16(d)) => {
                self.ins(format!("LD {d}, ({addr:#06x})"));
            }
            (Some(Loc::Reg8(s)), Loc::Mem(addr)) => {
                if s == "A" {
                    self.ins(format!("LD ({addr:#06x}), A"));
                } else {
                    self.free_a(index, None);
                    self.ins(format!("LD A, {s}"));
                    self.ins(format!("LD ({addr:#06x}), A"));
                }
            }
            (Some(Loc::Reg16(s)), Loc::Mem(addr)) => {
                self.ins(format!("LD ({addr:#06x}), {s}"));
            }
            (Some(Loc::Mem(saddr)), Loc::Mem(daddr)) => {
                self.free_a(index, None);
                self.ins(format!("LD A, ({saddr:#06x})"));
                self.ins(format!("LD ({daddr:#06x}), A"));
            }
            (None, _) => self.diag(format!("move from undefined register {}", ins.src1)),
            (Some(Loc::Reg8(_)), Loc::Reg16(_)) | (Some(Loc::Reg16(_)), Loc::Reg8(_)) => {
                self.diag(format!("move between mismatched register widths for {}", ins.src1))
            }
        }
    }

    fn load_var(&mut self, ins: &Instruction, index: usize) {
        let name = ins.symbol.clone().unwrap_or_default();
        let wide = self.var_is_wide(&name);
        let addr = self.var_address(&name);
        if wide {
            let loc = self.alloc.define(ins.dest, true, Some("HL"));
            match loc {
                Loc::Reg16(pair) => self.ins(format!("LD {pair}, ({addr})")),
                Loc::Mem(m) => {
                    self.free_hl(index, None);
                    self.ins(format!("LD HL, ({addr})"));
                    self.ins(format!("LD ({m:#06x}), HL"));
                }
                Loc::Reg8(_) => {}
            }
        } else {
            let loc = self.alloc.define(ins.dest, false, Some("A"));
            match loc {
                Loc::Reg8("A") => self.ins(format!("LD A, ({addr})")),
                Loc::Reg8(r) => {
                    self.free_a(index, None);
                    self.ins(format!("LD A, ({addr})"));
                    self.ins(format!("LD {r}, A"));
                }
                Loc::Mem(m) => {
                    self.free_a(index, None);
                    self.ins(format!("LD A, ({addr})"));
                    self.ins(format!("LD ({m:#06x}), A"));
                }
                Loc::Reg16(_) => {}
            }
        }
    }

    fn store_var(&mut self, ins: &Instruction, index: usize) {
        let name = ins.symbol.clone().unwrap_or_default();

        // Storing to an SMC parameter patches its immediate; from then on
        // reads degrade to the patched memory location.
        if self.conv == CallConv::Smc && self.param_index(&name).is_some() {
            if self.param_is_wide(&name) {
                self.ensure_hl(ins.src1, index);
                self.ins(format!("LD ({name}$imm0), HL"));
            } else {
                self.ensure_a(ins.src1, index);
                self.ins(format!("LD ({name}$imm0), A"));
            }
            self.reassigned.insert(name);
            return;
        }
        if matches!(self.conv, CallConv::Stack) {
            if let Some(pi) = self.param_index(&name) {
                let off = 4 + 2 * pi;
                self.ensure_a(ins.src1, index);
                self.ins(format!("LD (IX+{off}), A"));
                self.reassigned.insert(name);
                return;
            }
        }

        let wide = self.var_is_wide(&name);
        let addr = self.var_address(&name);
        if wide {
            self.ensure_hl(ins.src1, index);
            self.ins(format!("LD ({addr}), HL"));
        } else {
            self.ensure_a(ins.src1, index);
            self.ins(format!("LD ({addr}), A"));
        }
        self.reassigned.insert(name);
    }

    fn load_param(&mut self, ins: &Instruction, index: usize) {
        let name = ins.symbol.clone().unwrap_or_default();
        let wide = self.param_is_wide(&name);

        match self.conv {
            CallConv::Smc => {
                if self.reassigned.contains(&name) {
                    self.read_patched(&name, ins.dest, wide, index);
                    return;
                }
                if !self.take_param_home(&name, ins.dest) {
                    // Consumed earlier; the immediate bytes still hold it.
                    self.read_patched(&name, ins.dest, wide, index);
                }
            }
            CallConv::Register | CallConv::Hybrid => {
                if self.ram_params.contains(&name) {
                    let addr = self.local_label(&name);
                    if wide {
                        self.free_hl(index, None);
                        self.ins(format!("LD HL, ({addr})"));
                        self.alloc.bind(ins.dest, Loc::Reg16("HL"));
                    } else {
                        self.free_a(index, None);
                        self.ins(format!("LD A, ({addr})"));
                        self.alloc.bind(ins.dest, Loc::Reg8("A"));
                    }
                    return;
                }
                if self.take_param_home(&name, ins.dest) {
                    return;
                }
                // A hybrid parameter past the register budget sits on the
                // IX frame, after the register-passed ones.
                if self.conv == CallConv::Hybrid {
                    let reg_count = register_homes(self.func).len();
                    if let Some(pi) = self.param_index(&name) {
                        if pi >= reg_count {
                            self.stack_param_load(pi - reg_count, ins.dest, wide, index);
                            return;
                        }
                    }
                }
                self.diag(format!("parameter {name} re-read without a RAM home"));
                if wide {
                    self.free_hl(index, None);
                    self.ins("LD HL, 0");
                    self.alloc.bind(ins.dest, Loc::Reg16("HL"));
                } else {
                    self.free_a(index, None);
                    self.ins("XOR A");
                    self.alloc.bind(ins.dest, Loc::Reg8("A"));
                }
            }
            CallConv::Stack => {
                let pi = self.param_index(&name).unwrap_or(0);
                self.stack_param_load(pi, ins.dest, wide, index);
            }
        }
    }

    fn read_patched(&mut self, name: &str, dest: VReg, wide: bool, index: usize) {
        if wide {
            self.free_hl(index, None);
            self.ins(format!("LD HL, ({name}$imm0)"));
            self.alloc.bind(dest, Loc::Reg16("HL"));
        } else {
            self.free_a(index, None);
            self.ins(format!("LD A, ({name}$imm0)"));
            self.alloc.bind(dest, Loc::Reg8("A"));
        }
    }

    /// Transfer a parameter's incoming register to `dest`; true on success.
    fn take_param_home(&mut self, name: &str, dest: VReg) -> bool {
        if let Some(&sentinel) = self.param_sentinels.get(name) {
            if self.alloc.loc(sentinel).is_some() {
                self.alloc.transfer(sentinel, dest);
                return true;
            }
        }
        false
    }

    fn stack_param_load(&mut self, slot: usize, dest: VReg, wide: bool, index: usize) {
        let off = 4 + 2 * slot;
        if wide {
            let loc = self.alloc.define(dest, true, Some("HL"));
            match loc {
                Loc::Reg16(pair) => {
                    let (hi, lo) = pair_halves(pair);
                    self.ins(format!("LD {lo}, (IX+{off})"));
                    self.ins(format!("LD {hi}, (IX+{})", off + 1));
                }
                Loc::Mem(m) => {
                    self.free_hl(index, None);
                    self.ins(format!("LD L, (IX+{off})"));
                    self.ins(format!("LD H, (IX+{})", off + 1));
                    self.ins(format!("LD ({m:#06x}), HL"));
                }
                Loc::Reg8(_) => {}
            }
        } else {
            let loc = self.alloc.define(dest, false, None);
            match loc {
                Loc::Reg8(r) => self.ins(format!("LD {r}, (IX+{off})")),
                Loc::Mem(m) => {
                    self.free_a(index, None);
                    self.ins(format!("LD A, (IX+{off})"));
                    self.ins(format!("LD ({m:#06x}), A"));
                }
                Loc::Reg16(_) => {}
            }
        }
    }

    /// Render the right operand of an 8-bit ALU op, with setup/teardown.
    fn rhs8(&mut self, ins: &Instruction) -> (String, Vec<String>, Vec<String>) {
        if ins.has_imm_operand() {
            return (ins.imm.to_string(), vec![], vec![]);
        }
        match self.alloc.loc(ins.src2) {
            Some(Loc::Reg8(r)) => (r.to_string(), vec![], vec![]),
            Some(Loc::Reg16(pair)) => {
                let (_, lo) = pair_halves(pair);
                (lo.to_string(), vec![], vec![])
            }
            Some(Loc::Mem(addr)) => {
                let hl_busy = !self.alloc.reg16_free("HL");
                let mut pre = Vec::new();
                let mut post = Vec::new();
                if hl_busy {
                    pre.push("PUSH HL".to_string());
                    post.push("POP HL".to_string());
                }
                pre.push(format!("LD HL, {addr:#06x}"));
                ("(HL)".to_string(), pre, post)
            }
            None => {
                self.diag(format!("register {} read before any write", ins.src2));
                ("0".to_string(), vec![], vec![])
            }
        }
    }

    /// Copy a live left operand out of the accumulator before the op
    /// overwrites it.
    fn preserve_src1_8(&mut self, src1: VReg, index: usize) {
        if self.alloc.live_after(src1, index) {
            let new = self.alloc.rehome(src1, &["A"]);
            match new {
                Loc::Reg8(r) => self.ins(format!("LD {r}, A")),
                Loc::Mem(addr) => self.ins(format!("LD ({addr:#06x}), A")),
                Loc::Reg16(_) => {}
            }
        } else {
            self.alloc.release(src1);
        }
    }

    fn preserve_src1_16(&mut self, src1: VReg, index: usize) {
        if self.alloc.live_after(src1, index) {
            let new = self.alloc.rehome_wide(src1);
            match new {
                Loc::Reg16(pair) => {
                    let (hi, lo) = pair_halves(pair);
                    self.ins(format!("LD {hi}, H"));
                    self.ins(format!("LD {lo}, L"));
                }
                Loc::Mem(addr) => self.ins(format!("LD ({addr:#06x}), HL")),
                Loc::Reg8(_) => {}
            }
        } else {
            self.alloc.release(src1);
        }
    }

    /// 8-bit add/sub/bitwise; 16-bit add/sub/bitwise on pairs.
    fn binary(&mut self, ins: &Instruction, index: usize) {
        if self.wide_of(ins) {
            self.binary16(ins, index);
            return;
        }

        // INC/DEC shortcut flagged by the optimizer.
        if ins.hints.intersects(EmitHint::INC | EmitHint::DEC) && ins.has_imm_operand() {
            let mn = if ins.hints.contains(EmitHint::INC) {
                "INC"
            } else {
                "DEC"
            };
            if let Some(Loc::Reg8(r)) = self.alloc.loc(ins.src1) {
                if !self.alloc.live_after(ins.src1, index) {
                    self.ins(format!("{mn} {r}"));
                    self.alloc.release(ins.src1);
                    self.alloc.bind(ins.dest, Loc::Reg8(r));
                    return;
                }
            }
        }

        self.ensure_a(ins.src1, index);
        self.preserve_src1_8(ins.src1, index);

        let (operand, pre, post) = self.rhs8(ins);
        for p in pre {
            self.ins(p);
        }
        let text = match ins.op {
            Op::Add => format!("ADD A, {operand}"),
            Op::Sub => format!("SUB {operand}"),
            Op::And => format!("AND {operand}"),
            Op::Or => format!("OR {operand}"),
            Op::Xor => format!("XOR {operand}"),
            _ => unreachable!(),
        };
        self.ins(text);
        for p in post {
            self.ins(p);
        }
        self.alloc.bind(ins.dest, Loc::Reg8("A"));
    }

    fn binary16(&mut self, ins: &Instruction, index: usize) {
        self.ensure_hl(ins.src1, index);
        self.preserve_src1_16(ins.src1, index);

        // PTR_STEP: a small pointer offset emits as increments.
        if ins.hints.contains(EmitHint::PTR_STEP) && ins.has_imm_operand() {
            for _ in 0..ins.imm {
                self.ins("INC HL");
            }
            self.alloc.bind(ins.dest, Loc::Reg16("HL"));
            return;
        }

        let rhs = self.wide_rhs(ins);
        match ins.op {
            Op::Add => self.ins(format!("ADD HL, {rhs}")),
            Op::Sub => {
                self.ins("OR A");
                self.ins(format!("SBC HL, {rhs}"));
            }
            Op::And | Op::Or | Op::Xor => {
                let mn = match ins.op {
                    Op::And => "AND",
                    Op::Or => "OR",
                    _ => "XOR",
                };
                let (hi, lo) = pair_halves(rhs.as_str());
                self.free_a(index, None);
                self.ins("LD A, H");
                self.ins(format!("{mn} {hi}"));
                self.ins("LD H, A");
                self.ins("LD A, L");
                self.ins(format!("{mn} {lo}"));
                self.ins("LD L, A");
            }
            _ => unreachable!(),
        }
        self.alloc.bind(ins.dest, Loc::Reg16("HL"));
    }

    /// Materialize the 16-bit right operand into DE or BC.
    fn wide_rhs(&mut self, ins: &Instruction) -> String {
        if ins.has_imm_operand() {
            let pair = if self.alloc.reg16_free("DE") { "DE" } else { "BC" };
            self.ins(format!("LD {pair}, {}", ins.imm));
            return pair.to_string();
        }
        match self.alloc.loc(ins.src2) {
            Some(Loc::Reg16(p)) => p.to_string(),
            Some(Loc::Mem(addr)) => {
                let pair = if self.alloc.reg16_free("DE") { "DE" } else { "BC" };
                self.ins(format!("LD {pair}, ({addr:#06x})"));
                pair.to_string()
            }
            Some(Loc::Reg8(r)) => {
                let pair = if self.alloc.reg16_free("DE") { "DE" } else { "BC" };
                let (hi, lo) = pair_halves(pair);
                self.ins(format!("LD {lo}, {r}"));
                self.ins(format!("LD {hi}, 0"));
                pair.to_string()
            }
            None => {
                self.diag(format!("register {} read before any write", ins.src2));
                "DE".to_string()
            }
        }
    }

    /// Multiply, divide, remainder: runtime helper calls.
    fn muldiv(&mut self, ins: &Instruction, index: usize) {
        let wide = self.wide_of(ins);
        let helper: &'static str = match (ins.op, wide) {
            (Op::Mul, false) => "__mul8",
            (Op::Div, false) => "__div8",
            (Op::Mod, false) => "__mod8",
            (Op::Mul, true) => "__mul16",
            (Op::Div, true) => "__div16",
            (Op::Mod, true) => "__mod16",
            _ => unreachable!(),
        };
        self.helpers.insert(helper);

        if wide {
            self.ensure_hl(ins.src1, index);
            self.alloc.release(ins.src1);
            let rhs = self.wide_rhs(ins);
            if rhs != "DE" {
                let (hi, lo) = pair_halves(rhs.as_str());
                self.ins(format!("LD D, {hi}"));
                self.ins(format!("LD E, {lo}"));
            }
            self.ins(format!("CALL {helper}"));
            self.alloc.bind(ins.dest, Loc::Reg16("HL"));
        } else {
            // Helper contract: left operand in A, right in E, result in A.
            let (operand, pre, post) = self.rhs8(ins);
            if operand != "E" {
                self.free_reg8("E", index, Some(ins.src1));
                for p in pre {
                    self.ins(p);
                }
                self.ins(format!("LD E, {operand}"));
                for p in post {
                    self.ins(p);
                }
            }
            self.ensure_a(ins.src1, index);
            self.alloc.release(ins.src1);
            self.ins(format!("CALL {helper}"));
            self.alloc.bind(ins.dest, Loc::Reg8("A"));
        }
    }

    fn shift(&mut self, ins: &Instruction, index: usize) {
        let wide = self.wide_of(ins);
        let signed = matches!(&ins.ty, Some(t) if t.is_signed());

        if !ins.has_imm_operand() {
            // Variable shift counts go through helpers.
            let helper: &'static str = match (ins.op, wide, signed) {
                (Op::Shl, false, _) => "__shl8",
                (Op::Shr, false, false) => "__shr8",
                (Op::Shr, false, true) => "__sar8",
                (Op::Shl, true, _) => "__shl16",
                (Op::Shr, true, false) => "__shr16",
                (Op::Shr, true, true) => "__sar16",
                _ => unreachable!(),
            };
            self.helpers.insert(helper);
            let (operand, pre, post) = self.rhs8(ins);
            if operand != "E" {
                self.free_reg8("E", index, Some(ins.src1));
                for p in pre {
                    self.ins(p);
                }
                self.ins(format!("LD E, {operand}"));
                for p in post {
                    self.ins(p);
                }
            }
            if wide {
                self.ensure_hl(ins.src1, index);
            } else {
                self.ensure_a(ins.src1, index);
            }
            self.alloc.release(ins.src1);
            self.ins(format!("CALL {helper}"));
            let loc = if wide { Loc::Reg16("HL") } else { Loc::Reg8("A") };
            self.alloc.bind(ins.dest, loc);
            return;
        }

        let count = ins.imm.clamp(0, 16) as usize;
        if wide {
            self.ensure_hl(ins.src1, index);
            self.preserve_src1_16(ins.src1, index);
            for _ in 0..count.min(16) {
                match (ins.op, signed) {
                    (Op::Shl, _) => self.ins("ADD HL, HL"),
                    (Op::Shr, false) => {
                        self.ins("SRL H");
                        self.ins("RR L");
                    }
                    (Op::Shr, true) => {
                        self.ins("SRA H");
                        self.ins("RR L");
                    }
                    _ => unreachable!(),
                }
            }
            self.alloc.bind(ins.dest, Loc::Reg16("HL"));
        } else {
            self.ensure_a(ins.src1, index);
            self.preserve_src1_8(ins.src1, index);
            if ins.op == Op::Shl && count >= 8 {
                self.ins("XOR A");
            } else {
                for _ in 0..count.min(8) {
                    match (ins.op, signed) {
                        (Op::Shl, _) => self.ins("ADD A, A"),
                        (Op::Shr, false) => self.ins("SRL A"),
                        (Op::Shr, true) => self.ins("SRA A"),
                        _ => unreachable!(),
                    }
                }
            }
            self.alloc.bind(ins.dest, Loc::Reg8("A"));
        }
    }

    fn unary(&mut self, ins: &Instruction, index: usize) {
        let wide = self.wide_of(ins);
        if wide {
            self.ensure_hl(ins.src1, index);
            self.preserve_src1_16(ins.src1, index);
            match ins.op {
                Op::Neg => {
                    self.free_a(index, None);
                    self.ins("XOR A");
                    self.ins("SUB L");
                    self.ins("LD L, A");
                    self.ins("LD A, 0");
                    self.ins("SBC A, H");
                    self.ins("LD H, A");
                }
                Op::Not => {
                    self.free_a(index, None);
                    self.ins("LD A, H");
                    self.ins("CPL");
                    self.ins("LD H, A");
                    self.ins("LD A, L");
                    self.ins("CPL");
                    self.ins("LD L, A");
                }
                _ => unreachable!(),
            }
            self.alloc.bind(ins.dest, Loc::Reg16("HL"));
        } else {
            self.ensure_a(ins.src1, index);
            self.preserve_src1_8(ins.src1, index);
            match ins.op {
                Op::Neg => self.ins("NEG"),
                Op::Not => self.ins("CPL"),
                _ => unreachable!(),
            }
            self.alloc.bind(ins.dest, Loc::Reg8("A"));
        }
    }

    /// Signedness of a compare, read off the defining instruction of the
    /// left operand.
    fn compare_is_signed(&self, ins: &Instruction, index: usize) -> bool {
        matches!(
            self.func.body[..index]
                .iter()
                .rev()
                .find(|d| d.written_reg() == Some(ins.src1))
                .and_then(|d| d.ty.as_ref()),
            Some(t) if t.is_signed()
        )
    }

    /// Comparisons produce 0 or 1 in the accumulator.
    ///
    /// `Gt` and signed `Ge` are computed as the complement of `Le`/`Lt`
    /// and flipped with `XOR 1`, which keeps every path single-compare.
    fn compare(&mut self, ins: &Instruction, index: usize) {
        let signed = self.compare_is_signed(ins, index);
        let wide = self
            .alloc
            .loc(ins.src1)
            .map(|l| l.is_wide())
            .unwrap_or(false);

        // Set the flags for lhs - rhs.
        if wide {
            self.ensure_hl(ins.src1, index);
            self.preserve_src1_16(ins.src1, index);
            let rhs = self.wide_rhs(ins);
            self.ins("OR A");
            self.ins(format!("SBC HL, {rhs}"));
        } else {
            self.ensure_a(ins.src1, index);
            self.preserve_src1_8(ins.src1, index);
            let (operand, pre, post) = self.rhs8(ins);
            for p in pre {
                self.ins(p);
            }
            self.ins(format!("CP {operand}"));
            for p in post {
                self.ins(p);
            }
        }

        // (base condition to materialize, flip result afterwards)
        let (base, flip) = match ins.op {
            Op::Gt => (Op::Le, true),
            Op::Ge if signed => (Op::Lt, true),
            other => (other, false),
        };

        let done = self.fresh_label();
        self.ins("LD A, 1");
        match (base, signed) {
            (Op::Eq, _) => self.ins(format!("JR Z, {done}")),
            (Op::Ne, _) => self.ins(format!("JR NZ, {done}")),
            (Op::Lt, false) => self.ins(format!("JR C, {done}")),
            (Op::Ge, false) => self.ins(format!("JR NC, {done}")),
            (Op::Le, false) => {
                self.ins(format!("JR C, {done}"));
                self.ins(format!("JR Z, {done}"));
            }
            (Op::Lt, true) | (Op::Le, true) => {
                if base == Op::Le {
                    self.ins(format!("JR Z, {done}"));
                }
                // Signed less: sign xor overflow.
                let ovf = self.fresh_label();
                let fals = self.fresh_label();
                self.ins(format!("JP PE, {ovf}"));
                self.ins(format!("JP M, {done}"));
                self.ins(format!("JR {fals}"));
                self.raw(format!("{ovf}:"));
                self.ins(format!("JP P, {done}"));
                self.raw(format!("{fals}:"));
            }
            _ => unreachable!(),
        }
        self.ins("XOR A");
        self.raw(format!("{done}:"));
        if flip {
            self.ins("XOR 1");
        }
        self.alloc.bind(ins.dest, Loc::Reg8("A"));
    }

    fn cond_jump(&mut self, ins: &Instruction, index: usize) {
        let target = self.mir_label(ins.label.as_deref().unwrap_or("?"));
        let wide = self
            .alloc
            .loc(ins.src1)
            .map(|l| l.is_wide())
            .unwrap_or(false);

        if wide {
            match self.alloc.loc(ins.src1) {
                Some(Loc::Reg16(pair)) => {
                    let (hi, lo) = pair_halves(pair);
                    self.free_a(index, None);
                    self.ins(format!("LD A, {hi}"));
                    self.ins(format!("OR {lo}"));
                }
                _ => {
                    self.ensure_hl(ins.src1, index);
                    self.free_a(index, None);
                    self.ins("LD A, H");
                    self.ins("OR L");
                }
            }
        } else {
            match self.alloc.loc(ins.src1) {
                Some(Loc::Reg8("A")) => self.ins("OR A"),
                Some(Loc::Reg8(r)) => {
                    // Set Z without touching the accumulator.
                    self.ins(format!("INC {r}"));
                    self.ins(format!("DEC {r}"));
                }
                _ => {
                    self.ensure_a(ins.src1, index);
                    self.ins("OR A");
                }
            }
        }

        let cc = match ins.op {
            Op::JumpIf | Op::JumpIfNotZero => "NZ",
            Op::JumpIfNot | Op::JumpIfZero => "Z",
            _ => unreachable!(),
        };
        self.ins(format!("JP {cc}, {target}"));
    }

    fn ret(&mut self, ins: &Instruction, index: usize) {
        if ins.src1.is_some() {
            if matches!(self.func.ret.bits(), Some(16)) {
                self.ensure_hl(ins.src1, index);
            } else if self.func.ret != Type::Void {
                self.ensure_a(ins.src1, index);
            }
        }
        if self.func.interrupt_handler {
            self.ins("EX AF, AF'");
            self.ins("EXX");
            self.ins(if self.opts.use_retn { "RETN" } else { "RETI" });
            return;
        }
        if matches!(self.conv, CallConv::Stack | CallConv::Hybrid) {
            self.ins("LD SP, IX");
            self.ins("POP IX");
        }
        self.ins("RET");
    }

    /// Pairs holding values that must survive the call.
    fn pairs_to_save(&self, index: usize, args: &[VReg]) -> Vec<&'static str> {
        let mut saved: Vec<&'static str> = Vec::new();
        let mut note = |loc: Loc, saved: &mut Vec<&'static str>| {
            let pair = match loc {
                Loc::Reg8("A") => "AF",
                Loc::Reg8("B") | Loc::Reg8("C") => "BC",
                Loc::Reg8("D") | Loc::Reg8("E") => "DE",
                Loc::Reg8("H") | Loc::Reg8("L") => "HL",
                Loc::Reg16(p) => p,
                _ => return,
            };
            if !saved.contains(&pair) {
                saved.push(pair);
            }
        };
        for (v, loc) in self.alloc.live_locs(index) {
            if args.contains(&v) {
                continue;
            }
            note(loc, &mut saved);
        }
        // Unconsumed parameter homes survive calls too.
        for sentinel in self.param_sentinels.values() {
            if let Some(loc) = self.alloc.loc(*sentinel) {
                note(loc, &mut saved);
            }
        }
        saved
    }

    fn call(&mut self, ins: &Instruction, index: usize) {
        let callee_name = ins.symbol.clone().unwrap_or_default();
        let callee = self.module.function(&callee_name);
        let callee_conv = callee
            .map(|f| choose_convention(self.module, f, self.opts))
            .unwrap_or(CallConv::Register);

        let saved = self.pairs_to_save(index, &ins.args);
        for p in &saved {
            self.ins(format!("PUSH {p}"));
        }

        match callee_conv {
            CallConv::Smc => {
                let plan = callee.and_then(plan_anchors).unwrap_or_default();
                for ((pname, wide, _), arg) in plan.iter().zip(ins.args.iter()) {
                    if *wide {
                        self.ensure_hl(*arg, index);
                        self.ins(format!("LD ({pname}$imm0), HL"));
                    } else {
                        self.ensure_a(*arg, index);
                        self.ins(format!("LD ({pname}$imm0), A"));
                    }
                    self.alloc.release(*arg);
                }
            }
            CallConv::Register | CallConv::Hybrid => {
                let homes = callee.map(register_homes).unwrap_or_else(|| {
                    // Unknown callee: bytes through A, E, D, C, B in order.
                    ins.args
                        .iter()
                        .zip(["A", "E", "D", "C", "B"])
                        .map(|(_, r)| (String::new(), false, r))
                        .collect()
                });

                // Stack-resident tail arguments first, right to left.
                let tail = &ins.args[homes.len().min(ins.args.len())..];
                for arg in tail.iter().rev() {
                    self.ensure_hl(*arg, index);
                    self.ins("PUSH HL");
                    self.alloc.release(*arg);
                }

                let reg_args = ins.args.len().min(homes.len());
                if reg_args > 1 {
                    // Park every register argument on the stack, then pop
                    // into the homes in reverse; sidesteps ordering
                    // hazards between source and target registers.
                    for (i, arg) in ins.args.iter().take(reg_args).enumerate() {
                        if homes[i].1 {
                            self.ensure_hl(*arg, index);
                            self.ins("PUSH HL");
                        } else {
                            self.ensure_a(*arg, index);
                            self.ins("PUSH AF");
                        }
                        self.alloc.release(*arg);
                    }
                    for i in (0..reg_args).rev() {
                        let (_, wide, reg) = &homes[i];
                        if *wide {
                            self.ins("POP HL");
                            if *reg != "HL" {
                                let (hi, lo) = pair_halves(reg);
                                self.ins(format!("LD {hi}, H"));
                                self.ins(format!("LD {lo}, L"));
                            }
                        } else {
                            self.ins("POP AF");
                            if *reg != "A" {
                                self.ins(format!("LD {reg}, A"));
                            }
                        }
                    }
                } else if reg_args == 1 {
                    let (_, wide, reg) = &homes[0];
                    let arg = ins.args[0];
                    if *wide {
                        self.ensure_hl(arg, index);
                        if *reg != "HL" {
                            let (hi, lo) = pair_halves(reg);
                            self.ins(format!("LD {hi}, H"));
                            self.ins(format!("LD {lo}, L"));
                        }
                    } else {
                        self.ensure_a(arg, index);
                        if *reg != "A" {
                            self.ins(format!("LD {reg}, A"));
                        }
                    }
                    self.alloc.release(arg);
                }
            }
            CallConv::Stack => {
                for arg in ins.args.iter().rev() {
                    self.ensure_hl(*arg, index);
                    self.ins("PUSH HL");
                    self.alloc.release(*arg);
                }
            }
        }

        self.ins(format!("CALL {callee_name}"));

        let stack_args = match callee_conv {
            CallConv::Stack => ins.args.len(),
            CallConv::Register | CallConv::Hybrid => {
                let homes = callee.map(register_homes).map(|h| h.len()).unwrap_or(5);
                ins.args.len().saturating_sub(homes)
            }
            CallConv::Smc => 0,
        };
        for _ in 0..stack_args * 2 {
            self.ins("INC SP");
        }

        for arg in &ins.args {
            self.alloc.release(*arg);
        }

        if ins.dest.is_some() {
            let ret_wide = callee
                .map(|f| matches!(f.ret.bits(), Some(16)))
                .unwrap_or(false);
            if saved.is_empty() {
                let loc = if ret_wide {
                    Loc::Reg16("HL")
                } else {
                    Loc::Reg8("A")
                };
                self.alloc.bind(ins.dest, loc);
            } else {
                // The restore pops below clobber the return registers;
                // park the result in a spill slot first.
                let slot = self.alloc.spill_for(ins.dest);
                if ret_wide {
                    self.ins(format!("LD ({slot:#06x}), HL"));
                } else {
                    self.ins(format!("LD ({slot:#06x}), A"));
                }
            }
        }

        for p in saved.iter().rev() {
            self.ins(format!("POP {p}"));
        }
    }

    fn load_indirect(&mut self, ins: &Instruction, index: usize) {
        self.ensure_hl(ins.src1, index);
        let wide = matches!(ins.ty.as_ref().and_then(Type::bits), Some(16));
        if wide {
            let pair = if self.alloc.reg16_free("DE") { "DE" } else { "BC" };
            let (hi, lo) = pair_halves(pair);
            self.ins(format!("LD {lo}, (HL)"));
            self.ins("INC HL");
            self.ins(format!("LD {hi}, (HL)"));
            self.ins("DEC HL");
            self.alloc.bind(ins.dest, Loc::Reg16(pair));
        } else {
            self.free_a(index, None);
            self.ins("LD A, (HL)");
            self.alloc.bind(ins.dest, Loc::Reg8("A"));
        }
    }

    fn store_indirect(&mut self, ins: &Instruction, index: usize) {
        self.ensure_hl(ins.src1, index);
        match self.alloc.loc(ins.src2) {
            Some(Loc::Reg8(r)) => self.ins(format!("LD (HL), {r}")),
            Some(Loc::Reg16(pair)) => {
                let (hi, lo) = pair_halves(pair);
                self.ins(format!("LD (HL), {lo}"));
                self.ins("INC HL");
                self.ins(format!("LD (HL), {hi}"));
                self.ins("DEC HL");
            }
            Some(Loc::Mem(addr)) => {
                self.free_a(index, None);
                self.ins(format!("LD A, ({addr:#06x})"));
                self.ins("LD (HL), A");
            }
            None => self.diag(format!("register {} read before any write", ins.src2)),
        }
    }
}

fn pair_halves(pair: &str) -> (&'static str, &'static str) {
    match pair {
        "HL" => ("H", "L"),
        "DE" => ("D", "E"),
        _ => ("B", "C"),
    }
}
