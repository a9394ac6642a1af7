//! LLVM IR backend.
//!
//! Textual IR, front-end style: one alloca per virtual register and named
//! local, loads and stores around every operation, basic blocks split at
//! MIR labels. No SSA construction here; `opt -mem2reg` is the downstream
//! tool's job.

use std::collections::BTreeMap;

use core::fmt::Write;

use itertools::Itertools;
use minz_mir::{Function, Module, Op, Type, VReg};

use crate::toolkit::{CallConvDesc, CallModel, Features, Toolkit};
use crate::{Backend, CodegenError, CodegenOptions, GenOutput};

const LLVM_TOOLKIT: Toolkit = Toolkit {
    name: "llvm",
    comment: ";",
    instr: &[],
    patterns: &[],
    call_conv: CallConvDesc {
        model: CallModel::Stack,
        return_location: "ret",
    },
    registers: &[],
    // Pointers stay i16: the IR carries the same address space the
    // Z80-derived MIR was typed against.
    pointer_size: 2,
    features: Features::POINTERS_16BIT,
    extra_flags: &["hosted"],
};

/// LLVM IR generator.
#[derive(Debug)]
pub struct LlvmBackend {
    toolkit: Toolkit,
}

impl LlvmBackend {
    /// Fresh backend instance.
    pub fn new() -> Self {
        LlvmBackend {
            toolkit: LLVM_TOOLKIT,
        }
    }
}

impl Default for LlvmBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn ll_type(ty: &Type) -> &'static str {
    match ty {
        Type::U8 | Type::I8 | Type::Bool => "i8",
        Type::U16 | Type::I16 | Type::Pointer(_) => "i16",
        Type::Void => "void",
        Type::Array(..) | Type::Struct(_) => "i16",
    }
}

struct LlvmFn<'a> {
    func: &'a Function,
    out: String,
    tmp: usize,
    /// Whether the current basic block already ended in a terminator.
    terminated: bool,
}

impl<'a> LlvmFn<'a> {
    fn tmp(&mut self) -> String {
        self.tmp += 1;
        format!("%t{}", self.tmp)
    }

    fn line(&mut self, text: impl Into<String>) {
        self.out.push_str("  ");
        self.out.push_str(&text.into());
        self.out.push('\n');
        self.terminated = false;
    }

    fn terminator(&mut self, text: impl Into<String>) {
        self.out.push_str("  ");
        self.out.push_str(&text.into());
        self.out.push('\n');
        self.terminated = true;
    }

    fn block(&mut self, name: &str) {
        if !self.terminated {
            let _ = writeln!(self.out, "  br label %{name}");
        }
        let _ = writeln!(self.out, "{name}:");
        self.terminated = false;
    }

    /// Load a virtual register slot into a fresh temporary.
    fn load(&mut self, reg: VReg) -> String {
        let t = self.tmp();
        self.line(format!("{t} = load i16, ptr %{reg}.slot"));
        t
    }

    fn store(&mut self, reg: VReg, value: &str) {
        self.line(format!("store i16 {value}, ptr %{reg}.slot"));
    }

    fn emit(&mut self, diagnostics: &mut Vec<String>) {
        let func = self.func;
        let params = func
            .params
            .iter()
            .map(|p| format!("{} %{}", ll_type(&p.ty), p.name))
            .join(", ");
        let _ = writeln!(
            self.out,
            "define {} @{}({params}) {{",
            ll_type(&func.ret),
            func.name
        );
        let _ = writeln!(self.out, "entry:");

        // One i16 slot per virtual register and per named local; narrow
        // parameters widen on entry.
        let mut regs: BTreeMap<VReg, ()> = BTreeMap::new();
        for ins in &func.body {
            if let Some(d) = ins.written_reg() {
                regs.insert(d, ());
            }
            for r in ins.read_regs() {
                regs.insert(r, ());
            }
        }
        for reg in regs.keys() {
            self.line(format!("%{reg}.slot = alloca i16"));
        }
        for local in &func.locals {
            self.line(format!("%{}.slot = alloca i16", local.name));
        }
        for p in &func.params {
            if ll_type(&p.ty) == "i8" {
                let t = self.tmp();
                let ext = if p.ty.is_signed() { "sext" } else { "zext" };
                self.line(format!("{t} = {ext} i8 %{} to i16", p.name));
                self.line(format!("store i16 {t}, ptr %{}.slot", p.name));
            } else {
                self.line(format!("store i16 %{}, ptr %{}.slot", p.name, p.name));
            }
        }

        for ins in &func.body {
            self.instruction(ins, diagnostics);
        }

        if !self.terminated {
            if func.ret == Type::Void {
                self.terminator("ret void");
            } else {
                self.terminator(format!("ret {} 0", ll_type(&func.ret)));
            }
        }
        let _ = writeln!(self.out, "}}");
        let _ = writeln!(self.out);
    }

    fn instruction(&mut self, ins: &minz_mir::Instruction, diagnostics: &mut Vec<String>) {
        match ins.op {
            Op::Label => {
                let name = ins.label.clone().unwrap_or_default();
                self.block(&name);
            }
            Op::LoadConst => {
                let v = ins
                    .ty
                    .as_ref()
                    .map(|t| t.wrap(ins.imm))
                    .unwrap_or(ins.imm);
                self.store(ins.dest, &v.to_string());
            }
            Op::LoadVar | Op::LoadParam => {
                let name = ins.symbol.clone().unwrap_or_default();
                let t = self.tmp();
                self.line(format!("{t} = load i16, ptr %{name}.slot"));
                self.store(ins.dest, &t);
            }
            Op::StoreVar => {
                let name = ins.symbol.clone().unwrap_or_default();
                let v = self.load(ins.src1);
                self.line(format!("store i16 {v}, ptr %{name}.slot"));
            }
            Op::Move => {
                let v = self.load(ins.src1);
                self.store(ins.dest, &v);
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::And | Op::Or | Op::Xor
            | Op::Shl | Op::Shr => {
                let signed = matches!(&ins.ty, Some(t) if t.is_signed());
                let mn = match (ins.op, signed) {
                    (Op::Add, _) => "add",
                    (Op::Sub, _) => "sub",
                    (Op::Mul, _) => "mul",
                    (Op::Div, false) => "udiv",
                    (Op::Div, true) => "sdiv",
                    (Op::Mod, false) => "urem",
                    (Op::Mod, true) => "srem",
                    (Op::And, _) => "and",
                    (Op::Or, _) => "or",
                    (Op::Xor, _) => "xor",
                    (Op::Shl, _) => "shl",
                    (Op::Shr, false) => "lshr",
                    _ => "ashr",
                };
                let a = self.load(ins.src1);
                let b = if ins.has_imm_operand() {
                    ins.imm.to_string()
                } else {
                    self.load(ins.src2)
                };
                let t = self.tmp();
                self.line(format!("{t} = {mn} i16 {a}, {b}"));
                self.store(ins.dest, &t);
            }
            Op::Neg => {
                let a = self.load(ins.src1);
                let t = self.tmp();
                self.line(format!("{t} = sub i16 0, {a}"));
                self.store(ins.dest, &t);
            }
            Op::Not => {
                let a = self.load(ins.src1);
                let t = self.tmp();
                self.line(format!("{t} = xor i16 {a}, -1"));
                self.store(ins.dest, &t);
            }
            Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                let signed = matches!(&ins.ty, Some(t) if t.is_signed());
                let cc = match (ins.op, signed) {
                    (Op::Eq, _) => "eq",
                    (Op::Ne, _) => "ne",
                    (Op::Lt, false) => "ult",
                    (Op::Le, false) => "ule",
                    (Op::Gt, false) => "ugt",
                    (Op::Ge, false) => "uge",
                    (Op::Lt, true) => "slt",
                    (Op::Le, true) => "sle",
                    (Op::Gt, true) => "sgt",
                    _ => "sge",
                };
                let a = self.load(ins.src1);
                let b = if ins.has_imm_operand() {
                    ins.imm.to_string()
                } else {
                    self.load(ins.src2)
                };
                let c = self.tmp();
                self.line(format!("{c} = icmp {cc} i16 {a}, {b}"));
                let z = self.tmp();
                self.line(format!("{z} = zext i1 {c} to i16"));
                self.store(ins.dest, &z);
            }
            Op::Jump => {
                let l = ins.label.clone().unwrap_or_default();
                self.terminator(format!("br label %{l}"));
            }
            Op::JumpIf | Op::JumpIfNot | Op::JumpIfZero | Op::JumpIfNotZero => {
                let l = ins.label.clone().unwrap_or_default();
                let v = self.load(ins.src1);
                let c = self.tmp();
                let cc = match ins.op {
                    Op::JumpIf | Op::JumpIfNotZero => "ne",
                    _ => "eq",
                };
                self.line(format!("{c} = icmp {cc} i16 {v}, 0"));
                let next = format!("fall{}", self.tmp.wrapping_add(1));
                self.tmp += 1;
                self.terminator(format!("br i1 {c}, label %{l}, label %{next}"));
                let _ = writeln!(self.out, "{next}:");
                self.terminated = false;
            }
            Op::Return => {
                if self.func.ret == Type::Void {
                    self.terminator("ret void");
                } else {
                    let v = self.load(ins.src1);
                    if ll_type(&self.func.ret) == "i8" {
                        let t = self.tmp();
                        self.line(format!("{t} = trunc i16 {v} to i8"));
                        self.terminator(format!("ret i8 {t}"));
                    } else {
                        self.terminator(format!("ret i16 {v}"));
                    }
                }
            }
            Op::Call => {
                let callee = ins.symbol.clone().unwrap_or_default();
                let args = ins
                    .args
                    .iter()
                    .map(|a| {
                        let v = self.load(*a);
                        format!("i16 {v}")
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                if ins.dest.is_some() {
                    let t = self.tmp();
                    self.line(format!("{t} = call i16 @{callee}({args})"));
                    self.store(ins.dest, &t);
                } else {
                    self.line(format!("call void @{callee}({args})"));
                }
            }
            Op::Load => {
                let p = self.load(ins.src1);
                let t = self.tmp();
                let pt = self.tmp();
                self.line(format!("{pt} = inttoptr i16 {p} to ptr"));
                self.line(format!("{t} = load i16, ptr {pt}"));
                self.store(ins.dest, &t);
            }
            Op::Store => {
                let p = self.load(ins.src1);
                let v = self.load(ins.src2);
                let pt = self.tmp();
                self.line(format!("{pt} = inttoptr i16 {p} to ptr"));
                self.line(format!("store i16 {v}, ptr {pt}"));
            }
            Op::SmcParam | Op::SmcStore => {
                self.line(format!("; unhandled opcode: {}", ins.op));
                diagnostics.push(format!(
                    "llvm: no emission for opcode `{}` in function `{}`",
                    ins.op, self.func.name
                ));
            }
        }
    }
}

impl Backend for LlvmBackend {
    fn name(&self) -> &'static str {
        "llvm"
    }

    fn toolkit(&self) -> &Toolkit {
        &self.toolkit
    }

    fn generate(
        &mut self,
        module: &Module,
        _opts: &CodegenOptions,
    ) -> Result<GenOutput, CodegenError> {
        let mut out = String::new();
        let mut diagnostics = Vec::new();

        let _ = writeln!(out, "; MinZ LLVM IR for module {}", module.name);
        for g in &module.globals {
            let init = g.init.as_ref().map(|v| v.to_int()).unwrap_or(0);
            let _ = writeln!(
                out,
                "@{} = internal global {} {init}",
                g.name,
                ll_type(&g.ty)
            );
        }
        let _ = writeln!(out);

        for func in &module.functions {
            let mut f = LlvmFn {
                func,
                out: String::new(),
                tmp: 0,
                terminated: false,
            };
            f.emit(&mut diagnostics);
            out.push_str(&f.out);
        }

        Ok(GenOutput {
            text: out,
            diagnostics,
        })
    }
}
