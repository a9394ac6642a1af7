//! WebAssembly text backend.
//!
//! Straight-line functions lower to locals and stack ops in `.wat` form.
//! WebAssembly has no goto, so arbitrary MIR jumps are out of scope for
//! this target: they emit a commented placeholder and a soft diagnostic,
//! and the compile proceeds.

use core::fmt::Write;

use itertools::Itertools;
use minz_mir::{Function, Module, Op, Type, VReg};

use crate::toolkit::{CallConvDesc, CallModel, Features, Toolkit};
use crate::{Backend, CodegenError, CodegenOptions, GenOutput};

const WASM_TOOLKIT: Toolkit = Toolkit {
    name: "wasm",
    comment: ";;",
    instr: &[],
    patterns: &[],
    call_conv: CallConvDesc {
        model: CallModel::Stack,
        return_location: "stack",
    },
    registers: &[],
    pointer_size: 4,
    features: Features::POINTERS_32BIT,
    extra_flags: &["hosted"],
};

/// WebAssembly text generator.
#[derive(Debug)]
pub struct WasmBackend {
    toolkit: Toolkit,
}

impl WasmBackend {
    /// Fresh backend instance.
    pub fn new() -> Self {
        WasmBackend {
            toolkit: WASM_TOOLKIT,
        }
    }
}

impl Default for WasmBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Mask an i32 result back to the declared MIR width.
fn mask_for(ty: &Type) -> Option<&'static str> {
    match ty {
        Type::U8 | Type::Bool => Some("i32.const 255\n    i32.and"),
        Type::U16 | Type::Pointer(_) => Some("i32.const 65535\n    i32.and"),
        // Signed narrows use the extend ops.
        Type::I8 => Some("i32.extend8_s"),
        Type::I16 => Some("i32.extend16_s"),
        _ => None,
    }
}

impl Backend for WasmBackend {
    fn name(&self) -> &'static str {
        "wasm"
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

        let _ = writeln!(out, ";; MinZ WebAssembly output for module {}", module.name);
        let _ = writeln!(out, "(module");

        for func in &module.functions {
            emit_function(&mut out, func, &mut diagnostics);
        }
        for func in &module.functions {
            if func.is_exported {
                let _ = writeln!(out, "  (export {:?} (func ${}))", func.name, func.name);
            }
        }
        let _ = writeln!(out, ")");

        Ok(GenOutput {
            text: out,
            diagnostics,
        })
    }
}

fn emit_function(out: &mut String, func: &Function, diagnostics: &mut Vec<String>) {
    let params = func
        .params
        .iter()
        .map(|p| format!("(param ${} i32)", p.name))
        .join(" ");
    let result = if func.ret == Type::Void {
        String::new()
    } else {
        " (result i32)".to_string()
    };
    let _ = writeln!(out, "  (func ${}{}{result}", func.name, sep(&params));

    let mut locals: Vec<String> = Vec::new();
    for ins in &func.body {
        if let Some(d) = ins.written_reg() {
            let l = format!("(local ${d} i32)");
            if !locals.contains(&l) {
                locals.push(l);
            }
        }
    }
    for local in func.locals.iter().filter(|l| !l.is_param) {
        locals.push(format!("(local ${} i32)", local.name));
    }
    if !locals.is_empty() {
        let _ = writeln!(out, "    {}", locals.join(" "));
    }

    for ins in &func.body {
        emit_instruction(out, func, ins, diagnostics);
    }

    let _ = writeln!(out, "  )");
}

fn sep(params: &str) -> String {
    if params.is_empty() {
        String::new()
    } else {
        format!(" {params}")
    }
}

fn push_operand(out: &mut String, ins: &minz_mir::Instruction) {
    if ins.has_imm_operand() {
        let _ = writeln!(out, "    i32.const {}", ins.imm);
    } else {
        let _ = writeln!(out, "    local.get ${}", ins.src2);
    }
}

fn emit_instruction(
    out: &mut String,
    func: &Function,
    ins: &minz_mir::Instruction,
    diagnostics: &mut Vec<String>,
) {
    let set_dest = |out: &mut String, dest: VReg| {
        let _ = writeln!(out, "    local.set ${dest}");
    };
    match ins.op {
        Op::LoadConst => {
            let v = ins.ty.as_ref().map(|t| t.wrap(ins.imm)).unwrap_or(ins.imm);
            let _ = writeln!(out, "    i32.const {v}");
            set_dest(out, ins.dest);
        }
        Op::LoadVar | Op::LoadParam => {
            let name = ins.symbol.as_deref().unwrap_or("?");
            let _ = writeln!(out, "    local.get ${name}");
            set_dest(out, ins.dest);
        }
        Op::StoreVar => {
            let name = ins.symbol.as_deref().unwrap_or("?");
            let _ = writeln!(out, "    local.get ${}", ins.src1);
            let _ = writeln!(out, "    local.set ${name}");
        }
        Op::Move => {
            let _ = writeln!(out, "    local.get ${}", ins.src1);
            set_dest(out, ins.dest);
        }
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::And | Op::Or | Op::Xor
        | Op::Shl | Op::Shr => {
            let signed = matches!(&ins.ty, Some(t) if t.is_signed());
            let mn = match (ins.op, signed) {
                (Op::Add, _) => "i32.add",
                (Op::Sub, _) => "i32.sub",
                (Op::Mul, _) => "i32.mul",
                (Op::Div, false) => "i32.div_u",
                (Op::Div, true) => "i32.div_s",
                (Op::Mod, false) => "i32.rem_u",
                (Op::Mod, true) => "i32.rem_s",
                (Op::And, _) => "i32.and",
                (Op::Or, _) => "i32.or",
                (Op::Xor, _) => "i32.xor",
                (Op::Shl, _) => "i32.shl",
                (Op::Shr, false) => "i32.shr_u",
                _ => "i32.shr_s",
            };
            let _ = writeln!(out, "    local.get ${}", ins.src1);
            push_operand(out, ins);
            let _ = writeln!(out, "    {mn}");
            if let Some(mask) = ins.ty.as_ref().and_then(mask_for) {
                let _ = writeln!(out, "    {mask}");
            }
            set_dest(out, ins.dest);
        }
        Op::Neg => {
            let _ = writeln!(out, "    i32.const 0");
            let _ = writeln!(out, "    local.get ${}", ins.src1);
            let _ = writeln!(out, "    i32.sub");
            if let Some(mask) = ins.ty.as_ref().and_then(mask_for) {
                let _ = writeln!(out, "    {mask}");
            }
            set_dest(out, ins.dest);
        }
        Op::Not => {
            let _ = writeln!(out, "    local.get ${}", ins.src1);
            let _ = writeln!(out, "    i32.const -1");
            let _ = writeln!(out, "    i32.xor");
            if let Some(mask) = ins.ty.as_ref().and_then(mask_for) {
                let _ = writeln!(out, "    {mask}");
            }
            set_dest(out, ins.dest);
        }
        Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            let signed = matches!(&ins.ty, Some(t) if t.is_signed());
            let mn = match (ins.op, signed) {
                (Op::Eq, _) => "i32.eq",
                (Op::Ne, _) => "i32.ne",
                (Op::Lt, false) => "i32.lt_u",
                (Op::Le, false) => "i32.le_u",
                (Op::Gt, false) => "i32.gt_u",
                (Op::Ge, false) => "i32.ge_u",
                (Op::Lt, true) => "i32.lt_s",
                (Op::Le, true) => "i32.le_s",
                (Op::Gt, true) => "i32.gt_s",
                _ => "i32.ge_s",
            };
            let _ = writeln!(out, "    local.get ${}", ins.src1);
            push_operand(out, ins);
            let _ = writeln!(out, "    {mn}");
            set_dest(out, ins.dest);
        }
        Op::Return => {
            if func.ret != Type::Void && ins.src1.is_some() {
                let _ = writeln!(out, "    local.get ${}", ins.src1);
            }
            let _ = writeln!(out, "    return");
        }
        Op::Call => {
            let callee = ins.symbol.as_deref().unwrap_or("?");
            for a in &ins.args {
                let _ = writeln!(out, "    local.get ${a}");
            }
            let _ = writeln!(out, "    call ${callee}");
            if ins.dest.is_some() {
                set_dest(out, ins.dest);
            }
        }
        Op::Load => {
            let _ = writeln!(out, "    local.get ${}", ins.src1);
            let _ = writeln!(out, "    i32.load8_u");
            set_dest(out, ins.dest);
        }
        Op::Store => {
            let _ = writeln!(out, "    local.get ${}", ins.src1);
            let _ = writeln!(out, "    local.get ${}", ins.src2);
            let _ = writeln!(out, "    i32.store8");
        }
        Op::Jump
        | Op::JumpIf
        | Op::JumpIfNot
        | Op::JumpIfZero
        | Op::JumpIfNotZero
        | Op::Label
        | Op::SmcParam
        | Op::SmcStore => {
            let _ = writeln!(out, "    ;; unhandled opcode: {}", ins.op);
            diagnostics.push(format!(
                "wasm: no emission for opcode `{}` in function `{}`",
                ins.op, func.name
            ));
        }
    }
}
