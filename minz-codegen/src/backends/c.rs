//! C backend.
//!
//! Portable escape hatch: each function is translated statement by
//! statement, one C variable per virtual register, labels as `goto`
//! targets. Integer widths and wrap semantics match the 8-bit targets
//! exactly: arithmetic happens in a wide type and is masked back to the
//! declared width of the destination.

use std::collections::BTreeMap;

use core::fmt::Write;

use itertools::Itertools;
use minz_mir::{Function, Instruction, Module, Op, Type, VReg};

use crate::toolkit::{CallConvDesc, CallModel, Features, Toolkit};
use crate::{Backend, CodegenError, CodegenOptions, GenOutput};

const C_TOOLKIT: Toolkit = Toolkit {
    name: "c",
    comment: "//",
    instr: &[],
    patterns: &[],
    call_conv: CallConvDesc {
        model: CallModel::Stack,
        return_location: "return",
    },
    registers: &[],
    pointer_size: 2,
    features: Features::POINTERS_16BIT,
    extra_flags: &["hosted"],
};

/// C source generator.
#[derive(Debug)]
pub struct CBackend {
    toolkit: Toolkit,
}

impl CBackend {
    /// Fresh backend instance.
    pub fn new() -> Self {
        CBackend { toolkit: C_TOOLKIT }
    }
}

impl Default for CBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn c_type(ty: &Type) -> &'static str {
    match ty {
        Type::U8 | Type::Bool => "uint8_t",
        Type::I8 => "int8_t",
        Type::U16 => "uint16_t",
        Type::I16 => "int16_t",
        Type::Pointer(_) => "uint16_t",
        Type::Void => "void",
        Type::Array(..) | Type::Struct(_) => "uint16_t",
    }
}

/// Wrap an expression to the declared width: compute wide, mask back.
fn wrapped(ty: &Type, expr: &str) -> String {
    match ty {
        Type::I8 => format!("(int8_t)(uint8_t)((int32_t){expr})"),
        Type::I16 => format!("(int16_t)(uint16_t)((int32_t){expr})"),
        Type::U8 | Type::Bool => format!("(uint8_t)((uint32_t){expr})"),
        _ => format!("(uint16_t)((uint32_t){expr})"),
    }
}

/// Per-virtual-register C types, inferred from the defining instructions.
fn reg_types(func: &Function) -> BTreeMap<VReg, Type> {
    let mut types = BTreeMap::new();
    for ins in &func.body {
        let Some(dest) = ins.written_reg() else { continue };
        let ty = match (&ins.ty, ins.op) {
            (Some(t), _) => t.clone(),
            (None, Op::LoadParam) => ins
                .symbol
                .as_deref()
                .and_then(|n| func.params.iter().find(|p| p.name == n))
                .map(|p| p.ty.clone())
                .unwrap_or(Type::U16),
            (None, op) if op.is_comparison() => Type::Bool,
            _ => Type::U16,
        };
        types.entry(dest).or_insert(ty);
    }
    types
}

impl Backend for CBackend {
    fn name(&self) -> &'static str {
        "c"
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

        let _ = writeln!(out, "/* MinZ C output for module {} */", module.name);
        let _ = writeln!(out, "#include <stdint.h>");
        let _ = writeln!(out);

        for g in &module.globals {
            let init = g
                .init
                .as_ref()
                .map(|v| format!(" = {}", v.to_int()))
                .unwrap_or_default();
            let _ = writeln!(out, "static {} {}{init};", c_type(&g.ty), g.name);
        }
        for s in &module.strings {
            let _ = writeln!(out, "static const char {}[] = {:?};", s.label, s.value);
        }
        if !module.globals.is_empty() || !module.strings.is_empty() {
            let _ = writeln!(out);
        }

        // Forward declarations so definition order doesn't matter.
        for f in &module.functions {
            let _ = writeln!(out, "{};", signature(f));
        }
        let _ = writeln!(out);

        for f in &module.functions {
            emit_function(&mut out, f, &mut diagnostics);
        }

        Ok(GenOutput {
            text: out,
            diagnostics,
        })
    }
}

fn signature(f: &Function) -> String {
    let params = if f.params.is_empty() {
        "void".to_string()
    } else {
        f.params
            .iter()
            .map(|p| format!("{} {}", c_type(&p.ty), p.name))
            .join(", ")
    };
    format!("{} {}({params})", c_type(&f.ret), f.name)
}

fn emit_function(out: &mut String, f: &Function, diagnostics: &mut Vec<String>) {
    let _ = writeln!(out, "{} {{", signature(f));

    let types = reg_types(f);
    for (reg, ty) in &types {
        let _ = writeln!(out, "    {} {reg} = 0;", c_type(ty));
    }
    for local in f.locals.iter().filter(|l| !l.is_param) {
        let _ = writeln!(out, "    {} {} = 0;", c_type(&local.ty), local.name);
    }

    for ins in &f.body {
        emit_instruction(out, f, &types, ins, diagnostics);
    }

    // A void function may simply fall off the end.
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
}

fn operand(ins: &Instruction) -> String {
    if ins.has_imm_operand() {
        ins.imm.to_string()
    } else {
        ins.src2.to_string()
    }
}

fn emit_instruction(
    out: &mut String,
    f: &Function,
    types: &BTreeMap<VReg, Type>,
    ins: &Instruction,
    diagnostics: &mut Vec<String>,
) {
    let dest_ty = types.get(&ins.dest).cloned().unwrap_or(Type::U16);
    match ins.op {
        Op::LoadConst => {
            let _ = writeln!(out, "    {} = {};", ins.dest, dest_ty.wrap(ins.imm));
        }
        Op::LoadVar | Op::LoadParam => {
            let name = ins.symbol.as_deref().unwrap_or("?");
            let _ = writeln!(out, "    {} = {name};", ins.dest);
        }
        Op::StoreVar => {
            let name = ins.symbol.as_deref().unwrap_or("?");
            let _ = writeln!(out, "    {name} = {};", ins.src1);
        }
        Op::Move => {
            let _ = writeln!(out, "    {} = {};", ins.dest, ins.src1);
        }
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::And | Op::Or | Op::Xor
        | Op::Shl | Op::Shr => {
            let op = match ins.op {
                Op::Add => "+",
                Op::Sub => "-",
                Op::Mul => "*",
                Op::Div => "/",
                Op::Mod => "%",
                Op::And => "&",
                Op::Or => "|",
                Op::Xor => "^",
                Op::Shl => "<<",
                _ => ">>",
            };
            let expr = format!("{} {op} {}", ins.src1, operand(ins));
            let _ = writeln!(out, "    {} = {};", ins.dest, wrapped(&dest_ty, &expr));
        }
        Op::Neg => {
            let expr = format!("-{}", ins.src1);
            let _ = writeln!(out, "    {} = {};", ins.dest, wrapped(&dest_ty, &expr));
        }
        Op::Not => {
            let expr = format!("~{}", ins.src1);
            let _ = writeln!(out, "    {} = {};", ins.dest, wrapped(&dest_ty, &expr));
        }
        Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            let op = match ins.op {
                Op::Eq => "==",
                Op::Ne => "!=",
                Op::Lt => "<",
                Op::Le => "<=",
                Op::Gt => ">",
                _ => ">=",
            };
            let _ = writeln!(
                out,
                "    {} = {} {op} {};",
                ins.dest,
                ins.src1,
                operand(ins)
            );
        }
        Op::Load => {
            let _ = writeln!(
                out,
                "    {} = *(uint8_t *)(uintptr_t){};",
                ins.dest, ins.src1
            );
        }
        Op::Store => {
            let _ = writeln!(
                out,
                "    *(uint8_t *)(uintptr_t){} = {};",
                ins.src1, ins.src2
            );
        }
        Op::Jump => {
            let _ = writeln!(out, "    goto {};", ins.label.as_deref().unwrap_or("?"));
        }
        Op::JumpIf => {
            let _ = writeln!(
                out,
                "    if ({}) goto {};",
                ins.src1,
                ins.label.as_deref().unwrap_or("?")
            );
        }
        Op::JumpIfNot | Op::JumpIfZero => {
            let _ = writeln!(
                out,
                "    if (!{}) goto {};",
                ins.src1,
                ins.label.as_deref().unwrap_or("?")
            );
        }
        Op::JumpIfNotZero => {
            let _ = writeln!(
                out,
                "    if ({} != 0) goto {};",
                ins.src1,
                ins.label.as_deref().unwrap_or("?")
            );
        }
        Op::Label => {
            let _ = writeln!(out, "{}:;", ins.label.as_deref().unwrap_or("?"));
        }
        Op::Return => {
            if f.ret == Type::Void {
                let _ = writeln!(out, "    return;");
            } else {
                let _ = writeln!(out, "    return {};", ins.src1);
            }
        }
        Op::Call => {
            let callee = ins.symbol.as_deref().unwrap_or("?");
            let args = ins.args.iter().map(|a| a.to_string()).join(", ");
            if ins.dest.is_some() {
                let _ = writeln!(out, "    {} = {callee}({args});", ins.dest);
            } else {
                let _ = writeln!(out, "    {callee}({args});");
            }
        }
        Op::SmcParam | Op::SmcStore => {
            // Self-modifying code has no meaning in C.
            let _ = writeln!(out, "    /* unhandled opcode: {} */", ins.op);
            diagnostics.push(format!(
                "c: no emission for opcode `{}` in function `{}`",
                ins.op, f.name
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minz_mir::Param;

    #[test]
    fn wrap_semantics_match_the_eight_bit_targets() {
        let mut m = Module::new("t");
        let mut f = Function::new(
            "mul",
            vec![
                Param { name: "a".into(), ty: Type::U8 },
                Param { name: "b".into(), ty: Type::U8 },
            ],
            Type::U8,
        );
        f.push(Instruction::load_param(VReg(1), "a"));
        f.push(Instruction::load_param(VReg(2), "b"));
        let mut mul = Instruction::binary(Op::Mul, VReg(3), VReg(1), VReg(2));
        mul.ty = Some(Type::U8);
        f.push(mul);
        f.push(Instruction::ret(VReg(3)));
        m.functions.push(f);

        let out = CBackend::new()
            .generate(&m, &CodegenOptions::default())
            .unwrap();
        assert!(out.text.contains("uint8_t mul(uint8_t a, uint8_t b)"));
        // The product is masked back to u8, like the Z80 register result.
        assert!(out.text.contains("r3 = (uint8_t)((uint32_t)r1 * r2);"));
        assert!(out.text.contains("return r3;"));
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn control_flow_lowers_to_goto() {
        let mut m = Module::new("t");
        let mut f = Function::new("f", vec![], Type::Void);
        f.push(Instruction::label("top"));
        f.push(Instruction::load_const(VReg(1), 1, Type::U8));
        f.push(Instruction::jump_cond(Op::JumpIfNotZero, VReg(1), "top"));
        f.push(Instruction::ret(VReg::NONE));
        m.functions.push(f);

        let out = CBackend::new()
            .generate(&m, &CodegenOptions::default())
            .unwrap();
        assert!(out.text.contains("top:;"));
        assert!(out.text.contains("if (r1 != 0) goto top;"));
    }

    #[test]
    fn smc_opcodes_are_soft_errors() {
        let mut m = Module::new("t");
        let mut f = Function::new(
            "f",
            vec![Param { name: "a".into(), ty: Type::U8 }],
            Type::Void,
        );
        f.push(Instruction::smc_param("a", Type::U8));
        f.push(Instruction::ret(VReg::NONE));
        m.functions.push(f);

        let out = CBackend::new()
            .generate(&m, &CodegenOptions::default())
            .unwrap();
        assert!(out.text.contains("/* unhandled opcode: smc_param */"));
        assert_eq!(out.diagnostics.len(), 1);
    }
}
