//! Pattern-driven base generator.

use core::fmt::Write;

use minz_mir::{Function, Global, Instruction, Module, Op, Type, VReg};
use tracing::debug;

use crate::toolkit::{expand, Bindings, Toolkit};
use crate::{CodegenError, CodegenOptions, GenOutput};

/// Emits target text for a module from a toolkit alone.
///
/// Output order: file header, data section (globals then string table),
/// then per function: label, prologue pattern, one emission per MIR
/// instruction from the mnemonic map or the pattern table, epilogue.
/// Opcodes neither table covers become a commented placeholder and a soft
/// diagnostic. A single unknown opcode never fails the compile, so the
/// remaining functions can still be tested.
pub struct BaseGenerator<'t> {
    toolkit: &'t Toolkit,
    out: String,
    diagnostics: Vec<String>,
}

impl<'t> BaseGenerator<'t> {
    /// Generator over a toolkit.
    pub fn new(toolkit: &'t Toolkit) -> Self {
        BaseGenerator {
            toolkit,
            out: String::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Generate the whole module.
    pub fn generate(
        mut self,
        module: &Module,
        opts: &CodegenOptions,
    ) -> Result<GenOutput, CodegenError> {
        self.header(module, opts);
        self.data_section(module);
        for func in &module.functions {
            self.function(func);
        }
        debug!(
            backend = self.toolkit.name,
            diagnostics = self.diagnostics.len(),
            "base generation finished"
        );
        Ok(GenOutput {
            text: self.out,
            diagnostics: self.diagnostics,
        })
    }

    fn line(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn comment(&mut self, text: &str) {
        let leader = self.toolkit.comment;
        let _ = writeln!(self.out, "{leader} {text}");
    }

    fn header(&mut self, module: &Module, opts: &CodegenOptions) {
        let name = &module.name;
        let target = self.toolkit.name;
        self.comment(&format!("module {name}, target {target}"));
        if let Some(p) = self.toolkit.pattern("header") {
            let b = Bindings {
                value: Some(format!("{:#06x}", opts.org)),
                ..Default::default()
            };
            let expanded = expand(p, &b);
            self.line(&expanded);
        }
        self.line("");
    }

    fn data_section(&mut self, module: &Module) {
        if module.globals.is_empty() && module.strings.is_empty() {
            return;
        }
        self.comment("data");
        for g in &module.globals {
            self.global(g);
        }
        for s in &module.strings {
            let label = &s.label;
            let value = &s.value;
            let _ = writeln!(self.out, "{label}: DB {value:?}, 0");
        }
        self.line("");
    }

    fn global(&mut self, g: &Global) {
        let size = self.toolkit.size_of(&g.ty);
        let init = g.init.as_ref().map(|v| v.to_int());
        let line = match (size, init) {
            (1, Some(v)) => format!("{}: DB {v}", g.name),
            (2, Some(v)) => format!("{}: DW {v}", g.name),
            (n, _) => format!("{}: DS {n}", g.name),
        };
        self.line(&line);
    }

    fn function(&mut self, func: &Function) {
        let conv = func
            .convention
            .map(|c| c.to_string())
            .unwrap_or_else(|| "default".to_string());
        self.comment(&format!("fn {} ({} convention)", func.name, conv));
        self.line(&format!("{}:", func.name));
        if let Some(p) = self.toolkit.pattern("prologue") {
            self.line(p);
        }
        for ins in &func.body {
            self.instruction(func, ins);
        }
        if let Some(p) = self.toolkit.pattern("epilogue") {
            self.line(p);
        }
        self.line("");
    }

    fn instruction(&mut self, func: &Function, ins: &Instruction) {
        // Labels are structural, not pattern-driven.
        if ins.op == Op::Label {
            let name = ins.label.as_deref().unwrap_or("?");
            self.line(&format!("{name}:"));
            return;
        }

        if let Some(mn) = self.toolkit.mnemonic(ins.op) {
            self.line(&format!("    {mn}"));
            return;
        }

        let pattern_name: &str = ins.op.into();
        if let Some(p) = self.toolkit.pattern(pattern_name) {
            let b = self.bindings(ins);
            let expanded = expand(p, &b);
            self.line(&expanded);
            return;
        }

        let leader = self.toolkit.comment;
        let op = ins.op;
        let _ = writeln!(self.out, "    {leader} unhandled opcode: {op}");
        self.diagnostics.push(format!(
            "{}: no emission for opcode `{op}` in function `{}`",
            self.toolkit.name, func.name
        ));
    }

    fn bindings(&self, ins: &Instruction) -> Bindings {
        Bindings {
            reg: self.reg_name(ins.dest),
            dest: self.reg_name(ins.dest),
            src1: self.reg_name(ins.src1),
            src2: if ins.has_imm_operand() {
                Some(ins.imm.to_string())
            } else {
                self.reg_name(ins.src2)
            },
            addr: ins.symbol.clone(),
            value: Some(ins.imm.to_string()),
            label: ins.label.clone(),
        }
    }

    fn reg_name(&self, reg: VReg) -> Option<String> {
        if reg.is_none() {
            return None;
        }
        match self.toolkit.register(reg) {
            Some(name) => Some(name.to_string()),
            // Past the physical set: a numbered spill slot.
            None => Some(format!("spill{}", reg.0)),
        }
    }

    /// Size of a value type for data layout decisions.
    pub fn size_of(&self, ty: &Type) -> u16 {
        self.toolkit.size_of(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minz_mir::{CallConv, Value};

    use crate::toolkit::{CallConvDesc, CallModel, Features};

    const TEST_TOOLKIT: Toolkit = Toolkit {
        name: "test",
        comment: ";",
        instr: &[(Op::Return, "RET")],
        patterns: &[
            ("header", "    ORG %value%"),
            ("load_const", "    LDI %dest%, %value%"),
            ("add", "    ADD %dest%, %src1%, %src2%"),
            ("jump", "    BRA %label%"),
            ("prologue", "    ENTER"),
            ("epilogue", "    LEAVE"),
        ],
        call_conv: CallConvDesc {
            model: CallModel::Registers,
            return_location: "R1",
        },
        registers: &["R1", "R2", "R3"],
        pointer_size: 2,
        features: Features::POINTERS_16BIT,
        extra_flags: &[],
    };

    fn sample_module() -> Module {
        let mut m = Module::new("demo");
        m.globals.push(Global {
            name: "counter".into(),
            ty: Type::U16,
            init: Some(Value::int(7, Type::U16)),
            address: None,
        });
        let mut f = Function::new("f", vec![], Type::U8);
        f.convention = Some(CallConv::Register);
        f.push(Instruction::load_const(VReg(1), 5, Type::U8));
        f.push(Instruction::binary(Op::Add, VReg(2), VReg(1), VReg(1)));
        f.push(Instruction::ret(VReg(2)));
        m.functions.push(f);
        m
    }

    #[test]
    fn emits_header_data_and_function() {
        let out = BaseGenerator::new(&TEST_TOOLKIT)
            .generate(&sample_module(), &CodegenOptions::default())
            .unwrap();
        assert!(out.text.contains("; module demo, target test"));
        assert!(out.text.contains("    ORG 0x8000"));
        assert!(out.text.contains("counter: DW 7"));
        assert!(out.text.contains("f:"));
        assert!(out.text.contains("    ENTER"));
        assert!(out.text.contains("    LDI R1, 5"));
        assert!(out.text.contains("    ADD R2, R1, R1"));
        assert!(out.text.contains("    RET"));
        assert!(out.text.contains("    LEAVE"));
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn unknown_opcode_becomes_commented_placeholder() {
        let mut m = Module::new("demo");
        let mut f = Function::new("f", vec![], Type::Void);
        let mut ins = Instruction::new(Op::Xor);
        ins.dest = VReg(1);
        ins.src1 = VReg(1);
        ins.src2 = VReg(1);
        f.push(ins);
        f.push(Instruction::ret(VReg::NONE));
        m.functions.push(f);

        let out = BaseGenerator::new(&TEST_TOOLKIT)
            .generate(&m, &CodegenOptions::default())
            .unwrap();
        assert!(out.text.contains("; unhandled opcode: xor"));
        assert_eq!(out.diagnostics.len(), 1);
        // The rest of the function still emitted.
        assert!(out.text.contains("    RET"));
    }

    #[test]
    fn registers_past_the_map_spill() {
        let mut m = Module::new("demo");
        let mut f = Function::new("f", vec![], Type::U8);
        f.push(Instruction::load_const(VReg(9), 1, Type::U8));
        f.push(Instruction::ret(VReg(9)));
        m.functions.push(f);

        let out = BaseGenerator::new(&TEST_TOOLKIT)
            .generate(&m, &CodegenOptions::default())
            .unwrap();
        assert!(out.text.contains("    LDI spill9, 1"));
    }
}
