//! MOS 6502 backend.
//!
//! Virtual registers map to zero-page slots and every operation routes
//! through the accumulator. The analogue of the Z80's SMC anchoring (a
//! single-byte offset into an immediate) exists on this target but is not
//! wired up; parameters travel through zero page.

use minz_mir::Op;

use crate::toolkit::{CallConvDesc, CallModel, Features, Toolkit};

use super::toolkit_backend;

const MOS6502_TOOLKIT: Toolkit = Toolkit {
    name: "6502",
    comment: ";",
    instr: &[(Op::Return, "RTS")],
    patterns: &[
        ("header", "    .org %value%"),
        ("load_const", "    LDA #%value%\n    STA %dest%"),
        ("load_var", "    LDA %addr%\n    STA %dest%"),
        ("store_var", "    LDA %src1%\n    STA %addr%"),
        ("load_param", "    LDA %addr%\n    STA %dest%"),
        ("move", "    LDA %src1%\n    STA %dest%"),
        ("add", "    CLC\n    LDA %src1%\n    ADC %src2%\n    STA %dest%"),
        ("sub", "    SEC\n    LDA %src1%\n    SBC %src2%\n    STA %dest%"),
        ("and", "    LDA %src1%\n    AND %src2%\n    STA %dest%"),
        ("or", "    LDA %src1%\n    ORA %src2%\n    STA %dest%"),
        ("xor", "    LDA %src1%\n    EOR %src2%\n    STA %dest%"),
        ("shl", "    LDA %src1%\n    ASL A\n    STA %dest%"),
        ("shr", "    LDA %src1%\n    LSR A\n    STA %dest%"),
        ("jump", "    JMP %label%"),
        ("jump_if", "    LDA %src1%\n    BNE %label%"),
        ("jump_if_not", "    LDA %src1%\n    BEQ %label%"),
        ("jump_if_zero", "    LDA %src1%\n    BEQ %label%"),
        ("jump_if_not_zero", "    LDA %src1%\n    BNE %label%"),
        ("call", "    JSR %addr%"),
    ],
    call_conv: CallConvDesc {
        model: CallModel::ZeroPage,
        return_location: "A",
    },
    registers: &["$10", "$12", "$14", "$16", "$18", "$1A", "$1C", "$1E"],
    pointer_size: 2,
    features: Features::INTERRUPTS.union(Features::POINTERS_16BIT),
    extra_flags: &["zero-page-registers"],
};

toolkit_backend!(
    /// MOS 6502 code generator.
    Mos6502Backend,
    "6502",
    MOS6502_TOOLKIT
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Backend, CodegenOptions};
    use minz_mir::{Function, Instruction, Module, Type, VReg};

    #[test]
    fn routes_arithmetic_through_the_accumulator() {
        let mut m = Module::new("t");
        let mut f = Function::new("f", vec![], Type::U8);
        f.push(Instruction::load_const(VReg(1), 5, Type::U8));
        f.push(Instruction::binary(Op::Add, VReg(2), VReg(1), VReg(1)));
        f.push(Instruction::ret(VReg(2)));
        m.functions.push(f);

        let out = Mos6502Backend::new()
            .generate(&m, &CodegenOptions::default())
            .unwrap();
        assert!(out.text.contains("LDA #5"));
        assert!(out.text.contains("STA $10"));
        assert!(out.text.contains("CLC"));
        assert!(out.text.contains("ADC $10"));
        assert!(out.text.contains("RTS"));
    }
}
