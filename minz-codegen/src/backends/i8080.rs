//! Intel 8080 backend.
//!
//! The Z80's ancestor: no shadow set, no IX frame, no relative jumps.
//! Everything routes through the accumulator with 8080 mnemonics.

use minz_mir::Op;

use crate::toolkit::{CallConvDesc, CallModel, Features, Toolkit};

use super::toolkit_backend;

const I8080_TOOLKIT: Toolkit = Toolkit {
    name: "i8080",
    comment: ";",
    instr: &[(Op::Return, "RET")],
    patterns: &[
        ("header", "    ORG %value%"),
        ("load_const", "    MVI %dest%, %value%"),
        ("load_var", "    LDA %addr%\n    MOV %dest%, A"),
        ("store_var", "    MOV A, %src1%\n    STA %addr%"),
        ("load_param", "    LDA %addr%\n    MOV %dest%, A"),
        ("move", "    MOV %dest%, %src1%"),
        ("add", "    MOV A, %src1%\n    ADD %src2%\n    MOV %dest%, A"),
        ("sub", "    MOV A, %src1%\n    SUB %src2%\n    MOV %dest%, A"),
        ("and", "    MOV A, %src1%\n    ANA %src2%\n    MOV %dest%, A"),
        ("or", "    MOV A, %src1%\n    ORA %src2%\n    MOV %dest%, A"),
        ("xor", "    MOV A, %src1%\n    XRA %src2%\n    MOV %dest%, A"),
        ("jump", "    JMP %label%"),
        ("jump_if", "    MOV A, %src1%\n    ORA A\n    JNZ %label%"),
        ("jump_if_not", "    MOV A, %src1%\n    ORA A\n    JZ %label%"),
        ("jump_if_zero", "    MOV A, %src1%\n    ORA A\n    JZ %label%"),
        ("jump_if_not_zero", "    MOV A, %src1%\n    ORA A\n    JNZ %label%"),
        ("call", "    CALL %addr%"),
    ],
    call_conv: CallConvDesc {
        model: CallModel::Registers,
        return_location: "A",
    },
    registers: &["B", "C", "D", "E", "H", "L"],
    pointer_size: 2,
    features: Features::INTERRUPTS.union(Features::POINTERS_16BIT),
    extra_flags: &[],
};

toolkit_backend!(
    /// Intel 8080 code generator.
    I8080Backend,
    "i8080",
    I8080_TOOLKIT
);
