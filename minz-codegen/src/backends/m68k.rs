//! Motorola 68000 backend.
//!
//! Sixteen-bit operations on data registers; the only secondary target
//! with hardware multiply and divide.

use minz_mir::Op;

use crate::toolkit::{CallConvDesc, CallModel, Features, Toolkit};

use super::toolkit_backend;

const M68K_TOOLKIT: Toolkit = Toolkit {
    name: "68000",
    comment: ";",
    instr: &[(Op::Return, "RTS")],
    patterns: &[
        ("header", "    ORG %value%"),
        ("load_const", "    MOVE.W #%value%, %dest%"),
        ("load_var", "    MOVE.W %addr%, %dest%"),
        ("store_var", "    MOVE.W %src1%, %addr%"),
        ("load_param", "    MOVE.W %addr%, %dest%"),
        ("move", "    MOVE.W %src1%, %dest%"),
        ("add", "    MOVE.W %src1%, %dest%\n    ADD.W %src2%, %dest%"),
        ("sub", "    MOVE.W %src1%, %dest%\n    SUB.W %src2%, %dest%"),
        ("mul", "    MOVE.W %src1%, %dest%\n    MULS.W %src2%, %dest%"),
        ("div", "    MOVE.W %src1%, %dest%\n    EXT.L %dest%\n    DIVS.W %src2%, %dest%"),
        ("and", "    MOVE.W %src1%, %dest%\n    AND.W %src2%, %dest%"),
        ("or", "    MOVE.W %src1%, %dest%\n    OR.W %src2%, %dest%"),
        ("xor", "    MOVE.W %src2%, %dest%\n    EOR.W %src1%, %dest%"),
        ("shl", "    MOVE.W %src1%, %dest%\n    LSL.W %src2%, %dest%"),
        ("shr", "    MOVE.W %src1%, %dest%\n    LSR.W %src2%, %dest%"),
        ("jump", "    BRA %label%"),
        ("jump_if", "    TST.W %src1%\n    BNE %label%"),
        ("jump_if_not", "    TST.W %src1%\n    BEQ %label%"),
        ("jump_if_zero", "    TST.W %src1%\n    BEQ %label%"),
        ("jump_if_not_zero", "    TST.W %src1%\n    BNE %label%"),
        ("call", "    JSR %addr%"),
    ],
    call_conv: CallConvDesc {
        model: CallModel::Stack,
        return_location: "D0",
    },
    registers: &["D0", "D1", "D2", "D3", "D4", "D5", "D6", "D7"],
    pointer_size: 4,
    features: Features::INTERRUPTS.union(Features::POINTERS_32BIT),
    extra_flags: &["big-endian"],
};

toolkit_backend!(
    /// Motorola 68000 code generator.
    M68kBackend,
    "68000",
    M68K_TOOLKIT
);
