//! Game Boy LR35902 backend.
//!
//! A Z80 core minus the shadow set, IX/IY and the ED-prefixed loads, so
//! everything stays on the base register file.

use minz_mir::Op;

use crate::toolkit::{CallConvDesc, CallModel, Features, Toolkit};

use super::toolkit_backend;

const GAMEBOY_TOOLKIT: Toolkit = Toolkit {
    name: "gb",
    comment: ";",
    instr: &[(Op::Return, "RET")],
    patterns: &[
        ("header", "SECTION \"code\", ROM0[%value%]"),
        ("load_const", "    LD %dest%, %value%"),
        ("load_var", "    LD A, (%addr%)\n    LD %dest%, A"),
        ("store_var", "    LD A, %src1%\n    LD (%addr%), A"),
        ("load_param", "    LD A, (%addr%)\n    LD %dest%, A"),
        ("move", "    LD %dest%, %src1%"),
        ("add", "    LD A, %src1%\n    ADD A, %src2%\n    LD %dest%, A"),
        ("sub", "    LD A, %src1%\n    SUB %src2%\n    LD %dest%, A"),
        ("and", "    LD A, %src1%\n    AND %src2%\n    LD %dest%, A"),
        ("or", "    LD A, %src1%\n    OR %src2%\n    LD %dest%, A"),
        ("xor", "    LD A, %src1%\n    XOR %src2%\n    LD %dest%, A"),
        ("jump", "    JP %label%"),
        ("jump_if", "    LD A, %src1%\n    OR A\n    JP NZ, %label%"),
        ("jump_if_not", "    LD A, %src1%\n    OR A\n    JP Z, %label%"),
        ("jump_if_zero", "    LD A, %src1%\n    OR A\n    JP Z, %label%"),
        ("jump_if_not_zero", "    LD A, %src1%\n    OR A\n    JP NZ, %label%"),
        ("call", "    CALL %addr%"),
    ],
    call_conv: CallConvDesc {
        model: CallModel::Registers,
        return_location: "A",
    },
    registers: &["B", "C", "D", "E", "H", "L"],
    pointer_size: 2,
    features: Features::INTERRUPTS.union(Features::POINTERS_16BIT),
    extra_flags: &["lr35902"],
};

toolkit_backend!(
    /// Game Boy LR35902 code generator.
    GameBoyBackend,
    "gb",
    GAMEBOY_TOOLKIT
);
