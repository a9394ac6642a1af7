//! MIR opcode set.

use core::fmt;

/// Opcode representation for the MIR instruction set.
///
/// The set is closed: the interpreter, the peephole rules and every backend
/// dispatch over it exhaustively, so adding a variant requires touching every
/// consumer. That is intentional, since compiler passes should enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Op {
    /// Load an immediate constant into the destination register.
    LoadConst,
    /// Load a named local or global into the destination register.
    LoadVar,
    /// Store a register into a named local or global.
    StoreVar,
    /// Load a declared parameter into the destination register.
    LoadParam,
    /// Register-to-register copy.
    Move,

    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division. Truncates toward zero on signed operands.
    Div,
    /// Remainder. Sign follows the dividend.
    Mod,
    /// Arithmetic negation.
    Neg,

    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
    /// Bitwise complement (logical NOT on `bool`).
    Not,
    /// Shift left.
    Shl,
    /// Shift right. Logical for unsigned operands, arithmetic for signed.
    Shr,

    /// Equality comparison, produces `bool`.
    Eq,
    /// Inequality comparison.
    Ne,
    /// Less-than comparison.
    Lt,
    /// Less-or-equal comparison.
    Le,
    /// Greater-than comparison.
    Gt,
    /// Greater-or-equal comparison.
    Ge,

    /// Indirect memory read through a pointer register.
    Load,
    /// Indirect memory write through a pointer register.
    Store,

    /// Unconditional jump to a label.
    Jump,
    /// Jump when the condition is true.
    JumpIf,
    /// Jump when the condition is false.
    JumpIfNot,
    /// Jump when the operand is zero.
    JumpIfZero,
    /// Jump when the operand is non-zero.
    JumpIfNotZero,
    /// Jump target pseudo-instruction.
    Label,
    /// Return from the current function.
    Return,

    /// Call a named function with the listed argument registers.
    Call,

    /// Declare a parameter whose storage is an instruction immediate
    /// (Z80 self-modifying-code convention).
    SmcParam,
    /// Patch an SMC parameter immediate from a register.
    SmcStore,
}

impl Op {
    /// Whether the instruction produces a value in its destination register.
    pub const fn writes_dest(&self) -> bool {
        match self {
            Op::LoadConst
            | Op::LoadVar
            | Op::LoadParam
            | Op::Move
            | Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod
            | Op::Neg
            | Op::And
            | Op::Or
            | Op::Xor
            | Op::Not
            | Op::Shl
            | Op::Shr
            | Op::Eq
            | Op::Ne
            | Op::Lt
            | Op::Le
            | Op::Gt
            | Op::Ge
            | Op::Load
            | Op::Call => true,
            Op::StoreVar
            | Op::Store
            | Op::Jump
            | Op::JumpIf
            | Op::JumpIfNot
            | Op::JumpIfZero
            | Op::JumpIfNotZero
            | Op::Label
            | Op::Return
            | Op::SmcParam
            | Op::SmcStore => false,
        }
    }

    /// Whether the instruction transfers control to a label.
    pub const fn is_jump(&self) -> bool {
        matches!(
            self,
            Op::Jump | Op::JumpIf | Op::JumpIfNot | Op::JumpIfZero | Op::JumpIfNotZero
        )
    }

    /// Whether the instruction is a conditional jump.
    pub const fn is_conditional_jump(&self) -> bool {
        matches!(
            self,
            Op::JumpIf | Op::JumpIfNot | Op::JumpIfZero | Op::JumpIfNotZero
        )
    }

    /// Whether the instruction is a two-operand ALU operation.
    pub const fn is_binary_alu(&self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Sub
                | Op::Mul
                | Op::Div
                | Op::Mod
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::Shl
                | Op::Shr
                | Op::Eq
                | Op::Ne
                | Op::Lt
                | Op::Le
                | Op::Gt
                | Op::Ge
        )
    }

    /// Whether the instruction is a comparison producing `bool`.
    pub const fn is_comparison(&self) -> bool {
        matches!(self, Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge)
    }

    /// Whether operand order is irrelevant.
    pub const fn is_commutative(&self) -> bool {
        matches!(
            self,
            Op::Add | Op::Mul | Op::And | Op::Or | Op::Xor | Op::Eq | Op::Ne
        )
    }

    /// Whether the instruction blocks peephole reordering across it.
    ///
    /// Calls, indirect memory accesses, labels, jumps, returns and the SMC
    /// pseudo-ops all pin the instructions around them in place.
    pub const fn is_barrier(&self) -> bool {
        matches!(
            self,
            Op::Call
                | Op::Load
                | Op::Store
                | Op::Label
                | Op::Return
                | Op::SmcParam
                | Op::SmcStore
        ) || self.is_jump()
    }

    /// Whether the opcode is free of observable side effects.
    ///
    /// Indirect memory traffic and calls are excluded here; the purity
    /// analyzer refines calls through the callee's own classification.
    pub const fn is_side_effect_free(&self) -> bool {
        !matches!(
            self,
            Op::Load | Op::Store | Op::Call | Op::SmcParam | Op::SmcStore
        )
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &'static str = self.into();
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn barriers_cover_all_jumps() {
        for op in Op::iter() {
            if op.is_jump() {
                assert!(op.is_barrier(), "{op} jumps but is not a barrier");
            }
        }
    }

    #[test]
    fn comparisons_are_binary() {
        for op in Op::iter().filter(Op::is_comparison) {
            assert!(op.is_binary_alu());
            assert!(op.writes_dest());
        }
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(Op::LoadConst.to_string(), "load_const");
        assert_eq!(Op::JumpIfNotZero.to_string(), "jump_if_not_zero");
        assert_eq!(Op::SmcParam.to_string(), "smc_param");
    }
}
