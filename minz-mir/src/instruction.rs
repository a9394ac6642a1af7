//! MIR instruction records.

use core::fmt;

use crate::opcode::Op;
use crate::types::Type;
use crate::value::Value;

/// Virtual register identifier.
///
/// Registers are plain integers starting at 1; 0 means "no register".
/// Mapping to physical registers or memory is the backend's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VReg(pub u32);

impl VReg {
    /// The absent register.
    pub const NONE: VReg = VReg(0);

    /// Whether this is the absent register.
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Whether this names an actual register.
    pub const fn is_some(&self) -> bool {
        self.0 != 0
    }
}

impl From<u32> for VReg {
    fn from(n: u32) -> Self {
        VReg(n)
    }
}

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

bitflags::bitflags! {
    /// Emission hints attached by the peephole optimizer.
    ///
    /// Hints never change MIR semantics; they permit a backend to pick a
    /// shorter encoding for the same operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct EmitHint: u8 {
        /// A zero constant that may be materialized with an XOR-self idiom.
        const ZERO_IDIOM = 0x01;
        /// An add-by-one that may emit as a single increment.
        const INC = 0x02;
        /// A subtract-by-one that may emit as a single decrement.
        const DEC = 0x04;
        /// A small pointer offset that may emit as successive increments.
        const PTR_STEP = 0x08;
    }
}

/// A single MIR instruction.
///
/// Instructions are flat value records: one opcode plus every field any
/// opcode might need. Unused fields stay at their defaults. The one
/// encoding convention: a binary ALU op whose `src2` is [`VReg::NONE`]
/// takes its right operand from `imm` (the immediate form produced by
/// strength reduction).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    /// Opcode.
    pub op: Op,
    /// Destination register, [`VReg::NONE`] when the op produces no value.
    pub dest: VReg,
    /// First source register.
    pub src1: VReg,
    /// Second source register.
    pub src2: VReg,
    /// Immediate operand.
    pub imm: i64,
    /// Symbol for calls, named loads/stores and SMC parameters.
    #[cfg_attr(feature = "serde", serde(default))]
    pub symbol: Option<String>,
    /// Target label for jumps.
    #[cfg_attr(feature = "serde", serde(default))]
    pub label: Option<String>,
    /// Argument registers for calls.
    #[cfg_attr(feature = "serde", serde(default))]
    pub args: Vec<VReg>,
    /// Type of the produced value, where one is produced.
    #[cfg_attr(feature = "serde", serde(default))]
    pub ty: Option<Type>,
    /// Emission hints set by the optimizer.
    #[cfg_attr(feature = "serde", serde(default))]
    pub hints: EmitHint,
    /// Free-text comment carried through to the assembly output.
    #[cfg_attr(feature = "serde", serde(default))]
    pub comment: Option<String>,
}

impl Default for Instruction {
    fn default() -> Self {
        Instruction {
            op: Op::Label,
            dest: VReg::NONE,
            src1: VReg::NONE,
            src2: VReg::NONE,
            imm: 0,
            symbol: None,
            label: None,
            args: Vec::new(),
            ty: None,
            hints: EmitHint::default(),
            comment: None,
        }
    }
}

impl Instruction {
    /// Bare instruction with only an opcode set.
    pub fn new(op: Op) -> Self {
        Instruction {
            op,
            ..Default::default()
        }
    }

    /// `dest <- imm : ty`
    pub fn load_const(dest: VReg, imm: i64, ty: Type) -> Self {
        Instruction {
            op: Op::LoadConst,
            dest,
            imm,
            ty: Some(ty),
            ..Default::default()
        }
    }

    /// `dest <- name`
    pub fn load_var(dest: VReg, name: impl Into<String>) -> Self {
        Instruction {
            op: Op::LoadVar,
            dest,
            symbol: Some(name.into()),
            ..Default::default()
        }
    }

    /// `name <- src`
    pub fn store_var(name: impl Into<String>, src: VReg) -> Self {
        Instruction {
            op: Op::StoreVar,
            src1: src,
            symbol: Some(name.into()),
            ..Default::default()
        }
    }

    /// `dest <- param name`
    pub fn load_param(dest: VReg, name: impl Into<String>) -> Self {
        Instruction {
            op: Op::LoadParam,
            dest,
            symbol: Some(name.into()),
            ..Default::default()
        }
    }

    /// `dest <- src`
    pub fn mov(dest: VReg, src: VReg) -> Self {
        Instruction {
            op: Op::Move,
            dest,
            src1: src,
            ..Default::default()
        }
    }

    /// `dest <- src1 op src2`
    pub fn binary(op: Op, dest: VReg, src1: VReg, src2: VReg) -> Self {
        debug_assert!(op.is_binary_alu());
        Instruction {
            op,
            dest,
            src1,
            src2,
            ..Default::default()
        }
    }

    /// `dest <- src1 op imm` (immediate right operand).
    pub fn binary_imm(op: Op, dest: VReg, src1: VReg, imm: i64) -> Self {
        debug_assert!(op.is_binary_alu());
        Instruction {
            op,
            dest,
            src1,
            imm,
            ..Default::default()
        }
    }

    /// `dest <- op src`
    pub fn unary(op: Op, dest: VReg, src: VReg) -> Self {
        debug_assert!(matches!(op, Op::Neg | Op::Not));
        Instruction {
            op,
            dest,
            src1: src,
            ..Default::default()
        }
    }

    /// Unconditional jump.
    pub fn jump(label: impl Into<String>) -> Self {
        Instruction {
            op: Op::Jump,
            label: Some(label.into()),
            ..Default::default()
        }
    }

    /// Conditional jump; `cond` is the condition register for the
    /// register-based view (the interpreter pops its operand stack).
    pub fn jump_cond(op: Op, cond: VReg, label: impl Into<String>) -> Self {
        debug_assert!(op.is_conditional_jump());
        Instruction {
            op,
            src1: cond,
            label: Some(label.into()),
            ..Default::default()
        }
    }

    /// Jump target.
    pub fn label(name: impl Into<String>) -> Self {
        Instruction {
            op: Op::Label,
            label: Some(name.into()),
            ..Default::default()
        }
    }

    /// Return, with `src` as the register-view result when present.
    pub fn ret(src: VReg) -> Self {
        Instruction {
            op: Op::Return,
            src1: src,
            ..Default::default()
        }
    }

    /// `dest <- call symbol(args...)`
    pub fn call(dest: VReg, symbol: impl Into<String>, args: Vec<VReg>) -> Self {
        Instruction {
            op: Op::Call,
            dest,
            symbol: Some(symbol.into()),
            args,
            ..Default::default()
        }
    }

    /// SMC parameter anchor declaration.
    pub fn smc_param(name: impl Into<String>, ty: Type) -> Self {
        Instruction {
            op: Op::SmcParam,
            symbol: Some(name.into()),
            ty: Some(ty),
            ..Default::default()
        }
    }

    /// Patch an SMC parameter immediate from `src`.
    pub fn smc_store(name: impl Into<String>, src: VReg) -> Self {
        Instruction {
            op: Op::SmcStore,
            src1: src,
            symbol: Some(name.into()),
            ..Default::default()
        }
    }

    /// Attach a comment, builder style.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Whether the right ALU operand comes from `imm` rather than `src2`.
    pub fn has_imm_operand(&self) -> bool {
        self.op.is_binary_alu() && self.src2.is_none()
    }

    /// Destination register, if the instruction actually writes one.
    pub fn written_reg(&self) -> Option<VReg> {
        (self.op.writes_dest() && self.dest.is_some()).then_some(self.dest)
    }

    /// Registers the instruction reads.
    pub fn read_regs(&self) -> Vec<VReg> {
        let mut regs: Vec<VReg> = [self.src1, self.src2]
            .into_iter()
            .filter(VReg::is_some)
            .collect();
        regs.extend(self.args.iter().copied().filter(VReg::is_some));
        regs
    }

    /// Rewrite this slot into a constant load, preserving the destination.
    ///
    /// Used by compile-time execution to replace a `Call` in place; the
    /// instruction list keeps its length, so indices of later instructions
    /// stay valid.
    pub fn replace_with_const(&mut self, value: &Value, comment: String) {
        self.op = Op::LoadConst;
        self.src1 = VReg::NONE;
        self.src2 = VReg::NONE;
        self.imm = value.to_int();
        self.symbol = None;
        self.label = None;
        self.args = Vec::new();
        self.ty = Some(value.ty());
        self.hints = EmitHint::default();
        self.comment = Some(comment);
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Op::Label => write!(f, "{}:", self.label.as_deref().unwrap_or("?"))?,
            Op::LoadConst => {
                write!(f, "    {} = #{}", self.dest, self.imm)?;
                if let Some(ty) = &self.ty {
                    write!(f, ":{ty}")?;
                }
            }
            Op::LoadVar | Op::LoadParam => write!(
                f,
                "    {} = {} {}",
                self.dest,
                self.op,
                self.symbol.as_deref().unwrap_or("?")
            )?,
            Op::StoreVar => write!(
                f,
                "    {} {} <- {}",
                self.op,
                self.symbol.as_deref().unwrap_or("?"),
                self.src1
            )?,
            Op::Move => write!(f, "    {} = {}", self.dest, self.src1)?,
            Op::Jump => write!(f, "    jump {}", self.label.as_deref().unwrap_or("?"))?,
            Op::JumpIf | Op::JumpIfNot | Op::JumpIfZero | Op::JumpIfNotZero => write!(
                f,
                "    {} {}, {}",
                self.op,
                self.src1,
                self.label.as_deref().unwrap_or("?")
            )?,
            Op::Return => {
                f.write_str("    return")?;
                if self.src1.is_some() {
                    write!(f, " {}", self.src1)?;
                }
            }
            Op::Call => {
                f.write_str("    ")?;
                if self.dest.is_some() {
                    write!(f, "{} = ", self.dest)?;
                }
                write!(f, "call {}(", self.symbol.as_deref().unwrap_or("?"))?;
                for (i, a) in self.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")?;
            }
            Op::SmcParam => write!(
                f,
                "    smc_param {} : {}",
                self.symbol.as_deref().unwrap_or("?"),
                self.ty.as_ref().map(|t| t.to_string()).unwrap_or_default()
            )?,
            Op::SmcStore => write!(
                f,
                "    smc_store {} <- {}",
                self.symbol.as_deref().unwrap_or("?"),
                self.src1
            )?,
            _ if self.has_imm_operand() => write!(
                f,
                "    {} = {} {}, #{}",
                self.dest, self.op, self.src1, self.imm
            )?,
            Op::Neg | Op::Not => write!(f, "    {} = {} {}", self.dest, self.op, self.src1)?,
            Op::Load => write!(f, "    {} = load [{}]", self.dest, self.src1)?,
            Op::Store => write!(f, "    store [{}] <- {}", self.src1, self.src2)?,
            _ => write!(
                f,
                "    {} = {} {}, {}",
                self.dest, self.op, self.src1, self.src2
            )?,
        }
        if let Some(c) = &self.comment {
            write!(f, " ; {c}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_operand_convention() {
        let add = Instruction::binary_imm(Op::Add, VReg(3), VReg(1), 1);
        assert!(add.has_imm_operand());
        let add = Instruction::binary(Op::Add, VReg(3), VReg(1), VReg(2));
        assert!(!add.has_imm_operand());
    }

    #[test]
    fn replace_with_const_keeps_dest() {
        let mut ins = Instruction::call(VReg(5), "square", vec![VReg(1)]);
        ins.replace_with_const(&Value::int(144, Type::U16), "square computed".into());
        assert_eq!(ins.op, Op::LoadConst);
        assert_eq!(ins.dest, VReg(5));
        assert_eq!(ins.imm, 144);
        assert!(ins.symbol.is_none());
        assert!(ins.args.is_empty());
    }

    #[test]
    fn display_round_trips_shape() {
        let ins = Instruction::load_const(VReg(1), 42, Type::U8);
        assert_eq!(ins.to_string(), "    r1 = #42:u8");
        let ins = Instruction::call(VReg(2), "square", vec![VReg(1)]);
        assert_eq!(ins.to_string(), "    r2 = call square(r1)");
        assert_eq!(Instruction::label("loop").to_string(), "loop:");
    }
}
