//! The declarative substrate every backend consumes.

use minz_mir::{Op, Type, VReg};

bitflags::bitflags! {
    /// Capabilities a target architecture offers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Features: u16 {
        /// Code may patch its own immediates (TRUE SMC).
        const SELF_MODIFYING_CODE = 0x0001;
        /// Hardware interrupts exist.
        const INTERRUPTS = 0x0002;
        /// A shadow register set exists (Z80 `EXX`).
        const SHADOW_REGISTERS = 0x0004;
        /// Pointers are 16 bits wide.
        const POINTERS_16BIT = 0x0008;
        /// Pointers are 24 bits wide.
        const POINTERS_24BIT = 0x0010;
        /// Pointers are 32 bits wide.
        const POINTERS_32BIT = 0x0020;
        /// Hardware floating point.
        const FLOATING_POINT = 0x0040;
        /// Fixed-point arithmetic support.
        const FIXED_POINT = 0x0080;
    }
}

/// Where a target passes parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallModel {
    /// Parameters on the machine stack.
    Stack,
    /// Parameters in registers.
    Registers,
    /// Parameters in zero-page slots (6502 style).
    ZeroPage,
}

/// Calling-convention descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallConvDesc {
    /// Parameter placement model.
    pub model: CallModel,
    /// Name of the return-value location.
    pub return_location: &'static str,
}

/// Static description of a target, consumed by [`crate::BaseGenerator`]
/// and by the specialized generators.
///
/// The tables are plain static data: a 1:1 mnemonic map for trivial
/// opcodes, and a pattern table of format strings with `%reg%`, `%dest%`,
/// `%src1%`, `%src2%`, `%addr%`, `%value%`, `%label%` placeholders for
/// everything else.
#[derive(Debug, Clone)]
pub struct Toolkit {
    /// Target name, matching the registry entry.
    pub name: &'static str,
    /// Comment leader for the output syntax.
    pub comment: &'static str,
    /// Trivial opcode-to-mnemonic map.
    pub instr: &'static [(Op, &'static str)],
    /// Named emission patterns.
    pub patterns: &'static [(&'static str, &'static str)],
    /// Calling convention.
    pub call_conv: CallConvDesc,
    /// Physical register names, indexed by virtual-register number minus
    /// one; virtual registers past the end spill.
    pub registers: &'static [&'static str],
    /// Pointer width in bytes (the only size the portable defaults get
    /// wrong often enough to be worth a table entry).
    pub pointer_size: u16,
    /// Capability flags.
    pub features: Features,
    /// Free-form flags a backend may query.
    pub extra_flags: &'static [&'static str],
}

impl Toolkit {
    /// Mnemonic for a trivially mapped opcode.
    pub fn mnemonic(&self, op: Op) -> Option<&'static str> {
        self.instr.iter().find(|(o, _)| *o == op).map(|(_, m)| *m)
    }

    /// Pattern string by name.
    pub fn pattern(&self, name: &str) -> Option<&'static str> {
        self.patterns
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, p)| *p)
    }

    /// Physical register backing a virtual register, if any.
    pub fn register(&self, reg: VReg) -> Option<&'static str> {
        if reg.is_none() {
            return None;
        }
        self.registers.get(reg.0 as usize - 1).copied()
    }

    /// Byte size of a type on this target.
    pub fn size_of(&self, ty: &Type) -> u16 {
        match ty {
            Type::Pointer(_) => self.pointer_size,
            Type::Array(elem, n) => self.size_of(elem).saturating_mul(*n),
            Type::Struct(fields) => fields.iter().map(|(_, t)| self.size_of(t)).sum(),
            other => other.default_size(),
        }
    }

    /// Whether a capability flag is set.
    pub fn has_feature(&self, f: Features) -> bool {
        self.features.contains(f)
    }

    /// Whether a free-form flag is present.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.extra_flags.contains(&flag)
    }
}

/// Placeholder bindings for one pattern expansion.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    /// `%reg%`
    pub reg: Option<String>,
    /// `%dest%`
    pub dest: Option<String>,
    /// `%src1%`
    pub src1: Option<String>,
    /// `%src2%`
    pub src2: Option<String>,
    /// `%addr%`
    pub addr: Option<String>,
    /// `%value%`
    pub value: Option<String>,
    /// `%label%`
    pub label: Option<String>,
}

/// Substitute placeholders in a pattern string.
///
/// Plain string replacement; patterns are static data and placeholders
/// never nest, so nothing smarter is needed.
pub fn expand(pattern: &str, b: &Bindings) -> String {
    let mut out = pattern.to_string();
    let pairs = [
        ("%reg%", &b.reg),
        ("%dest%", &b.dest),
        ("%src1%", &b.src1),
        ("%src2%", &b.src2),
        ("%addr%", &b.addr),
        ("%value%", &b.value),
        ("%label%", &b.label),
    ];
    for (placeholder, binding) in pairs {
        if let Some(text) = binding {
            out = out.replace(placeholder, text);
        }
    }
    out
}
