//! Z80 register allocation.

use std::collections::HashMap;

use minz_mir::{Function, Op, VReg};

/// Storage assigned to a virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Loc {
    /// 8-bit register: A, B, C, D, E, H, L.
    Reg8(&'static str),
    /// 16-bit pair: HL, DE, BC.
    Reg16(&'static str),
    /// Absolute spill address in the virtual-register RAM area.
    Mem(u16),
}

impl Loc {
    pub(crate) fn is_wide(&self) -> bool {
        matches!(self, Loc::Reg16(_))
    }
}

const HALVES: [&str; 7] = ["A", "B", "C", "D", "E", "H", "L"];
/// 8-bit allocation order: the accumulator first, H and L last so HL
/// stays available for 16-bit work.
const ORDER8: [&str; 7] = ["A", "B", "C", "D", "E", "H", "L"];
const PAIRS: [(&str, [&str; 2]); 3] = [
    ("HL", ["H", "L"]),
    ("DE", ["D", "E"]),
    ("BC", ["B", "C"]),
];

/// Interference-aware allocator over the Z80 register file.
///
/// Pairs and their halves share state: HL is free only while H and L are.
/// Virtual registers die at their last use; spills go to a fixed RAM area
/// at the configured base, two bytes per slot.
pub(crate) struct RegAlloc {
    /// Half-register -> owning virtual register.
    used: HashMap<&'static str, VReg>,
    map: HashMap<VReg, Loc>,
    last_use: HashMap<VReg, usize>,
    /// Registers exempt from liveness-based release (parameter homes).
    pinned: std::collections::HashSet<VReg>,
    spill_base: u16,
    spill_used: Vec<bool>,
}

impl RegAlloc {
    pub(crate) fn new(func: &Function, spill_base: u16) -> Self {
        RegAlloc {
            used: HashMap::new(),
            map: HashMap::new(),
            last_use: last_uses(func),
            pinned: std::collections::HashSet::new(),
            spill_base,
            spill_used: Vec::new(),
        }
    }

    pub(crate) fn loc(&self, reg: VReg) -> Option<Loc> {
        self.map.get(&reg).copied()
    }

    /// Bind a virtual register to a specific location (parameter homes,
    /// call results).
    pub(crate) fn bind(&mut self, reg: VReg, loc: Loc) {
        self.claim(loc, reg);
        self.map.insert(reg, loc);
    }

    /// Bind and pin: the register survives liveness sweeps until
    /// transferred or explicitly released.
    pub(crate) fn bind_pinned(&mut self, reg: VReg, loc: Loc) {
        self.bind(reg, loc);
        self.pinned.insert(reg);
    }

    /// Move ownership of a location from one virtual register to another.
    pub(crate) fn transfer(&mut self, from: VReg, to: VReg) -> Option<Loc> {
        let loc = self.map.remove(&from)?;
        self.pinned.remove(&from);
        self.claim(loc, to);
        self.map.insert(to, loc);
        Some(loc)
    }

    fn claim(&mut self, loc: Loc, owner: VReg) {
        match loc {
            Loc::Reg8(r) => {
                self.used.insert(r, owner);
            }
            Loc::Reg16(pair) => {
                for (name, halves) in PAIRS {
                    if name == pair {
                        for h in halves {
                            self.used.insert(h, owner);
                        }
                    }
                }
            }
            Loc::Mem(addr) => {
                let slot = ((addr - self.spill_base) / 2) as usize;
                if slot >= self.spill_used.len() {
                    self.spill_used.resize(slot + 1, false);
                }
                self.spill_used[slot] = true;
            }
        }
    }

    fn half_free(&self, r: &str) -> bool {
        !self.used.contains_key(r)
    }

    pub(crate) fn reg8_free(&self, r: &str) -> bool {
        self.half_free(r)
    }

    pub(crate) fn reg16_free(&self, pair: &str) -> bool {
        PAIRS
            .iter()
            .find(|(name, _)| *name == pair)
            .is_some_and(|(_, halves)| halves.iter().all(|h| self.half_free(h)))
    }

    /// Owner of a physical half or pair, if any.
    pub(crate) fn owner_of(&self, name: &str) -> Option<VReg> {
        for (pair, halves) in PAIRS {
            if pair == name {
                for h in halves {
                    if let Some(v) = self.used.get(h) {
                        return Some(*v);
                    }
                }
                return None;
            }
        }
        self.used.get(name).copied()
    }

    /// Allocate a location for `reg`, preferring `prefer` when free.
    pub(crate) fn define(&mut self, reg: VReg, wide: bool, prefer: Option<&'static str>) -> Loc {
        if let Some(loc) = self.loc(reg) {
            return loc;
        }
        let loc = self.pick(wide, prefer);
        self.bind(reg, loc);
        loc
    }

    fn pick(&mut self, wide: bool, prefer: Option<&'static str>) -> Loc {
        if wide {
            if let Some(p) = prefer {
                if self.reg16_free(p) {
                    return Loc::Reg16(pair_name(p));
                }
            }
            for (name, _) in PAIRS {
                if self.reg16_free(name) {
                    return Loc::Reg16(name);
                }
            }
        } else {
            if let Some(p) = prefer {
                if self.half_free(p) {
                    return Loc::Reg8(half_name(p));
                }
            }
            for r in ORDER8 {
                if self.half_free(r) {
                    return Loc::Reg8(r);
                }
            }
        }
        Loc::Mem(self.spill_slot())
    }

    fn spill_slot(&mut self) -> u16 {
        for (i, used) in self.spill_used.iter().enumerate() {
            if !used {
                return self.spill_base + 2 * i as u16;
            }
        }
        self.spill_used.push(true);
        self.spill_base + 2 * (self.spill_used.len() as u16 - 1)
    }

    /// Release every virtual register whose last use is at or before
    /// `index`.
    pub(crate) fn free_dead(&mut self, index: usize) {
        let dead: Vec<VReg> = self
            .map
            .keys()
            .filter(|v| {
                !self.pinned.contains(v)
                    && self.last_use.get(v).copied().unwrap_or(0) <= index
            })
            .copied()
            .collect();
        for v in dead {
            self.release(v);
        }
    }

    pub(crate) fn release(&mut self, reg: VReg) {
        self.pinned.remove(&reg);
        if let Some(loc) = self.map.remove(&reg) {
            match loc {
                Loc::Reg8(r) => {
                    self.used.remove(r);
                }
                Loc::Reg16(pair) => {
                    for (name, halves) in PAIRS {
                        if name == pair {
                            for h in halves {
                                self.used.remove(h);
                            }
                        }
                    }
                }
                Loc::Mem(addr) => {
                    let slot = ((addr - self.spill_base) / 2) as usize;
                    if let Some(s) = self.spill_used.get_mut(slot) {
                        *s = false;
                    }
                }
            }
        }
    }

    /// Re-place an 8-bit value somewhere outside the `avoid` registers,
    /// updating the map. The caller emits the actual move.
    pub(crate) fn rehome(&mut self, owner: VReg, avoid: &[&str]) -> Loc {
        self.release_claim_only(owner);
        let loc = 'pick: {
            for r in ORDER8 {
                if !avoid.contains(&r) && self.half_free(r) {
                    break 'pick Loc::Reg8(r);
                }
            }
            Loc::Mem(self.spill_slot())
        };
        self.claim(loc, owner);
        self.map.insert(owner, loc);
        loc
    }

    /// Re-place a 16-bit value outside HL. The caller emits the move.
    pub(crate) fn rehome_wide(&mut self, owner: VReg) -> Loc {
        self.release_claim_only(owner);
        let loc = if self.reg16_free("DE") {
            Loc::Reg16("DE")
        } else if self.reg16_free("BC") {
            Loc::Reg16("BC")
        } else {
            Loc::Mem(self.spill_slot())
        };
        self.claim(loc, owner);
        self.map.insert(owner, loc);
        loc
    }

    /// Drop the physical claim of `owner` without forgetting liveness;
    /// used when the value is about to be moved.
    fn release_claim_only(&mut self, owner: VReg) {
        if let Some(loc) = self.map.remove(&owner) {
            match loc {
                Loc::Reg8(r) => {
                    self.used.remove(r);
                }
                Loc::Reg16(pair) => {
                    for (name, halves) in PAIRS {
                        if name == pair {
                            for h in halves {
                                self.used.remove(h);
                            }
                        }
                    }
                }
                Loc::Mem(addr) => {
                    let slot = ((addr - self.spill_base) / 2) as usize;
                    if let Some(s) = self.spill_used.get_mut(slot) {
                        *s = false;
                    }
                }
            }
        }
    }

    /// Bind `reg` to a fresh spill slot and return its address.
    pub(crate) fn spill_for(&mut self, reg: VReg) -> u16 {
        self.release_claim_only(reg);
        let addr = self.spill_slot();
        let loc = Loc::Mem(addr);
        self.claim(loc, reg);
        self.map.insert(reg, loc);
        addr
    }

    /// Whether the virtual register is still live strictly after `index`.
    pub(crate) fn live_after(&self, reg: VReg, index: usize) -> bool {
        self.last_use.get(&reg).copied().unwrap_or(0) > index
    }

    /// Locations currently held by registers live after `index`.
    pub(crate) fn live_locs(&self, index: usize) -> Vec<(VReg, Loc)> {
        let mut live: Vec<(VReg, Loc)> = self
            .map
            .iter()
            .filter(|(v, _)| self.live_after(**v, index))
            .map(|(v, l)| (*v, *l))
            .collect();
        live.sort_by_key(|(v, _)| v.0);
        live
    }
}

fn pair_name(name: &str) -> &'static str {
    PAIRS
        .iter()
        .map(|(n, _)| *n)
        .find(|n| *n == name)
        .unwrap_or("HL")
}

fn half_name(name: &str) -> &'static str {
    HALVES.iter().copied().find(|h| *h == name).unwrap_or("A")
}

/// Last instruction index at which each virtual register is read.
fn last_uses(func: &Function) -> HashMap<VReg, usize> {
    let mut last = HashMap::new();
    for (i, ins) in func.body.iter().enumerate() {
        for r in ins.read_regs() {
            last.insert(r, i);
        }
        // A value returned at the end of the function lives to the return.
        if ins.op == Op::Return && ins.src1.is_some() {
            last.insert(ins.src1, i);
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use minz_mir::{Instruction, Type};

    fn empty_func() -> Function {
        Function::new("f", vec![], Type::Void)
    }

    #[test]
    fn accumulator_is_preferred_for_bytes() {
        let f = empty_func();
        let mut a = RegAlloc::new(&f, 0xF000);
        assert_eq!(a.define(VReg(1), false, None), Loc::Reg8("A"));
        assert_eq!(a.define(VReg(2), false, None), Loc::Reg8("B"));
    }

    #[test]
    fn wide_allocation_blocks_the_halves() {
        let f = empty_func();
        let mut a = RegAlloc::new(&f, 0xF000);
        assert_eq!(a.define(VReg(1), true, None), Loc::Reg16("HL"));
        assert!(!a.reg8_free("H"));
        assert!(!a.reg8_free("L"));
        assert_eq!(a.define(VReg(2), true, None), Loc::Reg16("DE"));
        assert_eq!(a.define(VReg(3), true, None), Loc::Reg16("BC"));
        // Pairs exhausted: the next wide value spills.
        assert_eq!(a.define(VReg(4), true, None), Loc::Mem(0xF000));
    }

    #[test]
    fn byte_usage_blocks_the_pair() {
        let f = empty_func();
        let mut a = RegAlloc::new(&f, 0xF000);
        a.bind(VReg(1), Loc::Reg8("H"));
        assert!(!a.reg16_free("HL"));
        assert_eq!(a.define(VReg(2), true, None), Loc::Reg16("DE"));
    }

    #[test]
    fn dead_registers_are_recycled() {
        let mut f = empty_func();
        f.push(Instruction::load_const(VReg(1), 1, Type::U8));
        f.push(Instruction::binary_imm(Op::Add, VReg(2), VReg(1), 1));
        f.push(Instruction::ret(VReg(2)));

        let mut a = RegAlloc::new(&f, 0xF000);
        assert_eq!(a.define(VReg(1), false, None), Loc::Reg8("A"));
        // r1 dies at index 1; after that A is free again.
        a.free_dead(1);
        assert!(a.reg8_free("A"));
    }

    #[test]
    fn spill_slots_are_reused() {
        let f = empty_func();
        let mut a = RegAlloc::new(&f, 0xF000);
        for n in 1..=7 {
            a.define(VReg(n), false, None);
        }
        let spilled = a.define(VReg(8), false, None);
        assert_eq!(spilled, Loc::Mem(0xF000));
        a.release(VReg(8));
        assert_eq!(a.define(VReg(9), false, None), Loc::Mem(0xF000));
    }
}
