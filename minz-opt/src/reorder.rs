//! Safety-guarded instruction reordering.

use minz_mir::{Function, Op, VReg};
use tracing::trace;

/// Sink constant materializations toward their first consumer.
///
/// Freeing the distance between a `LoadConst` and its use keeps registers
/// available on register-starved targets and exposes folding. Legality is a
/// minimal def-use check: an instruction may move past another only if
/// neither writes a register the other reads or writes, and neither is a
/// barrier (calls, indirect memory, labels, jumps).
pub fn sink_constants(func: &mut Function) -> usize {
    let mut moves = 0;
    let mut i = 0;
    while i < func.body.len() {
        if func.body[i].op != Op::LoadConst {
            i += 1;
            continue;
        }
        let dest = func.body[i].dest;
        if dest.is_none() {
            i += 1;
            continue;
        }

        // Find the first consumer, stopping at anything that blocks the move.
        let mut target: Option<usize> = None;
        for j in i + 1..func.body.len() {
            let other = &func.body[j];
            if reads(other, dest) {
                target = Some(j);
                break;
            }
            if other.op.is_barrier() || other.written_reg() == Some(dest) {
                break;
            }
        }

        if let Some(j) = target {
            if j > i + 1 {
                let ins = func.body.remove(i);
                trace!(function = %func.name, from = i, to = j - 1, "constant sunk");
                func.body.insert(j - 1, ins);
                moves += 1;
                // The slot at `i` now holds the instruction that followed;
                // re-examine it.
                continue;
            }
        }
        i += 1;
    }
    moves
}

fn reads(ins: &minz_mir::Instruction, reg: VReg) -> bool {
    ins.read_regs().contains(&reg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use minz_mir::{Instruction, Type, VReg};

    fn body(f: &Function) -> Vec<Op> {
        f.body.iter().map(|i| i.op).collect()
    }

    #[test]
    fn constant_moves_next_to_its_consumer() {
        let mut f = Function::new("f", vec![], Type::U8);
        f.push(Instruction::load_const(VReg(1), 5, Type::U8));
        f.push(Instruction::load_var(VReg(2), "g"));
        f.push(Instruction::load_var(VReg(3), "h"));
        f.push(Instruction::binary(Op::Add, VReg(4), VReg(1), VReg(2)));
        f.push(Instruction::ret(VReg(4)));

        let moves = sink_constants(&mut f);
        assert_eq!(moves, 1);
        assert_eq!(
            body(&f),
            vec![Op::LoadVar, Op::LoadVar, Op::LoadConst, Op::Add, Op::Return]
        );
    }

    #[test]
    fn barriers_block_the_move() {
        let mut f = Function::new("f", vec![], Type::U8);
        f.push(Instruction::load_const(VReg(1), 5, Type::U8));
        f.push(Instruction::call(VReg(2), "side_effect", vec![]));
        f.push(Instruction::binary(Op::Add, VReg(3), VReg(1), VReg(2)));
        f.push(Instruction::ret(VReg(3)));

        let before = f.body.clone();
        assert_eq!(sink_constants(&mut f), 0);
        assert_eq!(f.body, before);
    }

    #[test]
    fn redefinition_blocks_the_move() {
        let mut f = Function::new("f", vec![], Type::U8);
        f.push(Instruction::load_const(VReg(1), 5, Type::U8));
        f.push(Instruction::load_const(VReg(1), 6, Type::U8));
        f.push(Instruction::binary_imm(Op::Add, VReg(2), VReg(1), 1));
        f.push(Instruction::ret(VReg(2)));

        assert_eq!(sink_constants(&mut f), 0);
        assert_eq!(f.body[0].imm, 5);
    }

    #[test]
    fn adjacent_consumer_needs_no_move() {
        let mut f = Function::new("f", vec![], Type::U8);
        f.push(Instruction::load_const(VReg(1), 5, Type::U8));
        f.push(Instruction::binary_imm(Op::Add, VReg(2), VReg(1), 1));
        f.push(Instruction::ret(VReg(2)));

        assert_eq!(sink_constants(&mut f), 0);
    }
}
