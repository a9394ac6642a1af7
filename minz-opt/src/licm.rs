//! Loop-invariant constant hoisting.

use minz_mir::{Function, LabelMap, Op};
use tracing::trace;

/// Safety cap on hoists per function.
const MAX_HOISTS: usize = 64;

/// Hoist `LoadConst` instructions out of single-entry loops.
///
/// A loop is a backward jump to a label earlier in the body. A constant
/// load strictly inside the body whose destination is not written anywhere
/// else in the loop (and not read before the load on the first iteration)
/// is lifted above the loop header.
pub fn hoist_loop_invariants(func: &mut Function) -> usize {
    let mut hoists = 0;
    while hoists < MAX_HOISTS {
        match find_hoist(func) {
            Some((from, header)) => {
                let ins = func.body.remove(from);
                trace!(function = %func.name, from, header, "constant hoisted");
                func.body.insert(header, ins);
                hoists += 1;
            }
            None => break,
        }
    }
    hoists
}

/// Locate one hoistable constant: returns (instruction index, header index).
fn find_hoist(func: &Function) -> Option<(usize, usize)> {
    let labels = LabelMap::build(func).ok()?;

    for j in 0..func.body.len() {
        let ins = &func.body[j];
        if !ins.op.is_jump() {
            continue;
        }
        let Some(header) = ins.label.as_deref().and_then(|l| labels.resolve(l)) else {
            continue;
        };
        if header >= j {
            continue;
        }

        // Single entry: no jump from outside [header..=j] may target a
        // label strictly inside the body.
        let body_range = header..=j;
        let mut single_entry = true;
        for (k, other) in func.body.iter().enumerate() {
            if body_range.contains(&k) || !other.op.is_jump() {
                continue;
            }
            if let Some(t) = other.label.as_deref().and_then(|l| labels.resolve(l)) {
                if t > header && t <= j {
                    single_entry = false;
                    break;
                }
            }
        }
        if !single_entry {
            continue;
        }

        for i in header + 1..j {
            let candidate = &func.body[i];
            if candidate.op != Op::LoadConst || candidate.dest.is_none() {
                continue;
            }
            let dest = candidate.dest;

            let redefined_elsewhere = func.body[header..=j]
                .iter()
                .enumerate()
                .any(|(off, other)| header + off != i && other.written_reg() == Some(dest));
            let read_before_def = func.body[header..i]
                .iter()
                .any(|other| other.read_regs().contains(&dest));
            if !redefined_elsewhere && !read_before_def {
                return Some((i, header));
            }
        }
    }
    None
}
