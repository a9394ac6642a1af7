//! Assembly-level peephole.
//!
//! Operates on the textual output of a backend: tokenize into labeled
//! instruction records, apply architecture-tagged rules, re-serialize.
//! Line-based with a simple grammar (label, mnemonic, operands, comment);
//! directives and anything else unusual pass through verbatim.

use itertools::Itertools;
use tracing::debug;

/// Architecture tag selecting which rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// Zilog Z80.
    Z80,
    /// Intel 8080.
    I8080,
    /// Game Boy LR35902.
    GameBoy,
    /// MOS 6502.
    Mos6502,
    /// Motorola 68000.
    M68k,
}

/// One tokenized line of assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct AsmLine {
    /// Label defined on the line, without the colon.
    pub label: Option<String>,
    /// Instruction mnemonic.
    pub mnemonic: Option<String>,
    /// Operands, comma-separated in the source.
    pub operands: Vec<String>,
    /// Trailing comment, without the semicolon.
    pub comment: Option<String>,
    /// Verbatim passthrough for directives and unparsed shapes.
    pub raw: Option<String>,
}

impl AsmLine {
    fn raw(line: &str) -> Self {
        AsmLine {
            label: None,
            mnemonic: None,
            operands: Vec::new(),
            comment: None,
            raw: Some(line.to_string()),
        }
    }

    fn mnemonic_is(&self, name: &str) -> bool {
        self.mnemonic
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(name))
    }

    fn mnemonic_in(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.mnemonic_is(n))
    }

    fn same_operation(&self, other: &AsmLine) -> bool {
        self.mnemonic == other.mnemonic && self.operands == other.operands
    }
}

/// Tokenize an assembly buffer into line records.
pub fn tokenize(text: &str) -> Vec<AsmLine> {
    text.lines().map(tokenize_line).collect()
}

fn tokenize_line(line: &str) -> AsmLine {
    let (code, comment) = match line.split_once(';') {
        Some((c, k)) => (c, Some(k.trim().to_string())),
        None => (line, None),
    };
    let trimmed = code.trim();
    if trimmed.is_empty() {
        // Blank line or comment-only line.
        let raw = (line.trim().is_empty() && comment.is_none()).then(String::new);
        return AsmLine {
            label: None,
            mnemonic: None,
            operands: Vec::new(),
            comment,
            raw,
        };
    }

    let mut tokens = trimmed.split_whitespace();
    let first = tokens.next().unwrap_or_default();

    // `name EQU expr` and leading-dot directives pass through untouched.
    let second = tokens.clone().next();
    if second.is_some_and(|t| t.eq_ignore_ascii_case("EQU")) || first.starts_with('.') {
        return AsmLine::raw(line);
    }

    let (label, mnemonic_tok) = if let Some(name) = first.strip_suffix(':') {
        (Some(name.to_string()), tokens.next())
    } else if first.eq_ignore_ascii_case("ORG") || first.eq_ignore_ascii_case("END") {
        return AsmLine::raw(line);
    } else {
        (None, Some(first))
    };

    let rest = tokens.join(" ");
    let operands: Vec<String> = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(',').map(|o| o.trim().to_string()).collect()
    };

    AsmLine {
        label,
        mnemonic: mnemonic_tok.map(|m| m.to_string()),
        operands,
        comment,
        raw: None,
    }
}

/// Serialize line records back to text.
pub fn serialize(lines: &[AsmLine]) -> String {
    let mut out = String::new();
    for line in lines {
        if let Some(raw) = &line.raw {
            out.push_str(raw);
            out.push('\n');
            continue;
        }
        let mut rendered = String::new();
        if let Some(label) = &line.label {
            rendered.push_str(label);
            rendered.push(':');
        }
        if let Some(mn) = &line.mnemonic {
            if line.label.is_some() {
                rendered.push(' ');
            } else {
                rendered.push_str("    ");
            }
            rendered.push_str(mn);
            if !line.operands.is_empty() {
                rendered.push(' ');
                rendered.push_str(&line.operands.join(", "));
            }
        }
        if let Some(comment) = &line.comment {
            if !rendered.is_empty() {
                rendered.push(' ');
            }
            rendered.push_str("; ");
            rendered.push_str(comment);
        }
        out.push_str(&rendered);
        out.push('\n');
    }
    out
}

/// Whether any line references `label` in an operand. Exact operand
/// matches and sub-expressions (`label+1`, `(label)`) both count.
fn label_referenced(lines: &[AsmLine], label: &str) -> bool {
    lines.iter().any(|l| {
        l.operands.iter().any(|op| op.contains(label))
            || l.raw.as_deref().is_some_and(|r| r.contains(label))
    })
}

fn imm_load_mnemonics(arch: Arch) -> &'static [&'static str] {
    match arch {
        Arch::Z80 | Arch::GameBoy => &["LD"],
        Arch::I8080 => &["MVI", "LXI"],
        Arch::Mos6502 => &["LDA", "LDX", "LDY"],
        Arch::M68k => &["MOVE", "MOVE.B", "MOVE.W", "MOVEQ"],
    }
}

fn unconditional_jumps(arch: Arch) -> &'static [&'static str] {
    match arch {
        Arch::Z80 | Arch::GameBoy => &["JP", "JR"],
        Arch::I8080 => &["JMP"],
        Arch::Mos6502 => &["JMP"],
        Arch::M68k => &["BRA", "JMP"],
    }
}

fn flag_only_mnemonics(arch: Arch) -> &'static [&'static str] {
    match arch {
        Arch::Z80 | Arch::GameBoy => &["CP", "OR", "AND"],
        Arch::I8080 => &["CMP", "ORA", "ANA"],
        Arch::Mos6502 => &["CMP", "CPX", "CPY"],
        Arch::M68k => &["TST", "TST.B", "TST.W", "CMP"],
    }
}

/// Drop the second of two identical consecutive immediate loads.
fn redundant_load(lines: &mut Vec<AsmLine>, arch: Arch) -> usize {
    let set = imm_load_mnemonics(arch);
    drop_duplicate_pairs(lines, |line| line.mnemonic_in(set))
}

/// Drop the second of two identical consecutive flag-setting operations.
fn duplicate_flag_set(lines: &mut Vec<AsmLine>, arch: Arch) -> usize {
    let set = flag_only_mnemonics(arch);
    drop_duplicate_pairs(lines, |line| line.mnemonic_in(set))
}

fn drop_duplicate_pairs(lines: &mut Vec<AsmLine>, eligible: impl Fn(&AsmLine) -> bool) -> usize {
    let mut removed = 0;
    let mut i = 0;
    while i + 1 < lines.len() {
        let dup = eligible(&lines[i])
            && lines[i + 1].label.is_none()
            && lines[i].same_operation(&lines[i + 1]);
        if dup {
            lines.remove(i + 1);
            removed += 1;
        } else {
            i += 1;
        }
    }
    removed
}

/// Remove `PUSH r` immediately followed by `POP r` of the same register.
fn dead_push_pop(lines: &mut Vec<AsmLine>, arch: Arch) -> usize {
    let (push, pop): (&[&str], &[&str]) = match arch {
        Arch::Z80 | Arch::GameBoy | Arch::I8080 => (&["PUSH"], &["POP"]),
        Arch::Mos6502 => (&["PHA"], &["PLA"]),
        Arch::M68k => return 0,
    };
    let mut removed = 0;
    let mut i = 0;
    while i + 1 < lines.len() {
        let pair = lines[i].mnemonic_in(push)
            && lines[i + 1].mnemonic_in(pop)
            && lines[i + 1].label.is_none()
            && lines[i].operands == lines[i + 1].operands;
        if pair {
            lines.remove(i + 1);
            lines.remove(i);
            removed += 2;
        } else {
            i += 1;
        }
    }
    removed
}

/// Remove an unconditional jump to the label defined on the next line.
fn jump_to_fallthrough(lines: &mut Vec<AsmLine>, arch: Arch) -> usize {
    let jumps = unconditional_jumps(arch);
    let mut removed = 0;
    let mut i = 0;
    while i + 1 < lines.len() {
        let fallthrough = lines[i].mnemonic_in(jumps)
            && lines[i].operands.len() == 1
            && lines[i + 1].label.as_deref() == Some(lines[i].operands[0].as_str());
        if fallthrough {
            lines.remove(i);
            removed += 1;
        } else {
            i += 1;
        }
    }
    removed
}

/// Merge an empty label line into an immediately following label: rewrite
/// exact references, then delete the alias, declining when any reference
/// (an address expression, say) would be left dangling.
fn collapse_label_aliases(lines: &mut Vec<AsmLine>, _arch: Arch) -> usize {
    let alias = lines
        .iter()
        .enumerate()
        .tuple_windows()
        .find_map(|((i, a), (_, b))| {
            let both_labels =
                a.label.is_some() && a.mnemonic.is_none() && a.raw.is_none() && b.label.is_some();
            both_labels.then(|| (i, a.label.clone().unwrap(), b.label.clone().unwrap()))
        });
    let Some((index, from, to)) = alias else {
        return 0;
    };

    let mut rewritten = lines.clone();
    for line in &mut rewritten {
        for op in &mut line.operands {
            if *op == from {
                *op = to.clone();
            }
        }
    }
    rewritten.remove(index);

    // Decline when a non-exact reference (e.g. `from+1`) remains.
    if label_referenced(&rewritten, &from) {
        return 0;
    }
    *lines = rewritten;
    1
}

/// Run the architecture's rule set to fixpoint and re-serialize.
pub fn optimize_asm(text: &str, arch: Arch) -> String {
    let mut lines = tokenize(text);
    let rules: &[fn(&mut Vec<AsmLine>, Arch) -> usize] = &[
        redundant_load,
        duplicate_flag_set,
        dead_push_pop,
        jump_to_fallthrough,
        collapse_label_aliases,
    ];

    let mut total = 0;
    for _ in 0..10 {
        let mut changed = 0;
        for rule in rules {
            changed += rule(&mut lines, arch);
        }
        total += changed;
        if changed == 0 {
            break;
        }
    }
    debug!(?arch, rewrites = total, "assembly peephole finished");
    serialize(&lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_labels_and_operands() {
        let lines = tokenize("start:\n    LD A, 5 ; five\n    RET\n");
        assert_eq!(lines[0].label.as_deref(), Some("start"));
        assert!(lines[0].mnemonic.is_none());
        assert_eq!(lines[1].mnemonic.as_deref(), Some("LD"));
        assert_eq!(lines[1].operands, vec!["A", "5"]);
        assert_eq!(lines[1].comment.as_deref(), Some("five"));
        assert_eq!(lines[2].mnemonic.as_deref(), Some("RET"));
    }

    #[test]
    fn equ_and_org_pass_through_verbatim() {
        let text = "    ORG 0x8000\na$imm0 EQU a$immOP + 1\n";
        let lines = tokenize(text);
        assert!(lines.iter().all(|l| l.raw.is_some()));
        assert_eq!(serialize(&lines), text);
    }

    #[test]
    fn drops_redundant_immediate_load() {
        let out = optimize_asm("    LD A, 5\n    LD A, 5\n    RET\n", Arch::Z80);
        assert_eq!(out.matches("LD A, 5").count(), 1);
    }

    #[test]
    fn keeps_loads_with_an_intervening_label() {
        let text = "    LD A, 5\nagain: LD A, 5\n    RET\n";
        let out = optimize_asm(text, Arch::Z80);
        assert_eq!(out.matches("LD A, 5").count(), 2);
    }

    #[test]
    fn removes_dead_push_pop_pair() {
        let out = optimize_asm("    PUSH HL\n    POP HL\n    RET\n", Arch::Z80);
        assert!(!out.contains("PUSH"));
        assert!(!out.contains("POP"));
    }

    #[test]
    fn mismatched_push_pop_survives() {
        let out = optimize_asm("    PUSH HL\n    POP DE\n    RET\n", Arch::Z80);
        assert!(out.contains("PUSH HL"));
        assert!(out.contains("POP DE"));
    }

    #[test]
    fn jump_to_fallthrough_is_removed() {
        let out = optimize_asm("    JP next\nnext: RET\n", Arch::Z80);
        assert!(!out.contains("JP"));
        assert!(out.contains("next: RET"));
    }

    #[test]
    fn conditional_jump_to_next_is_kept() {
        let out = optimize_asm("    JP Z, next\nnext: RET\n", Arch::Z80);
        assert!(out.contains("JP Z, next"));
    }

    #[test]
    fn duplicate_compare_is_dropped() {
        let out = optimize_asm("    CP 3\n    CP 3\n    RET\n", Arch::Z80);
        assert_eq!(out.matches("CP 3").count(), 1);
    }

    #[test]
    fn label_alias_collapses_when_unreferenced() {
        let text = "a:\nb: RET\n    JP a\n";
        let out = optimize_asm(text, Arch::Z80);
        assert!(out.contains("JP b"));
        assert!(!out.contains("a:"));
    }

    #[test]
    fn alias_with_address_expression_declines() {
        let text = "a:\nb: RET\n    LD HL, a+1\n";
        let out = optimize_asm(text, Arch::Z80);
        // `a+1` cannot be rewritten, so `a:` must survive.
        assert!(out.contains("a:"));
        assert!(out.contains("a+1"));
    }

    #[test]
    fn arch_rules_are_selected() {
        // The 8080 rule set doesn't know `LD`, so nothing is rewritten.
        let text = "    LD A, 5\n    LD A, 5\n    RET\n";
        let out = optimize_asm(text, Arch::I8080);
        assert_eq!(out.matches("LD A, 5").count(), 2);
    }

    #[test]
    fn second_pass_is_identity() {
        let text = "    LD A, 5\n    LD A, 5\n    PUSH HL\n    POP HL\n    JP next\nnext: RET\n";
        let once = optimize_asm(text, Arch::Z80);
        let twice = optimize_asm(&once, Arch::Z80);
        assert_eq!(once, twice);
    }
}
