//! Purity classification.

use std::collections::{HashMap, HashSet};

use minz_mir::{Function, Module, Op, Purity};
use tracing::debug;

use crate::builtins::builtin;

/// Recursion cap for the analysis; beyond it a function is conservatively
/// impure.
const MAX_ANALYSIS_DEPTH: usize = 100;

/// Classifies every function in a module as impure, pure or const.
///
/// Results are memoized in a per-module cache that stays valid for the
/// module's lifetime. Cycles are handled with a visiting set: a function
/// re-entered while under analysis is tentatively pure, and the final
/// classification lands in the cache once its body completes. The analyzer
/// never fails; anything it cannot prove is impure.
pub struct PurityAnalyzer<'m> {
    module: &'m Module,
    cache: HashMap<String, Purity>,
    visiting: HashSet<String>,
    depth: usize,
}

impl<'m> PurityAnalyzer<'m> {
    /// Analyzer over `module` with an empty cache.
    pub fn new(module: &'m Module) -> Self {
        PurityAnalyzer {
            module,
            cache: HashMap::new(),
            visiting: HashSet::new(),
            depth: 0,
        }
    }

    /// Classify every function in the module and return the cache.
    pub fn analyze_all(mut self) -> HashMap<String, Purity> {
        for func in &self.module.functions {
            let purity = self.classify(&func.name);
            debug!(function = %func.name, ?purity, "purity classified");
        }
        self.cache
    }

    /// Classification of `name`, computing it on first request.
    pub fn classify(&mut self, name: &str) -> Purity {
        if let Some(p) = self.cache.get(name) {
            return *p;
        }
        if let Some(b) = builtin(name) {
            self.cache.insert(name.to_string(), b.purity);
            return b.purity;
        }
        if self.visiting.contains(name) {
            // Tentative: the caller's body is still being scanned. The
            // final value is cached when that scan completes.
            return Purity::Pure;
        }
        let Some(func) = self.module.function(name) else {
            // Unknown callee: could do anything.
            return Purity::Impure;
        };
        if self.depth >= MAX_ANALYSIS_DEPTH {
            self.cache.insert(name.to_string(), Purity::Impure);
            return Purity::Impure;
        }

        self.visiting.insert(name.to_string());
        self.depth += 1;
        let purity = self.classify_body(func);
        self.depth -= 1;
        self.visiting.remove(name);

        self.cache.insert(name.to_string(), purity);
        purity
    }

    fn classify_body(&mut self, func: &Function) -> Purity {
        for ins in &func.body {
            match ins.op {
                // Indirect memory access: impure unless proven to touch
                // only function-local memory, which this analysis does not
                // attempt.
                Op::Load | Op::Store => return Purity::Impure,
                // Self-modifying stores are side effects by definition.
                Op::SmcParam | Op::SmcStore => return Purity::Impure,
                Op::Call => {
                    let callee = ins.symbol.as_deref().unwrap_or("");
                    if self.classify(callee) == Purity::Impure {
                        return Purity::Impure;
                    }
                }
                // Arithmetic, bitwise, compares, named variable traffic and
                // control flow are all pure.
                _ => {}
            }
        }
        if func.params.is_empty() {
            Purity::Const
        } else {
            Purity::Pure
        }
    }
}
