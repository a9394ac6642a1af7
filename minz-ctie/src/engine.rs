//! CTIE orchestration: analyze, track, execute, rewrite.

use std::collections::HashMap;
use std::time::Duration;

use minz_mir::{CancelToken, Module, Purity, Value};
use tracing::{debug, info};

use crate::exec::{ExecLimits, Executor};
use crate::purity::PurityAnalyzer;
use crate::tracker::ConstTracker;

/// Size of a Z80 `CALL nn` instruction, used to estimate bytes saved by a
/// call replacement.
const Z80_CALL_BYTES: usize = 3;

/// Options controlling the CTIE sub-passes.
#[derive(Debug, Clone)]
pub struct CtieConfig {
    /// Replace const-known calls with their computed results.
    pub enable_execute: bool,
    /// Reserved: interface specialization. Accepted and ignored.
    pub enable_specialize: bool,
    /// Reserved: proof obligations. Accepted and ignored.
    pub enable_proof: bool,
    /// Reserved: derived instances. Accepted and ignored.
    pub enable_derive: bool,
    /// Gather statistics.
    pub enable_analysis: bool,
    /// Wall-clock cap per top-level compile-time call.
    pub max_execution_time: Duration,
    /// Reserved alongside `enable_specialize`.
    pub max_specializations: usize,
    /// Verbose reporting.
    pub debug: bool,
}

impl Default for CtieConfig {
    fn default() -> Self {
        CtieConfig {
            enable_execute: true,
            enable_specialize: false,
            enable_proof: false,
            enable_derive: false,
            enable_analysis: true,
            max_execution_time: Duration::from_millis(1000),
            max_specializations: 100,
            debug: false,
        }
    }
}

/// Accounting for one CTIE run over a module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CtieStats {
    /// Functions the purity analyzer classified.
    pub functions_analyzed: usize,
    /// Distinct call sites executed at compile time.
    pub functions_executed: usize,
    /// Values computed and substituted.
    pub values_computed: usize,
    /// Estimated code bytes eliminated (Z80 call-size estimate).
    pub bytes_eliminated: usize,
}

/// Drives purity analysis, constant tracking and compile-time execution,
/// then rewrites const-known call sites in place.
pub struct CtieEngine {
    config: CtieConfig,
    stats: CtieStats,
}

impl CtieEngine {
    /// Engine with the given options.
    pub fn new(config: CtieConfig) -> Self {
        CtieEngine {
            config,
            stats: CtieStats::default(),
        }
    }

    /// Engine with default options.
    pub fn with_defaults() -> Self {
        Self::new(CtieConfig::default())
    }

    /// Statistics gathered so far.
    pub fn stats(&self) -> &CtieStats {
        &self.stats
    }

    /// Run CTIE over `module`, rewriting call sites in place.
    ///
    /// Interpreter failures are recoverable and leave the call intact; the
    /// only early exit is cancellation, checked per function.
    pub fn run(&mut self, module: &mut Module, cancel: &CancelToken) -> CtieStats {
        // Phase 1: whole-module purity analysis.
        let purity = PurityAnalyzer::new(module).analyze_all();
        if self.config.enable_analysis {
            self.stats.functions_analyzed = module.functions.len();
        }
        for func in &mut module.functions {
            func.purity = purity.get(&func.name).copied();
        }

        if !self.config.enable_execute {
            return self.stats;
        }

        // Phases 2 and 3, per function: track constants, execute const
        // call sites, substitute results. The memo cache survives across
        // functions but not across engine runs.
        let mut memo = HashMap::new();
        for i in 0..module.functions.len() {
            if cancel.is_cancelled() {
                debug!("ctie cancelled");
                break;
            }

            let sites = {
                let func = &module.functions[i];
                ConstTracker::new().scan(module, func)
            };

            let mut replacements: Vec<(usize, Value, String)> = Vec::new();
            {
                let limits = ExecLimits {
                    max_time: self.config.max_execution_time,
                    ..ExecLimits::default()
                };
                let mut exec =
                    Executor::with_limits(module, &purity, limits).with_memo(memo);
                for site in sites.iter().filter(|s| s.is_const) {
                    let callee_purity =
                        purity.get(&site.callee).copied().unwrap_or(Purity::Impure);
                    if !callee_purity.is_executable() {
                        continue;
                    }
                    self.stats.functions_executed += 1;
                    match exec.call(&site.callee, &site.args) {
                        Ok(Some(value)) => {
                            debug!(
                                caller = %site.function,
                                callee = %site.callee,
                                %value,
                                "call computed at compile time"
                            );
                            replacements.push((site.index, value, site.callee.clone()));
                        }
                        // A void result leaves nothing to load; skip.
                        Ok(None) => {}
                        Err(err) => {
                            debug!(
                                caller = %site.function,
                                callee = %site.callee,
                                %err,
                                "compile-time execution declined"
                            );
                        }
                    }
                }
                memo = exec.into_memo();
            }

            let func = &mut module.functions[i];
            for (index, value, callee) in replacements {
                let comment = format!("was call {callee}, computed at compile time");
                func.body[index].replace_with_const(&value, comment);
                self.stats.values_computed += 1;
                self.stats.bytes_eliminated += Z80_CALL_BYTES;
            }
        }

        if self.config.debug && self.stats.values_computed > 0 {
            info!(
                "saved {} bytes through compile-time execution",
                self.stats.bytes_eliminated
            );
        }
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minz_mir::{Function, Instruction, Op, Param, Type, VReg};

    fn square_and_main() -> Module {
        let mut m = Module::new("t");

        let mut sq = Function::new(
            "square",
            vec![Param {
                name: "x".into(),
                ty: Type::U8,
            }],
            Type::U16,
        );
        sq.push(Instruction::load_param(VReg(1), "x"));
        sq.push(Instruction::load_param(VReg(2), "x"));
        sq.push(Instruction::binary(Op::Mul, VReg(3), VReg(1), VReg(2)));
        sq.push(Instruction::ret(VReg(3)));
        m.functions.push(sq);

        let mut main = Function::new("main", vec![], Type::U16);
        main.push(Instruction::load_const(VReg(1), 12, Type::U8));
        main.push(Instruction::call(VReg(2), "square", vec![VReg(1)]));
        main.push(Instruction::ret(VReg(2)));
        m.functions.push(main);

        m
    }

    #[test]
    fn replaces_const_call_in_place() {
        let mut m = square_and_main();
        let stats = CtieEngine::with_defaults().run(&mut m, &CancelToken::new());

        let main = m.function("main").unwrap();
        assert_eq!(main.body.len(), 3);
        let replaced = &main.body[1];
        assert_eq!(replaced.op, Op::LoadConst);
        assert_eq!(replaced.imm, 144);
        assert_eq!(replaced.ty, Some(Type::U16));
        assert_eq!(replaced.dest, VReg(2));
        assert!(replaced.symbol.is_none());
        assert!(replaced.args.is_empty());
        assert!(replaced
            .comment
            .as_deref()
            .is_some_and(|c| c.contains("square")));

        assert_eq!(stats.values_computed, 1);
        assert_eq!(stats.bytes_eliminated, 3);
        assert_eq!(stats.functions_analyzed, 2);
    }

    #[test]
    fn impure_call_is_left_intact() {
        let mut m = Module::new("t");
        m.externs.push("rand".into());
        let mut main = Function::new("main", vec![], Type::U8);
        main.push(Instruction::call(VReg(1), "rand", vec![]));
        main.push(Instruction::ret(VReg(1)));
        m.functions.push(main);

        let stats = CtieEngine::with_defaults().run(&mut m, &CancelToken::new());
        let main = m.function("main").unwrap();
        assert_eq!(main.body[0].op, Op::Call);
        assert_eq!(main.body[0].symbol.as_deref(), Some("rand"));
        assert_eq!(stats.values_computed, 0);
    }

    #[test]
    fn failed_execution_leaves_the_call() {
        // div(8, 0) is a const call site whose evaluation fails.
        let mut m = Module::new("t");
        let mut div = Function::new(
            "div",
            vec![
                Param { name: "a".into(), ty: Type::U8 },
                Param { name: "b".into(), ty: Type::U8 },
            ],
            Type::U8,
        );
        div.push(Instruction::load_param(VReg(1), "a"));
        div.push(Instruction::load_param(VReg(2), "b"));
        div.push(Instruction::binary(Op::Div, VReg(3), VReg(1), VReg(2)));
        div.push(Instruction::ret(VReg(3)));
        m.functions.push(div);

        let mut main = Function::new("main", vec![], Type::U8);
        main.push(Instruction::load_const(VReg(1), 8, Type::U8));
        main.push(Instruction::load_const(VReg(2), 0, Type::U8));
        main.push(Instruction::call(VReg(3), "div", vec![VReg(1), VReg(2)]));
        main.push(Instruction::ret(VReg(3)));
        m.functions.push(main);

        CtieEngine::with_defaults().run(&mut m, &CancelToken::new());
        assert_eq!(m.function("main").unwrap().body[2].op, Op::Call);
    }

    #[test]
    fn execute_can_be_disabled() {
        let mut m = square_and_main();
        let config = CtieConfig {
            enable_execute: false,
            ..CtieConfig::default()
        };
        CtieEngine::new(config).run(&mut m, &CancelToken::new());
        assert_eq!(m.function("main").unwrap().body[1].op, Op::Call);
        // Analysis still ran and recorded purity.
        assert_eq!(m.function("square").unwrap().purity, Some(Purity::Pure));
    }

    #[test]
    fn cancellation_discards_remaining_work() {
        let mut m = square_and_main();
        let cancel = CancelToken::new();
        cancel.cancel();
        let stats = CtieEngine::with_defaults().run(&mut m, &cancel);
        assert_eq!(stats.values_computed, 0);
        assert_eq!(m.function("main").unwrap().body[1].op, Op::Call);
    }
}
