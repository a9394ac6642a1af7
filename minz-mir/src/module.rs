//! Modules, functions and globals.

use core::fmt;

use crate::error::ModuleError;
use crate::instruction::{Instruction, VReg};
use crate::labels::LabelMap;
use crate::opcode::Op;
use crate::types::Type;
use crate::value::Value;

/// Calling convention tag on a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CallConv {
    /// Parameters are patched into instruction immediates (TRUE SMC).
    Smc,
    /// Parameters in machine registers.
    Register,
    /// Parameters on a stack frame.
    Stack,
    /// First few parameters in registers, the rest on the stack.
    Hybrid,
}

impl fmt::Display for CallConv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallConv::Smc => f.write_str("smc"),
            CallConv::Register => f.write_str("register"),
            CallConv::Stack => f.write_str("stack"),
            CallConv::Hybrid => f.write_str("hybrid"),
        }
    }
}

/// Purity classification of a function.
///
/// Ordered: `Impure < Pure < Const`. A caller can never be more pure than
/// any of its callees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Purity {
    /// Has (or may have) observable side effects.
    Impure,
    /// No side effects; equal arguments produce equal results.
    Pure,
    /// Pure with no parameters; the result is globally memoizable.
    Const,
}

impl Purity {
    /// Whether calls to a function of this purity may run at compile time.
    pub const fn is_executable(&self) -> bool {
        matches!(self, Purity::Pure | Purity::Const)
    }
}

/// Declared function parameter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Parameter type.
    pub ty: Type,
}

/// Storage assigned to a local by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LocalSlot {
    /// Held in a virtual register.
    Register(VReg),
    /// Spilled to a fixed memory offset.
    Memory(u16),
}

/// Entry in a function's local table.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Local {
    /// Local name.
    pub name: String,
    /// Local type.
    pub ty: Type,
    /// Whether the local is a declared parameter.
    pub is_param: bool,
    /// Allocated storage, once the backend has decided.
    #[cfg_attr(feature = "serde", serde(default))]
    pub slot: Option<LocalSlot>,
}

/// A MIR function.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Function {
    /// Unique name within the module.
    pub name: String,
    /// Declared parameters, in order.
    pub params: Vec<Param>,
    /// Return type; [`Type::Void`] when nothing is returned.
    pub ret: Type,
    /// Instruction sequence.
    pub body: Vec<Instruction>,
    /// Local table. The first N entries are the N declared parameters.
    pub locals: Vec<Local>,
    /// Calling convention, once chosen.
    #[cfg_attr(feature = "serde", serde(default))]
    pub convention: Option<CallConv>,
    /// Whether the SMC convention is permitted for this function.
    #[cfg_attr(feature = "serde", serde(default))]
    pub smc_enabled: bool,
    /// Purity level, filled in by the analyzer.
    #[cfg_attr(feature = "serde", serde(default))]
    pub purity: Option<Purity>,
    /// Inlining hint from the front-end.
    #[cfg_attr(feature = "serde", serde(default))]
    pub inline_hint: bool,
    /// Whether the function is an interrupt handler.
    #[cfg_attr(feature = "serde", serde(default))]
    pub interrupt_handler: bool,
    /// Whether the symbol is visible outside the module.
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_exported: bool,
    /// Whether the function's address escapes (taken as a value).
    #[cfg_attr(feature = "serde", serde(default))]
    pub address_taken: bool,
    /// Whether the function will be placed in ROM.
    #[cfg_attr(feature = "serde", serde(default))]
    pub in_rom: bool,
}

impl Function {
    /// New function; the local table is seeded from the parameters so the
    /// positional invariant holds from the start.
    pub fn new(name: impl Into<String>, params: Vec<Param>, ret: Type) -> Self {
        let locals = params
            .iter()
            .map(|p| Local {
                name: p.name.clone(),
                ty: p.ty.clone(),
                is_param: true,
                slot: None,
            })
            .collect();
        Function {
            name: name.into(),
            params,
            ret,
            body: Vec::new(),
            locals,
            convention: None,
            smc_enabled: true,
            purity: None,
            inline_hint: false,
            interrupt_handler: false,
            is_exported: false,
            address_taken: false,
            in_rom: false,
        }
    }

    /// Append an instruction.
    pub fn push(&mut self, ins: Instruction) {
        self.body.push(ins);
    }

    /// Declare a non-parameter local.
    pub fn add_local(&mut self, name: impl Into<String>, ty: Type) {
        self.locals.push(Local {
            name: name.into(),
            ty,
            is_param: false,
            slot: None,
        });
    }

    /// Look up a local by name.
    pub fn local(&self, name: &str) -> Option<&Local> {
        self.locals.iter().find(|l| l.name == name)
    }

    /// Whether the body contains a direct call to `callee`.
    pub fn calls(&self, callee: &str) -> bool {
        self.body
            .iter()
            .any(|i| i.op == Op::Call && i.symbol.as_deref() == Some(callee))
    }

    /// Names of every function this one calls directly.
    pub fn callees(&self) -> impl Iterator<Item = &str> {
        self.body
            .iter()
            .filter(|i| i.op == Op::Call)
            .filter_map(|i| i.symbol.as_deref())
    }
}

/// Module-level data definition.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Global {
    /// Symbol name.
    pub name: String,
    /// Data type.
    pub ty: Type,
    /// Optional initializer.
    #[cfg_attr(feature = "serde", serde(default))]
    pub init: Option<Value>,
    /// Fixed address, when placement is pinned.
    #[cfg_attr(feature = "serde", serde(default))]
    pub address: Option<u16>,
}

/// String-table entry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StringData {
    /// Label the data is emitted under.
    pub label: String,
    /// String contents.
    pub value: String,
}

/// The translation unit passed between pipeline stages.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Module {
    /// Module name, used in output headers.
    pub name: String,
    /// Functions, in definition order.
    pub functions: Vec<Function>,
    /// Global data definitions.
    #[cfg_attr(feature = "serde", serde(default))]
    pub globals: Vec<Global>,
    /// String table.
    #[cfg_attr(feature = "serde", serde(default))]
    pub strings: Vec<StringData>,
    /// Symbols declared external to the module.
    #[cfg_attr(feature = "serde", serde(default))]
    pub externs: Vec<String>,
}

impl Module {
    /// Empty module.
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Look up a function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Look up a function by name, mutably.
    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    /// Look up a global by name.
    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Whether `symbol` resolves inside or outside the module.
    pub fn resolves(&self, symbol: &str) -> bool {
        self.function(symbol).is_some()
            || self.global(symbol).is_some()
            || self.externs.iter().any(|e| e == symbol)
    }

    /// Check the module invariants that are hard compile errors:
    /// every referenced symbol resolves, and every jump targets a label
    /// defined in the same function.
    pub fn verify(&self) -> Result<(), ModuleError> {
        for func in &self.functions {
            let labels = LabelMap::build(func)?;
            for ins in &func.body {
                if ins.op.is_jump() {
                    let target = ins.label.as_deref().unwrap_or("");
                    if labels.resolve(target).is_none() {
                        return Err(ModuleError::UndefinedLabel {
                            function: func.name.clone(),
                            label: target.to_string(),
                        });
                    }
                }
                match ins.op {
                    Op::Call => {
                        let callee = ins.symbol.as_deref().unwrap_or("");
                        if !self.resolves(callee) {
                            return Err(ModuleError::UndefinedSymbol {
                                function: func.name.clone(),
                                symbol: callee.to_string(),
                            });
                        }
                    }
                    Op::LoadVar | Op::StoreVar => {
                        let name = ins.symbol.as_deref().unwrap_or("");
                        if func.local(name).is_none() && self.global(name).is_none() {
                            return Err(ModuleError::UndefinedSymbol {
                                function: func.name.clone(),
                                symbol: name.to_string(),
                            });
                        }
                    }
                    Op::LoadParam | Op::SmcParam | Op::SmcStore => {
                        let name = ins.symbol.as_deref().unwrap_or("");
                        if !func.params.iter().any(|p| p.name == name) {
                            return Err(ModuleError::UndefinedSymbol {
                                function: func.name.clone(),
                                symbol: name.to_string(),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Textual dump of the whole module, one function per section.
    pub fn dump(&self) -> String {
        use core::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "; module {}", self.name);
        for g in &self.globals {
            let _ = write!(out, "global {} : {}", g.name, g.ty);
            if let Some(init) = &g.init {
                let _ = write!(out, " = {init}");
            }
            if let Some(addr) = g.address {
                let _ = write!(out, " @ {addr:#06x}");
            }
            let _ = writeln!(out);
        }
        for s in &self.strings {
            let _ = writeln!(out, "string {} = {:?}", s.label, s.value);
        }
        for f in &self.functions {
            let _ = write!(out, "\nfn {}(", f.name);
            for (i, p) in f.params.iter().enumerate() {
                if i > 0 {
                    let _ = write!(out, ", ");
                }
                let _ = write!(out, "{}: {}", p.name, p.ty);
            }
            let _ = writeln!(out, ") -> {} {{", f.ret);
            for ins in &f.body {
                let _ = writeln!(out, "{ins}");
            }
            let _ = writeln!(out, "}}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Module {
        let mut m = Module::new("sample");
        let mut f = Function::new(
            "double",
            vec![Param {
                name: "x".into(),
                ty: Type::U8,
            }],
            Type::U8,
        );
        f.push(Instruction::load_param(VReg(1), "x"));
        f.push(Instruction::binary(Op::Add, VReg(2), VReg(1), VReg(1)));
        f.push(Instruction::ret(VReg(2)));
        m.functions.push(f);
        m
    }

    #[test]
    fn params_seed_locals() {
        let m = sample();
        let f = m.function("double").unwrap();
        assert_eq!(f.locals.len(), 1);
        assert!(f.locals[0].is_param);
        assert_eq!(f.locals[0].name, "x");
    }

    #[test]
    fn verify_accepts_wellformed() {
        assert!(sample().verify().is_ok());
    }

    #[test]
    fn verify_rejects_unknown_callee() {
        let mut m = sample();
        m.functions[0].body.push(Instruction::call(VReg(3), "missing", vec![]));
        assert!(matches!(
            m.verify(),
            Err(ModuleError::UndefinedSymbol { symbol, .. }) if symbol == "missing"
        ));
    }

    #[test]
    fn verify_rejects_undefined_jump() {
        let mut m = sample();
        m.functions[0].body.push(Instruction::jump("nowhere"));
        assert!(matches!(
            m.verify(),
            Err(ModuleError::UndefinedLabel { label, .. }) if label == "nowhere"
        ));
    }

    #[test]
    fn extern_symbols_resolve() {
        let mut m = sample();
        m.externs.push("rand".into());
        m.functions[0].body.push(Instruction::call(VReg(3), "rand", vec![]));
        assert!(m.verify().is_ok());
    }
}
