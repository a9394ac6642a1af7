//! Built-in function table.
//!
//! Standard functions the front-end may reference without a module-level
//! definition. The table seeds the purity analyzer and gives the
//! interpreter direct evaluation for the pure entries.

use minz_mir::{Purity, Value};

use crate::error::ExecError;

/// A built-in entry: purity class, declared arity, and (for the pure ones)
/// a direct evaluator.
pub(crate) struct Builtin {
    pub name: &'static str,
    pub purity: Purity,
    pub arity: usize,
    pub eval: Option<fn(&[Value]) -> Result<Value, ExecError>>,
}

fn eval_abs(args: &[Value]) -> Result<Value, ExecError> {
    let v = args[0].to_int();
    Ok(Value::int(v.wrapping_abs(), args[0].ty()))
}

fn eval_min(args: &[Value]) -> Result<Value, ExecError> {
    let (a, b) = (args[0].to_int(), args[1].to_int());
    Ok(Value::int(a.min(b), args[0].ty()))
}

fn eval_max(args: &[Value]) -> Result<Value, ExecError> {
    let (a, b) = (args[0].to_int(), args[1].to_int());
    Ok(Value::int(a.max(b), args[0].ty()))
}

pub(crate) const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "abs",
        purity: Purity::Pure,
        arity: 1,
        eval: Some(eval_abs),
    },
    Builtin {
        name: "min",
        purity: Purity::Pure,
        arity: 2,
        eval: Some(eval_min),
    },
    Builtin {
        name: "max",
        purity: Purity::Pure,
        arity: 2,
        eval: Some(eval_max),
    },
    Builtin {
        name: "print",
        purity: Purity::Impure,
        arity: 1,
        eval: None,
    },
    Builtin {
        name: "println",
        purity: Purity::Impure,
        arity: 1,
        eval: None,
    },
    Builtin {
        name: "input",
        purity: Purity::Impure,
        arity: 0,
        eval: None,
    },
    Builtin {
        name: "random",
        purity: Purity::Impure,
        arity: 0,
        eval: None,
    },
    Builtin {
        name: "rand",
        purity: Purity::Impure,
        arity: 0,
        eval: None,
    },
    Builtin {
        name: "malloc",
        purity: Purity::Impure,
        arity: 1,
        eval: None,
    },
    Builtin {
        name: "free",
        purity: Purity::Impure,
        arity: 1,
        eval: None,
    },
];

/// Look up a built-in by name.
pub(crate) fn builtin(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}
