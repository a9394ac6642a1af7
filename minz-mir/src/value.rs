//! Runtime values for compile-time execution.

use core::fmt;

use crate::opcode::Op;
use crate::types::Type;

/// Polymorphic value manipulated by the compile-time interpreter and the
/// constant tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Integer with its declared type.
    Int {
        /// Width-normalized value (see [`Type::wrap`]).
        value: i64,
        /// Declared type of the value.
        ty: Type,
    },
    /// Boolean.
    Bool(bool),
    /// Array of values with a common element type.
    Array {
        /// Element values, in index order.
        elems: Vec<Value>,
        /// Element type.
        elem_ty: Type,
    },
}

/// Failure while evaluating an operation on [`Value`]s.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// Division or remainder with a zero divisor.
    #[error("division by zero")]
    DivideByZero,
    /// The operand variants don't support the operation.
    #[error("type mismatch in constant evaluation")]
    TypeMismatch,
    /// The opcode has no constant-evaluation rule.
    #[error("opcode `{0}` is not constant-evaluable")]
    Unsupported(Op),
}

impl Value {
    /// Integer value, wrapped to the declared type's width on construction.
    pub fn int(raw: i64, ty: Type) -> Self {
        let value = ty.wrap(raw);
        Value::Int { value, ty }
    }

    /// Signed integer view of the value. Booleans are 0 or 1; arrays have
    /// no integer view and render as their length.
    pub fn to_int(&self) -> i64 {
        match self {
            Value::Int { value, .. } => *value,
            Value::Bool(b) => *b as i64,
            Value::Array { elems, .. } => elems.len() as i64,
        }
    }

    /// Boolean view of the value: non-zero integers are true, arrays are
    /// true when non-empty.
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Int { value, .. } => *value != 0,
            Value::Bool(b) => *b,
            Value::Array { elems, .. } => !elems.is_empty(),
        }
    }

    /// Declared type of the value.
    pub fn ty(&self) -> Type {
        match self {
            Value::Int { ty, .. } => ty.clone(),
            Value::Bool(_) => Type::Bool,
            Value::Array { elems, elem_ty } => {
                Type::Array(Box::new(elem_ty.clone()), elems.len() as u16)
            }
        }
    }

    /// Type that governs arithmetic when this value is the left operand.
    /// Booleans promote to `u8`; arrays don't participate in arithmetic.
    fn arith_ty(&self) -> Result<Type, EvalError> {
        match self {
            Value::Int { ty, .. } => Ok(ty.clone()),
            Value::Bool(_) => Ok(Type::U8),
            Value::Array { .. } => Err(EvalError::TypeMismatch),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int { value, ty } => write!(f, "{value}:{ty}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Array { elems, .. } => {
                f.write_str("[")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Evaluate a binary MIR operation on two constant values.
///
/// The result takes the type of the left operand and wraps to its width.
/// Comparisons yield [`Value::Bool`]. Shared by the constant tracker, the
/// interpreter and the peephole constant folder so all three agree on
/// overflow semantics.
pub fn eval_binary(op: Op, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    let a = lhs.to_int();
    let b = rhs.to_int();

    if op.is_comparison() {
        let res = match op {
            Op::Eq => a == b,
            Op::Ne => a != b,
            Op::Lt => a < b,
            Op::Le => a <= b,
            Op::Gt => a > b,
            Op::Ge => a >= b,
            _ => unreachable!(),
        };
        return Ok(Value::Bool(res));
    }

    let ty = lhs.arith_ty()?;
    let raw = match op {
        Op::Add => a.wrapping_add(b),
        Op::Sub => a.wrapping_sub(b),
        Op::Mul => a.wrapping_mul(b),
        Op::Div => {
            if b == 0 {
                return Err(EvalError::DivideByZero);
            }
            // Truncation toward zero; operands are already sign-normalized.
            a.wrapping_div(b)
        }
        Op::Mod => {
            if b == 0 {
                return Err(EvalError::DivideByZero);
            }
            a.wrapping_rem(b)
        }
        Op::And => a & b,
        Op::Or => a | b,
        Op::Xor => a ^ b,
        Op::Shl => a.wrapping_shl(b.clamp(0, 63) as u32),
        // Logical for unsigned, arithmetic for signed: the stored value is
        // sign-normalized, so the native shift already does the right thing.
        Op::Shr => a.wrapping_shr(b.clamp(0, 63) as u32),
        other => return Err(EvalError::Unsupported(other)),
    };

    Ok(Value::int(raw, ty))
}

/// Evaluate a unary MIR operation on a constant value.
pub fn eval_unary(op: Op, operand: &Value) -> Result<Value, EvalError> {
    match op {
        Op::Neg => {
            let ty = operand.arith_ty()?;
            Ok(Value::int(0i64.wrapping_sub(operand.to_int()), ty))
        }
        Op::Not => match operand {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            Value::Int { value, ty } => Ok(Value::int(!value, ty.clone())),
            Value::Array { .. } => Err(EvalError::TypeMismatch),
        },
        other => Err(EvalError::Unsupported(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u8v(v: i64) -> Value {
        Value::int(v, Type::U8)
    }

    fn i8v(v: i64) -> Value {
        Value::int(v, Type::I8)
    }

    #[test]
    fn add_wraps_at_declared_width() {
        let r = eval_binary(Op::Add, &u8v(200), &u8v(100)).unwrap();
        assert_eq!(r, u8v(44));
    }

    #[test]
    fn left_operand_type_wins() {
        let r = eval_binary(Op::Mul, &u8v(20), &Value::int(20, Type::U16)).unwrap();
        assert_eq!(r.ty(), Type::U8);
        assert_eq!(r.to_int(), (400 % 256) as i64);
    }

    #[test]
    fn signed_division_truncates_toward_zero() {
        let r = eval_binary(Op::Div, &i8v(-7), &i8v(2)).unwrap();
        assert_eq!(r.to_int(), -3);
        let r = eval_binary(Op::Mod, &i8v(-7), &i8v(2)).unwrap();
        assert_eq!(r.to_int(), -1);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(
            eval_binary(Op::Div, &u8v(1), &u8v(0)),
            Err(EvalError::DivideByZero)
        );
        assert_eq!(
            eval_binary(Op::Mod, &u8v(1), &u8v(0)),
            Err(EvalError::DivideByZero)
        );
    }

    #[test]
    fn signed_shift_is_arithmetic() {
        let r = eval_binary(Op::Shr, &i8v(-8), &u8v(1)).unwrap();
        assert_eq!(r.to_int(), -4);
        let r = eval_binary(Op::Shr, &u8v(0x80), &u8v(1)).unwrap();
        assert_eq!(r.to_int(), 0x40);
    }

    #[test]
    fn comparisons_are_boolean() {
        assert_eq!(eval_binary(Op::Lt, &i8v(-1), &i8v(1)), Ok(Value::Bool(true)));
        assert_eq!(eval_binary(Op::Ge, &u8v(3), &u8v(3)), Ok(Value::Bool(true)));
    }

    #[test]
    fn negation_wraps() {
        let r = eval_unary(Op::Neg, &i8v(-128)).unwrap();
        assert_eq!(r.to_int(), -128);
        let r = eval_unary(Op::Not, &Value::Bool(false)).unwrap();
        assert_eq!(r, Value::Bool(true));
    }
}
