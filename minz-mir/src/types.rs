//! MIR type references.

use core::fmt;

/// Type of a MIR value.
///
/// Sizes below are the portable defaults; a backend may override them
/// through its toolkit size table (a 24-bit pointer target, for instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Type {
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 16-bit integer.
    I16,
    /// Boolean, stored as one byte.
    Bool,
    /// No value.
    Void,
    /// Pointer to a pointee type.
    Pointer(Box<Type>),
    /// Fixed-length array.
    Array(Box<Type>, u16),
    /// Structure with named fields.
    Struct(Vec<(String, Type)>),
}

impl Type {
    /// Scalar bit width, if the type is scalar.
    pub fn bits(&self) -> Option<u8> {
        match self {
            Type::U8 | Type::I8 | Type::Bool => Some(8),
            Type::U16 | Type::I16 | Type::Pointer(_) => Some(16),
            Type::Void | Type::Array(..) | Type::Struct(_) => None,
        }
    }

    /// Whether arithmetic on the type is signed.
    pub fn is_signed(&self) -> bool {
        matches!(self, Type::I8 | Type::I16)
    }

    /// Whether the type fits in a single byte.
    pub fn is_byte(&self) -> bool {
        self.bits() == Some(8)
    }

    /// Whether the type is a pointer.
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    /// Default byte size, before any backend override.
    pub fn default_size(&self) -> u16 {
        match self {
            Type::U8 | Type::I8 | Type::Bool => 1,
            Type::U16 | Type::I16 | Type::Pointer(_) => 2,
            Type::Void => 0,
            Type::Array(elem, n) => elem.default_size().saturating_mul(*n),
            Type::Struct(fields) => fields.iter().map(|(_, t)| t.default_size()).sum(),
        }
    }

    /// Wrap a raw integer to the declared width of the type.
    ///
    /// Unsigned types mask; signed types mask then sign-extend, so the
    /// result is the value the target machine would observe.
    pub fn wrap(&self, raw: i64) -> i64 {
        match self {
            Type::U8 => raw & 0xff,
            Type::I8 => (raw as u8) as i8 as i64,
            Type::U16 | Type::Pointer(_) => raw & 0xffff,
            Type::I16 => (raw as u16) as i16 as i64,
            Type::Bool => (raw != 0) as i64,
            Type::Void | Type::Array(..) | Type::Struct(_) => raw,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::U8 => f.write_str("u8"),
            Type::I8 => f.write_str("i8"),
            Type::U16 => f.write_str("u16"),
            Type::I16 => f.write_str("i16"),
            Type::Bool => f.write_str("bool"),
            Type::Void => f.write_str("void"),
            Type::Pointer(t) => write!(f, "*{t}"),
            Type::Array(t, n) => write!(f, "[{t}; {n}]"),
            Type::Struct(fields) => {
                f.write_str("struct {")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unsigned() {
        assert_eq!(Type::U8.wrap(256), 0);
        assert_eq!(Type::U8.wrap(300), 44);
        assert_eq!(Type::U16.wrap(0x1_0000), 0);
        assert_eq!(Type::U16.wrap(-1), 0xffff);
    }

    #[test]
    fn wrap_signed() {
        assert_eq!(Type::I8.wrap(128), -128);
        assert_eq!(Type::I8.wrap(-129), 127);
        assert_eq!(Type::I16.wrap(0x8000), -0x8000);
    }

    #[test]
    fn sizes() {
        assert_eq!(Type::Pointer(Box::new(Type::U8)).default_size(), 2);
        assert_eq!(Type::Array(Box::new(Type::U16), 4).default_size(), 8);
        let s = Type::Struct(vec![
            ("x".into(), Type::U8),
            ("y".into(), Type::U16),
        ]);
        assert_eq!(s.default_size(), 3);
    }
}
