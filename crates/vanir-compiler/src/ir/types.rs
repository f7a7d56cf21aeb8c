//! IR type system
//!
//! A small closed set of scalar types. Aggregates only exist as global
//! initializers (see `Constant`).

/// IR value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// Predicate (one bit)
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Address in the substrate's 64-bit address space
    Pointer,
}

impl Type {
    /// Storage size in bytes
    pub fn bytes(&self) -> usize {
        match self {
            Type::I1 | Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 | Type::F32 => 4,
            Type::I64 | Type::F64 | Type::Pointer => 8,
        }
    }

    /// Whether values of this type live in predicate registers
    pub fn is_predicate(&self) -> bool {
        matches!(self, Type::I1)
    }

    /// Whether this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::I1 => write!(f, "i1"),
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Pointer => write!(f, "ptr"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_sizes() {
        assert_eq!(Type::I1.bytes(), 1);
        assert_eq!(Type::I16.bytes(), 2);
        assert_eq!(Type::F32.bytes(), 4);
        assert_eq!(Type::Pointer.bytes(), 8);
    }

    #[test]
    fn test_type_display() {
        assert_eq!(Type::I32.to_string(), "i32");
        assert_eq!(Type::Pointer.to_string(), "ptr");
    }
}
