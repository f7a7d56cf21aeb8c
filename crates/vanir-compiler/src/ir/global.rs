//! Global variables
//!
//! Globals are named memory areas addressed through `Operand::Address`.
//! Lowering passes add their own (spill areas, link-register save slots).

use super::types::Type;

/// Symbol visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Linkage {
    #[default]
    External,
    Internal,
}

/// Initial contents of a global
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Integer { value: i64, ty: Type },
    Float { value: f64, ty: Type },
    Array(Vec<Constant>),
    Bytes(Vec<u8>),
    /// `n` zero bytes
    Zero(usize),
}

impl Constant {
    /// Size in bytes
    pub fn bytes(&self) -> usize {
        match self {
            Constant::Integer { ty, .. } | Constant::Float { ty, .. } => ty.bytes(),
            Constant::Array(elements) => elements.iter().map(Constant::bytes).sum(),
            Constant::Bytes(bytes) => bytes.len(),
            Constant::Zero(n) => *n,
        }
    }
}

/// A global variable
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub linkage: Linkage,
    /// Element type (also the size when there is no initializer)
    pub ty: Type,
    pub initializer: Option<Constant>,
}

impl Global {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Global {
            name: name.into(),
            linkage: Linkage::External,
            ty,
            initializer: None,
        }
    }

    /// Internal zero-filled area of `bytes` bytes
    pub fn zeroed(name: impl Into<String>, bytes: usize) -> Self {
        Global {
            name: name.into(),
            linkage: Linkage::Internal,
            ty: Type::I8,
            initializer: Some(Constant::Zero(bytes)),
        }
    }

    /// Storage size in bytes
    pub fn bytes(&self) -> usize {
        self.initializer
            .as_ref()
            .map(Constant::bytes)
            .unwrap_or_else(|| self.ty.bytes())
    }
}

impl std::fmt::Display for Global {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let linkage = match self.linkage {
            Linkage::External => "external",
            Linkage::Internal => "internal",
        };
        write!(f, "global {} @{}: {} ({} bytes)", linkage, self.name, self.ty, self.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_size_from_type() {
        assert_eq!(Global::new("counter", Type::I64).bytes(), 8);
    }

    #[test]
    fn test_global_size_from_initializer() {
        let mut table = Global::new("table", Type::I32);
        table.initializer = Some(Constant::Array(vec![
            Constant::Integer {
                value: 1,
                ty: Type::I32,
            },
            Constant::Float {
                value: 2.0,
                ty: Type::F64,
            },
            Constant::Bytes(vec![0, 1, 2]),
        ]));
        assert_eq!(table.bytes(), 4 + 8 + 3);
        assert_eq!(Global::zeroed("k.spill", 24).bytes(), 24);
    }

    #[test]
    fn test_global_display() {
        assert_eq!(
            Global::zeroed("k.spill", 16).to_string(),
            "global internal @k.spill: i8 (16 bytes)"
        );
    }
}
