//! Opcodes and instruction modifiers
//!
//! The opcode set is closed. Every classification query is an exhaustive
//! match, so adding an opcode forces every query to take a position on it.

/// The closed set of IR opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    Add,
    And,
    Ashr,
    Atom,
    Bar,
    Bitcast,
    Bra,
    Call,
    Fdiv,
    Fmul,
    Fpext,
    Fptosi,
    Fptoui,
    Fptrunc,
    Frem,
    Launch,
    Ld,
    Lshr,
    Membar,
    Mul,
    Or,
    Ret,
    Setp,
    Sext,
    Sdiv,
    Shl,
    Sitofp,
    Srem,
    St,
    Sub,
    Trunc,
    Udiv,
    Uitofp,
    Urem,
    Xor,
    Zext,

    // IR analysis forms
    Phi,
    Psi,

    /// Sentinel; no instruction can carry it
    Invalid,
}

impl Opcode {
    /// Every opcode except the invalid sentinel
    pub const ALL: [Opcode; 38] = [
        Opcode::Add,
        Opcode::And,
        Opcode::Ashr,
        Opcode::Atom,
        Opcode::Bar,
        Opcode::Bitcast,
        Opcode::Bra,
        Opcode::Call,
        Opcode::Fdiv,
        Opcode::Fmul,
        Opcode::Fpext,
        Opcode::Fptosi,
        Opcode::Fptoui,
        Opcode::Fptrunc,
        Opcode::Frem,
        Opcode::Launch,
        Opcode::Ld,
        Opcode::Lshr,
        Opcode::Membar,
        Opcode::Mul,
        Opcode::Or,
        Opcode::Ret,
        Opcode::Setp,
        Opcode::Sext,
        Opcode::Sdiv,
        Opcode::Shl,
        Opcode::Sitofp,
        Opcode::Srem,
        Opcode::St,
        Opcode::Sub,
        Opcode::Trunc,
        Opcode::Udiv,
        Opcode::Uitofp,
        Opcode::Urem,
        Opcode::Xor,
        Opcode::Zext,
        Opcode::Phi,
        Opcode::Psi,
    ];

    /// Canonical mnemonic
    pub fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::And => "and",
            Self::Ashr => "ashr",
            Self::Atom => "atom",
            Self::Bar => "bar",
            Self::Bitcast => "bitcast",
            Self::Bra => "bra",
            Self::Call => "call",
            Self::Fdiv => "fdiv",
            Self::Fmul => "fmul",
            Self::Fpext => "fpext",
            Self::Fptosi => "fptosi",
            Self::Fptoui => "fptoui",
            Self::Fptrunc => "fptrunc",
            Self::Frem => "frem",
            Self::Launch => "launch",
            Self::Ld => "ld",
            Self::Lshr => "lshr",
            Self::Membar => "membar",
            Self::Mul => "mul",
            Self::Or => "or",
            Self::Ret => "ret",
            Self::Setp => "setp",
            Self::Sext => "sext",
            Self::Sdiv => "sdiv",
            Self::Shl => "shl",
            Self::Sitofp => "sitofp",
            Self::Srem => "srem",
            Self::St => "st",
            Self::Sub => "sub",
            Self::Trunc => "trunc",
            Self::Udiv => "udiv",
            Self::Uitofp => "uitofp",
            Self::Urem => "urem",
            Self::Xor => "xor",
            Self::Zext => "zext",
            Self::Phi => "phi",
            Self::Psi => "psi",
            Self::Invalid => "invalid",
        }
    }

    /// Look an opcode up by mnemonic
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    /// Reads memory
    pub fn is_load(self) -> bool {
        matches!(self, Self::Ld | Self::Atom)
    }

    /// Writes memory
    pub fn is_store(self) -> bool {
        matches!(self, Self::St | Self::Atom)
    }

    /// Transfers control (may end a basic block)
    pub fn is_branch(self) -> bool {
        matches!(self, Self::Bra | Self::Call | Self::Ret)
    }

    pub fn is_call(self) -> bool {
        matches!(self, Self::Call)
    }

    pub fn is_return(self) -> bool {
        matches!(self, Self::Ret)
    }

    /// Orders surrounding instructions (nothing may be scheduled across it)
    pub fn is_barrier(self) -> bool {
        matches!(self, Self::Bar | Self::Membar)
    }

    /// `d = op a`
    pub fn is_unary(self) -> bool {
        match self {
            Self::Bitcast
            | Self::Fpext
            | Self::Fptosi
            | Self::Fptoui
            | Self::Fptrunc
            | Self::Ld
            | Self::Sext
            | Self::Sitofp
            | Self::Trunc
            | Self::Uitofp
            | Self::Zext => true,

            Self::Add
            | Self::And
            | Self::Ashr
            | Self::Atom
            | Self::Bar
            | Self::Bra
            | Self::Call
            | Self::Fdiv
            | Self::Fmul
            | Self::Frem
            | Self::Launch
            | Self::Lshr
            | Self::Membar
            | Self::Mul
            | Self::Or
            | Self::Ret
            | Self::Setp
            | Self::Sdiv
            | Self::Shl
            | Self::Srem
            | Self::St
            | Self::Sub
            | Self::Udiv
            | Self::Urem
            | Self::Xor
            | Self::Phi
            | Self::Psi
            | Self::Invalid => false,
        }
    }

    /// `d = a op b`
    pub fn is_binary(self) -> bool {
        match self {
            Self::Add
            | Self::And
            | Self::Ashr
            | Self::Atom
            | Self::Fdiv
            | Self::Fmul
            | Self::Frem
            | Self::Lshr
            | Self::Mul
            | Self::Or
            | Self::Setp
            | Self::Sdiv
            | Self::Shl
            | Self::Srem
            | Self::Sub
            | Self::Udiv
            | Self::Urem
            | Self::Xor => true,

            Self::Bar
            | Self::Bitcast
            | Self::Bra
            | Self::Call
            | Self::Fpext
            | Self::Fptosi
            | Self::Fptoui
            | Self::Fptrunc
            | Self::Launch
            | Self::Ld
            | Self::Membar
            | Self::Ret
            | Self::Sext
            | Self::Sitofp
            | Self::St
            | Self::Trunc
            | Self::Uitofp
            | Self::Zext
            | Self::Phi
            | Self::Psi
            | Self::Invalid => false,
        }
    }

    /// Only meaningful while the IR is in SSA form
    pub fn is_ssa_only(self) -> bool {
        matches!(self, Self::Phi | Self::Psi)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Branch modifier for `Bra` and `Call`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchModifier {
    /// Every thread of the warp takes the same path
    Uniform,
    /// Threads may diverge to different targets
    Multitarget,
}

impl BranchModifier {
    pub fn name(self) -> &'static str {
        match self {
            BranchModifier::Uniform => "uni",
            BranchModifier::Multitarget => "multi",
        }
    }
}

/// Scope a `Membar` orders memory operations at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MembarLevel {
    Thread,
    Warp,
    Cta,
    Kernel,
}

impl MembarLevel {
    pub fn name(self) -> &'static str {
        match self {
            MembarLevel::Thread => "thread",
            MembarLevel::Warp => "warp",
            MembarLevel::Cta => "cta",
            MembarLevel::Kernel => "kernel",
        }
    }
}

/// Read-modify-write operation performed by `Atom`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicOperation {
    And,
    Or,
    Xor,
    Cas,
    Exch,
    Add,
    Inc,
    Dec,
    Min,
    Max,
}

impl AtomicOperation {
    pub fn name(self) -> &'static str {
        match self {
            AtomicOperation::And => "and",
            AtomicOperation::Or => "or",
            AtomicOperation::Xor => "xor",
            AtomicOperation::Cas => "cas",
            AtomicOperation::Exch => "exch",
            AtomicOperation::Add => "add",
            AtomicOperation::Inc => "inc",
            AtomicOperation::Dec => "dec",
            AtomicOperation::Min => "min",
            AtomicOperation::Max => "max",
        }
    }
}

/// Comparison performed by `Setp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    OrderedEqual,
    OrderedNotEqual,
    OrderedLessThan,
    OrderedLessOrEqual,
    OrderedGreaterThan,
    OrderedGreaterOrEqual,
    UnorderedEqual,
    UnorderedNotEqual,
    UnorderedLessThan,
    UnorderedLessOrEqual,
    UnorderedGreaterThan,
    UnorderedGreaterOrEqual,
    IsANumber,
    NotANumber,
}

impl Comparison {
    pub fn name(self) -> &'static str {
        match self {
            Comparison::OrderedEqual => "oeq",
            Comparison::OrderedNotEqual => "one",
            Comparison::OrderedLessThan => "olt",
            Comparison::OrderedLessOrEqual => "ole",
            Comparison::OrderedGreaterThan => "ogt",
            Comparison::OrderedGreaterOrEqual => "oge",
            Comparison::UnorderedEqual => "ueq",
            Comparison::UnorderedNotEqual => "une",
            Comparison::UnorderedLessThan => "ult",
            Comparison::UnorderedLessOrEqual => "ule",
            Comparison::UnorderedGreaterThan => "ugt",
            Comparison::UnorderedGreaterOrEqual => "uge",
            Comparison::IsANumber => "num",
            Comparison::NotANumber => "nan",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_names_roundtrip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_name(op.name()), Some(op));
        }
        assert_eq!(Opcode::from_name("invalid"), None);
        assert_eq!(Opcode::from_name("mov"), None);
    }

    #[test]
    fn test_unary_binary_are_exclusive() {
        for op in Opcode::ALL {
            assert!(!(op.is_unary() && op.is_binary()), "{} is both", op);
        }
        assert!(!Opcode::Bra.is_unary() && !Opcode::Bra.is_binary());
        assert!(!Opcode::Membar.is_unary() && !Opcode::Membar.is_binary());
        assert!(!Opcode::St.is_unary() && !Opcode::St.is_binary());
        assert!(Opcode::Ld.is_unary());
        assert!(Opcode::Setp.is_binary());
    }

    #[test]
    fn test_memory_classification() {
        assert!(Opcode::Ld.is_load() && !Opcode::Ld.is_store());
        assert!(Opcode::St.is_store() && !Opcode::St.is_load());
        assert!(Opcode::Atom.is_load() && Opcode::Atom.is_store());
        assert!(!Opcode::Add.is_load() && !Opcode::Add.is_store());
    }

    #[test]
    fn test_branch_classification() {
        let branches: Vec<Opcode> = Opcode::ALL.iter().copied().filter(|o| o.is_branch()).collect();
        assert_eq!(branches, vec![Opcode::Bra, Opcode::Call, Opcode::Ret]);
        assert!(Opcode::Call.is_call());
        assert!(Opcode::Ret.is_return());
        assert!(Opcode::Membar.is_barrier() && Opcode::Bar.is_barrier());
    }

    #[test]
    fn test_membar_levels_are_ordered() {
        assert!(MembarLevel::Thread < MembarLevel::Warp);
        assert!(MembarLevel::Warp < MembarLevel::Cta);
        assert!(MembarLevel::Cta < MembarLevel::Kernel);
    }
}
