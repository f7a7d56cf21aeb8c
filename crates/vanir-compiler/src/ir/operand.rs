//! Operands
//!
//! Operands are owned values. An instruction slot owns the operand placed
//! into it; setters move the new operand in and hand back whatever the slot
//! held before, so releasing an operand is just keeping the returned value.

use super::block::BasicBlockId;
use super::types::Type;

/// Virtual register (unbounded, assigned by the owning function)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualRegister(pub u32);

impl std::fmt::Display for VirtualRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%r{}", self.0)
    }
}

/// Register file a physical register belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterClass {
    General,
    Predicate,
    /// Return-address register written by calls
    Link,
}

impl RegisterClass {
    /// Register class used to hold values of a type
    pub fn for_type(ty: Type) -> Self {
        if ty.is_predicate() {
            RegisterClass::Predicate
        } else {
            RegisterClass::General
        }
    }
}

/// Physical register of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysicalRegister {
    pub class: RegisterClass,
    pub index: u16,
}

impl PhysicalRegister {
    pub fn general(index: u16) -> Self {
        PhysicalRegister {
            class: RegisterClass::General,
            index,
        }
    }

    pub fn predicate(index: u16) -> Self {
        PhysicalRegister {
            class: RegisterClass::Predicate,
            index,
        }
    }

    /// The single link register
    pub fn link() -> Self {
        PhysicalRegister {
            class: RegisterClass::Link,
            index: 0,
        }
    }
}

impl std::fmt::Display for PhysicalRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.class {
            RegisterClass::General => write!(f, "$r{}", self.index),
            RegisterClass::Predicate => write!(f, "$p{}", self.index),
            RegisterClass::Link => write!(f, "$lr"),
        }
    }
}

/// A register reference, virtual before allocation and physical after
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    Virtual(VirtualRegister),
    Physical(PhysicalRegister),
}

impl Register {
    pub fn as_virtual(&self) -> Option<VirtualRegister> {
        match self {
            Register::Virtual(v) => Some(*v),
            Register::Physical(_) => None,
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, Register::Virtual(_))
    }
}

impl From<VirtualRegister> for Register {
    fn from(v: VirtualRegister) -> Self {
        Register::Virtual(v)
    }
}

impl From<PhysicalRegister> for Register {
    fn from(p: PhysicalRegister) -> Self {
        Register::Physical(p)
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Register::Virtual(v) => write!(f, "{}", v),
            Register::Physical(p) => write!(f, "{}", p),
        }
    }
}

/// A typed register operand
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegisterOperand {
    pub reg: Register,
    pub ty: Type,
}

impl RegisterOperand {
    pub fn new(reg: impl Into<Register>, ty: Type) -> Self {
        RegisterOperand {
            reg: reg.into(),
            ty,
        }
    }
}

/// How a predicate operand gates execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateCondition {
    /// Always execute (no register)
    Always,
    /// Never execute (no register)
    Never,
    /// Execute when the register is set
    True,
    /// Execute when the register is clear
    Inverse,
}

/// A predicate operand, used for guards and Psi selectors
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PredicateOperand {
    pub reg: Option<Register>,
    pub condition: PredicateCondition,
}

impl PredicateOperand {
    pub fn always() -> Self {
        PredicateOperand {
            reg: None,
            condition: PredicateCondition::Always,
        }
    }

    pub fn never() -> Self {
        PredicateOperand {
            reg: None,
            condition: PredicateCondition::Never,
        }
    }

    /// Predicate that holds when `reg` is set
    pub fn new(reg: impl Into<Register>) -> Self {
        PredicateOperand {
            reg: Some(reg.into()),
            condition: PredicateCondition::True,
        }
    }

    /// Predicate that holds when `reg` is clear
    pub fn inverse(reg: impl Into<Register>) -> Self {
        PredicateOperand {
            reg: Some(reg.into()),
            condition: PredicateCondition::Inverse,
        }
    }

    pub fn is_always_true(&self) -> bool {
        self.condition == PredicateCondition::Always
    }

    /// Predicate that holds exactly when this one does not
    pub fn negated(&self) -> Self {
        let condition = match self.condition {
            PredicateCondition::Always => PredicateCondition::Never,
            PredicateCondition::Never => PredicateCondition::Always,
            PredicateCondition::True => PredicateCondition::Inverse,
            PredicateCondition::Inverse => PredicateCondition::True,
        };
        PredicateOperand {
            reg: self.reg,
            condition,
        }
    }
}

/// An immediate value (raw bits, interpreted by `ty`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImmediateOperand {
    pub value: u64,
    pub ty: Type,
}

impl ImmediateOperand {
    pub fn new(value: u64, ty: Type) -> Self {
        ImmediateOperand { value, ty }
    }

    pub fn as_i64(&self) -> i64 {
        self.value as i64
    }
}

/// Register-relative memory address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndirectOperand {
    pub base: Register,
    pub offset: i64,
}

/// Global-relative memory address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressOperand {
    pub symbol: String,
    pub offset: i64,
}

/// Coarse operand classification, used by translation-table patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    Register,
    Predicate,
    Immediate,
    Memory,
    Label,
}

/// Any value an instruction can read or write
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Register(RegisterOperand),
    Predicate(PredicateOperand),
    Immediate(ImmediateOperand),
    Indirect(IndirectOperand),
    Address(AddressOperand),
    /// Direct branch target
    Block(BasicBlockId),
    /// Direct call target
    Function(String),
}

impl Operand {
    pub fn register(reg: impl Into<Register>, ty: Type) -> Self {
        Operand::Register(RegisterOperand::new(reg, ty))
    }

    pub fn immediate(value: i64, ty: Type) -> Self {
        Operand::Immediate(ImmediateOperand::new(value as u64, ty))
    }

    pub fn indirect(base: impl Into<Register>, offset: i64) -> Self {
        Operand::Indirect(IndirectOperand {
            base: base.into(),
            offset,
        })
    }

    pub fn address(symbol: impl Into<String>, offset: i64) -> Self {
        Operand::Address(AddressOperand {
            symbol: symbol.into(),
            offset,
        })
    }

    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Register(_) => OperandKind::Register,
            Operand::Predicate(_) => OperandKind::Predicate,
            Operand::Immediate(_) => OperandKind::Immediate,
            Operand::Indirect(_) | Operand::Address(_) => OperandKind::Memory,
            Operand::Block(_) | Operand::Function(_) => OperandKind::Label,
        }
    }

    /// The register operand, if this is one
    pub fn as_register(&self) -> Option<&RegisterOperand> {
        match self {
            Operand::Register(r) => Some(r),
            _ => None,
        }
    }

    /// The branch target block, if this is a direct block reference
    pub fn as_block(&self) -> Option<BasicBlockId> {
        match self {
            Operand::Block(b) => Some(*b),
            _ => None,
        }
    }

    /// The register this operand mentions, if any
    pub fn reg(&self) -> Option<&Register> {
        match self {
            Operand::Register(r) => Some(&r.reg),
            Operand::Predicate(p) => p.reg.as_ref(),
            Operand::Indirect(i) => Some(&i.base),
            Operand::Immediate(_)
            | Operand::Address(_)
            | Operand::Block(_)
            | Operand::Function(_) => None,
        }
    }

    /// Mutable access to the register this operand mentions
    pub fn reg_mut(&mut self) -> Option<&mut Register> {
        match self {
            Operand::Register(r) => Some(&mut r.reg),
            Operand::Predicate(p) => p.reg.as_mut(),
            Operand::Indirect(i) => Some(&mut i.base),
            Operand::Immediate(_)
            | Operand::Address(_)
            | Operand::Block(_)
            | Operand::Function(_) => None,
        }
    }

    /// Register file of the register this operand mentions, if any
    pub fn reg_class(&self) -> Option<RegisterClass> {
        match self {
            Operand::Register(r) => Some(match r.reg {
                Register::Physical(p) => p.class,
                Register::Virtual(_) => RegisterClass::for_type(r.ty),
            }),
            Operand::Predicate(p) => p.reg.map(|_| RegisterClass::Predicate),
            Operand::Indirect(_) => Some(RegisterClass::General),
            Operand::Immediate(_)
            | Operand::Address(_)
            | Operand::Block(_)
            | Operand::Function(_) => None,
        }
    }

    /// Whether this operand names a register as a value (not as an address base)
    pub fn is_register_value(&self) -> bool {
        matches!(self, Operand::Register(_))
    }
}

impl From<RegisterOperand> for Operand {
    fn from(r: RegisterOperand) -> Self {
        Operand::Register(r)
    }
}

impl From<PredicateOperand> for Operand {
    fn from(p: PredicateOperand) -> Self {
        Operand::Predicate(p)
    }
}

impl From<ImmediateOperand> for Operand {
    fn from(i: ImmediateOperand) -> Self {
        Operand::Immediate(i)
    }
}

impl std::fmt::Display for PredicateOperand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.condition, &self.reg) {
            (PredicateCondition::Always, _) => write!(f, "pt"),
            (PredicateCondition::Never, _) => write!(f, "!pt"),
            (PredicateCondition::True, Some(reg)) => write!(f, "{}", reg),
            (PredicateCondition::Inverse, Some(reg)) => write!(f, "!{}", reg),
            (_, None) => write!(f, "?"),
        }
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Register(r) => write!(f, "{}", r.reg),
            Operand::Predicate(p) => write!(f, "{}", p),
            Operand::Immediate(i) => {
                if i.ty.is_float() {
                    write!(f, "0x{:x}", i.value)
                } else {
                    write!(f, "{}", i.as_i64())
                }
            }
            Operand::Indirect(i) => match i.offset {
                0 => write!(f, "[{}]", i.base),
                o if o < 0 => write!(f, "[{}{}]", i.base, o),
                o => write!(f, "[{}+{}]", i.base, o),
            },
            Operand::Address(a) => match a.offset {
                0 => write!(f, "[@{}]", a.symbol),
                o if o < 0 => write!(f, "[@{}{}]", a.symbol, o),
                o => write!(f, "[@{}+{}]", a.symbol, o),
            },
            Operand::Block(b) => write!(f, "{}", b),
            Operand::Function(name) => write!(f, "@{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_display() {
        assert_eq!(Operand::register(VirtualRegister(3), Type::I32).to_string(), "%r3");
        assert_eq!(
            Operand::register(PhysicalRegister::general(2), Type::I32).to_string(),
            "$r2"
        );
        assert_eq!(Operand::immediate(-5, Type::I32).to_string(), "-5");
        assert_eq!(Operand::indirect(VirtualRegister(1), 16).to_string(), "[%r1+16]");
        assert_eq!(Operand::address("spill", 0).to_string(), "[@spill]");
        assert_eq!(Operand::Block(BasicBlockId(4)).to_string(), "bb4");
        assert_eq!(Operand::Function("foo".into()).to_string(), "@foo");
        assert_eq!(PhysicalRegister::link().to_string(), "$lr");
    }

    #[test]
    fn test_predicate_display() {
        assert_eq!(PredicateOperand::always().to_string(), "pt");
        assert_eq!(PredicateOperand::never().to_string(), "!pt");
        assert_eq!(PredicateOperand::new(VirtualRegister(2)).to_string(), "%r2");
        assert_eq!(PredicateOperand::inverse(VirtualRegister(2)).to_string(), "!%r2");
    }

    #[test]
    fn test_predicate_negation() {
        let p = PredicateOperand::new(VirtualRegister(2));
        assert_eq!(p.negated(), PredicateOperand::inverse(VirtualRegister(2)));
        assert_eq!(p.negated().negated(), p);
        assert_eq!(PredicateOperand::always().negated(), PredicateOperand::never());
    }

    #[test]
    fn test_operand_registers() {
        let mut op = Operand::indirect(VirtualRegister(7), 0);
        assert_eq!(op.reg(), Some(&Register::Virtual(VirtualRegister(7))));
        *op.reg_mut().unwrap() = PhysicalRegister::general(1).into();
        assert_eq!(op.to_string(), "[$r1]");

        assert!(Operand::immediate(1, Type::I32).reg().is_none());
        assert!(Operand::Predicate(PredicateOperand::always()).reg().is_none());
    }

    #[test]
    fn test_register_class_for_type() {
        assert_eq!(RegisterClass::for_type(Type::I1), RegisterClass::Predicate);
        assert_eq!(RegisterClass::for_type(Type::F64), RegisterClass::General);
        assert_eq!(
            Operand::register(VirtualRegister(1), Type::I1).reg_class(),
            Some(RegisterClass::Predicate)
        );
        assert_eq!(
            Operand::indirect(VirtualRegister(1), 0).reg_class(),
            Some(RegisterClass::General)
        );
        assert_eq!(Operand::Predicate(PredicateOperand::always()).reg_class(), None);
    }
}
