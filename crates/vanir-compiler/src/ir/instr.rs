//! IR Instructions
//!
//! An instruction is an id, a guard predicate, a back-reference to the block
//! holding it and a variant carrying only the operand slots its opcode needs.
//! Read and write sets are derived from the slots on demand, so they can never
//! disagree with the operands actually held.

use super::block::BasicBlockId;
use super::opcode::{AtomicOperation, BranchModifier, Comparison, MembarLevel, Opcode};
use super::operand::{
    Operand, PredicateOperand, Register, RegisterClass,
};
use super::types::Type;
use crate::error::{IrError, IrResult};
use std::borrow::Cow;

/// Prefix of call targets that name compiler intrinsics
pub const INTRINSIC_PREFIX: &str = "_Zintrinsic";

/// Instruction identifier, unique within a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstructionId(pub u32);

impl InstructionId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for InstructionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// Operand slots of each instruction family
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// `d = op a` (conversions, `Ld`)
    Unary {
        opcode: Opcode,
        d: Option<Operand>,
        a: Option<Operand>,
    },
    /// `d = a op b`
    Binary {
        opcode: Opcode,
        d: Option<Operand>,
        a: Option<Operand>,
        b: Option<Operand>,
    },
    /// `d = a <comparison> b`, `d` is a predicate
    Setp {
        comparison: Comparison,
        d: Option<Operand>,
        a: Option<Operand>,
        b: Option<Operand>,
    },
    /// `d = *a; *a = d <operation> b (, c)`
    Atom {
        operation: AtomicOperation,
        d: Option<Operand>,
        a: Option<Operand>,
        b: Option<Operand>,
        c: Option<Operand>,
    },
    /// `*d = a`
    St {
        d: Option<Operand>,
        a: Option<Operand>,
    },
    Bra {
        modifier: BranchModifier,
        target: Option<Operand>,
    },
    Call {
        modifier: BranchModifier,
        target: Option<Operand>,
        link: Option<Operand>,
        returned: Vec<Operand>,
        arguments: Vec<Operand>,
    },
    Membar {
        level: MembarLevel,
    },
    Bar,
    Launch,
    Ret,
    /// `d = sources[i]` when control arrives from `blocks[i]`
    Phi {
        d: Option<Operand>,
        sources: Vec<Operand>,
        blocks: Vec<BasicBlockId>,
    },
    /// `d = sources[i]` for the first `predicates[i]` that holds
    Psi {
        d: Option<Operand>,
        predicates: Vec<Operand>,
        sources: Vec<Operand>,
    },
}

impl InstructionKind {
    /// Default slots for an opcode
    pub fn for_opcode(opcode: Opcode) -> IrResult<Self> {
        let kind = match opcode {
            Opcode::Bitcast
            | Opcode::Fpext
            | Opcode::Fptosi
            | Opcode::Fptoui
            | Opcode::Fptrunc
            | Opcode::Ld
            | Opcode::Sext
            | Opcode::Sitofp
            | Opcode::Trunc
            | Opcode::Uitofp
            | Opcode::Zext => InstructionKind::Unary {
                opcode,
                d: None,
                a: None,
            },
            Opcode::Add
            | Opcode::And
            | Opcode::Ashr
            | Opcode::Fdiv
            | Opcode::Fmul
            | Opcode::Frem
            | Opcode::Lshr
            | Opcode::Mul
            | Opcode::Or
            | Opcode::Sdiv
            | Opcode::Shl
            | Opcode::Srem
            | Opcode::Sub
            | Opcode::Udiv
            | Opcode::Urem
            | Opcode::Xor => InstructionKind::Binary {
                opcode,
                d: None,
                a: None,
                b: None,
            },
            Opcode::Setp => InstructionKind::Setp {
                comparison: Comparison::OrderedEqual,
                d: None,
                a: None,
                b: None,
            },
            Opcode::Atom => InstructionKind::Atom {
                operation: AtomicOperation::Add,
                d: None,
                a: None,
                b: None,
                c: None,
            },
            Opcode::St => InstructionKind::St { d: None, a: None },
            Opcode::Bra => InstructionKind::Bra {
                modifier: BranchModifier::Uniform,
                target: None,
            },
            Opcode::Call => InstructionKind::Call {
                modifier: BranchModifier::Uniform,
                target: None,
                link: None,
                returned: Vec::new(),
                arguments: Vec::new(),
            },
            Opcode::Membar => InstructionKind::Membar {
                level: MembarLevel::Cta,
            },
            Opcode::Bar => InstructionKind::Bar,
            Opcode::Launch => InstructionKind::Launch,
            Opcode::Ret => InstructionKind::Ret,
            Opcode::Phi => InstructionKind::Phi {
                d: None,
                sources: Vec::new(),
                blocks: Vec::new(),
            },
            Opcode::Psi => InstructionKind::Psi {
                d: None,
                predicates: Vec::new(),
                sources: Vec::new(),
            },
            Opcode::Invalid => return Err(IrError::InvalidOpcode),
        };
        Ok(kind)
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            InstructionKind::Unary { opcode, .. } | InstructionKind::Binary { opcode, .. } => {
                *opcode
            }
            InstructionKind::Setp { .. } => Opcode::Setp,
            InstructionKind::Atom { .. } => Opcode::Atom,
            InstructionKind::St { .. } => Opcode::St,
            InstructionKind::Bra { .. } => Opcode::Bra,
            InstructionKind::Call { .. } => Opcode::Call,
            InstructionKind::Membar { .. } => Opcode::Membar,
            InstructionKind::Bar => Opcode::Bar,
            InstructionKind::Launch => Opcode::Launch,
            InstructionKind::Ret => Opcode::Ret,
            InstructionKind::Phi { .. } => Opcode::Phi,
            InstructionKind::Psi { .. } => Opcode::Psi,
        }
    }

    /// (read slots, write slots)
    fn slots(&self) -> (Vec<&Operand>, Vec<&Operand>) {
        let mut reads = Vec::new();
        let mut writes = Vec::new();
        match self {
            InstructionKind::Unary { d, a, .. } | InstructionKind::St { d, a } => {
                writes.extend(d);
                reads.extend(a);
            }
            InstructionKind::Binary { d, a, b, .. } | InstructionKind::Setp { d, a, b, .. } => {
                writes.extend(d);
                reads.extend(a);
                reads.extend(b);
            }
            InstructionKind::Atom { d, a, b, c, .. } => {
                writes.extend(d);
                reads.extend(a);
                reads.extend(b);
                reads.extend(c);
            }
            InstructionKind::Bra { target, .. } => reads.extend(target),
            InstructionKind::Call {
                target,
                link,
                returned,
                arguments,
                ..
            } => {
                reads.extend(target);
                reads.extend(arguments);
                writes.extend(link);
                writes.extend(returned);
            }
            InstructionKind::Phi { d, sources, .. } => {
                writes.extend(d);
                reads.extend(sources);
            }
            InstructionKind::Psi {
                d,
                predicates,
                sources,
            } => {
                writes.extend(d);
                reads.extend(predicates);
                reads.extend(sources);
            }
            InstructionKind::Membar { .. }
            | InstructionKind::Bar
            | InstructionKind::Launch
            | InstructionKind::Ret => {}
        }
        (reads, writes)
    }

    fn slots_mut(&mut self) -> (Vec<&mut Operand>, Vec<&mut Operand>) {
        let mut reads = Vec::new();
        let mut writes = Vec::new();
        match self {
            InstructionKind::Unary { d, a, .. } | InstructionKind::St { d, a } => {
                writes.extend(d);
                reads.extend(a);
            }
            InstructionKind::Binary { d, a, b, .. } | InstructionKind::Setp { d, a, b, .. } => {
                writes.extend(d);
                reads.extend(a);
                reads.extend(b);
            }
            InstructionKind::Atom { d, a, b, c, .. } => {
                writes.extend(d);
                reads.extend(a);
                reads.extend(b);
                reads.extend(c);
            }
            InstructionKind::Bra { target, .. } => reads.extend(target),
            InstructionKind::Call {
                target,
                link,
                returned,
                arguments,
                ..
            } => {
                reads.extend(target);
                reads.extend(arguments.iter_mut());
                writes.extend(link);
                writes.extend(returned.iter_mut());
            }
            InstructionKind::Phi { d, sources, .. } => {
                writes.extend(d);
                reads.extend(sources.iter_mut());
            }
            InstructionKind::Psi {
                d,
                predicates,
                sources,
            } => {
                writes.extend(d);
                reads.extend(predicates.iter_mut());
                reads.extend(sources.iter_mut());
            }
            InstructionKind::Membar { .. }
            | InstructionKind::Bar
            | InstructionKind::Launch
            | InstructionKind::Ret => {}
        }
        (reads, writes)
    }
}

/// A single IR instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    id: InstructionId,
    guard: PredicateOperand,
    block: Option<BasicBlockId>,
    pub kind: InstructionKind,
}

impl Instruction {
    /// Create an instruction from an explicit variant
    pub fn new(id: InstructionId, kind: InstructionKind) -> Self {
        Instruction {
            id,
            guard: PredicateOperand::always(),
            block: None,
            kind,
        }
    }

    /// Create an instruction with empty slots and default modifiers
    pub fn create(opcode: Opcode, id: InstructionId) -> IrResult<Self> {
        Ok(Self::new(id, InstructionKind::for_opcode(opcode)?))
    }

    pub fn id(&self) -> InstructionId {
        self.id
    }

    pub(crate) fn reassign_id(&mut self, id: InstructionId) {
        self.id = id;
    }

    pub fn opcode(&self) -> Opcode {
        self.kind.opcode()
    }

    /// Block currently holding this instruction
    pub fn block(&self) -> Option<BasicBlockId> {
        self.block
    }

    pub(crate) fn set_block(&mut self, block: Option<BasicBlockId>) {
        self.block = block;
    }

    // ===== Guard =====

    pub fn guard(&self) -> &PredicateOperand {
        &self.guard
    }

    /// Replace the guard, returning the previous one
    pub fn set_guard(&mut self, guard: PredicateOperand) -> PredicateOperand {
        std::mem::replace(&mut self.guard, guard)
    }

    /// Detach the guard, leaving the instruction unconditional
    pub fn take_guard(&mut self) -> PredicateOperand {
        self.set_guard(PredicateOperand::always())
    }

    /// Whether execution depends on a predicate register
    pub fn is_conditional(&self) -> bool {
        !self.guard().is_always_true()
    }

    // ===== Classification =====

    pub fn is_load(&self) -> bool {
        self.opcode().is_load()
    }

    pub fn is_store(&self) -> bool {
        self.opcode().is_store()
    }

    pub fn is_memory_op(&self) -> bool {
        self.is_load() || self.is_store()
    }

    pub fn is_branch(&self) -> bool {
        self.opcode().is_branch()
    }

    pub fn is_call(&self) -> bool {
        self.opcode().is_call()
    }

    pub fn is_return(&self) -> bool {
        self.opcode().is_return()
    }

    pub fn is_unary(&self) -> bool {
        self.opcode().is_unary()
    }

    pub fn is_binary(&self) -> bool {
        self.opcode().is_binary()
    }

    pub fn is_barrier(&self) -> bool {
        self.opcode().is_barrier()
    }

    /// Call to a compiler intrinsic
    pub fn is_intrinsic(&self) -> bool {
        match &self.kind {
            InstructionKind::Call {
                target: Some(Operand::Function(name)),
                ..
            } => name.starts_with(INTRINSIC_PREFIX),
            _ => false,
        }
    }

    /// Register-to-register `Bitcast`, the IR's copy instruction
    pub fn is_copy(&self) -> bool {
        matches!(
            &self.kind,
            InstructionKind::Unary {
                opcode: Opcode::Bitcast,
                d: Some(Operand::Register(_)),
                a: Some(Operand::Register(_)),
            }
        )
    }

    // ===== Slot access =====

    pub fn d(&self) -> Option<&Operand> {
        match &self.kind {
            InstructionKind::Unary { d, .. }
            | InstructionKind::Binary { d, .. }
            | InstructionKind::Setp { d, .. }
            | InstructionKind::Atom { d, .. }
            | InstructionKind::St { d, .. }
            | InstructionKind::Phi { d, .. }
            | InstructionKind::Psi { d, .. } => d.as_ref(),
            _ => None,
        }
    }

    pub fn a(&self) -> Option<&Operand> {
        match &self.kind {
            InstructionKind::Unary { a, .. }
            | InstructionKind::Binary { a, .. }
            | InstructionKind::Setp { a, .. }
            | InstructionKind::Atom { a, .. }
            | InstructionKind::St { a, .. } => a.as_ref(),
            _ => None,
        }
    }

    pub fn b(&self) -> Option<&Operand> {
        match &self.kind {
            InstructionKind::Binary { b, .. }
            | InstructionKind::Setp { b, .. }
            | InstructionKind::Atom { b, .. } => b.as_ref(),
            _ => None,
        }
    }

    pub fn c(&self) -> Option<&Operand> {
        match &self.kind {
            InstructionKind::Atom { c, .. } => c.as_ref(),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<&Operand> {
        match &self.kind {
            InstructionKind::Bra { target, .. } | InstructionKind::Call { target, .. } => {
                target.as_ref()
            }
            _ => None,
        }
    }

    pub fn link(&self) -> Option<&Operand> {
        match &self.kind {
            InstructionKind::Call { link, .. } => link.as_ref(),
            _ => None,
        }
    }

    pub fn arguments(&self) -> &[Operand] {
        match &self.kind {
            InstructionKind::Call { arguments, .. } => arguments,
            _ => &[],
        }
    }

    pub fn returned(&self) -> &[Operand] {
        match &self.kind {
            InstructionKind::Call { returned, .. } => returned,
            _ => &[],
        }
    }

    /// Type of the value written to `d`, if `d` is a register
    pub fn result_type(&self) -> Option<Type> {
        self.d().and_then(|d| d.as_register()).map(|r| r.ty)
    }

    /// Place `operand` in the destination slot, returning the previous occupant
    pub fn set_d(&mut self, operand: Operand) -> IrResult<Option<Operand>> {
        let opcode = self.opcode();
        match &mut self.kind {
            InstructionKind::Unary { d, .. }
            | InstructionKind::Binary { d, .. }
            | InstructionKind::Setp { d, .. }
            | InstructionKind::Atom { d, .. }
            | InstructionKind::St { d, .. }
            | InstructionKind::Phi { d, .. }
            | InstructionKind::Psi { d, .. } => Ok(d.replace(operand)),
            _ => Err(IrError::SlotMismatch { opcode, slot: "d" }),
        }
    }

    pub fn set_a(&mut self, operand: Operand) -> IrResult<Option<Operand>> {
        let opcode = self.opcode();
        match &mut self.kind {
            InstructionKind::Unary { a, .. }
            | InstructionKind::Binary { a, .. }
            | InstructionKind::Setp { a, .. }
            | InstructionKind::Atom { a, .. }
            | InstructionKind::St { a, .. } => Ok(a.replace(operand)),
            _ => Err(IrError::SlotMismatch { opcode, slot: "a" }),
        }
    }

    pub fn set_b(&mut self, operand: Operand) -> IrResult<Option<Operand>> {
        let opcode = self.opcode();
        match &mut self.kind {
            InstructionKind::Binary { b, .. }
            | InstructionKind::Setp { b, .. }
            | InstructionKind::Atom { b, .. } => Ok(b.replace(operand)),
            _ => Err(IrError::SlotMismatch { opcode, slot: "b" }),
        }
    }

    pub fn set_c(&mut self, operand: Operand) -> IrResult<Option<Operand>> {
        let opcode = self.opcode();
        match &mut self.kind {
            InstructionKind::Atom { c, .. } => Ok(c.replace(operand)),
            _ => Err(IrError::SlotMismatch { opcode, slot: "c" }),
        }
    }

    pub fn set_target(&mut self, operand: Operand) -> IrResult<Option<Operand>> {
        let opcode = self.opcode();
        match &mut self.kind {
            InstructionKind::Bra { target, .. } | InstructionKind::Call { target, .. } => {
                Ok(target.replace(operand))
            }
            _ => Err(IrError::SlotMismatch {
                opcode,
                slot: "target",
            }),
        }
    }

    pub fn set_link(&mut self, operand: Operand) -> IrResult<Option<Operand>> {
        let opcode = self.opcode();
        match &mut self.kind {
            InstructionKind::Call { link, .. } => Ok(link.replace(operand)),
            _ => Err(IrError::SlotMismatch {
                opcode,
                slot: "link",
            }),
        }
    }

    /// Append a value written by a call
    pub fn add_return(&mut self, operand: Operand) -> IrResult<()> {
        let opcode = self.opcode();
        match &mut self.kind {
            InstructionKind::Call { returned, .. } => {
                returned.push(operand);
                Ok(())
            }
            _ => Err(IrError::SlotMismatch {
                opcode,
                slot: "returned",
            }),
        }
    }

    /// Append a value read by a call
    pub fn add_argument(&mut self, operand: Operand) -> IrResult<()> {
        let opcode = self.opcode();
        match &mut self.kind {
            InstructionKind::Call { arguments, .. } => {
                arguments.push(operand);
                Ok(())
            }
            _ => Err(IrError::SlotMismatch {
                opcode,
                slot: "arguments",
            }),
        }
    }

    /// Add a Phi source for the edge from `block`
    pub fn add_phi_source(&mut self, source: Operand, block: BasicBlockId) -> IrResult<()> {
        let opcode = self.opcode();
        match &mut self.kind {
            InstructionKind::Phi {
                sources, blocks, ..
            } => {
                sources.push(source);
                blocks.push(block);
                Ok(())
            }
            _ => Err(IrError::SlotMismatch {
                opcode,
                slot: "sources",
            }),
        }
    }

    /// Remove the Phi source for the edge from `block`
    pub fn remove_phi_source(&mut self, block: BasicBlockId) -> IrResult<Operand> {
        let opcode = self.opcode();
        match &mut self.kind {
            InstructionKind::Phi {
                sources, blocks, ..
            } => {
                let index = blocks
                    .iter()
                    .position(|b| *b == block)
                    .ok_or_else(|| IrError::SourceNotFound(block.to_string()))?;
                blocks.remove(index);
                Ok(sources.remove(index))
            }
            _ => Err(IrError::SlotMismatch {
                opcode,
                slot: "sources",
            }),
        }
    }

    /// Phi source flowing in from `block`
    pub fn phi_source(&self, block: BasicBlockId) -> Option<&Operand> {
        match &self.kind {
            InstructionKind::Phi {
                sources, blocks, ..
            } => blocks
                .iter()
                .position(|b| *b == block)
                .and_then(|i| sources.get(i)),
            _ => None,
        }
    }

    /// Add a Psi source selected when `predicate` holds
    pub fn add_psi_source(&mut self, predicate: PredicateOperand, source: Operand) -> IrResult<()> {
        let opcode = self.opcode();
        match &mut self.kind {
            InstructionKind::Psi {
                predicates,
                sources,
                ..
            } => {
                predicates.push(Operand::Predicate(predicate));
                sources.push(source);
                Ok(())
            }
            _ => Err(IrError::SlotMismatch {
                opcode,
                slot: "sources",
            }),
        }
    }

    /// Psi (predicate, source) pairs in evaluation order
    pub fn psi_sources(&self) -> Vec<(&PredicateOperand, &Operand)> {
        match &self.kind {
            InstructionKind::Psi {
                predicates,
                sources,
                ..
            } => predicates
                .iter()
                .zip(sources)
                .filter_map(|(p, s)| match p {
                    Operand::Predicate(p) => Some((p, s)),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    // ===== Read / write sets =====

    /// Operands this instruction reads. The guard is included when it names a register.
    pub fn reads(&self) -> Vec<Cow<'_, Operand>> {
        let (slots, _) = self.kind.slots();
        let mut reads: Vec<Cow<'_, Operand>> = slots.into_iter().map(Cow::Borrowed).collect();
        if self.guard.reg.is_some() {
            reads.push(Cow::Owned(Operand::Predicate(self.guard.clone())));
        }
        reads
    }

    /// Operands this instruction writes, including memory destinations
    pub fn writes(&self) -> Vec<&Operand> {
        self.kind.slots().1
    }

    /// Registers whose values are read. Address bases count as uses even in write slots.
    pub fn uses(&self) -> Vec<Register> {
        let mut regs = Vec::new();
        self.visit_registers(|reg, _, is_def| {
            if !is_def {
                regs.push(reg);
            }
        });
        regs
    }

    /// Registers this instruction defines
    pub fn defs(&self) -> Vec<Register> {
        let mut regs = Vec::new();
        self.visit_registers(|reg, _, is_def| {
            if is_def {
                regs.push(reg);
            }
        });
        regs
    }

    /// Visit every register mentioned, with its class and whether it is defined here
    pub fn visit_registers(&self, mut f: impl FnMut(Register, RegisterClass, bool)) {
        let (reads, writes) = self.kind.slots();
        for op in reads {
            if let (Some(reg), Some(class)) = (op.reg(), op.reg_class()) {
                f(*reg, class, false);
            }
        }
        if let Some(reg) = self.guard.reg {
            f(reg, RegisterClass::Predicate, false);
        }
        for op in writes {
            if let (Some(reg), Some(class)) = (op.reg(), op.reg_class()) {
                f(*reg, class, !matches!(op, Operand::Indirect(_)));
            }
        }
    }

    /// Mutable access to every register used (read) by this instruction
    pub fn for_each_use_mut(&mut self, mut f: impl FnMut(&mut Register)) {
        let Instruction { guard, kind, .. } = self;
        let (reads, writes) = kind.slots_mut();
        for op in reads {
            if let Some(reg) = op.reg_mut() {
                f(reg);
            }
        }
        if let Some(reg) = guard.reg.as_mut() {
            f(reg);
        }
        for op in writes {
            if let Operand::Indirect(ind) = op {
                f(&mut ind.base);
            }
        }
    }

    /// Mutable access to every register defined by this instruction
    pub fn for_each_def_mut(&mut self, mut f: impl FnMut(&mut Register)) {
        let (_, writes) = self.kind.slots_mut();
        for op in writes {
            if matches!(op, Operand::Indirect(_)) {
                continue;
            }
            if let Some(reg) = op.reg_mut() {
                f(reg);
            }
        }
    }

    /// Detach every operand, returning them. The instruction itself survives
    /// with an always-true guard and empty slots.
    pub fn clear(&mut self) -> Vec<Operand> {
        let mut detached = Vec::new();
        match &mut self.kind {
            InstructionKind::Unary { d, a, .. } | InstructionKind::St { d, a } => {
                detached.extend(d.take());
                detached.extend(a.take());
            }
            InstructionKind::Binary { d, a, b, .. } | InstructionKind::Setp { d, a, b, .. } => {
                detached.extend(d.take());
                detached.extend(a.take());
                detached.extend(b.take());
            }
            InstructionKind::Atom { d, a, b, c, .. } => {
                detached.extend(d.take());
                detached.extend(a.take());
                detached.extend(b.take());
                detached.extend(c.take());
            }
            InstructionKind::Bra { target, .. } => detached.extend(target.take()),
            InstructionKind::Call {
                target,
                link,
                returned,
                arguments,
                ..
            } => {
                detached.extend(target.take());
                detached.extend(link.take());
                detached.append(returned);
                detached.append(arguments);
            }
            InstructionKind::Phi { d, sources, blocks } => {
                detached.extend(d.take());
                detached.append(sources);
                blocks.clear();
            }
            InstructionKind::Psi {
                d,
                predicates,
                sources,
            } => {
                detached.extend(d.take());
                detached.append(predicates);
                detached.append(sources);
            }
            InstructionKind::Membar { .. }
            | InstructionKind::Bar
            | InstructionKind::Launch
            | InstructionKind::Ret => {}
        }
        let guard = self.take_guard();
        if guard.reg.is_some() {
            detached.push(Operand::Predicate(guard));
        }
        detached
    }
}

fn fmt_slot(op: &Option<Operand>) -> String {
    op.as_ref()
        .map(|o| o.to_string())
        .unwrap_or_else(|| "_".to_string())
}

fn fmt_list(ops: &[Operand]) -> String {
    ops.iter()
        .map(|o| o.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_conditional() {
            write!(f, "@{} ", self.guard())?;
        }
        let name = self.opcode().name();
        match &self.kind {
            InstructionKind::Unary { d, a, .. } | InstructionKind::St { d, a } => {
                write!(f, "{} {}, {}", name, fmt_slot(d), fmt_slot(a))
            }
            InstructionKind::Binary { d, a, b, .. } => {
                write!(f, "{} {}, {}, {}", name, fmt_slot(d), fmt_slot(a), fmt_slot(b))
            }
            InstructionKind::Setp {
                comparison,
                d,
                a,
                b,
            } => write!(
                f,
                "{}.{} {}, {}, {}",
                name,
                comparison.name(),
                fmt_slot(d),
                fmt_slot(a),
                fmt_slot(b)
            ),
            InstructionKind::Atom {
                operation,
                d,
                a,
                b,
                c,
            } => {
                write!(
                    f,
                    "{}.{} {}, {}, {}",
                    name,
                    operation.name(),
                    fmt_slot(d),
                    fmt_slot(a),
                    fmt_slot(b)
                )?;
                if let Some(c) = c {
                    write!(f, ", {}", c)?;
                }
                Ok(())
            }
            InstructionKind::Bra { modifier, target } => {
                write!(f, "{}.{} {}", name, modifier.name(), fmt_slot(target))
            }
            InstructionKind::Call {
                modifier,
                target,
                link,
                returned,
                arguments,
            } => {
                write!(f, "{}.{} ", name, modifier.name())?;
                if let Some(link) = link {
                    write!(f, "{}, ", link)?;
                }
                write!(f, "{}({})", fmt_slot(target), fmt_list(arguments))?;
                if !returned.is_empty() {
                    write!(f, " -> {}", fmt_list(returned))?;
                }
                Ok(())
            }
            InstructionKind::Membar { level } => write!(f, "{}.{}", name, level.name()),
            InstructionKind::Bar | InstructionKind::Launch | InstructionKind::Ret => {
                write!(f, "{}", name)
            }
            InstructionKind::Phi { d, sources, blocks } => {
                write!(f, "{} {}", name, fmt_slot(d))?;
                for (source, block) in sources.iter().zip(blocks) {
                    write!(f, ", [{}, {}]", source, block)?;
                }
                Ok(())
            }
            InstructionKind::Psi {
                d,
                predicates,
                sources,
            } => {
                write!(f, "{} {}", name, fmt_slot(d))?;
                for (predicate, source) in predicates.iter().zip(sources) {
                    write!(f, ", [{}, {}]", predicate, source)?;
                }
                Ok(())
            }
        }
    }
}
