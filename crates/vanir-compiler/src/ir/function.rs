//! IR Functions
//!
//! A function owns its blocks in layout order and hands out every id used
//! inside it: instruction ids, block ids and virtual registers all come from
//! per-function counters, so ids never collide within one function.

use super::block::{BasicBlock, BasicBlockId};
use super::global::Linkage;
use super::instr::{Instruction, InstructionId, InstructionKind};
use super::opcode::{BranchModifier, Opcode};
use super::operand::{Operand, RegisterOperand, VirtualRegister};
use super::types::Type;
use crate::error::{IrError, IrResult};
use rustc_hash::{FxHashMap, FxHashSet};

/// Function identifier within a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

impl std::fmt::Display for FunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// Which lowering stages have been applied to a function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoweringState {
    /// In SSA form (Phi/Psi allowed)
    pub ssa: bool,
    /// Instruction selection done (target-concrete forms only)
    pub selected: bool,
    pub scheduled: bool,
    /// Every register is physical
    pub allocated: bool,
    pub abi_lowered: bool,
}

/// Registers the allocator could not colour, waiting for spill code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpillRequest {
    pub registers: Vec<VirtualRegister>,
    /// General register budget the allocator ran with
    pub general_registers: u16,
    /// Predicate register budget the allocator ran with
    pub predicate_registers: u16,
}

/// An IR function
#[derive(Debug, Clone)]
pub struct Function {
    /// Function name
    pub name: String,
    pub linkage: Linkage,
    /// Registers holding incoming arguments on entry
    pub params: Vec<RegisterOperand>,
    /// Lowering progress
    pub state: LoweringState,
    /// Pending spill work left by the register allocator
    pub spill_request: Option<SpillRequest>,
    /// Spill temporaries, which must never be spilled again
    pub unspillable: FxHashSet<VirtualRegister>,
    id: Option<FunctionId>,
    blocks: Vec<BasicBlock>,
    /// Block lookup map for fast access
    block_map: FxHashMap<BasicBlockId, usize>,
    register_types: FxHashMap<VirtualRegister, Type>,
    next_instruction: u32,
    next_block: u32,
    next_register: u32,
}

impl Function {
    /// Create a new function with no blocks
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            linkage: Linkage::External,
            params: Vec::new(),
            state: LoweringState::default(),
            spill_request: None,
            unspillable: FxHashSet::default(),
            id: None,
            blocks: Vec::new(),
            block_map: FxHashMap::default(),
            register_types: FxHashMap::default(),
            next_instruction: 0,
            next_block: 0,
            next_register: 0,
        }
    }

    /// Id assigned by the owning module
    pub fn id(&self) -> Option<FunctionId> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: FunctionId) {
        self.id = Some(id);
        for block in &mut self.blocks {
            block.set_function(Some(id));
        }
    }

    // ===== Factories =====

    /// Create and append a new empty block
    pub fn create_block(&mut self) -> BasicBlockId {
        let block = self.new_block();
        let id = block.id();
        self.block_map.insert(id, self.blocks.len());
        self.blocks.push(block);
        id
    }

    /// Create and append a new labelled block
    pub fn create_block_with_label(&mut self, label: impl Into<String>) -> BasicBlockId {
        let id = self.create_block();
        if let Some(block) = self.block_mut(id) {
            block.label = Some(label.into());
        }
        id
    }

    /// Create a new empty block placed directly after `after` in layout order
    pub fn insert_block_after(&mut self, after: BasicBlockId) -> IrResult<BasicBlockId> {
        let index = self.layout_index(after).ok_or(IrError::UnknownBlock(after))?;
        let block = self.new_block();
        let id = block.id();
        self.blocks.insert(index + 1, block);
        self.rebuild_block_map();
        Ok(id)
    }

    /// Create a new empty block placed first in layout, making it the entry
    pub fn insert_entry_block(&mut self) -> BasicBlockId {
        let block = self.new_block();
        let id = block.id();
        self.blocks.insert(0, block);
        self.rebuild_block_map();
        id
    }

    fn new_block(&mut self) -> BasicBlock {
        let id = BasicBlockId(self.next_block);
        self.next_block += 1;
        let mut block = BasicBlock::new(id);
        block.set_function(self.id);
        block
    }

    fn rebuild_block_map(&mut self) {
        self.block_map = self
            .blocks
            .iter()
            .enumerate()
            .map(|(index, block)| (block.id(), index))
            .collect();
    }

    /// Create a detached instruction with a fresh id
    pub fn create_instruction(&mut self, opcode: Opcode) -> IrResult<Instruction> {
        let id = self.next_instruction_id();
        Instruction::create(opcode, id)
    }

    /// Create a detached instruction from explicit slots
    pub fn instruction(&mut self, kind: InstructionKind) -> Instruction {
        let id = self.next_instruction_id();
        Instruction::new(id, kind)
    }

    /// Deep copy of `inst` under a fresh id, not yet placed in a block
    pub fn duplicate_instruction(&mut self, inst: &Instruction) -> Instruction {
        let mut copy = inst.clone();
        copy.reassign_id(self.next_instruction_id());
        copy.set_block(None);
        copy
    }

    fn next_instruction_id(&mut self) -> InstructionId {
        let id = InstructionId(self.next_instruction);
        self.next_instruction += 1;
        id
    }

    /// Allocate a fresh virtual register of type `ty`
    pub fn new_register(&mut self, ty: Type) -> VirtualRegister {
        let reg = VirtualRegister(self.next_register);
        self.next_register += 1;
        self.register_types.insert(reg, ty);
        reg
    }

    /// Allocate a fresh register operand of type `ty`
    pub fn new_register_operand(&mut self, ty: Type) -> Operand {
        Operand::register(self.new_register(ty), ty)
    }

    /// Declared type of a virtual register
    pub fn register_type(&self, reg: VirtualRegister) -> Option<Type> {
        self.register_types.get(&reg).copied()
    }

    /// Number of virtual registers handed out so far
    pub fn register_count(&self) -> u32 {
        self.next_register
    }

    // ===== Block access =====

    pub fn block(&self, id: BasicBlockId) -> Option<&BasicBlock> {
        self.block_map.get(&id).map(|&idx| &self.blocks[idx])
    }

    pub fn block_mut(&mut self, id: BasicBlockId) -> Option<&mut BasicBlock> {
        self.block_map
            .get(&id)
            .copied()
            .map(|idx| &mut self.blocks[idx])
    }

    /// Like `block_mut`, but an unknown id is an error
    pub fn try_block_mut(&mut self, id: BasicBlockId) -> IrResult<&mut BasicBlock> {
        self.block_mut(id).ok_or(IrError::UnknownBlock(id))
    }

    /// Entry block (first in layout)
    pub fn entry(&self) -> Option<BasicBlockId> {
        self.blocks.first().map(|b| b.id())
    }

    /// Position of a block in layout order
    pub fn layout_index(&self, id: BasicBlockId) -> Option<usize> {
        self.block_map.get(&id).copied()
    }

    /// Block ids in layout order
    pub fn block_ids(&self) -> Vec<BasicBlockId> {
        self.blocks.iter().map(|b| b.id()).collect()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter()
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut BasicBlock> {
        self.blocks.iter_mut()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total number of instructions across all blocks
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.len()).sum()
    }

    /// Every instruction in layout order
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|b| b.iter())
    }

    /// Visit every instruction mutably
    pub fn for_each_instruction_mut(&mut self, mut f: impl FnMut(&mut Instruction)) {
        for block in &mut self.blocks {
            block.iter_mut().for_each(&mut f);
        }
    }

    /// Locate an instruction by id
    pub fn find_instruction(&self, id: InstructionId) -> Option<(BasicBlockId, usize)> {
        self.blocks
            .iter()
            .find_map(|b| b.position(id).map(|pos| (b.id(), pos)))
    }

    // ===== Control flow =====

    /// Block following `id` in layout order
    pub fn layout_successor(&self, id: BasicBlockId) -> Option<BasicBlockId> {
        let index = self.layout_index(id)?;
        self.blocks.get(index + 1).map(|b| b.id())
    }

    /// Control-flow successors of a block, without duplicates.
    ///
    /// A direct uniform branch goes to its target, and also falls through when
    /// guarded. Calls continue at the layout successor. A multitarget or
    /// register-indirect branch may reach any block. An unterminated block
    /// falls through.
    pub fn successors(&self, id: BasicBlockId) -> Vec<BasicBlockId> {
        let Some(block) = self.block(id) else {
            return Vec::new();
        };
        let fallthrough = self.layout_successor(id);
        let mut succs = Vec::new();
        match block.terminator() {
            None => succs.extend(fallthrough),
            Some(term) => {
                match &term.kind {
                    InstructionKind::Bra {
                        modifier: BranchModifier::Uniform,
                        target: Some(Operand::Block(target)),
                    } => succs.push(*target),
                    InstructionKind::Bra { .. } => succs.extend(self.block_ids()),
                    InstructionKind::Call { .. } => succs.extend(fallthrough),
                    _ => {}
                }
                if term.is_conditional() || term.is_call() {
                    succs.extend(fallthrough);
                }
            }
        }
        let mut seen = FxHashSet::default();
        succs.retain(|b| seen.insert(*b));
        succs
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let params = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.reg, p.ty))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "function {}({}) {{", self.name, params)?;
        for block in &self.blocks {
            write!(f, "{}", block)?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operand::PredicateOperand;

    fn make_branch(func: &mut Function, from: BasicBlockId, to: BasicBlockId) {
        let mut bra = func.create_instruction(Opcode::Bra).unwrap();
        bra.set_target(Operand::Block(to)).unwrap();
        func.block_mut(from).unwrap().push_back(bra).unwrap();
    }

    #[test]
    fn test_function_new() {
        let func = Function::new("test");
        assert_eq!(func.name, "test");
        assert!(func.is_empty());
        assert_eq!(func.entry(), None);
        assert_eq!(func.state, LoweringState::default());
    }

    #[test]
    fn test_ids_are_unique() {
        let mut func = Function::new("test");
        let a = func.create_instruction(Opcode::Add).unwrap();
        let b = func.create_instruction(Opcode::Add).unwrap();
        let c = func.duplicate_instruction(&a);
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.opcode(), c.opcode());
        assert_ne!(func.new_register(Type::I32), func.new_register(Type::I32));
        assert!(func.create_instruction(Opcode::Invalid).is_err());
    }

    #[test]
    fn test_insert_block_after() {
        let mut func = Function::new("test");
        let a = func.create_block();
        let b = func.create_block();
        let mid = func.insert_block_after(a).unwrap();
        assert_eq!(func.block_ids(), vec![a, mid, b]);
        assert_eq!(func.layout_successor(a), Some(mid));
        assert_eq!(func.block(b).map(|blk| blk.id()), Some(b));
        assert!(func.insert_block_after(BasicBlockId(99)).is_err());
    }

    #[test]
    fn test_insert_entry_block() {
        let mut func = Function::new("test");
        let a = func.create_block();
        let b = func.create_block();
        let entry = func.insert_entry_block();
        assert_eq!(func.entry(), Some(entry));
        assert_eq!(func.block_ids(), vec![entry, a, b]);
        assert_eq!(func.layout_index(b), Some(2));
    }

    #[test]
    fn test_successors() {
        let mut func = Function::new("test");
        let a = func.create_block();
        let b = func.create_block();
        let c = func.create_block();

        let mut bra = func.create_instruction(Opcode::Bra).unwrap();
        bra.set_target(Operand::Block(c)).unwrap();
        bra.set_guard(PredicateOperand::new(func.new_register(Type::I1)));
        func.block_mut(a).unwrap().push_back(bra).unwrap();
        make_branch(&mut func, b, c);
        let ret = func.create_instruction(Opcode::Ret).unwrap();
        func.block_mut(c).unwrap().push_back(ret).unwrap();

        assert_eq!(func.successors(a), vec![c, b]);
        assert_eq!(func.successors(b), vec![c]);
        assert!(func.successors(c).is_empty());
    }

    #[test]
    fn test_call_continues_at_layout_successor() {
        let mut func = Function::new("test");
        let a = func.create_block();
        let b = func.create_block();
        let mut call = func.create_instruction(Opcode::Call).unwrap();
        call.set_target(Operand::Function("callee".into())).unwrap();
        func.block_mut(a).unwrap().push_back(call).unwrap();
        assert_eq!(func.successors(a), vec![b]);
    }

    #[test]
    fn test_multitarget_branch_reaches_every_block() {
        let mut func = Function::new("test");
        let a = func.create_block();
        let b = func.create_block();
        let target = func.new_register(Type::Pointer);
        let bra = func.instruction(InstructionKind::Bra {
            modifier: BranchModifier::Multitarget,
            target: Some(Operand::register(target, Type::Pointer)),
        });
        func.block_mut(a).unwrap().push_back(bra).unwrap();
        assert_eq!(func.successors(a), vec![a, b]);
    }

    #[test]
    fn test_blocks_know_their_function() {
        let mut func = Function::new("test");
        let a = func.create_block();
        func.set_id(FunctionId(3));
        let b = func.create_block();
        assert_eq!(func.block(a).and_then(|x| x.function()), Some(FunctionId(3)));
        assert_eq!(func.block(b).and_then(|x| x.function()), Some(FunctionId(3)));
    }
}
