//! Basic Blocks
//!
//! A basic block owns an ordered sequence of instructions with a single
//! entry and at most one control transfer, which is always the last
//! instruction. Every mutation checks that invariant.

use std::collections::VecDeque;

use super::function::FunctionId;
use super::instr::Instruction;
use crate::error::{IrError, IrResult};

/// Basic block identifier, unique within a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BasicBlockId(pub u32);

impl BasicBlockId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for BasicBlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A basic block: sequence of instructions with single entry and exit
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    id: BasicBlockId,
    /// Optional label for debugging
    pub label: Option<String>,
    function: Option<FunctionId>,
    instructions: VecDeque<Instruction>,
}

impl BasicBlock {
    /// Create a new empty basic block
    pub fn new(id: BasicBlockId) -> Self {
        Self {
            id,
            label: None,
            function: None,
            instructions: VecDeque::new(),
        }
    }

    /// Create a new basic block with a label
    pub fn with_label(id: BasicBlockId, label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::new(id)
        }
    }

    pub fn id(&self) -> BasicBlockId {
        self.id
    }

    /// Function this block belongs to
    pub fn function(&self) -> Option<FunctionId> {
        self.function
    }

    /// Re-parent the block. Instruction ids are left untouched.
    pub fn set_function(&mut self, function: Option<FunctionId>) {
        self.function = function;
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn front(&self) -> Option<&Instruction> {
        self.instructions.front()
    }

    pub fn back(&self) -> Option<&Instruction> {
        self.instructions.back()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Instruction> + ExactSizeIterator {
        self.instructions.iter()
    }

    /// Mutable iteration. Callers must not turn a non-terminator into a branch.
    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut Instruction> {
        self.instructions.iter_mut()
    }

    /// Position of the instruction with `id`
    pub fn position(&self, id: super::instr::InstructionId) -> Option<usize> {
        self.instructions.iter().position(|i| i.id() == id)
    }

    /// The trailing control transfer, if any
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.back().filter(|i| i.is_branch())
    }

    pub fn terminator_mut(&mut self) -> Option<&mut Instruction> {
        self.instructions.back_mut().filter(|i| i.is_branch())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator().is_some()
    }

    /// Instructions before the terminator
    pub fn body_len(&self) -> usize {
        self.len() - usize::from(self.is_terminated())
    }

    /// Append an instruction
    pub fn push_back(&mut self, mut inst: Instruction) -> IrResult<()> {
        if self.is_terminated() {
            return Err(IrError::AlreadyTerminated { block: self.id });
        }
        inst.set_block(Some(self.id));
        self.instructions.push_back(inst);
        Ok(())
    }

    /// Prepend an instruction. A control transfer may only be prepended to an empty block.
    pub fn push_front(&mut self, inst: Instruction) -> IrResult<()> {
        self.insert(0, inst)
    }

    /// Insert at `index`. Control transfers may only go at the end of an unterminated block.
    pub fn insert(&mut self, index: usize, mut inst: Instruction) -> IrResult<()> {
        let len = self.len();
        if index > len {
            return Err(IrError::IndexOutOfBounds {
                block: self.id,
                index,
                len,
            });
        }
        if inst.is_branch() && (index != len || self.is_terminated()) {
            return Err(IrError::MisplacedTerminator {
                block: self.id,
                opcode: inst.opcode(),
            });
        }
        if index == len && self.is_terminated() {
            return Err(IrError::AlreadyTerminated { block: self.id });
        }
        inst.set_block(Some(self.id));
        self.instructions.insert(index, inst);
        Ok(())
    }

    /// Insert just before the terminator, or at the end if there is none
    pub fn insert_before_terminator(&mut self, inst: Instruction) -> IrResult<()> {
        self.insert(self.body_len(), inst)
    }

    /// Remove and return the instruction at `index`
    pub fn remove(&mut self, index: usize) -> IrResult<Instruction> {
        let len = self.len();
        let mut inst = self
            .instructions
            .remove(index)
            .ok_or(IrError::IndexOutOfBounds {
                block: self.id,
                index,
                len,
            })?;
        inst.set_block(None);
        Ok(inst)
    }

    /// Replace the terminator, returning the old one, or append if unterminated
    pub fn set_terminator(&mut self, mut inst: Instruction) -> IrResult<Option<Instruction>> {
        if !inst.is_branch() {
            return Err(IrError::NotATerminator {
                opcode: inst.opcode(),
            });
        }
        let old = if self.is_terminated() {
            self.instructions.pop_back().map(|mut old| {
                old.set_block(None);
                old
            })
        } else {
            None
        };
        inst.set_block(Some(self.id));
        self.instructions.push_back(inst);
        Ok(old)
    }

    /// Remove the terminator, if any
    pub fn take_terminator(&mut self) -> Option<Instruction> {
        if self.is_terminated() {
            self.instructions.pop_back().map(|mut inst| {
                inst.set_block(None);
                inst
            })
        } else {
            None
        }
    }

    /// Remove every instruction, returning them in order
    pub fn clear(&mut self) -> Vec<Instruction> {
        self.instructions
            .drain(..)
            .map(|mut inst| {
                inst.set_block(None);
                inst
            })
            .collect()
    }

    /// Keep only instructions matching `keep`
    pub fn retain(&mut self, mut keep: impl FnMut(&Instruction) -> bool) {
        self.instructions.retain(|i| keep(i));
    }

    /// Replace the whole instruction list. The terminator invariant is checked
    /// before anything is modified.
    pub fn replace_instructions(&mut self, insts: Vec<Instruction>) -> IrResult<()> {
        let last = insts.len().saturating_sub(1);
        if let Some(inst) = insts.iter().take(last).find(|i| i.is_branch()) {
            return Err(IrError::MisplacedTerminator {
                block: self.id,
                opcode: inst.opcode(),
            });
        }
        self.instructions = insts
            .into_iter()
            .map(|mut inst| {
                inst.set_block(Some(self.id));
                inst
            })
            .collect();
        Ok(())
    }
}

impl std::fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.label {
            Some(label) => writeln!(f, "{}: ; {}", self.id, label)?,
            None => writeln!(f, "{}:", self.id)?,
        }
        for inst in &self.instructions {
            writeln!(f, "    {}", inst)?;
        }
        Ok(())
    }
}
