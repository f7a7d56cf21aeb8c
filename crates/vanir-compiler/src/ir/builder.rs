//! Function builder
//!
//! Convenience layer for constructing IR by hand (tests, front ends).
//! Every helper allocates its destination register and returns it.

use super::block::BasicBlockId;
use super::function::Function;
use super::instr::{InstructionId, InstructionKind};
use super::opcode::{AtomicOperation, BranchModifier, Comparison, MembarLevel, Opcode};
use super::operand::{Operand, PredicateOperand, RegisterOperand, VirtualRegister};
use super::types::Type;
use crate::error::IrResult;

/// Builder that simplifies IR construction
pub struct FunctionBuilder<'a> {
    func: &'a mut Function,
    current_block: BasicBlockId,
}

impl<'a> FunctionBuilder<'a> {
    /// Create a builder targeting an existing function, creating its entry
    /// block if it has none
    pub fn new(func: &'a mut Function) -> Self {
        let current_block = match func.entry() {
            Some(entry) => entry,
            None => func.create_block(),
        };
        FunctionBuilder {
            func,
            current_block,
        }
    }

    /// Switch to emitting into a different block
    pub fn switch_to_block(&mut self, block: BasicBlockId) {
        self.current_block = block;
    }

    /// Get the current block ID
    pub fn current_block(&self) -> BasicBlockId {
        self.current_block
    }

    /// Create a new basic block (appended in layout order)
    pub fn create_block(&mut self) -> BasicBlockId {
        self.func.create_block()
    }

    /// Allocate a new virtual register with the given type
    pub fn alloc_reg(&mut self, ty: Type) -> VirtualRegister {
        self.func.new_register(ty)
    }

    /// Declare an incoming parameter
    pub fn param(&mut self, ty: Type) -> VirtualRegister {
        let reg = self.alloc_reg(ty);
        self.func.params.push(RegisterOperand::new(reg, ty));
        reg
    }

    /// Emit an instruction into the current block
    pub fn emit(&mut self, kind: InstructionKind) -> IrResult<InstructionId> {
        let inst = self.func.instruction(kind);
        let id = inst.id();
        self.func.try_block_mut(self.current_block)?.push_back(inst)?;
        Ok(id)
    }

    /// Emit a guarded instruction into the current block
    pub fn emit_guarded(
        &mut self,
        guard: PredicateOperand,
        kind: InstructionKind,
    ) -> IrResult<InstructionId> {
        let mut inst = self.func.instruction(kind);
        inst.set_guard(guard);
        let id = inst.id();
        self.func.try_block_mut(self.current_block)?.push_back(inst)?;
        Ok(id)
    }

    fn dest(&mut self, ty: Type) -> (VirtualRegister, Option<Operand>) {
        let reg = self.alloc_reg(ty);
        (reg, Some(Operand::register(reg, ty)))
    }

    /// `d = a op b`
    pub fn binary(
        &mut self,
        opcode: Opcode,
        ty: Type,
        a: Operand,
        b: Operand,
    ) -> IrResult<VirtualRegister> {
        let (reg, d) = self.dest(ty);
        self.emit(InstructionKind::Binary {
            opcode,
            d,
            a: Some(a),
            b: Some(b),
        })?;
        Ok(reg)
    }

    /// `d = op a`
    pub fn unary(&mut self, opcode: Opcode, ty: Type, a: Operand) -> IrResult<VirtualRegister> {
        let (reg, d) = self.dest(ty);
        self.emit(InstructionKind::Unary {
            opcode,
            d,
            a: Some(a),
        })?;
        Ok(reg)
    }

    /// Copy `a` into a fresh register
    pub fn copy(&mut self, ty: Type, a: Operand) -> IrResult<VirtualRegister> {
        self.unary(Opcode::Bitcast, ty, a)
    }

    /// Copy `a` into an existing register (a redefinition)
    pub fn assign(&mut self, dest: VirtualRegister, ty: Type, a: Operand) -> IrResult<InstructionId> {
        self.emit(InstructionKind::Unary {
            opcode: Opcode::Bitcast,
            d: Some(Operand::register(dest, ty)),
            a: Some(a),
        })
    }

    /// Materialize an integer constant
    pub fn const_int(&mut self, ty: Type, value: i64) -> IrResult<VirtualRegister> {
        self.copy(ty, Operand::immediate(value, ty))
    }

    /// `p = a <comparison> b`
    pub fn setp(
        &mut self,
        comparison: Comparison,
        a: Operand,
        b: Operand,
    ) -> IrResult<VirtualRegister> {
        let (reg, d) = self.dest(Type::I1);
        self.emit(InstructionKind::Setp {
            comparison,
            d,
            a: Some(a),
            b: Some(b),
        })?;
        Ok(reg)
    }

    /// Load a value of type `ty` from `address`
    pub fn load(&mut self, ty: Type, address: Operand) -> IrResult<VirtualRegister> {
        self.unary(Opcode::Ld, ty, address)
    }

    /// Store `value` to `address`
    pub fn store(&mut self, address: Operand, value: Operand) -> IrResult<InstructionId> {
        self.emit(InstructionKind::St {
            d: Some(address),
            a: Some(value),
        })
    }

    /// Atomic read-modify-write, returning the old value
    pub fn atom(
        &mut self,
        operation: AtomicOperation,
        ty: Type,
        address: Operand,
        b: Operand,
    ) -> IrResult<VirtualRegister> {
        let (reg, d) = self.dest(ty);
        self.emit(InstructionKind::Atom {
            operation,
            d,
            a: Some(address),
            b: Some(b),
            c: None,
        })?;
        Ok(reg)
    }

    pub fn membar(&mut self, level: MembarLevel) -> IrResult<InstructionId> {
        self.emit(InstructionKind::Membar { level })
    }

    pub fn bar(&mut self) -> IrResult<InstructionId> {
        self.emit(InstructionKind::Bar)
    }

    pub fn launch(&mut self) -> IrResult<InstructionId> {
        self.emit(InstructionKind::Launch)
    }

    /// Unconditional branch
    pub fn branch(&mut self, target: BasicBlockId) -> IrResult<InstructionId> {
        self.emit(InstructionKind::Bra {
            modifier: BranchModifier::Uniform,
            target: Some(Operand::Block(target)),
        })
    }

    /// Branch to `target` when `predicate` holds, otherwise fall through
    pub fn branch_if(
        &mut self,
        predicate: PredicateOperand,
        target: BasicBlockId,
    ) -> IrResult<InstructionId> {
        self.emit_guarded(
            predicate,
            InstructionKind::Bra {
                modifier: BranchModifier::Uniform,
                target: Some(Operand::Block(target)),
            },
        )
    }

    /// Call `callee`, returning one register per entry of `returns`.
    /// Execution continues in the next block in layout order.
    pub fn call(
        &mut self,
        callee: &str,
        arguments: Vec<Operand>,
        returns: &[Type],
    ) -> IrResult<Vec<VirtualRegister>> {
        let mut regs = Vec::with_capacity(returns.len());
        let mut returned = Vec::with_capacity(returns.len());
        for &ty in returns {
            let reg = self.alloc_reg(ty);
            regs.push(reg);
            returned.push(Operand::register(reg, ty));
        }
        self.emit(InstructionKind::Call {
            modifier: BranchModifier::Uniform,
            target: Some(Operand::Function(callee.to_string())),
            link: None,
            returned,
            arguments,
        })?;
        Ok(regs)
    }

    pub fn ret(&mut self) -> IrResult<InstructionId> {
        self.emit(InstructionKind::Ret)
    }

    /// Phi node at the current position; puts the function in SSA form
    pub fn phi(
        &mut self,
        ty: Type,
        incoming: Vec<(Operand, BasicBlockId)>,
    ) -> IrResult<VirtualRegister> {
        let (reg, d) = self.dest(ty);
        let (sources, blocks) = incoming.into_iter().unzip();
        self.emit(InstructionKind::Phi { d, sources, blocks })?;
        self.func.state.ssa = true;
        Ok(reg)
    }

    /// Psi node; the first predicate that holds selects its source
    pub fn psi(
        &mut self,
        ty: Type,
        choices: Vec<(PredicateOperand, Operand)>,
    ) -> IrResult<VirtualRegister> {
        let (reg, d) = self.dest(ty);
        let (predicates, sources) = choices
            .into_iter()
            .map(|(p, s)| (Operand::Predicate(p), s))
            .unzip();
        self.emit(InstructionKind::Psi {
            d,
            predicates,
            sources,
        })?;
        self.func.state.ssa = true;
        Ok(reg)
    }

    /// Access the underlying function
    pub fn func(&self) -> &Function {
        self.func
    }

    /// Access the underlying function mutably
    pub fn func_mut(&mut self) -> &mut Function {
        self.func
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::verify::verify_function;

    #[test]
    fn test_builder_creates_entry() {
        let mut func = Function::new("f");
        let builder = FunctionBuilder::new(&mut func);
        assert_eq!(builder.current_block(), BasicBlockId(0));
        assert_eq!(func.block_count(), 1);
    }

    #[test]
    fn test_builder_straight_line() {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        let x = b.param(Type::I32);
        let one = b.const_int(Type::I32, 1).unwrap();
        let sum = b
            .binary(
                Opcode::Add,
                Type::I32,
                Operand::register(x, Type::I32),
                Operand::register(one, Type::I32),
            )
            .unwrap();
        b.store(Operand::address("out", 0), Operand::register(sum, Type::I32))
            .unwrap();
        b.ret().unwrap();

        assert_eq!(func.instruction_count(), 4);
        assert_eq!(func.params.len(), 1);
        assert!(verify_function(&func).is_ok());
        let text = func.to_string();
        assert!(text.contains("add %r2, %r0, %r1"), "{}", text);
    }

    #[test]
    fn test_builder_refuses_code_after_terminator() {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        b.ret().unwrap();
        assert!(b.const_int(Type::I32, 0).is_err());
    }

    #[test]
    fn test_builder_diamond_with_phi() {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.current_block();
        let then_block = b.create_block();
        let else_block = b.create_block();
        let merge = b.create_block();

        let p = b.param(Type::I1);
        b.branch_if(PredicateOperand::new(p), else_block).unwrap();
        b.switch_to_block(then_block);
        let one = b.const_int(Type::I32, 1).unwrap();
        b.branch(merge).unwrap();
        b.switch_to_block(else_block);
        let two = b.const_int(Type::I32, 2).unwrap();
        b.branch(merge).unwrap();
        b.switch_to_block(merge);
        b.phi(
            Type::I32,
            vec![
                (Operand::register(one, Type::I32), then_block),
                (Operand::register(two, Type::I32), else_block),
            ],
        )
        .unwrap();
        b.ret().unwrap();

        assert_eq!(func.successors(entry), vec![else_block, then_block]);
        assert!(func.state.ssa);
        assert!(verify_function(&func).is_ok());
    }
}
