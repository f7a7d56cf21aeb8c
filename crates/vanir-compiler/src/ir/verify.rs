//! Well-formedness checks
//!
//! Run by the pass manager after every pass. The checks are structural and
//! follow the lowering state flags: once a function has left SSA form no Phi
//! or Psi may remain, and once it is allocated no virtual register may remain.

use super::block::BasicBlockId;
use super::function::Function;
use super::instr::{Instruction, InstructionKind};
use super::module::Module;
use super::opcode::BranchModifier;
use super::operand::Operand;
use crate::error::{CompileError, CompileResult};
use rustc_hash::{FxHashMap, FxHashSet};

/// Check a single function
pub fn verify_function(func: &Function) -> CompileResult<()> {
    if func.is_empty() {
        return Err(CompileError::malformed(&func.name, "function has no blocks"));
    }

    let mut predecessors: FxHashMap<BasicBlockId, FxHashSet<BasicBlockId>> = FxHashMap::default();
    for block in func.blocks() {
        for succ in func.successors(block.id()) {
            predecessors.entry(succ).or_default().insert(block.id());
        }
    }

    let mut seen_ids = FxHashSet::default();
    for block in func.blocks() {
        let bid = block.id();
        let Some(term) = block.terminator() else {
            return Err(CompileError::malformed_at(
                &func.name,
                bid,
                block.back().map(|i| i.id()),
                "block is not terminated",
            ));
        };

        let falls_through = term.is_call() || term.is_conditional();
        if falls_through && func.layout_successor(bid).is_none() {
            return Err(CompileError::malformed_at(
                &func.name,
                bid,
                Some(term.id()),
                "control falls through past the last block",
            ));
        }

        let mut in_phi_prefix = true;
        for inst in block.iter() {
            let here = |message: String| {
                CompileError::malformed_at(&func.name, bid, Some(inst.id()), message)
            };
            if !seen_ids.insert(inst.id()) {
                return Err(here("duplicate instruction id".to_string()));
            }
            if inst.block() != Some(bid) {
                return Err(here("instruction does not know its block".to_string()));
            }
            if inst.opcode().is_ssa_only() && !func.state.ssa {
                return Err(here(format!("'{}' outside SSA form", inst.opcode())));
            }
            if func.state.allocated {
                if let Some(reg) = first_virtual_register(inst) {
                    return Err(here(format!("virtual register {} after allocation", reg)));
                }
            }
            check_branch_target(func, inst).map_err(&here)?;

            match &inst.kind {
                InstructionKind::Phi {
                    sources, blocks, ..
                } => {
                    if !in_phi_prefix {
                        return Err(here("phi after a non-phi instruction".to_string()));
                    }
                    if sources.len() != blocks.len() {
                        return Err(here("phi sources and blocks differ in length".to_string()));
                    }
                    let incoming: FxHashSet<BasicBlockId> = blocks.iter().copied().collect();
                    let preds = predecessors.get(&bid).cloned().unwrap_or_default();
                    if incoming.len() != blocks.len() || incoming != preds {
                        return Err(here(format!(
                            "phi has {} sources but the block has {} predecessors",
                            blocks.len(),
                            preds.len()
                        )));
                    }
                }
                InstructionKind::Psi {
                    predicates,
                    sources,
                    ..
                } => {
                    in_phi_prefix = false;
                    if predicates.len() != sources.len()
                        || predicates
                            .iter()
                            .any(|p| !matches!(p, Operand::Predicate(_)))
                    {
                        return Err(here("psi predicates and sources do not pair up".to_string()));
                    }
                }
                _ => in_phi_prefix = false,
            }
        }
    }
    Ok(())
}

/// Check every function and that every address names a module global
pub fn verify_module(module: &Module) -> CompileResult<()> {
    for func in module.functions() {
        verify_function(func)?;
        for block in func.blocks() {
            for inst in block.iter() {
                for op in inst.reads().iter().map(|op| &**op).chain(inst.writes()) {
                    if let Operand::Address(addr) = op {
                        if module.global(&addr.symbol).is_none() {
                            return Err(CompileError::malformed_at(
                                &func.name,
                                block.id(),
                                Some(inst.id()),
                                format!("reference to unknown global '{}'", addr.symbol),
                            ));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_branch_target(func: &Function, inst: &Instruction) -> Result<(), String> {
    match &inst.kind {
        InstructionKind::Bra { modifier, target } => match target {
            None => Err("branch without a target".to_string()),
            Some(Operand::Block(b)) if func.block(*b).is_none() => {
                Err(format!("branch to unknown block {}", b))
            }
            Some(Operand::Block(_)) => Ok(()),
            Some(other) if other.reg().is_some() || *modifier == BranchModifier::Multitarget => {
                Ok(())
            }
            Some(other) => Err(format!("'{}' is not a branch target", other)),
        },
        InstructionKind::Call { target: None, .. } => Err("call without a target".to_string()),
        _ => Ok(()),
    }
}

fn first_virtual_register(inst: &Instruction) -> Option<super::operand::VirtualRegister> {
    inst.uses()
        .into_iter()
        .chain(inst.defs())
        .find_map(|r| r.as_virtual())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::opcode::Opcode;
    use crate::ir::operand::PhysicalRegister;
    use crate::ir::types::Type;

    fn make_ret_function() -> Function {
        let mut func = Function::new("f");
        let b = func.create_block();
        let ret = func.create_instruction(Opcode::Ret).unwrap();
        func.block_mut(b).unwrap().push_back(ret).unwrap();
        func
    }

    #[test]
    fn test_empty_function_is_malformed() {
        assert!(verify_function(&Function::new("f")).is_err());
    }

    #[test]
    fn test_unterminated_block() {
        let mut func = Function::new("f");
        let b = func.create_block();
        let mut add = func.create_instruction(Opcode::Add).unwrap();
        add.set_d(func.new_register_operand(Type::I32)).unwrap();
        func.block_mut(b).unwrap().push_back(add).unwrap();
        let err = verify_function(&func).unwrap_err();
        assert!(matches!(
            err,
            CompileError::MalformedIr { block: Some(bb), instruction: Some(_), .. } if bb == b
        ));
    }

    #[test]
    fn test_well_formed_function() {
        assert!(verify_function(&make_ret_function()).is_ok());
    }

    #[test]
    fn test_branch_to_unknown_block() {
        let mut func = Function::new("f");
        let b = func.create_block();
        let mut bra = func.create_instruction(Opcode::Bra).unwrap();
        bra.set_target(Operand::Block(BasicBlockId(42))).unwrap();
        func.block_mut(b).unwrap().push_back(bra).unwrap();
        assert!(verify_function(&func).is_err());
    }

    #[test]
    fn test_call_needs_continuation() {
        let mut func = Function::new("f");
        let b = func.create_block();
        let mut call = func.create_instruction(Opcode::Call).unwrap();
        call.set_target(Operand::Function("g".into())).unwrap();
        func.block_mut(b).unwrap().push_back(call).unwrap();
        assert!(verify_function(&func).is_err());
    }

    #[test]
    fn test_virtual_register_after_allocation() {
        let mut func = make_ret_function();
        let entry = func.entry().unwrap();
        let mut mv = func.create_instruction(Opcode::Bitcast).unwrap();
        mv.set_d(Operand::register(PhysicalRegister::general(0), Type::I32))
            .unwrap();
        mv.set_a(func.new_register_operand(Type::I32)).unwrap();
        func.block_mut(entry)
            .unwrap()
            .insert_before_terminator(mv)
            .unwrap();
        assert!(verify_function(&func).is_ok());
        func.state.allocated = true;
        assert!(verify_function(&func).is_err());
    }

    #[test]
    fn test_phi_requires_ssa_and_matching_predecessors() {
        let mut func = Function::new("f");
        let a = func.create_block();
        let b = func.create_block();
        let mut bra = func.create_instruction(Opcode::Bra).unwrap();
        bra.set_target(Operand::Block(b)).unwrap();
        func.block_mut(a).unwrap().push_back(bra).unwrap();

        let x = func.new_register_operand(Type::I32);
        let mut phi = func.create_instruction(Opcode::Phi).unwrap();
        phi.set_d(func.new_register_operand(Type::I32)).unwrap();
        phi.add_phi_source(x, a).unwrap();
        let ret = func.create_instruction(Opcode::Ret).unwrap();
        let block = func.block_mut(b).unwrap();
        block.push_back(phi).unwrap();
        block.push_back(ret).unwrap();

        assert!(verify_function(&func).is_err());
        func.state.ssa = true;
        assert!(verify_function(&func).is_ok());

        let mut bad = func.clone();
        for inst in bad.block_mut(b).unwrap().iter_mut() {
            let _ = inst.add_phi_source(Operand::immediate(0, Type::I32), BasicBlockId(7));
        }
        assert!(verify_function(&bad).is_err());
    }
}
