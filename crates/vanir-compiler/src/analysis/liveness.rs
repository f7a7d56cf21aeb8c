//! Register liveness
//!
//! Classic backward dataflow over blocks. Phi sources are live-out of the
//! predecessor they flow in from, not live-in of the Phi's block, and a Phi
//! destination is defined at the top of its block. A guarded definition does
//! not kill the register, since the old value survives when the guard fails.

use super::cfg::ControlFlowGraph;
use crate::ir::{BasicBlockId, Function, Instruction, InstructionKind, Register};
use rustc_hash::{FxHashMap, FxHashSet};

pub type RegisterSet = FxHashSet<Register>;

/// Live-in and live-out register sets per block
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    live_in: FxHashMap<BasicBlockId, RegisterSet>,
    live_out: FxHashMap<BasicBlockId, RegisterSet>,
}

impl Liveness {
    pub fn compute(func: &Function, cfg: &ControlFlowGraph) -> Self {
        let mut upward_exposed: FxHashMap<BasicBlockId, RegisterSet> = FxHashMap::default();
        let mut killed: FxHashMap<BasicBlockId, RegisterSet> = FxHashMap::default();
        let mut phi_uses: FxHashMap<BasicBlockId, RegisterSet> = FxHashMap::default();

        for block in func.blocks() {
            let mut ue = RegisterSet::default();
            let mut kill = RegisterSet::default();
            for inst in block.iter() {
                if let InstructionKind::Phi {
                    sources, blocks, ..
                } = &inst.kind
                {
                    for (source, pred) in sources.iter().zip(blocks) {
                        if let Some(reg) = source.reg() {
                            phi_uses.entry(*pred).or_default().insert(*reg);
                        }
                    }
                    kill.extend(inst.defs());
                    continue;
                }
                for reg in inst.uses() {
                    if !kill.contains(&reg) {
                        ue.insert(reg);
                    }
                }
                if !inst.is_conditional() {
                    kill.extend(inst.defs());
                }
            }
            upward_exposed.insert(block.id(), ue);
            killed.insert(block.id(), kill);
        }

        let mut live_in: FxHashMap<BasicBlockId, RegisterSet> = FxHashMap::default();
        let mut live_out: FxHashMap<BasicBlockId, RegisterSet> = FxHashMap::default();
        let order: Vec<BasicBlockId> = cfg.blocks().iter().rev().copied().collect();

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &order {
                let mut out = phi_uses.get(&block).cloned().unwrap_or_default();
                for succ in cfg.successors(block) {
                    if let Some(succ_in) = live_in.get(succ) {
                        out.extend(succ_in.iter().copied());
                    }
                }

                let mut live = upward_exposed.get(&block).cloned().unwrap_or_default();
                let kill = killed.get(&block);
                live.extend(
                    out.iter()
                        .filter(|&r| !kill.is_some_and(|k| k.contains(r)))
                        .copied(),
                );

                if live_in.get(&block) != Some(&live) {
                    live_in.insert(block, live);
                    changed = true;
                }
                if live_out.get(&block) != Some(&out) {
                    live_out.insert(block, out);
                    changed = true;
                }
            }
        }

        Liveness { live_in, live_out }
    }

    pub fn live_in(&self, block: BasicBlockId) -> &RegisterSet {
        self.live_in.get(&block).unwrap_or(empty())
    }

    pub fn live_out(&self, block: BasicBlockId) -> &RegisterSet {
        self.live_out.get(&block).unwrap_or(empty())
    }

    pub fn is_live_in(&self, block: BasicBlockId, reg: Register) -> bool {
        self.live_in(block).contains(&reg)
    }
}

fn empty() -> &'static RegisterSet {
    static EMPTY: std::sync::OnceLock<RegisterSet> = std::sync::OnceLock::new();
    EMPTY.get_or_init(RegisterSet::default)
}

/// Step `live` backwards over one instruction: afterwards it holds what is live before `inst`
pub fn step_backward(live: &mut RegisterSet, inst: &Instruction) {
    if !inst.is_conditional() {
        for reg in inst.defs() {
            live.remove(&reg);
        }
    }
    if !matches!(inst.kind, InstructionKind::Phi { .. }) {
        live.extend(inst.uses());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Opcode, Operand, PredicateOperand, Type, VirtualRegister};

    fn v(n: VirtualRegister) -> Register {
        Register::Virtual(n)
    }

    #[test]
    fn test_straight_line() {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        let x = b.param(Type::I32);
        let y = b
            .binary(
                Opcode::Add,
                Type::I32,
                Operand::register(x, Type::I32),
                Operand::immediate(1, Type::I32),
            )
            .unwrap();
        b.store(Operand::address("out", 0), Operand::register(y, Type::I32))
            .unwrap();
        b.ret().unwrap();
        let entry = func.entry().unwrap();

        let cfg = ControlFlowGraph::compute(&func);
        let live = Liveness::compute(&func, &cfg);
        assert!(live.is_live_in(entry, v(x)));
        assert!(!live.is_live_in(entry, v(y)));
        assert!(live.live_out(entry).is_empty());
    }

    #[test]
    fn test_value_live_through_branches() {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.current_block();
        let left = b.create_block();
        let right = b.create_block();
        let merge = b.create_block();
        let p = b.param(Type::I1);
        let x = b.const_int(Type::I32, 7).unwrap();
        b.branch_if(PredicateOperand::new(p), right).unwrap();
        b.switch_to_block(left);
        b.branch(merge).unwrap();
        b.switch_to_block(right);
        b.branch(merge).unwrap();
        b.switch_to_block(merge);
        b.store(Operand::address("out", 0), Operand::register(x, Type::I32))
            .unwrap();
        b.ret().unwrap();

        let cfg = ControlFlowGraph::compute(&func);
        let live = Liveness::compute(&func, &cfg);
        assert!(live.live_out(entry).contains(&v(x)));
        assert!(!live.live_out(entry).contains(&v(p)));
        assert!(live.is_live_in(left, v(x)));
        assert!(live.is_live_in(right, v(x)));
        assert!(live.is_live_in(merge, v(x)));
    }

    #[test]
    fn test_phi_sources_live_on_their_edge() {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        let p = b.param(Type::I1);
        let left = b.create_block();
        let right = b.create_block();
        let merge = b.create_block();
        b.branch_if(PredicateOperand::new(p), right).unwrap();
        b.switch_to_block(left);
        let one = b.const_int(Type::I32, 1).unwrap();
        b.branch(merge).unwrap();
        b.switch_to_block(right);
        let two = b.const_int(Type::I32, 2).unwrap();
        b.branch(merge).unwrap();
        b.switch_to_block(merge);
        let phi = b
            .phi(
                Type::I32,
                vec![
                    (Operand::register(one, Type::I32), left),
                    (Operand::register(two, Type::I32), right),
                ],
            )
            .unwrap();
        b.store(Operand::address("out", 0), Operand::register(phi, Type::I32))
            .unwrap();
        b.ret().unwrap();

        let cfg = ControlFlowGraph::compute(&func);
        let live = Liveness::compute(&func, &cfg);
        assert!(live.live_out(left).contains(&v(one)));
        assert!(!live.live_out(left).contains(&v(two)));
        assert!(live.live_out(right).contains(&v(two)));
        assert!(!live.is_live_in(merge, v(one)));
        assert!(!live.is_live_in(merge, v(phi)));
    }

    #[test]
    fn test_guarded_definition_does_not_kill() {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        let p = b.param(Type::I1);
        let x = b.param(Type::I32);
        let mut mv = b.func_mut().create_instruction(Opcode::Bitcast).unwrap();
        mv.set_d(Operand::register(x, Type::I32)).unwrap();
        mv.set_a(Operand::immediate(0, Type::I32)).unwrap();
        mv.set_guard(PredicateOperand::new(p));
        let entry = b.current_block();
        b.func_mut().block_mut(entry).unwrap().push_back(mv).unwrap();
        b.store(Operand::address("out", 0), Operand::register(x, Type::I32))
            .unwrap();
        b.ret().unwrap();

        let cfg = ControlFlowGraph::compute(&func);
        let live = Liveness::compute(&func, &cfg);
        assert!(live.is_live_in(entry, v(x)));
        assert!(live.is_live_in(entry, v(p)));
    }
}
