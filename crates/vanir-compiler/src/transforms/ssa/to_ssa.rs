//! SSA construction
//!
//! Pruned SSA in two steps. Phi nodes are placed at the iterated dominance
//! frontier of each register's definition blocks, but only where the register
//! is live on entry. Definitions are then renamed by a walk over the
//! dominator tree, keeping one stack of current names per register.
//! An entry block that is also a loop header first gets a fresh block in
//! front of it.
//!
//! A register with a guarded definition is left alone: a predicated write
//! merges with the old value, which SSA cannot express without a Psi.

use crate::analysis::{ControlFlowGraph, DominatorTree, Liveness};
use crate::context::Context;
use crate::error::CompileResult;
use crate::ir::{
    BasicBlockId, Function, InstructionId, InstructionKind, Operand, Register, Type,
    VirtualRegister,
};
use crate::transforms::pass::{Pass, PassOptions};
use crate::transforms::ssa::split_entry;
use rustc_hash::{FxHashMap, FxHashSet};

/// Converts functions into pruned SSA form
#[derive(Debug, Default)]
pub struct ConvertToSsa;

impl ConvertToSsa {
    pub const NAME: &'static str = "ConvertToSSAPass";

    pub fn new() -> Self {
        ConvertToSsa
    }
}

impl Pass for ConvertToSsa {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configure(&mut self, options: &PassOptions) {
        options.warn_unknown(Self::NAME, &[]);
    }

    fn run_on_function(&self, func: &mut Function, _ctx: &Context) -> CompileResult<()> {
        if func.state.ssa {
            log::debug!("'{}' is already in SSA form", func.name);
            return Ok(());
        }
        if func.is_empty() {
            return Ok(());
        }
        let phis = construct_ssa(func)?;
        func.state.ssa = true;
        log::debug!("'{}': inserted {} phi nodes", func.name, phis);
        Ok(())
    }
}

/// Rewrite `func` into SSA form, returning the number of Phi nodes inserted
pub fn construct_ssa(func: &mut Function) -> CompileResult<usize> {
    // a Phi at a looping entry needs an edge for the first iteration
    split_entry(func)?;
    let cfg = ControlFlowGraph::compute(func);
    let dom = DominatorTree::compute(&cfg);
    let liveness = Liveness::compute(func, &cfg);
    let Some(entry) = cfg.entry else {
        return Ok(0);
    };

    let mut def_blocks: FxHashMap<VirtualRegister, Vec<BasicBlockId>> = FxHashMap::default();
    let mut def_count: FxHashMap<VirtualRegister, usize> = FxHashMap::default();
    let mut excluded: FxHashSet<VirtualRegister> = FxHashSet::default();
    let mut types: FxHashMap<VirtualRegister, Type> = FxHashMap::default();

    for block in func.blocks() {
        let bid = block.id();
        for inst in block.iter() {
            for op in inst.reads().iter().map(|op| &**op).chain(inst.writes()) {
                record_type(op, &mut types);
            }
            for reg in inst.defs() {
                let Some(v) = reg.as_virtual() else {
                    continue;
                };
                if inst.is_conditional() || !dom.is_reachable(bid) {
                    excluded.insert(v);
                    continue;
                }
                *def_count.entry(v).or_default() += 1;
                let sites = def_blocks.entry(v).or_default();
                if sites.last() != Some(&bid) {
                    sites.push(bid);
                }
            }
        }
    }

    // A register live into the entry is implicitly defined there
    for reg in liveness.live_in(entry) {
        if let Some(v) = reg.as_virtual() {
            if let Some(sites) = def_blocks.get_mut(&v) {
                if !sites.contains(&entry) {
                    sites.push(entry);
                }
                *def_count.entry(v).or_default() += 1;
            }
        }
    }

    let mut registers: Vec<VirtualRegister> = def_blocks
        .keys()
        .copied()
        .filter(|v| !excluded.contains(v))
        .collect();
    registers.sort_unstable();

    let mut placements: FxHashMap<BasicBlockId, Vec<VirtualRegister>> = FxHashMap::default();
    let mut candidates: FxHashSet<VirtualRegister> = FxHashSet::default();
    for v in registers {
        let mut placed = false;
        for block in dom.iterated_frontier(def_blocks[&v].iter().copied()) {
            if liveness.is_live_in(block, Register::Virtual(v)) {
                placements.entry(block).or_default().push(v);
                placed = true;
            }
        }
        if placed || def_count.get(&v).copied().unwrap_or(0) > 1 {
            candidates.insert(v);
        }
    }

    let mut phi_origin: FxHashMap<InstructionId, VirtualRegister> = FxHashMap::default();
    let mut inserted = 0;
    for block in func.block_ids() {
        let Some(regs) = placements.get(&block) else {
            continue;
        };
        for (index, &v) in regs.iter().enumerate() {
            let ty = register_type(func, &types, v);
            let phi = func.instruction(InstructionKind::Phi {
                d: Some(Operand::register(v, ty)),
                sources: Vec::new(),
                blocks: Vec::new(),
            });
            phi_origin.insert(phi.id(), v);
            func.try_block_mut(block)?.insert(index, phi)?;
            inserted += 1;
        }
    }

    let mut renamer = Renamer {
        candidates,
        types,
        phi_origin,
        stacks: FxHashMap::default(),
    };
    renamer.rename_block(func, &cfg, &dom, entry)?;
    renamer.fill_unreachable_edges(func, &cfg, &dom)?;
    Ok(inserted)
}

fn record_type(op: &Operand, types: &mut FxHashMap<VirtualRegister, Type>) {
    match op {
        Operand::Register(r) => {
            if let Some(v) = r.reg.as_virtual() {
                types.entry(v).or_insert(r.ty);
            }
        }
        Operand::Predicate(p) => {
            if let Some(v) = p.reg.and_then(|r| r.as_virtual()) {
                types.entry(v).or_insert(Type::I1);
            }
        }
        Operand::Indirect(ind) => {
            if let Some(v) = ind.base.as_virtual() {
                types.entry(v).or_insert(Type::Pointer);
            }
        }
        _ => {}
    }
}

fn register_type(
    func: &Function,
    types: &FxHashMap<VirtualRegister, Type>,
    v: VirtualRegister,
) -> Type {
    types
        .get(&v)
        .copied()
        .or_else(|| func.register_type(v))
        .unwrap_or(Type::I64)
}

struct Renamer {
    candidates: FxHashSet<VirtualRegister>,
    types: FxHashMap<VirtualRegister, Type>,
    /// Inserted Phi -> the register it merges
    phi_origin: FxHashMap<InstructionId, VirtualRegister>,
    /// Current SSA names, innermost last
    stacks: FxHashMap<VirtualRegister, Vec<VirtualRegister>>,
}

impl Renamer {
    fn current(&self, v: VirtualRegister) -> VirtualRegister {
        self.stacks
            .get(&v)
            .and_then(|stack| stack.last())
            .copied()
            .unwrap_or(v)
    }

    fn rename_block(
        &mut self,
        func: &mut Function,
        cfg: &ControlFlowGraph,
        dom: &DominatorTree,
        block: BasicBlockId,
    ) -> CompileResult<()> {
        let mut pushed: Vec<VirtualRegister> = Vec::new();
        let mut insts = func.try_block_mut(block)?.clear();

        for inst in &mut insts {
            if let Some(&orig) = self.phi_origin.get(&inst.id()) {
                let ty = register_type(func, &self.types, orig);
                let name = func.new_register(ty);
                inst.for_each_def_mut(|r| *r = Register::Virtual(name));
                self.stacks.entry(orig).or_default().push(name);
                pushed.push(orig);
                continue;
            }

            inst.for_each_use_mut(|r| {
                if let Some(v) = r.as_virtual() {
                    if self.candidates.contains(&v) {
                        *r = Register::Virtual(self.current(v));
                    }
                }
            });

            let mut renamed = Vec::new();
            let Renamer {
                candidates, types, ..
            } = &*self;
            inst.for_each_def_mut(|r| {
                if let Some(v) = r.as_virtual() {
                    if candidates.contains(&v) {
                        let name = func.new_register(register_type_of(types, v));
                        *r = Register::Virtual(name);
                        renamed.push((v, name));
                    }
                }
            });
            for (orig, name) in renamed {
                log::trace!("{}: {} renamed to {}", inst.id(), orig, name);
                self.stacks.entry(orig).or_default().push(name);
                pushed.push(orig);
            }
        }
        func.try_block_mut(block)?.replace_instructions(insts)?;

        for &succ in cfg.successors(block) {
            let Some(succ_block) = func.block_mut(succ) else {
                continue;
            };
            for inst in succ_block.iter_mut() {
                if !matches!(inst.kind, InstructionKind::Phi { .. }) {
                    break;
                }
                let Some(&orig) = self.phi_origin.get(&inst.id()) else {
                    continue;
                };
                let ty = register_type_of(&self.types, orig);
                inst.add_phi_source(Operand::register(self.current(orig), ty), block)?;
            }
        }

        for &child in dom.children(block) {
            self.rename_block(func, cfg, dom, child)?;
        }

        for orig in pushed {
            if let Some(stack) = self.stacks.get_mut(&orig) {
                stack.pop();
            }
        }
        Ok(())
    }

    /// Edges from unreachable blocks carry the register's original name
    fn fill_unreachable_edges(
        &self,
        func: &mut Function,
        cfg: &ControlFlowGraph,
        dom: &DominatorTree,
    ) -> CompileResult<()> {
        for block in cfg.reverse_post_order() {
            let dead_preds: Vec<BasicBlockId> = cfg
                .predecessors(*block)
                .iter()
                .copied()
                .filter(|p| !dom.is_reachable(*p))
                .collect();
            if dead_preds.is_empty() {
                continue;
            }
            let Some(target) = func.block_mut(*block) else {
                continue;
            };
            for inst in target.iter_mut() {
                let Some(&orig) = self.phi_origin.get(&inst.id()) else {
                    continue;
                };
                let ty = register_type_of(&self.types, orig);
                for &pred in &dead_preds {
                    inst.add_phi_source(Operand::register(orig, ty), pred)?;
                }
            }
        }
        Ok(())
    }
}

fn register_type_of(types: &FxHashMap<VirtualRegister, Type>, v: VirtualRegister) -> Type {
    types.get(&v).copied().unwrap_or(Type::I64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{verify_function, FunctionBuilder, Opcode, PredicateOperand};

    fn phis(func: &Function, block: BasicBlockId) -> Vec<&crate::ir::Instruction> {
        func.block(block)
            .unwrap()
            .iter()
            .filter(|i| i.opcode() == Opcode::Phi)
            .collect()
    }

    /// A -> {B, C} -> D, `x` defined in A, redefined in B, read in D
    fn make_diamond() -> (Function, [BasicBlockId; 4], VirtualRegister) {
        let mut func = Function::new("diamond");
        let mut b = FunctionBuilder::new(&mut func);
        let a = b.current_block();
        let bb = b.create_block();
        let c = b.create_block();
        let d = b.create_block();
        let p = b.param(Type::I1);
        let x = b.const_int(Type::I32, 1).unwrap();
        b.branch_if(PredicateOperand::new(p), c).unwrap();
        b.switch_to_block(bb);
        b.assign(x, Type::I32, Operand::immediate(2, Type::I32))
            .unwrap();
        b.branch(d).unwrap();
        b.switch_to_block(c);
        b.branch(d).unwrap();
        b.switch_to_block(d);
        b.store(Operand::address("out", 0), Operand::register(x, Type::I32))
            .unwrap();
        b.ret().unwrap();
        (func, [a, bb, c, d], x)
    }

    #[test]
    fn test_phi_placed_at_merge() {
        let (mut func, [a, bb, c, d], x) = make_diamond();
        ConvertToSsa::new()
            .run_on_function(&mut func, &Context::default())
            .unwrap();
        assert!(func.state.ssa);
        assert!(phis(&func, a).is_empty());
        assert!(phis(&func, bb).is_empty());
        assert!(phis(&func, c).is_empty());

        let merge = phis(&func, d);
        assert_eq!(merge.len(), 1);
        let phi = merge[0];
        let from_b = phi.phi_source(bb).unwrap().reg().copied().unwrap();
        let from_c = phi.phi_source(c).unwrap().reg().copied().unwrap();
        assert_ne!(from_b, from_c);
        assert_ne!(from_b, Register::Virtual(x));

        // the store reads the phi result
        let store = func.block(d).unwrap().get(1).unwrap();
        assert_eq!(store.uses(), phi.defs());
        verify_function(&func).unwrap();
    }

    #[test]
    fn test_single_definition_keeps_name() {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        let x = b.const_int(Type::I32, 3).unwrap();
        b.store(Operand::address("out", 0), Operand::register(x, Type::I32))
            .unwrap();
        b.ret().unwrap();
        let before = func.to_string();
        let inserted = construct_ssa(&mut func).unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(func.to_string(), before);
    }

    #[test]
    fn test_loop_counter_gets_header_phi() {
        let mut func = Function::new("loop");
        let mut b = FunctionBuilder::new(&mut func);
        let head = b.create_block();
        let exit = b.create_block();
        let i = b.const_int(Type::I32, 0).unwrap();
        b.branch(head).unwrap();
        b.switch_to_block(head);
        let next = b
            .binary(
                Opcode::Add,
                Type::I32,
                Operand::register(i, Type::I32),
                Operand::immediate(1, Type::I32),
            )
            .unwrap();
        b.assign(i, Type::I32, Operand::register(next, Type::I32))
            .unwrap();
        let done = b
            .setp(
                crate::ir::Comparison::OrderedLessThan,
                Operand::register(i, Type::I32),
                Operand::immediate(10, Type::I32),
            )
            .unwrap();
        b.branch_if(PredicateOperand::new(done), head).unwrap();
        b.switch_to_block(exit);
        b.ret().unwrap();
        let entry = func.entry().unwrap();

        construct_ssa(&mut func).unwrap();
        let header = phis(&func, head);
        assert_eq!(header.len(), 1);
        assert!(header[0].phi_source(entry).is_some());
        assert!(header[0].phi_source(head).is_some());
        assert!(phis(&func, exit).is_empty());
    }

    #[test]
    fn test_loop_through_entry_carries_value() {
        let mut func = Function::new("spin");
        let mut b = FunctionBuilder::new(&mut func);
        let body = b.current_block();
        let exit = b.create_block();
        let p = b.param(Type::I1);
        let x = b.param(Type::I32);
        let next = b
            .binary(
                Opcode::Add,
                Type::I32,
                Operand::register(x, Type::I32),
                Operand::immediate(1, Type::I32),
            )
            .unwrap();
        b.assign(x, Type::I32, Operand::register(next, Type::I32))
            .unwrap();
        b.branch_if(PredicateOperand::new(p), body).unwrap();
        b.switch_to_block(exit);
        b.store(Operand::address("out", 0), Operand::register(x, Type::I32))
            .unwrap();
        b.ret().unwrap();

        assert_eq!(construct_ssa(&mut func).unwrap(), 1);
        let prologue = func.entry().unwrap();
        assert_ne!(prologue, body);

        let header = phis(&func, body);
        assert_eq!(header.len(), 1);
        let phi = header[0];
        let first = phi.phi_source(prologue).and_then(|s| s.reg()).copied();
        assert_eq!(first, Some(Register::Virtual(x)));

        // the add reads the merged value and the back edge carries the copy
        let insts = func.block(body).unwrap();
        let add = insts.get(1).unwrap();
        assert_eq!(add.uses(), phi.defs());
        let copy = insts.get(2).unwrap();
        let carried = phi.phi_source(body).and_then(|s| s.reg()).copied();
        assert_eq!(carried, copy.defs().first().copied());
        assert_ne!(carried, Some(Register::Virtual(x)));
        func.state.ssa = true;
        verify_function(&func).unwrap();
    }

    #[test]
    fn test_guarded_definition_not_renamed() {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        let p = b.param(Type::I1);
        let x = b.const_int(Type::I32, 0).unwrap();
        b.emit_guarded(
            PredicateOperand::new(p),
            InstructionKind::Unary {
                opcode: Opcode::Bitcast,
                d: Some(Operand::register(x, Type::I32)),
                a: Some(Operand::immediate(5, Type::I32)),
            },
        )
        .unwrap();
        b.store(Operand::address("out", 0), Operand::register(x, Type::I32))
            .unwrap();
        b.ret().unwrap();

        construct_ssa(&mut func).unwrap();
        let entry = func.entry().unwrap();
        let store = func.block(entry).unwrap().get(2).unwrap();
        assert_eq!(store.uses(), vec![Register::Virtual(x)]);
    }
}
