//! SSA destruction
//!
//! Psi nodes become guarded copies. Every Phi node becomes one copy per
//! incoming edge; the copies of an edge form a parallel copy, which is
//! sequentialised so that no copy overwrites a value another one still
//! needs (cycles go through a fresh temporary). An edge whose source has
//! more than one successor is split first, otherwise the copies would run
//! on paths that never reach the Phi.

use crate::analysis::ControlFlowGraph;
use crate::context::Context;
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    BasicBlockId, BranchModifier, Function, Instruction, InstructionKind, Opcode, Operand,
    PredicateCondition, PredicateOperand, Register, RegisterOperand, Type,
};
use crate::transforms::pass::{Pass, PassOptions};
use rustc_hash::FxHashSet;

/// Takes functions out of SSA form
#[derive(Debug, Default)]
pub struct ConvertFromSsa;

impl ConvertFromSsa {
    pub const NAME: &'static str = "ConvertFromSSAPass";

    pub fn new() -> Self {
        ConvertFromSsa
    }
}

impl Pass for ConvertFromSsa {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configure(&mut self, options: &PassOptions) {
        options.warn_unknown(Self::NAME, &[]);
    }

    fn run_on_function(&self, func: &mut Function, _ctx: &Context) -> CompileResult<()> {
        if !func.state.ssa {
            log::debug!("'{}' is not in SSA form", func.name);
            return Ok(());
        }
        destruct_ssa(func)?;
        func.state.ssa = false;
        Ok(())
    }
}

/// Replace every Phi and Psi in `func` with copies
pub fn destruct_ssa(func: &mut Function) -> CompileResult<()> {
    drop_redundant_guards(func);
    let psis = lower_psis(func)?;
    let phis = lower_phis(func)?;
    log::debug!(
        "'{}': lowered {} psi and {} phi nodes",
        func.name,
        psis,
        phis
    );
    Ok(())
}

/// `@p bra next` where `next` is also the fallthrough is an unconditional jump
fn drop_redundant_guards(func: &mut Function) {
    for block in func.block_ids() {
        let next = func.layout_successor(block);
        let Some(term) = func.block_mut(block).and_then(|b| b.terminator_mut()) else {
            continue;
        };
        let redundant = term.is_conditional()
            && matches!(term.kind, InstructionKind::Bra { .. })
            && term.target().and_then(Operand::as_block).is_some()
            && term.target().and_then(Operand::as_block) == next;
        if redundant {
            term.take_guard();
        }
    }
}

fn copy_instruction(func: &mut Function, dest: Operand, source: Operand) -> Instruction {
    func.instruction(InstructionKind::Unary {
        opcode: Opcode::Bitcast,
        d: Some(dest),
        a: Some(source),
    })
}

/// Lower Psi nodes in place. Copies are emitted last predicate first, so the
/// first predicate that holds writes last and wins. A guarded Psi selects
/// only while its guard holds, so each copy runs under the conjunction.
fn lower_psis(func: &mut Function) -> CompileResult<usize> {
    let mut lowered = 0;
    for block in func.block_ids() {
        let has_psi = func
            .block(block)
            .is_some_and(|b| b.iter().any(|i| i.opcode() == Opcode::Psi));
        if !has_psi {
            continue;
        }

        let insts = func.try_block_mut(block)?.clear();
        let mut rewritten = Vec::with_capacity(insts.len());
        for inst in insts {
            if inst.opcode() != Opcode::Psi {
                rewritten.push(inst);
                continue;
            }
            let id = inst.id();
            let guard = inst.guard().clone();
            let InstructionKind::Psi {
                d: Some(dest),
                predicates,
                sources,
            } = inst.kind
            else {
                return Err(CompileError::malformed_at(
                    &func.name,
                    block,
                    Some(id),
                    "psi without a destination",
                ));
            };
            lowered += 1;
            if guard.condition == PredicateCondition::Never {
                continue;
            }

            // every selector is evaluated before the destination is written
            let mut selected = Vec::with_capacity(sources.len());
            for (predicate, source) in predicates.into_iter().zip(sources) {
                let Operand::Predicate(predicate) = predicate else {
                    return Err(CompileError::malformed_at(
                        &func.name,
                        block,
                        Some(id),
                        "psi predicate is not a predicate operand",
                    ));
                };
                if predicate.condition == PredicateCondition::Never {
                    continue;
                }
                let predicate = conjoin(func, &guard, predicate, &mut rewritten);
                selected.push((predicate, source));
            }
            for (predicate, source) in selected.into_iter().rev() {
                let mut copy = copy_instruction(func, dest.clone(), source);
                copy.set_guard(predicate);
                rewritten.push(copy);
            }
        }
        func.try_block_mut(block)?.replace_instructions(rewritten)?;
    }
    Ok(lowered)
}

/// Predicate holding when both `guard` and `predicate` do. Unless one of
/// them is constant, a fresh predicate register is cleared, set under
/// `guard` and cleared again unless `predicate` holds.
fn conjoin(
    func: &mut Function,
    guard: &PredicateOperand,
    predicate: PredicateOperand,
    out: &mut Vec<Instruction>,
) -> PredicateOperand {
    if guard.is_always_true() {
        return predicate;
    }
    if predicate.is_always_true() {
        return guard.clone();
    }
    let both = func.new_register(Type::I1);
    let steps = [
        (PredicateOperand::always(), 0),
        (guard.clone(), 1),
        (predicate.negated(), 0),
    ];
    for (when, value) in steps {
        let mut step = copy_instruction(
            func,
            Operand::register(both, Type::I1),
            Operand::immediate(value, Type::I1),
        );
        step.set_guard(when);
        out.push(step);
    }
    PredicateOperand::new(both)
}

/// Incoming values of the Phi nodes at the top of one block
struct PhiGroup {
    dests: Vec<RegisterOperand>,
    /// (predecessor, source per dest)
    edges: Vec<(BasicBlockId, Vec<Operand>)>,
}

fn collect_phis(func: &Function, block: BasicBlockId) -> CompileResult<Option<PhiGroup>> {
    let Some(bb) = func.block(block) else {
        return Ok(None);
    };
    let mut dests = Vec::new();
    let mut incoming: Vec<&Instruction> = Vec::new();
    for inst in bb.iter() {
        let InstructionKind::Phi { d, .. } = &inst.kind else {
            break;
        };
        let Some(Operand::Register(dest)) = d else {
            return Err(CompileError::malformed_at(
                &func.name,
                block,
                Some(inst.id()),
                "phi destination is not a register",
            ));
        };
        dests.push(dest.clone());
        incoming.push(inst);
    }
    if dests.is_empty() {
        return Ok(None);
    }

    let mut preds: Vec<BasicBlockId> = Vec::new();
    if let Some(InstructionKind::Phi { blocks, .. }) = incoming.first().map(|i| &i.kind) {
        preds.extend(blocks.iter().copied());
    }
    let mut edges = Vec::with_capacity(preds.len());
    for pred in preds {
        let mut sources = Vec::with_capacity(incoming.len());
        for phi in &incoming {
            let source = phi.phi_source(pred).cloned().ok_or_else(|| {
                CompileError::malformed_at(
                    &func.name,
                    block,
                    Some(phi.id()),
                    format!("phi has no source for predecessor {}", pred),
                )
            })?;
            sources.push(source);
        }
        edges.push((pred, sources));
    }
    Ok(Some(PhiGroup { dests, edges }))
}

fn lower_phis(func: &mut Function) -> CompileResult<usize> {
    let cfg = ControlFlowGraph::compute(func);
    let mut lowered = 0;
    for block in func.block_ids() {
        let Some(group) = collect_phis(func, block)? else {
            continue;
        };
        lowered += group.dests.len();
        func.try_block_mut(block)?
            .retain(|i| i.opcode() != Opcode::Phi);

        let dest_regs: FxHashSet<Register> = group.dests.iter().map(|d| d.reg).collect();
        for (pred, sources) in group.edges {
            let at = edge_block(func, &cfg, pred, block, &dest_regs)?;
            let copies = group.dests.iter().cloned().zip(sources).collect();
            for (dest, source) in sequentialize(func, copies) {
                let copy = copy_instruction(func, Operand::Register(dest), source);
                func.try_block_mut(at)?.insert_before_terminator(copy)?;
            }
        }
    }
    Ok(lowered)
}

/// Block that receives the copies for the edge `pred -> succ`, splitting the
/// edge when copies placed at the end of `pred` would be wrong
fn edge_block(
    func: &mut Function,
    cfg: &ControlFlowGraph,
    pred: BasicBlockId,
    succ: BasicBlockId,
    dests: &FxHashSet<Register>,
) -> CompileResult<BasicBlockId> {
    let needs_split = cfg.successors(pred).len() > 1
        || func
            .block(pred)
            .and_then(|b| b.terminator())
            .is_some_and(|t| t.is_call() || t.uses().iter().any(|r| dests.contains(r)));
    if needs_split {
        split_edge(func, pred, succ)
    } else {
        Ok(pred)
    }
}

/// Insert an empty block on the edge `pred -> succ` and return it
pub fn split_edge(
    func: &mut Function,
    pred: BasicBlockId,
    succ: BasicBlockId,
) -> CompileResult<BasicBlockId> {
    let term = func.block(pred).and_then(|b| b.terminator());
    let branches_to_succ = term.is_some_and(|t| {
        matches!(
            t.kind,
            InstructionKind::Bra {
                modifier: BranchModifier::Uniform,
                ..
            }
        ) && t.target().and_then(Operand::as_block) == Some(succ)
    });
    let indirect = term.is_some_and(|t| {
        matches!(t.kind, InstructionKind::Bra { .. })
            && t.target().and_then(Operand::as_block).is_none()
    });
    let falls_into_succ = func.layout_successor(pred) == Some(succ);
    if indirect || (!branches_to_succ && !falls_into_succ) {
        return Err(CompileError::malformed_at(
            &func.name,
            pred,
            term.map(|t| t.id()),
            format!("cannot split the edge to {}", succ),
        ));
    }

    let split = if branches_to_succ {
        let split = func.create_block();
        if let Some(term) = func.try_block_mut(pred)?.terminator_mut() {
            term.set_target(Operand::Block(split))?;
        }
        split
    } else {
        func.insert_block_after(pred)?
    };

    let jump = func.instruction(InstructionKind::Bra {
        modifier: BranchModifier::Uniform,
        target: Some(Operand::Block(succ)),
    });
    func.try_block_mut(split)?.push_back(jump)?;
    log::trace!("split edge {} -> {} with {}", pred, succ, split);
    Ok(split)
}

/// Entry block that no branch reaches. When the entry is also the target of
/// an edge, a fresh block jumping to it is placed in front.
pub fn split_entry(func: &mut Function) -> CompileResult<Option<BasicBlockId>> {
    let Some(entry) = func.entry() else {
        return Ok(None);
    };
    let cfg = ControlFlowGraph::compute(func);
    if cfg.predecessors(entry).is_empty() {
        return Ok(Some(entry));
    }

    let prologue = func.insert_entry_block();
    let jump = func.instruction(InstructionKind::Bra {
        modifier: BranchModifier::Uniform,
        target: Some(Operand::Block(entry)),
    });
    func.try_block_mut(prologue)?.push_back(jump)?;
    log::trace!("'{}': {} placed before looping entry {}", func.name, prologue, entry);
    Ok(Some(prologue))
}

/// Order a parallel copy so that every source is read before it is
/// overwritten. A cycle is broken by saving one destination in a fresh
/// temporary and redirecting its readers there.
pub fn sequentialize(
    func: &mut Function,
    copies: Vec<(RegisterOperand, Operand)>,
) -> Vec<(RegisterOperand, Operand)> {
    let mut pending: Vec<(RegisterOperand, Operand)> = copies
        .into_iter()
        .filter(|(dest, source)| source.reg() != Some(&dest.reg))
        .collect();
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = pending.iter().position(|(dest, _)| {
            !pending
                .iter()
                .any(|(_, source)| source.reg() == Some(&dest.reg))
        });
        if let Some(index) = ready {
            ordered.push(pending.remove(index));
            continue;
        }

        let blocked = pending[0].0.clone();
        let temp = RegisterOperand::new(func.new_register(blocked.ty), blocked.ty);
        ordered.push((temp.clone(), Operand::Register(blocked.clone())));
        for (_, source) in pending.iter_mut() {
            if source.reg() == Some(&blocked.reg) {
                *source = Operand::Register(temp.clone());
            }
        }
    }
    ordered
}
