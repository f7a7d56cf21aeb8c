//! Archaeopteryx calling convention
//!
//! Calls pass values through two module globals: arguments are stored to the
//! parameter area before the call and results are loaded from the return
//! area when control comes back. Each call carries the link register. A
//! function that makes calls keeps its own return address in `<fn>.link`
//! across them. The save sits in a block no branch reaches, so a loop
//! through the entry never saves a callee's return address.

use super::{reserve_global, symbol_extent};
use crate::analysis::ControlFlowGraph;
use crate::context::Context;
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    BasicBlockId, Function, Instruction, InstructionKind, Module, Opcode, Operand,
    PhysicalRegister, PredicateOperand, Type,
};
use crate::transforms::pass::Pass;
use crate::transforms::ssa::{split_edge, split_entry};

/// Name of the global holding the saved link register of `function`
pub fn link_slot_symbol(function: &str) -> String {
    format!("{}.link", function)
}

fn link_operand() -> Operand {
    Operand::register(PhysicalRegister::link(), Type::Pointer)
}

/// Lowers calls, returns and the function prologue to the substrate's
/// memory-based calling convention
#[derive(Debug, Default)]
pub struct EnforceArchaeopteryxAbi;

impl EnforceArchaeopteryxAbi {
    pub const NAME: &'static str = "EnforceArchaeopteryxABIPass";

    pub fn new() -> Self {
        EnforceArchaeopteryxAbi
    }
}

impl Pass for EnforceArchaeopteryxAbi {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn run_on_function(&self, func: &mut Function, ctx: &Context) -> CompileResult<()> {
        if func.state.abi_lowered {
            return Ok(());
        }
        if !func.state.allocated {
            return Err(CompileError::malformed(
                &func.name,
                "the calling convention needs final register assignments",
            ));
        }
        if let Some(inst) = func
            .instructions()
            .find(|i| matches!(i.opcode(), Opcode::Phi | Opcode::Psi))
        {
            return Err(CompileError::malformed(
                &func.name,
                format!("'{}' must be lowered before the calling convention", inst.opcode()),
            ));
        }

        let target = ctx.target();
        let slot = i64::from(target.abi_slot_bytes);
        let mut calls = 0;
        for block in func.block_ids() {
            if lower_call(func, block, &target.parameter_area, &target.return_area, slot)? {
                calls += 1;
            }
        }
        if calls > 0 {
            save_link_register(func)?;
        }

        func.state.abi_lowered = true;
        log::debug!(
            "'{}': calling convention applied ({} calls{})",
            func.name,
            calls,
            if calls > 0 { ", link saved" } else { "" }
        );
        Ok(())
    }

    fn run_on_module(&self, module: &mut Module, ctx: &Context) -> CompileResult<()> {
        let target = ctx.target();
        let mut reservations = Vec::new();
        for func in module.functions_mut() {
            log::debug!("{}: running on '{}'", Self::NAME, func.name);
            self.run_on_function(func, ctx)?;
            for area in [&target.parameter_area, &target.return_area] {
                reservations.push((area.clone(), symbol_extent(func, area, target.abi_slot_bytes)));
            }
            let link = link_slot_symbol(&func.name);
            let bytes = symbol_extent(func, &link, target.abi_slot_bytes);
            reservations.push((link, bytes));
        }
        for (name, bytes) in reservations {
            reserve_global(module, &name, bytes);
        }
        Ok(())
    }
}

/// Rewrite the call ending `block`, if any. Returns whether there was one.
fn lower_call(
    func: &mut Function,
    block: BasicBlockId,
    parameter_area: &str,
    return_area: &str,
    slot: i64,
) -> CompileResult<bool> {
    let Some(call) = func
        .try_block_mut(block)?
        .terminator_mut()
        .filter(|t| t.is_call())
    else {
        return Ok(false);
    };

    let guard = call.guard().clone();
    let (arguments, returned) = match &mut call.kind {
        InstructionKind::Call {
            link,
            arguments,
            returned,
            ..
        } => {
            if link.is_none() {
                *link = Some(link_operand());
            }
            (std::mem::take(arguments), std::mem::take(returned))
        }
        _ => return Ok(false),
    };

    for (i, argument) in arguments.into_iter().enumerate() {
        let store = guarded(
            func.instruction(InstructionKind::St {
                d: Some(Operand::address(parameter_area, i as i64 * slot)),
                a: Some(argument),
            }),
            &guard,
        );
        func.try_block_mut(block)?.insert_before_terminator(store)?;
    }

    if !returned.is_empty() {
        let continuation = continuation_block(func, block)?;
        for (i, value) in returned.into_iter().enumerate() {
            let load = guarded(
                func.instruction(InstructionKind::Unary {
                    opcode: Opcode::Ld,
                    d: Some(value),
                    a: Some(Operand::address(return_area, i as i64 * slot)),
                }),
                &guard,
            );
            func.try_block_mut(continuation)?.insert(i, load)?;
        }
    }
    Ok(true)
}

fn guarded(mut inst: Instruction, guard: &PredicateOperand) -> Instruction {
    inst.set_guard(guard.clone());
    inst
}

/// Block where only the call at the end of `block` continues
fn continuation_block(func: &mut Function, block: BasicBlockId) -> CompileResult<BasicBlockId> {
    let Some(succ) = func.layout_successor(block) else {
        return Err(CompileError::malformed_at(
            &func.name,
            block,
            None,
            "call has no continuation block",
        ));
    };
    let cfg = ControlFlowGraph::compute(func);
    if cfg.predecessors(succ).len() > 1 {
        split_edge(func, block, succ)
    } else {
        Ok(succ)
    }
}

/// Save the link register at entry and restore it before every return
fn save_link_register(func: &mut Function) -> CompileResult<()> {
    let slot = Operand::address(link_slot_symbol(&func.name), 0);
    let Some(entry) = split_entry(func)? else {
        return Ok(());
    };

    let save = func.instruction(InstructionKind::St {
        d: Some(slot.clone()),
        a: Some(link_operand()),
    });
    func.try_block_mut(entry)?.insert(0, save)?;

    for block in func.block_ids() {
        let returns = func
            .block(block)
            .and_then(|b| b.terminator())
            .is_some_and(|t| t.is_return());
        if returns {
            let restore = func.instruction(InstructionKind::Unary {
                opcode: Opcode::Ld,
                d: Some(link_operand()),
                a: Some(slot.clone()),
            });
            func.try_block_mut(block)?.insert_before_terminator(restore)?;
        }
    }
    Ok(())
}
