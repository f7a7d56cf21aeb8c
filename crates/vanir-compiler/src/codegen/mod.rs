//! Backend lowering for the Archaeopteryx substrate
//!
//! Runs after SSA destruction, in this order: instruction selection,
//! scheduling, register allocation (with spilling) and ABI enforcement.

pub mod abi;
pub mod isel;
pub mod regalloc;
pub mod schedule;
pub mod spill;

pub use abi::EnforceArchaeopteryxAbi;
pub use isel::{TranslationTable, TranslationTableSelection};
pub use regalloc::{allocate_function, AllocationOutcome, ChaitinBriggsAllocator, RegisterBudget};
pub use schedule::{Heuristic, ListScheduler};
pub use spill::GenericSpillCode;

use crate::ir::{Function, Global, Module, Operand};

/// Bytes of global `symbol` addressed by `func`, assuming `width`-byte accesses
pub(crate) fn symbol_extent(func: &Function, symbol: &str, width: u32) -> usize {
    let mut end = 0i64;
    for inst in func.instructions() {
        for op in inst.reads().iter().map(|op| &**op).chain(inst.writes()) {
            if let Operand::Address(addr) = op {
                if addr.symbol == symbol {
                    end = end.max(addr.offset + i64::from(width));
                }
            }
        }
    }
    end.max(0) as usize
}

/// Declare a zeroed global of at least `bytes`, growing an existing one
pub(crate) fn reserve_global(module: &mut Module, name: &str, bytes: usize) {
    if bytes == 0 || module.global(name).is_some_and(|g| g.bytes() >= bytes) {
        return;
    }
    log::debug!("reserving '{}' ({} bytes)", name, bytes);
    module.add_global(Global::zeroed(name, bytes));
}
