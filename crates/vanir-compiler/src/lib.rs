//! Vanir - IR core and backend lowering for the Archaeopteryx substrate
//!
//! This crate holds the Vanir intermediate representation (modules,
//! functions, basic blocks, predicated instructions), the analyses the
//! backend needs, and the pass pipeline that lowers IR to code the
//! Archaeopteryx execution substrate can run: SSA construction and
//! destruction, translation-table instruction selection, list scheduling,
//! Chaitin-Briggs register allocation with spilling, and ABI enforcement.

pub mod analysis;
pub mod codegen;
pub mod config;
pub mod context;
pub mod error;
pub mod ir;
pub mod transforms;

pub use config::{Latencies, Target};
pub use context::Context;
pub use error::{CompileError, CompileResult, IrError, IrResult};
pub use ir::{BasicBlock, Function, FunctionBuilder, Instruction, Module, Opcode, Operand};
pub use transforms::{create_pass, Pass, PassManager, PassOptions, PassRegistry};

/// Passes run by [`lower`], in order
pub const DEFAULT_PIPELINE: &[&str] = &[
    "ConvertFromSSAPass",
    "TranslationTableInstructionSelectionPass",
    "ListInstructionSchedulerPass",
    "ChaitinBriggsRegisterAllocatorPass",
    "GenericSpillCodePass",
    "EnforceArchaeopteryxABIPass",
];

/// Lower `module` for the target of `ctx` with the default pipeline.
/// On failure the module is left as it was.
pub fn lower(module: &mut Module, ctx: &Context) -> CompileResult<()> {
    let registry = PassRegistry::new();
    PassManager::from_names(&registry, DEFAULT_PIPELINE)?.run(module, ctx)
}
