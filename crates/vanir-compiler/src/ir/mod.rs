//! Intermediate representation
//!
//! Instructions are a closed sum type over opcode families, held by basic
//! blocks, held by functions, held by a module. Cross references (branch
//! targets, Phi incoming edges, registers) are plain integer ids handed out
//! by the owning function.

pub mod block;
pub mod builder;
pub mod function;
pub mod global;
pub mod instr;
pub mod module;
pub mod opcode;
pub mod operand;
pub mod types;
pub mod verify;

pub use block::{BasicBlock, BasicBlockId};
pub use builder::FunctionBuilder;
pub use function::{Function, FunctionId, LoweringState, SpillRequest};
pub use global::{Constant, Global, Linkage};
pub use instr::{Instruction, InstructionId, InstructionKind, INTRINSIC_PREFIX};
pub use module::Module;
pub use opcode::{AtomicOperation, BranchModifier, Comparison, MembarLevel, Opcode};
pub use operand::{
    AddressOperand, ImmediateOperand, IndirectOperand, Operand, OperandKind, PhysicalRegister,
    PredicateCondition, PredicateOperand, Register, RegisterClass, RegisterOperand,
    VirtualRegister,
};
pub use types::Type;
pub use verify::{verify_function, verify_module};
