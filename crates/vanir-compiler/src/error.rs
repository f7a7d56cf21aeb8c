//! Compilation errors
//!
//! `IrError` covers misuse of the IR containers themselves (wrong slot for a
//! variant, a second terminator, ...). `CompileError` is what the lowering
//! pipeline reports; it always names the function and, when known, the block
//! and instruction that failed.

use crate::ir::{BasicBlockId, InstructionId, Opcode, VirtualRegister};
use thiserror::Error;

/// Result alias for IR container operations
pub type IrResult<T> = Result<T, IrError>;

/// Result alias for pass and pipeline operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Errors raised by instruction and basic-block mutation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("cannot create an instruction from the invalid opcode")]
    InvalidOpcode,

    #[error("'{opcode}' has no '{slot}' operand slot")]
    SlotMismatch { opcode: Opcode, slot: &'static str },

    #[error("block {block} is already terminated")]
    AlreadyTerminated { block: BasicBlockId },

    #[error("control transfer '{opcode}' must be the last instruction of block {block}")]
    MisplacedTerminator { block: BasicBlockId, opcode: Opcode },

    #[error("'{opcode}' is not a control transfer and cannot terminate a block")]
    NotATerminator { opcode: Opcode },

    #[error("unknown basic block {0}")]
    UnknownBlock(BasicBlockId),

    #[error("index {index} out of bounds for block {block} of length {len}")]
    IndexOutOfBounds {
        block: BasicBlockId,
        index: usize,
        len: usize,
    },

    #[error("no source for {0} in this instruction")]
    SourceNotFound(String),
}

/// Errors reported by passes and the pass manager
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("malformed IR in '{function}'{}{}: {message}", fmt_block(.block), fmt_instr(.instruction))]
    MalformedIr {
        function: String,
        block: Option<BasicBlockId>,
        instruction: Option<InstructionId>,
        message: String,
    },

    #[error("'{opcode}' is not supported on target '{target}' (in '{function}' at {block}, instruction {instruction})")]
    UnsupportedOpcode {
        function: String,
        block: BasicBlockId,
        instruction: InstructionId,
        opcode: Opcode,
        target: String,
    },

    #[error("register allocation for '{function}' did not converge after {iterations} spill rounds")]
    AllocationDidNotConverge { function: String, iterations: usize },

    #[error("register {register} in '{function}' cannot be coloured and cannot be spilled")]
    UnallocatableRegister {
        function: String,
        register: VirtualRegister,
    },

    #[error("no such pass: '{0}'")]
    UnknownPass(String),

    #[error("pass '{pass}' failed: {source}")]
    PassFailed {
        pass: String,
        #[source]
        source: Box<CompileError>,
    },

    #[error(transparent)]
    Ir(#[from] IrError),
}

impl CompileError {
    /// Build a malformed-IR error for a function
    pub fn malformed(function: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::MalformedIr {
            function: function.into(),
            block: None,
            instruction: None,
            message: message.into(),
        }
    }

    /// Build a malformed-IR error pointing at a block and optionally an instruction
    pub fn malformed_at(
        function: impl Into<String>,
        block: BasicBlockId,
        instruction: Option<InstructionId>,
        message: impl Into<String>,
    ) -> Self {
        CompileError::MalformedIr {
            function: function.into(),
            block: Some(block),
            instruction,
            message: message.into(),
        }
    }

    /// Name of the pass that was active when this error was raised, if recorded
    pub fn pass_name(&self) -> Option<&str> {
        match self {
            CompileError::PassFailed { pass, .. } => Some(pass),
            _ => None,
        }
    }

    /// The innermost error, with pass wrappers stripped
    pub fn root_cause(&self) -> &CompileError {
        match self {
            CompileError::PassFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

fn fmt_block(block: &Option<BasicBlockId>) -> String {
    block.map(|b| format!(" at {}", b)).unwrap_or_default()
}

fn fmt_instr(instr: &Option<InstructionId>) -> String {
    instr
        .map(|i| format!(", instruction {}", i))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_message_names_location() {
        let err = CompileError::malformed_at(
            "kernel",
            BasicBlockId(3),
            Some(InstructionId(7)),
            "block is not terminated",
        );
        assert_eq!(
            err.to_string(),
            "malformed IR in 'kernel' at bb3, instruction i7: block is not terminated"
        );
    }

    #[test]
    fn test_pass_failed_root_cause() {
        let inner = CompileError::UnknownPass("bogus".to_string());
        let err = CompileError::PassFailed {
            pass: "list".to_string(),
            source: Box::new(inner),
        };
        assert_eq!(err.pass_name(), Some("list"));
        assert!(matches!(err.root_cause(), CompileError::UnknownPass(name) if name == "bogus"));
    }
}
