//! Compilation context
//!
//! The context is created once per lowering run and handed by reference to
//! every pass that needs target or type information. It is never mutated
//! after construction, so it can be shared across threads when independent
//! functions are lowered in parallel.

use crate::config::Target;
use crate::ir::Type;

/// Read-only state shared by all passes of a lowering run
#[derive(Debug, Clone, Default)]
pub struct Context {
    target: Target,
}

impl Context {
    /// Create a context for the given target
    pub fn new(target: Target) -> Self {
        Context { target }
    }

    /// The target being lowered for
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Type used for addresses on this target
    pub fn pointer_type(&self) -> Type {
        Type::Pointer
    }

    /// Type used for predicate registers
    pub fn predicate_type(&self) -> Type {
        Type::I1
    }
}
