//! Pass infrastructure and IR-level transforms
//!
//! Passes are looked up by name in a `PassRegistry` and run in sequence by a
//! `PassManager`. The SSA passes live here; target lowering passes live in
//! `codegen`.

pub mod manager;
pub mod pass;
pub mod registry;
pub mod ssa;

pub use manager::PassManager;
pub use pass::{Pass, PassOptions};
pub use registry::{create_pass, PassConstructor, PassRegistry};
pub use ssa::{ConvertFromSsa, ConvertToSsa};
