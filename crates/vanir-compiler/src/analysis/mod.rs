//! Analyses used by the lowering passes
//!
//! All analyses are snapshots: they borrow nothing from the function after
//! `compute` returns, so a pass may compute them and then mutate freely.

pub mod cfg;
pub mod dominators;
pub mod liveness;

pub use cfg::ControlFlowGraph;
pub use dominators::DominatorTree;
pub use liveness::{Liveness, RegisterSet};
