//! SSA construction and destruction

pub mod from_ssa;
pub mod to_ssa;

pub use from_ssa::{destruct_ssa, split_edge, split_entry, ConvertFromSsa};
pub use to_ssa::{construct_ssa, ConvertToSsa};
