//! Target description
//!
//! Describes the execution substrate a module is lowered for: register file
//! sizes, the latency model used by the scheduler and the symbols the calling
//! convention reserves. Defaults describe the Archaeopteryx substrate.

use serde::{Deserialize, Serialize};

/// Scheduling latencies, in cycles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Latencies {
    /// Simple integer and logical operations
    pub alu: u32,
    /// Multiplication and floating-point multiply
    pub multiply: u32,
    /// Division and remainder
    pub divide: u32,
    /// Loads and atomics
    pub memory: u32,
    /// Everything else (conversions, stores, control)
    pub other: u32,
}

impl Default for Latencies {
    fn default() -> Self {
        Latencies {
            alu: 1,
            multiply: 4,
            divide: 20,
            memory: 24,
            other: 1,
        }
    }
}

/// Target configuration for a lowering run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    /// Target name (for diagnostics)
    pub name: String,
    /// Number of general purpose registers (default: 32)
    pub general_registers: u16,
    /// Number of predicate registers (default: 8)
    pub predicate_registers: u16,
    /// Scheduler latency model
    pub latencies: Latencies,
    /// Global holding outgoing call arguments
    pub parameter_area: String,
    /// Global holding values returned by a call
    pub return_area: String,
    /// Size of one argument/return slot in bytes
    pub abi_slot_bytes: u32,
}

impl Default for Target {
    fn default() -> Self {
        Target {
            name: "archaeopteryx".to_string(),
            general_registers: 32,
            predicate_registers: 8,
            latencies: Latencies::default(),
            parameter_area: "abi.params".to_string(),
            return_area: "abi.returns".to_string(),
            abi_slot_bytes: 8,
        }
    }
}

impl Target {
    /// The Archaeopteryx simulated substrate
    pub fn archaeopteryx() -> Self {
        Self::default()
    }

    /// Override the general register file size
    pub fn with_registers(mut self, general: u16) -> Self {
        self.general_registers = general;
        self
    }

    /// Override the predicate register file size
    pub fn with_predicate_registers(mut self, predicates: u16) -> Self {
        self.predicate_registers = predicates;
        self
    }
}
