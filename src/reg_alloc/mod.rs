//! # Linear Scan Register Allocation
//!
//! This module implements a linear scan register allocator for SSA-form LIR,
//! and its utilities.
//!
//! - `config`: Allocator options and their command line arguments.
//! - `stats`: Per-compilation counters and the process-wide aggregator.
//! - `interval`: The interval store, live ranges with split children.
//! - `block_defuse_analysis`: Block-level def-use analysis.
//! - `liveness_analysis`: Liveness analysis (aka. in and out set).
//! - `lifetime_analysis`: Instruction numbering, interval building and
//!   register hints.
//! - `walker`: The interval walk assigning locations.
//! - `move_resolver`: Ordering of parallel moves.
//! - `resolve_data_flow`: Moves at block boundaries, including phi values.
//! - `eliminate_spill_moves`: Removal of redundant spill moves.
//! - `assign_locations`: Rewriting of variables into their locations.
//! - `linear_scan`: The driver.

pub mod assign_locations;
pub mod block_defuse_analysis;
pub mod config;
pub mod eliminate_spill_moves;
pub mod interval;
pub mod lifetime_analysis;
pub mod linear_scan;
pub mod liveness_analysis;
pub mod move_resolver;
pub mod resolve_data_flow;
pub mod stats;
pub mod walker;

pub use config::LinearScanConfig;
pub use interval::{Interval, IntervalId, IntervalStore, Range, RegisterPriority, SpillState};
pub use lifetime_analysis::InstructionNumbering;
pub use linear_scan::LinearScan;
pub use move_resolver::MoveResolver;
pub use stats::{AllocStats, StatsAggregator};
pub use walker::{IntervalWalk, SpillingWalker};

use thiserror::Error;

use crate::lir::{Location, Operand};

/// Fatal internal-consistency violations.
///
/// Any of these aborts the allocation of the function, no partial assignment
/// is ever produced.
#[derive(Debug, Error)]
pub enum RegAllocError {
    #[error("phi arity mismatch at {block}: {phi_in} phi-in values but {phi_out} phi-out values from {pred}")]
    PhiArityMismatch {
        block: String,
        pred: String,
        phi_in: usize,
        phi_out: usize,
    },

    #[error("invalid phi value {operand} at {block}, only variables and constants are allowed")]
    InvalidPhiValue { block: String, operand: Operand },

    #[error("no split child of {operand} at op {op_id}")]
    NoSplitChild { operand: Operand, op_id: u32 },

    #[error("more than one split child of {operand} at op {op_id}")]
    AmbiguousSplitChild { operand: Operand, op_id: u32 },

    #[error("no interval for operand {0}")]
    UnknownOperand(Operand),

    #[error("multiple moves write to {location} at {block}")]
    MultipleWrites { block: String, location: Location },

    #[error("variable {operand} is live-in at the entry block {block}")]
    EntryLiveIn { block: String, operand: Operand },

    #[error("malformed block {block}: {reason}")]
    MalformedBlock { block: String, reason: &'static str },

    #[error("critical edge from {from} to {to} is not split")]
    UnsplitCriticalEdge { from: String, to: String },

    #[error("spill store of {operand} at op {op_id} does not come from a register")]
    InvalidSpillStore { operand: Operand, op_id: u32 },

    #[error("no location assigned to {operand}")]
    UnassignedLocation { operand: Operand },

    #[error("broken interval {operand}: {reason}")]
    IntervalInvariant { operand: Operand, reason: &'static str },
}

pub type RegAllocResult<T> = Result<T, RegAllocError>;
