//! # General Utilities
//!
//! Abstracted algorithms over control flow graphs, shared by the LIR and the
//! allocator passes.

pub mod cfg;

pub use cfg::{CfgInfo, CfgNode, CfgRegion};
