//! # Collection of Basic Data Structures
//!
//! - `storage`: Arena-based storage to deal with linked data structures.

pub mod storage;
