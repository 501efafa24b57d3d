#![forbid(unsafe_code)]

pub mod collections;
pub mod lir;
pub mod reg_alloc;
pub mod utils;
