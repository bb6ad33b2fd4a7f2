//! Lowering of region bodies to raw code.

pub mod raw;
pub mod scalar;
