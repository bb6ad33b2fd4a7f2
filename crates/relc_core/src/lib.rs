pub mod config;
pub mod engine;
pub mod execution;
pub mod expr;
pub mod lowering;
pub mod registry;
pub mod relalg;
pub mod specialize;
pub mod subop;
pub mod translate;
pub mod types;
