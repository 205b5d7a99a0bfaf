// src/pipeline/mod.rs

pub mod evaluate;
pub mod metrics;
pub mod records;
pub mod session;
pub mod state_machine;

pub use session::{evaluate, train};
