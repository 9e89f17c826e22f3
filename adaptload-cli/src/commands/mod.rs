//! CLI command implementations.

pub mod classify;
pub mod common;
pub mod plan;
pub mod simulate;
pub mod strategy;
