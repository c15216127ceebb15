//! Command handlers for the `caravel` binary

pub mod config;
pub mod manifest;
pub mod publish;
pub mod sync;
