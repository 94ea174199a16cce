//! # Tessera CLI
//!
//! Library half of the `tessera` binary, so the command implementations
//! can be driven from integration tests.

pub mod cli;
