//! CLI subcommand implementations.

pub mod cache;
pub mod common;
pub mod fetch;
