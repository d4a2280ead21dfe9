//! CLI command implementations.

pub mod split;
