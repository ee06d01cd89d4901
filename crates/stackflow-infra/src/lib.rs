//! Infrastructure for StackFlow.
//!
//! Concrete implementations of the ports defined in stackflow-core: the
//! built-in action handlers and the `config.toml` loader.

pub mod action;
pub mod config;
