//! Shared domain types for StackFlow.
//!
//! This crate contains the data shapes exchanged with the workflow execution
//! engine: workflow definitions, step and execution results, circuit breaker
//! snapshots, the action error taxonomy, and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod circuit;
pub mod config;
pub mod error;
pub mod workflow;
