//! Workflow execution engine for StackFlow.
//!
//! This crate holds the engine and the `ActionHandler` port that concrete
//! step implementations plug into. It depends only on `stackflow-types`,
//! never on `stackflow-infra` or any network/IO crate.

pub mod workflow;
