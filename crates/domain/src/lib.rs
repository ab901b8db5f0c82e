//! Shared types for the studysync workspace: the conversation data model,
//! the error taxonomy, configuration, the injectable clock, structured trace
//! events and streaming event types.

pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod stream;
pub mod trace;
