//! HTTP service and command line for studysync.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;
