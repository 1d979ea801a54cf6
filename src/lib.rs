/// StatWatch - a device telemetry reporter
///
/// This library samples CPU, memory, temperature, battery and location on a
/// schedule and delivers each sample to a chat webhook and a generic HTTP API.
pub mod cli;
pub mod config;
pub mod control;
pub mod core;
pub mod formatting;
pub mod location;
pub mod notification;
pub mod pipeline;
pub mod prefs;
pub mod scheduler;
pub mod service;
pub mod sources;
pub mod task_manager;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export core types for convenience
pub use crate::core::*;
