//! Bot Supervisor: a process-local orchestrator for long-lived jobs.

#![warn(unused_crate_dependencies)]
// Only used in the binary (src/bin/main.rs).
use tracing_subscriber as _;
// Only exercised through its derive macros; nothing in this crate names the
// `strum` crate directly.
use strum as _;
#[cfg(test)]
use assert_cmd as _;
#[cfg(test)]
use predicates as _;
#[cfg(test)]
use tempfile as _;

/// CLI parsing.
pub mod cli;

/// Config loading.
pub mod config;

/// Constants.
pub mod constants;

/// Daemon Driver ("daily at HH:MM").
pub mod daemon;

/// Errors.
pub mod error;

/// Instance Lock.
pub mod lock;

/// Runtime paths and cross-platform host helpers.
pub mod runtime;

/// Atomic File Store.
pub mod store;

/// Supervisor state snapshot schema and rendering.
pub mod status;

/// Supervisor control loop.
pub mod supervisor;

/// Test utils.
#[doc(hidden)]
pub mod test_utils;

/// Worker process lifecycle.
pub mod worker;
