//! Configuration types and loaders for the switchboard runner.
//!
//! This crate owns the on-disk runner configuration so the runtime crates
//! share a single source of truth for global settings and per-context
//! provider configuration.

pub mod runner;

pub use runner::{GlobalSection, RunnerConfig, RunnerConfigFile};
