//! dirmerge core library.
//!
//! A resumable, concurrent engine that merges two source directory trees
//! into a fresh destination: pre-order scanning, parallel xxh3
//! fingerprinting, pure classification, human-in-the-loop conflict
//! resolution with a durable audit log, and idempotent apply. Everything is
//! checkpointed through an embedded SQLite store so a run can be killed at
//! any point and picked up where it left off.

pub mod apply;
pub mod broker;
pub mod classify;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod hasher;
pub mod models;
pub mod progress;
pub mod resolver;
pub mod scanner;

// Re-exports for convenience.
pub use config::{ApplyMode, MergeConfig};
pub use db::Store;
pub use engine::{MergeEngine, ShutdownFlag};
pub use models::{MergeReport, RunMode};
pub use resolver::Resolver;
