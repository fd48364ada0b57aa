//! Schemer - named scheme registry with a current selection
//!
//! This library exports the registry, the thread-safe manager and the
//! TOML-backed storage used by the `schemer` binary.

pub mod events;
pub mod logging;
pub mod manager;
pub mod models;
pub mod storage;

pub use manager::SchemeManager;
