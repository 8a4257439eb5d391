//! Calculation core for the Leibniz pi service.
//!
//! This crate owns the state machine that incrementally approximates pi
//! with the Leibniz series and keeps its progress durable across restarts.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `leibniz-config.yaml` into
//!   strongly-typed structs, with environment overrides.
//! - [`engine`] -- [`CalculationEngine`], the single owner of the
//!   in-memory snapshot and the periodic advancement task.
//! - [`series`] -- Leibniz term computation and pi text conversions.
//! - [`snapshot`] -- The persisted record, run status, and commands.
//! - [`store`] -- [`SnapshotStore`] trait with the JSON file store and an
//!   in-memory store.
//!
//! [`CalculationEngine`]: engine::CalculationEngine
//! [`SnapshotStore`]: store::SnapshotStore

pub mod config;
pub mod engine;
pub mod series;
pub mod snapshot;
pub mod store;

pub use engine::CalculationEngine;
pub use snapshot::{CalculationSnapshot, CalculationStatus, Command, UnknownCommand};
pub use store::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore, StoreError};
