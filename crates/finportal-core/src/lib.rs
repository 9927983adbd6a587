//! Core types and traits for FinPortal storage backends.
//!
//! This crate provides the `StorageBackend` and `Connector` traits and the
//! submission types, enabling pluggable storage implementations in separate crates.

pub mod models;
pub mod storage;

pub use models::{BusinessUnit, FinancialSubmission, SummaryRow, Kpis, RecentTable, SummaryTable, UnknownBusinessUnit};
pub use models::write::NewSubmission;
pub use storage::{Connector, Credentials, StorageBackend, StorageError};
