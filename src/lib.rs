pub mod aggregation;
pub mod api;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod portal;
pub mod submission;

pub use finportal_core::{
    BusinessUnit, Connector, Credentials, FinancialSubmission, Kpis, StorageBackend, StorageError, SummaryRow,
};
pub use portal::Portal;
