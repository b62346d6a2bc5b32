// Voucher Dashboard - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod coerce;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod entities;
pub mod import;
pub mod report;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::{AppConfig, ConfigError};
pub use dashboard::{DashboardSummary, MonthlyPoint};
pub use db::{open_database, setup_database, Event, ImportBatch};
pub use entities::{
    BudgetAuthority, Commitment, FieldError, HapExpenditure, HcvUtilization, MtwReserve, RepoError, Report,
    StyleTemplate, User,
};
pub use import::{import_file, ImportError, ImportReport, ImportTarget};
pub use report::{GenerateRequest, ReportError, ReportType};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
