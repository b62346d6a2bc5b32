// REST API - axum router, handlers and error mapping

pub mod crud;
pub mod error;
pub mod handlers;
pub mod reports;
pub mod router;
pub mod state;

pub use error::ApiError;
pub use router::build_router;
pub use state::{ApiResponse, AppState};
