pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

// Re-export commonly used types
pub use errors::{DispatchError, DispatchResult, ValidationError};
