//! ClaimNavigator request gateway.
//!
//! This library exports the modules used by the server binary and by
//! integration code that embeds the gateway.

pub mod api_contract;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod security;
pub mod services;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::AppSettings;
pub use error::AppError;
pub use gateway::Gateway;
