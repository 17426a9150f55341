pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod openapi;
pub mod repo;
pub mod routes;
pub mod session;

// Re-export commonly used items for tests / external users
pub use config::{AppConfig, StoreBackend};
pub use routes::AppState;
