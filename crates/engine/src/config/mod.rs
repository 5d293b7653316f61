//! Configuration for the ReviewFlow server.
//!
//! Loaded from environment variables with `envy`.

mod app;
mod database;

pub use app::{AppConfig, CurationMode, StoreKind};
pub use database::DatabaseConfig;
