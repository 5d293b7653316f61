//! Database module for the ReviewFlow server.
//!
//! Connection pool management and the PostgreSQL schema used by
//! [`crate::store::PgStore`].

pub mod pool;
pub mod schema;

pub use pool::{create_pool, DbPool};
