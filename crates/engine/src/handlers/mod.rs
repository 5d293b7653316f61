//! HTTP handlers for the ReviewFlow API.
//!
//! This module contains all route handlers organized by domain.

pub mod database;
pub mod health;
pub mod items;
pub mod tasks;
pub mod workflows;

pub use health::{api_health, health_check};
