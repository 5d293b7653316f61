//! ReviewFlow Engine Library
//!
//! A multi-step approval workflow engine. A submitted content item is
//! wrapped in a workflow item and moved through an ordered sequence of
//! review steps:
//!
//! - **Definitions**: YAML workflow definitions mapped to containers
//! - **Roles**: who may review a step, resolved per item
//! - **Task pool**: exactly-once claims with multi-approval slots
//! - **Transitions**: actions and the outcome table that moves items on
//! - **Curation**: automated checks on step entry and completion
//! - **Lifecycle**: start, archive, return to submitter, abort
//!
//! ## Architecture
//!
//! Every mutation of a workflow item runs in one store transaction
//! ([`store::StoreTx`]) that also appends the history entry. Two stores
//! ship with the crate: an in-memory store and PostgreSQL via `sqlx`.
//! Archive installs and workspace returns run after commit, as do
//! notifications sent through a [`notify::Notifier`] (tracing log or NATS
//! JetStream).
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`definition`]: Workflow definitions and the registry
//! - [`engine`]: The workflow engine
//! - [`error`]: Custom error types with Axum integration
//! - [`handlers`]: HTTP route handlers
//! - [`state`]: Shared application state
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use reviewflow_engine::{
//!     actions::ActionRegistry, definition::DefinitionRegistry, engine::WorkflowEngine,
//!     model::ContentItem, store::MemoryStore,
//! };
//!
//! let actions = ActionRegistry::with_builtins();
//! let registry = DefinitionRegistry::load_dir("workflows", actions.kinds())?;
//! let engine = WorkflowEngine::builder(Arc::new(registry), Arc::new(MemoryStore::new()))
//!     .actions(Arc::new(actions))
//!     .build();
//! let item = engine.start(ContentItem::new("alice", Some("Thesis")), "theses").await?;
//! ```

pub mod actions;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod definition;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod model;
pub mod notify;
pub mod result_ext;
pub mod roles;
pub mod state;
pub mod store;

pub use error::{AppError, AppResult};
pub use result_ext::ResultExt;
