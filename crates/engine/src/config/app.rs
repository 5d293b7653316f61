//! Application configuration for the ReviewFlow server.

use serde::Deserialize;

use crate::engine::DEFAULT_ADMIN_GROUP;

/// Which store backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Postgres,
}

/// Result the server's curator reports for steps that configure curation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurationMode {
    /// Curation passes immediately.
    Completed,
    /// Items wait for `POST /api/workflow/items/{id}/curation`.
    Queued,
}

/// Application configuration loaded from environment variables.
///
/// Environment variables are prefixed with `REVIEWFLOW_`:
/// - `REVIEWFLOW_HOST`: Server bind address (default: "0.0.0.0")
/// - `REVIEWFLOW_PORT`: Server port (default: 8084)
/// - `REVIEWFLOW_STORE`: `memory` or `postgres` (default: memory)
/// - `REVIEWFLOW_DEFINITIONS_DIR`: Directory of workflow YAML files
/// - `REVIEWFLOW_ROLES_FILE`: YAML file with groups and container roles
/// - `REVIEWFLOW_ADMIN_GROUP`: Group allowed to abort (default: "administrators")
/// - `REVIEWFLOW_NATS_URL`: Publish notifications to NATS when set
/// - `REVIEWFLOW_CURATION_MODE`: `completed` or `queued` (default: completed)
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Server name for identification
    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default = "default_store")]
    pub store: StoreKind,

    #[serde(default = "default_definitions_dir")]
    pub definitions_dir: String,

    #[serde(default)]
    pub roles_file: Option<String>,

    #[serde(default = "default_admin_group")]
    pub admin_group: String,

    /// NATS URL (optional)
    #[serde(default)]
    pub nats_url: Option<String>,

    /// Subject for notification messages
    #[serde(default)]
    pub notify_subject: Option<String>,

    #[serde(default = "default_curation_mode")]
    pub curation_mode: CurationMode,

    /// Page size for task listings when the caller does not pass one
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8084
}

fn default_server_name() -> String {
    "reviewflow-server".to_string()
}

fn default_store() -> StoreKind {
    StoreKind::Memory
}

fn default_definitions_dir() -> String {
    "workflows".to_string()
}

fn default_admin_group() -> String {
    DEFAULT_ADMIN_GROUP.to_string()
}

fn default_curation_mode() -> CurationMode {
    CurationMode::Completed
}

fn default_page_size() -> u32 {
    50
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("REVIEWFLOW_").from_env::<AppConfig>()
    }

    /// Get the server bind address as a string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_name: default_server_name(),
            store: default_store(),
            definitions_dir: default_definitions_dir(),
            roles_file: None,
            admin_group: default_admin_group(),
            nats_url: None,
            notify_subject: None,
            curation_mode: default_curation_mode(),
            default_page_size: default_page_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8084);
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.admin_group, "administrators");
    }

    #[test]
    fn test_bind_address() {
        let config = AppConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:8084");
    }

    #[test]
    fn test_from_iter() {
        let vars = vec![
            ("REVIEWFLOW_STORE".to_string(), "postgres".to_string()),
            ("REVIEWFLOW_PORT".to_string(), "9000".to_string()),
            ("REVIEWFLOW_ROLES_FILE".to_string(), "roles.yaml".to_string()),
            ("REVIEWFLOW_CURATION_MODE".to_string(), "queued".to_string()),
        ];
        let config: AppConfig = envy::prefixed("REVIEWFLOW_").from_iter(vars).unwrap();
        assert_eq!(config.store, StoreKind::Postgres);
        assert_eq!(config.port, 9000);
        assert_eq!(config.roles_file.as_deref(), Some("roles.yaml"));
        assert_eq!(config.definitions_dir, "workflows");
        assert_eq!(config.curation_mode, CurationMode::Queued);
    }
}
