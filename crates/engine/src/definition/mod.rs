//! Workflow definitions: YAML types, validation and the container registry.

pub mod parser;
pub mod registry;
pub mod types;

pub use parser::{parse_definition, validate_definition};
pub use registry::DefinitionRegistry;
pub use types::{ActionConfig, CurationConfig, Role, Step, WorkflowDefinition};
