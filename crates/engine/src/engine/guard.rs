//! Step guard evaluation.
//!
//! Guards are minijinja expressions evaluated against the workflow item:
//!
//! - `submitter`, `title`, `container`, `workflow`
//! - `metadata` (the content item's metadata object)
//!
//! A step with `when: "metadata['dc.type'] == 'thesis'"` only applies to
//! items whose metadata matches.

use minijinja::Environment;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::model::WorkflowItem;

/// Evaluates step guard expressions.
pub struct GuardEvaluator {
    env: Environment<'static>,
}

impl Default for GuardEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardEvaluator {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_filter("lower", |v: String| v.to_lowercase());
        env.add_filter("upper", |v: String| v.to_uppercase());
        env.add_filter("trim", |v: String| v.trim().to_string());
        Self { env }
    }

    /// Check that an expression compiles.
    pub fn validate(&self, expr: &str) -> AppResult<()> {
        self.env
            .compile_expression_owned(expr.to_string())
            .map(|_| ())
            .map_err(|e| AppError::Configuration(format!("invalid guard '{}': {}", expr, e)))
    }

    /// Evaluate a guard against an item. Undefined names evaluate as false.
    pub fn evaluate(&self, expr: &str, item: &WorkflowItem) -> AppResult<bool> {
        let compiled = self
            .env
            .compile_expression_owned(expr.to_string())
            .map_err(|e| AppError::Configuration(format!("invalid guard '{}': {}", expr, e)))?;

        let value = compiled
            .eval(guard_context(item))
            .map_err(|e| AppError::Validation(format!("guard '{}' failed: {}", expr, e)))?;

        Ok(value.is_true())
    }
}

fn guard_context(item: &WorkflowItem) -> serde_json::Value {
    json!({
        "submitter": item.content.submitter,
        "title": item.content.title,
        "metadata": item.content.metadata,
        "container": item.container_id,
        "workflow": item.workflow_id,
    })
}
