//! Step actions and their executors.
//!
//! Each action in a step names an executor `kind`. Executors look at the
//! caller's input, may edit the content item, and report an
//! [`ActionOutcome`]; the transition engine decides what the outcome means
//! for the workflow item.
//!
//! Executors that end the step without approving it (reject, abort, route)
//! are exits and may run at any point. The remaining actions of a step are
//! its stages: they run in declaration order, and a stage is open once every
//! earlier stage has run or is optional.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::definition::{ActionConfig, Step};
use crate::error::{AppError, AppResult};
use crate::model::{ContentItem, WorkflowItem};

/// What an action asks the engine to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Stay on the step; the claim remains.
    Continue,
    /// The claimant approves the step.
    CompleteStep,
    /// Send the item back to the submitter.
    Reject { reason: String },
    /// Administrative termination.
    Abort,
    /// Leave the step through one of its named outcomes.
    Route {
        #[serde(rename = "name")]
        outcome: String,
    },
    /// The input was incomplete; nothing changes.
    MoreInputNeeded,
}

/// Everything an executor may look at.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub item: &'a WorkflowItem,
    pub step: &'a Step,
    pub action: &'a ActionConfig,
    pub principal: &'a str,
    pub input: &'a serde_json::Value,
}

impl ActionContext<'_> {
    /// Non-blank string field of the input.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Executor for one action kind.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Kind referenced from workflow definitions.
    fn kind(&self) -> &'static str;

    /// Whether the action leaves the step without approving it.
    fn is_exit(&self) -> bool {
        false
    }

    /// Run the action. Changes to `content` are persisted by the engine
    /// together with the transition.
    async fn execute(
        &self,
        ctx: ActionContext<'_>,
        content: &mut ContentItem,
    ) -> AppResult<ActionOutcome>;
}

/// Approve the step.
pub struct AcceptAction;

#[async_trait]
impl ActionExecutor for AcceptAction {
    fn kind(&self) -> &'static str {
        "accept"
    }

    async fn execute(
        &self,
        _ctx: ActionContext<'_>,
        _content: &mut ContentItem,
    ) -> AppResult<ActionOutcome> {
        Ok(ActionOutcome::CompleteStep)
    }
}

/// Reject with a mandatory `reason`.
pub struct RejectAction;

#[async_trait]
impl ActionExecutor for RejectAction {
    fn kind(&self) -> &'static str {
        "reject"
    }

    fn is_exit(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        ctx: ActionContext<'_>,
        _content: &mut ContentItem,
    ) -> AppResult<ActionOutcome> {
        Ok(match ctx.input_str("reason") {
            Some(reason) => ActionOutcome::Reject {
                reason: reason.to_string(),
            },
            None => ActionOutcome::MoreInputNeeded,
        })
    }
}

/// Single action with a `decision` of `approve` or `reject`, or the name of
/// one of the step's outcomes.
pub struct ReviewAction;

#[async_trait]
impl ActionExecutor for ReviewAction {
    fn kind(&self) -> &'static str {
        "review"
    }

    async fn execute(
        &self,
        ctx: ActionContext<'_>,
        _content: &mut ContentItem,
    ) -> AppResult<ActionOutcome> {
        match ctx.input_str("decision") {
            Some("approve") => Ok(ActionOutcome::CompleteStep),
            Some("reject") => Ok(match ctx.input_str("reason") {
                Some(reason) => ActionOutcome::Reject {
                    reason: reason.to_string(),
                },
                None => ActionOutcome::MoreInputNeeded,
            }),
            Some(other) if ctx.step.outcomes.contains_key(other) => Ok(ActionOutcome::Route {
                outcome: other.to_string(),
            }),
            Some(other) => Err(AppError::Validation(format!(
                "unknown decision '{}', expected approve, reject or one of {:?}",
                other,
                ctx.step.outcomes.keys().collect::<Vec<_>>()
            ))),
            None => Ok(ActionOutcome::MoreInputNeeded),
        }
    }
}

/// Merge `metadata` from the input into the content item.
///
/// Option `fields` restricts which keys may be edited.
pub struct EditMetadataAction;

#[async_trait]
impl ActionExecutor for EditMetadataAction {
    fn kind(&self) -> &'static str {
        "edit_metadata"
    }

    async fn execute(
        &self,
        ctx: ActionContext<'_>,
        content: &mut ContentItem,
    ) -> AppResult<ActionOutcome> {
        let Some(patch) = ctx.input.get("metadata").and_then(|m| m.as_object()) else {
            return Ok(ActionOutcome::MoreInputNeeded);
        };
        if patch.is_empty() {
            return Ok(ActionOutcome::MoreInputNeeded);
        }

        if let Some(fields) = ctx.action.options.get("fields").and_then(|f| f.as_array()) {
            let allowed: BTreeSet<&str> = fields.iter().filter_map(|f| f.as_str()).collect();
            if let Some(key) = patch.keys().find(|k| !allowed.contains(k.as_str())) {
                return Err(AppError::Validation(format!(
                    "field '{}' is not editable in step '{}'",
                    key, ctx.step.id
                )));
            }
        }

        content.merge_metadata(&serde_json::Value::Object(patch.clone()));
        Ok(ActionOutcome::Continue)
    }
}

/// Abort the workflow. Still subject to the administrator check.
pub struct AbortAction;

#[async_trait]
impl ActionExecutor for AbortAction {
    fn kind(&self) -> &'static str {
        "abort"
    }

    fn is_exit(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        _ctx: ActionContext<'_>,
        _content: &mut ContentItem,
    ) -> AppResult<ActionOutcome> {
        Ok(ActionOutcome::Abort)
    }
}

/// Leave the step through the outcome named by option `outcome`.
pub struct RouteAction;

#[async_trait]
impl ActionExecutor for RouteAction {
    fn kind(&self) -> &'static str {
        "route"
    }

    fn is_exit(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        ctx: ActionContext<'_>,
        _content: &mut ContentItem,
    ) -> AppResult<ActionOutcome> {
        let outcome = ctx.action.outcome().ok_or_else(|| {
            AppError::Configuration(format!(
                "action '{}' at step '{}' has no outcome option",
                ctx.action.id, ctx.step.id
            ))
        })?;
        Ok(ActionOutcome::Route {
            outcome: outcome.to_string(),
        })
    }
}

/// Registry of action executors keyed by kind.
pub struct ActionRegistry {
    executors: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Registry with the built-in executors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(AcceptAction);
        registry.register(RejectAction);
        registry.register(ReviewAction);
        registry.register(EditMetadataAction);
        registry.register(AbortAction);
        registry.register(RouteAction);
        registry
    }

    pub fn register<T: ActionExecutor + 'static>(&mut self, executor: T) {
        let kind = executor.kind().to_string();
        self.executors.insert(kind, Arc::new(executor));
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(kind).cloned()
    }

    pub fn has(&self, kind: &str) -> bool {
        self.executors.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> BTreeSet<String> {
        self.executors.keys().cloned().collect()
    }

    /// Whether actions of this kind leave the step without approving it.
    pub fn is_exit(&self, kind: &str) -> bool {
        self.executors.get(kind).is_some_and(|e| e.is_exit())
    }

    /// The first earlier stage that still has to run before `action_id`.
    pub fn pending_before<'a>(
        &self,
        step: &'a Step,
        action_id: &str,
        performed: &[String],
    ) -> Option<&'a ActionConfig> {
        let stages = self.stages(step);
        let position = stages.iter().position(|a| a.id == action_id)?;
        stages[..position]
            .iter()
            .find(|a| !a.optional && !performed.contains(&a.id))
            .copied()
    }

    /// The next mandatory stage after `action_id`, if any.
    pub fn next_after<'a>(&self, step: &'a Step, action_id: &str) -> Option<&'a ActionConfig> {
        self.stages(step)
            .into_iter()
            .skip_while(|a| a.id != action_id)
            .skip(1)
            .find(|a| !a.optional)
    }

    fn stages<'a>(&self, step: &'a Step) -> Vec<&'a ActionConfig> {
        step.actions
            .iter()
            .filter(|a| !self.is_exit(&a.kind))
            .collect()
    }

    /// Run the executor behind an action config.
    pub async fn execute(
        &self,
        ctx: ActionContext<'_>,
        content: &mut ContentItem,
    ) -> AppResult<ActionOutcome> {
        let executor = self.get(&ctx.action.kind).ok_or_else(|| {
            AppError::Configuration(format!("no executor for action kind '{}'", ctx.action.kind))
        })?;
        executor.execute(ctx, content).await
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step() -> Step {
        serde_yaml::from_str(
            r#"
id: editstep
role: editor
outcomes:
  revise: reviewstep
actions:
  - id: edit
    kind: edit_metadata
    optional: true
    options:
      fields: [dc.title, dc.subject]
  - id: sign
    kind: accept
  - id: approve
    kind: accept
  - id: reject
    kind: reject
  - id: review
    kind: review
  - id: revise
    kind: route
    options:
      outcome: revise
  - id: stray
    kind: route
"#,
        )
        .unwrap()
    }

    async fn run(
        registry: &ActionRegistry,
        action_id: &str,
        input: serde_json::Value,
        content: &mut ContentItem,
    ) -> AppResult<ActionOutcome> {
        let step = step();
        let item = WorkflowItem::new("default", "c1", content.clone());
        let action = step.action(action_id).unwrap().clone();
        let ctx = ActionContext {
            item: &item,
            step: &step,
            action: &action,
            principal: "bob",
            input: &input,
        };
        registry.execute(ctx, content).await
    }

    #[tokio::test]
    async fn test_accept_and_reject() {
        let registry = ActionRegistry::with_builtins();
        let mut content = ContentItem::new("alice", None);

        assert_eq!(
            run(&registry, "approve", json!({}), &mut content).await.unwrap(),
            ActionOutcome::CompleteStep
        );
        assert_eq!(
            run(&registry, "reject", json!({"reason": "  "}), &mut content)
                .await
                .unwrap(),
            ActionOutcome::MoreInputNeeded
        );
        assert_eq!(
            run(&registry, "reject", json!({"reason": "no abstract"}), &mut content)
                .await
                .unwrap(),
            ActionOutcome::Reject {
                reason: "no abstract".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_review_decisions() {
        let registry = ActionRegistry::with_builtins();
        let mut content = ContentItem::new("alice", None);

        assert_eq!(
            run(&registry, "review", json!({"decision": "approve"}), &mut content)
                .await
                .unwrap(),
            ActionOutcome::CompleteStep
        );
        assert_eq!(
            run(&registry, "review", json!({"decision": "reject"}), &mut content)
                .await
                .unwrap(),
            ActionOutcome::MoreInputNeeded
        );
        assert_eq!(
            run(&registry, "review", json!({"decision": "revise"}), &mut content)
                .await
                .unwrap(),
            ActionOutcome::Route {
                outcome: "revise".to_string()
            }
        );
        assert!(matches!(
            run(&registry, "review", json!({"decision": "maybe"}), &mut content).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_route() {
        let registry = ActionRegistry::with_builtins();
        let mut content = ContentItem::new("alice", None);

        assert_eq!(
            run(&registry, "revise", json!({}), &mut content).await.unwrap(),
            ActionOutcome::Route {
                outcome: "revise".to_string()
            }
        );
        assert!(matches!(
            run(&registry, "stray", json!({}), &mut content).await,
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_stage_order() {
        let registry = ActionRegistry::with_builtins();
        let step = step();
        let none: Vec<String> = Vec::new();

        assert!(registry.is_exit("reject"));
        assert!(registry.is_exit("route"));
        assert!(!registry.is_exit("accept"));

        // edit is optional, so sign is open straight away
        assert!(registry.pending_before(&step, "sign", &none).is_none());
        assert_eq!(
            registry.pending_before(&step, "approve", &none).map(|a| a.id.as_str()),
            Some("sign")
        );
        assert!(registry
            .pending_before(&step, "approve", &["sign".to_string()])
            .is_none());
        assert!(registry.pending_before(&step, "reject", &none).is_none());

        assert_eq!(
            registry.next_after(&step, "edit").map(|a| a.id.as_str()),
            Some("sign")
        );
        assert_eq!(
            registry.next_after(&step, "sign").map(|a| a.id.as_str()),
            Some("approve")
        );
        assert_eq!(
            registry.next_after(&step, "approve").map(|a| a.id.as_str()),
            Some("review")
        );
        assert!(registry.next_after(&step, "review").is_none());
    }

    #[tokio::test]
    async fn test_edit_metadata() {
        let registry = ActionRegistry::with_builtins();
        let mut content = ContentItem::new("alice", None);

        let outcome = run(
            &registry,
            "edit",
            json!({"metadata": {"dc.title": "Corrected"}}),
            &mut content,
        )
        .await
        .unwrap();
        assert_eq!(outcome, ActionOutcome::Continue);
        assert_eq!(content.metadata["dc.title"], "Corrected");

        assert_eq!(
            run(&registry, "edit", json!({}), &mut content).await.unwrap(),
            ActionOutcome::MoreInputNeeded
        );

        let err = run(
            &registry,
            "edit",
            json!({"metadata": {"dc.rights": "CC0"}}),
            &mut content,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("dc.rights"));
    }

    #[test]
    fn test_builtin_kinds() {
        let registry = ActionRegistry::with_builtins();
        let kinds = registry.kinds();
        for kind in ["accept", "reject", "review", "edit_metadata", "abort", "route"] {
            assert!(kinds.contains(kind), "missing {}", kind);
        }
        assert!(!registry.has("sword_deposit"));
    }
}
