//! Reviewer and submitter notifications.
//!
//! Notifications are collected in an [`Outbox`] while a transition runs and
//! dispatched only after its transaction commits. Delivery is
//! fire-and-forget: failures are logged, never propagated. The outbox also
//! carries the archive and workspace hand-offs, which the engine runs after
//! commit before dispatching.

pub mod nats;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::Handoff;
use crate::error::AppResult;
use crate::model::{PrincipalId, WorkflowItem};

pub use nats::NatsNotifier;

/// What happened to the item, from the recipient's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A pool task the recipient may claim.
    TaskAvailable,
    Archived,
    Returned,
    Aborted,
}

/// One message to one principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub principal: PrincipalId,
    pub event: EventKind,
    pub workflow_item_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Notification {
    pub fn new(principal: &str, event: EventKind, item: &WorkflowItem) -> Self {
        Self {
            principal: principal.to_string(),
            event,
            workflow_item_id: item.id,
            step_id: item.current_step.clone(),
            title: item.content.title.clone(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Delivery channel for notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> AppResult<()>;
}

/// Notifier that only writes log lines.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        tracing::info!(
            principal = %notification.principal,
            event = ?notification.event,
            workflow_item_id = %notification.workflow_item_id,
            step_id = ?notification.step_id,
            "Notification"
        );
        Ok(())
    }
}

/// Notifications and hand-offs waiting for a commit.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<Notification>,
    handoffs: Vec<Handoff>,
    suppressed: bool,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// An outbox that drops every notification pushed into it. Hand-offs
    /// are kept.
    pub fn suppressed() -> Self {
        Self {
            suppressed: true,
            ..Self::default()
        }
    }

    pub fn hand_off(&mut self, handoff: Handoff) {
        self.handoffs.push(handoff);
    }

    /// Remove the queued hand-offs, oldest first.
    pub fn take_handoffs(&mut self) -> Vec<Handoff> {
        std::mem::take(&mut self.handoffs)
    }

    pub fn push(&mut self, notification: Notification) {
        if !self.suppressed {
            self.pending.push(notification);
        }
    }

    /// Queue the same event for several principals.
    pub fn push_all<'a, I>(&mut self, principals: I, event: EventKind, item: &WorkflowItem)
    where
        I: IntoIterator<Item = &'a PrincipalId>,
    {
        for principal in principals {
            self.push(Notification::new(principal, event, item));
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Send everything in the background. Call only after commit.
    pub fn dispatch(self, notifier: Arc<dyn Notifier>) {
        if self.pending.is_empty() {
            return;
        }
        let pending = self.pending;
        tokio::spawn(async move {
            for notification in &pending {
                if let Err(e) = notifier.notify(notification).await {
                    tracing::warn!(
                        error = %e,
                        principal = %notification.principal,
                        workflow_item_id = %notification.workflow_item_id,
                        "Notification delivery failed"
                    );
                }
            }
        });
    }
}
