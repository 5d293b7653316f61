//! NATS JetStream notification publisher.
//!
//! Publishes each notification as JSON on a subject; a mail or UI bridge
//! subscribes and does the actual delivery.

use async_nats::jetstream::{self, Context};
use async_trait::async_trait;

use crate::error::{AppError, AppResult};
use crate::notify::{Notification, Notifier};

/// Default subject for notifications.
pub const DEFAULT_SUBJECT: &str = "reviewflow.notifications";

/// Default JetStream stream name.
pub const DEFAULT_STREAM: &str = "reviewflow_notifications";

/// JetStream-backed notifier.
#[derive(Clone)]
pub struct NatsNotifier {
    js: Context,
    subject: String,
}

impl NatsNotifier {
    /// Create a notifier from a connected client, creating the stream if needed.
    pub async fn new(
        client: async_nats::Client,
        subject: Option<&str>,
        stream_name: Option<&str>,
    ) -> AppResult<Self> {
        let subject = subject.unwrap_or(DEFAULT_SUBJECT).to_string();
        let stream = stream_name.unwrap_or(DEFAULT_STREAM);

        let js = jetstream::new(client);
        Self::ensure_stream(&js, stream, &subject).await?;

        Ok(Self { js, subject })
    }

    async fn ensure_stream(js: &Context, stream: &str, subject: &str) -> AppResult<()> {
        match js.get_stream(stream).await {
            Ok(_) => {
                tracing::debug!(stream = %stream, "Using existing NATS stream");
                Ok(())
            }
            Err(_) => {
                let config = jetstream::stream::Config {
                    name: stream.to_string(),
                    subjects: vec![subject.to_string()],
                    max_age: std::time::Duration::from_secs(7 * 24 * 3600),
                    storage: jetstream::stream::StorageType::File,
                    ..Default::default()
                };

                js.create_stream(config)
                    .await
                    .map_err(|e| AppError::Collaborator(format!("JetStream: {}", e)))?;

                tracing::info!(stream = %stream, subject = %subject, "Created NATS stream");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        let payload = serde_json::to_vec(notification)?;

        self.js
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| AppError::Collaborator(format!("NATS publish: {}", e)))?
            .await
            .map_err(|e| AppError::Collaborator(format!("NATS ack: {}", e)))?;

        tracing::debug!(
            principal = %notification.principal,
            workflow_item_id = %notification.workflow_item_id,
            subject = %self.subject,
            "Published notification"
        );

        Ok(())
    }
}
