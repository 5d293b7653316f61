//! Thin HTTP client for the ReviewFlow server API.

use anyhow::{bail, Context, Result};
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", path))?;
        read_json(response).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", path))?;
        read_json(response).await
    }

    pub async fn workflows(&self) -> Result<Value> {
        self.get("/api/workflows", &[]).await
    }

    pub async fn start(
        &self,
        container_id: &str,
        submitter: &str,
        title: Option<&str>,
        metadata: Value,
        notify: bool,
    ) -> Result<Value> {
        let body = json!({
            "container_id": container_id,
            "submitter": submitter,
            "title": title,
            "metadata": metadata,
            "notify": notify,
        });
        self.post("/api/workflow/items", &body).await
    }

    pub async fn item(&self, item_id: Uuid) -> Result<Value> {
        self.get(&format!("/api/workflow/items/{}", item_id), &[])
            .await
    }

    pub async fn history(&self, item_id: Uuid) -> Result<Value> {
        self.get(&format!("/api/workflow/items/{}/history", item_id), &[])
            .await
    }

    pub async fn pool(&self, principal: &str, offset: u32, limit: u32) -> Result<Value> {
        self.get("/api/tasks/pool", &page_query(principal, offset, limit))
            .await
    }

    pub async fn claimed(&self, principal: &str, offset: u32, limit: u32) -> Result<Value> {
        self.get("/api/tasks/claimed", &page_query(principal, offset, limit))
            .await
    }

    pub async fn claim(&self, item_id: Uuid, step_id: &str, principal: &str) -> Result<Value> {
        self.post("/api/tasks/claim", &task_body(item_id, step_id, principal))
            .await
    }

    pub async fn unclaim(&self, item_id: Uuid, step_id: &str, principal: &str) -> Result<Value> {
        self.post("/api/tasks/unclaim", &task_body(item_id, step_id, principal))
            .await
    }

    pub async fn execute(
        &self,
        item_id: Uuid,
        step_id: &str,
        principal: &str,
        action_id: &str,
        input: Value,
    ) -> Result<Value> {
        let body = json!({
            "workflow_item_id": item_id,
            "step_id": step_id,
            "principal": principal,
            "action_id": action_id,
            "input": input,
        });
        self.post("/api/tasks/execute", &body).await
    }

    pub async fn abort(&self, item_id: Uuid, admin: &str, reason: Option<&str>) -> Result<Value> {
        let body = json!({ "admin": admin, "reason": reason });
        self.post(&format!("/api/workflow/items/{}/abort", item_id), &body)
            .await
    }
}

fn page_query(principal: &str, offset: u32, limit: u32) -> Vec<(&'static str, String)> {
    vec![
        ("principal", principal.to_string()),
        ("offset", offset.to_string()),
        ("limit", limit.to_string()),
    ]
}

fn task_body(item_id: Uuid, step_id: &str, principal: &str) -> Value {
    json!({
        "workflow_item_id": item_id,
        "step_id": step_id,
        "principal": principal,
    })
}

/// Decode a JSON body, turning the server's error payload into an error.
async fn read_json(response: Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await.context("Failed to read response body")?;

    if status.is_success() {
        return serde_json::from_str(&text).context("Server returned invalid JSON");
    }
    bail!("{} - {}", status, error_message(&text))
}

/// Message of an error body. Claim contention tells the user to refresh.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    let message = value
        .get("error")
        .and_then(|e| e.as_str())
        .unwrap_or(body)
        .to_string();
    if value.get("retry").and_then(|r| r.as_bool()) == Some(true) {
        format!("{} (someone else got there first; refresh the task list and retry)", message)
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client = ApiClient::new("http://localhost:8084/");
        assert_eq!(client.url("/api/workflows"), "http://localhost:8084/api/workflows");
    }

    #[test]
    fn test_error_message() {
        let contention = r#"{"error":"Task already claimed: no open slot","status":409,"retry":true}"#;
        assert!(error_message(contention).contains("refresh the task list"));

        let plain = r#"{"error":"Workflow item 1 not found","status":404,"retry":false}"#;
        assert_eq!(error_message(plain), "Workflow item 1 not found");

        assert_eq!(error_message("bad gateway"), "bad gateway");
    }

    #[test]
    fn test_page_query() {
        let query = page_query("bob", 10, 20);
        assert_eq!(query[0], ("principal", "bob".to_string()));
        assert_eq!(query[2], ("limit", "20".to_string()));
    }
}
