//! HTTP-backed action handlers: page navigation and webhook notifications.
//!
//! Both handlers share one `reqwest::Client`. Failures are mapped onto the
//! engine's error classes so the retry policy can tell transient problems
//! (timeouts, refused connections, 5xx, 429) from permanent ones.

use serde_json::{json, Value};
use stackflow_core::workflow::action::ActionHandler;
use stackflow_core::workflow::context::ExecutionContext;
use stackflow_types::error::ActionError;
use stackflow_types::workflow::StepDefinition;

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Map a transport-level `reqwest` error to an [`ActionError`].
pub fn classify_send_error(url: &str, err: &reqwest::Error) -> ActionError {
    if err.is_timeout() {
        ActionError::Timeout(format!("request to '{url}' timed out"))
    } else if err.is_connect() || err.is_request() {
        ActionError::Network(format!("request to '{url}' failed: {err}"))
    } else if err.is_builder() {
        ActionError::Validation(format!("cannot build request to '{url}': {err}"))
    } else {
        ActionError::Failed(format!("request to '{url}' failed: {err}"))
    }
}

/// Map a non-success HTTP status to an [`ActionError`]. Returns `None` for 2xx/3xx.
pub fn classify_status(url: &str, status: u16) -> Option<ActionError> {
    match status {
        200..=399 => None,
        408 => Some(ActionError::Timeout(format!("HTTP 408 from '{url}'"))),
        429 | 500..=599 => Some(ActionError::Network(format!("HTTP {status} from '{url}'"))),
        _ => Some(ActionError::Failed(format!("HTTP {status} from '{url}'"))),
    }
}

/// Read a required absolute http(s) URL from `config[key]`.
fn required_url(config: &Value, key: &str) -> Result<reqwest::Url, ActionError> {
    let raw = config
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ActionError::Validation(format!("'{key}' must be a string URL")))?;

    let url = reqwest::Url::parse(raw)
        .map_err(|e| ActionError::Validation(format!("'{key}' is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ActionError::Validation(format!(
            "'{key}' must use http or https, got '{other}'"
        ))),
    }
}

/// Breaker resource for a URL-targeting step: one breaker per host.
fn host_resource(prefix: &str, config: &Value, key: &str) -> String {
    config
        .get(key)
        .and_then(Value::as_str)
        .and_then(|raw| reqwest::Url::parse(raw).ok())
        .and_then(|url| url.host_str().map(|h| format!("{prefix}:{h}")))
        .unwrap_or_else(|| prefix.to_string())
}

/// Pull the text of the first `<title>` element, if any.
fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</title>")?;
    let title = html[start..end].trim();
    (!title.is_empty()).then(|| title.to_string())
}

// ---------------------------------------------------------------------------
// HttpNavigateHandler
// ---------------------------------------------------------------------------

/// `navigate` steps: fetch `config.url` with an HTTP GET.
///
/// Output: `{ "url", "status", "title"?, "body" }`.
#[derive(Debug, Clone)]
pub struct HttpNavigateHandler {
    client: reqwest::Client,
}

impl HttpNavigateHandler {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ActionHandler for HttpNavigateHandler {
    fn name(&self) -> &str {
        "http-navigate"
    }

    fn resource_key(&self, step: &StepDefinition) -> String {
        host_resource("navigate", &step.config, "url")
    }

    async fn execute(
        &self,
        step: &StepDefinition,
        _ctx: &ExecutionContext,
    ) -> Result<Value, ActionError> {
        let url = required_url(&step.config, "url")?;
        let url_str = url.to_string();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_send_error(&url_str, &e))?;

        let status = response.status().as_u16();
        if let Some(err) = classify_status(&url_str, status) {
            return Err(err);
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| classify_send_error(&url_str, &e))?;

        tracing::info!(
            step_id = %step.id,
            url = url_str.as_str(),
            status,
            body_len = body.len(),
            "navigate step completed"
        );

        let mut output = json!({
            "url": final_url,
            "status": status,
            "body": body,
        });
        if let Some(title) = extract_title(&body) {
            output["title"] = Value::String(title);
        }
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// WebhookNotifyHandler
// ---------------------------------------------------------------------------

/// `notify` steps: POST a JSON payload to `config.webhookUrl`.
///
/// The body is `config.payload` if present, otherwise a summary of the
/// execution (IDs and the step outputs recorded so far).
#[derive(Debug, Clone)]
pub struct WebhookNotifyHandler {
    client: reqwest::Client,
}

impl WebhookNotifyHandler {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ActionHandler for WebhookNotifyHandler {
    fn name(&self) -> &str {
        "webhook-notify"
    }

    fn resource_key(&self, step: &StepDefinition) -> String {
        host_resource("notify", &step.config, "webhookUrl")
    }

    async fn execute(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
    ) -> Result<Value, ActionError> {
        let url = required_url(&step.config, "webhookUrl")?;
        let url_str = url.to_string();

        let payload = match step.config.get("payload") {
            Some(payload) if !payload.is_null() => payload.clone(),
            _ => json!({
                "workflowId": ctx.workflow_id,
                "executionId": ctx.execution_id,
                "state": ctx.state(),
            }),
        };

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| classify_send_error(&url_str, &e))?;

        let status = response.status().as_u16();
        if let Some(err) = classify_status(&url_str, status) {
            return Err(err);
        }

        tracing::info!(
            step_id = %step.id,
            url = url_str.as_str(),
            status,
            "notification delivered"
        );

        Ok(json!({
            "webhookUrl": url_str,
            "status": status,
            "delivered": true,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
