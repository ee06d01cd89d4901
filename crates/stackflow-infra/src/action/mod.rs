//! Built-in action handlers.
//!
//! These implement the `ActionHandler` port from stackflow-core for the step
//! types that need nothing beyond HTTP and local JSON processing. Browser
//! driven step types (`extract`, `fill-form`) are supplied by the embedding
//! application.

pub mod http;
pub mod transform;

use std::time::Duration;

use stackflow_core::workflow::action::ActionRegistry;
use stackflow_types::workflow::StepType;

use self::http::{HttpNavigateHandler, WebhookNotifyHandler};
use self::transform::TransformDataHandler;

/// Default timeout for a single outbound HTTP request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a registry with every built-in handler, sharing one HTTP client.
pub fn builtin_registry(http_timeout: Duration) -> Result<ActionRegistry, reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(http_timeout)
        .user_agent(concat!("stackflow/", env!("CARGO_PKG_VERSION")))
        .build()?;

    Ok(ActionRegistry::new()
        .with(StepType::Navigate, HttpNavigateHandler::new(client.clone()))
        .with(StepType::Notify, WebhookNotifyHandler::new(client))
        .with(StepType::TransformData, TransformDataHandler::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_covers_http_and_transform_types() {
        let registry = builtin_registry(DEFAULT_HTTP_TIMEOUT).unwrap();
        assert_eq!(
            registry.registered_types(),
            vec![StepType::Navigate, StepType::TransformData, StepType::Notify]
        );
        assert!(registry.handler(StepType::Extract).is_none());
    }
}
