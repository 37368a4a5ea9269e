use super::{Notification, Notifier};
use crate::config::WebhookConfig;
use crate::error::{LagwatchError, Result};
use crate::storage::status::PartitionState;
use std::collections::HashMap;
use tracing::debug;

/// POSTs each notification as JSON to an HTTP endpoint.
pub struct WebhookNotifier {
    name: String,
    url: String,
    threshold: PartitionState,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LagwatchError::Notify(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            threshold: config.threshold,
            headers: config.headers.clone(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn threshold(&self) -> PartitionState {
        self.threshold
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        let mut request = self.client.post(&self.url).json(notification);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            LagwatchError::Notify(format!("webhook {}: request failed: {e}", self.name))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LagwatchError::Notify(format!(
                "webhook {}: {status} - {body}",
                self.name
            )));
        }

        debug!(webhook = %self.name, group = %notification.group, "Webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationKind;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn notification() -> Notification {
        Notification {
            cluster: "prod".to_string(),
            group: "billing".to_string(),
            status: PartitionState::Error,
            previous: None,
            kind: NotificationKind::Transition,
            timestamp_ms: 1,
            total_lag: 250,
            partitions: Vec::new(),
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/hook")
    }

    fn config(url: String) -> WebhookConfig {
        WebhookConfig {
            name: "ops".to_string(),
            url,
            threshold: PartitionState::Warn,
            timeout: Duration::from_secs(5),
            headers: HashMap::from([("X-Token".to_string(), "secret".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_posts_json_with_headers() {
        let received: Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>> =
            Arc::default();
        let sink = Arc::clone(&received);
        let router = Router::new().route(
            "/hook",
            post(move |headers: HeaderMap, body: axum::Json<serde_json::Value>| {
                let sink = Arc::clone(&sink);
                async move {
                    let token = headers
                        .get("x-token")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    sink.lock().unwrap().push((token, body.0));
                    StatusCode::NO_CONTENT
                }
            }),
        );

        let notifier = WebhookNotifier::new(&config(serve(router).await)).unwrap();
        notifier.notify(&notification()).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.as_deref(), Some("secret"));
        assert_eq!(received[0].1["group"], "billing");
        assert_eq!(received[0].1["status"], "ERROR");
        assert_eq!(received[0].1["total_lag"], 250);
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let router = Router::new().route("/hook", post(|| async { StatusCode::BAD_GATEWAY }));
        let notifier = WebhookNotifier::new(&config(serve(router).await)).unwrap();

        let err = notifier.notify(&notification()).await.unwrap_err();
        assert!(matches!(err, LagwatchError::Notify(_)));
    }
}
