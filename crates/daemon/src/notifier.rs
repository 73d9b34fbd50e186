//! Chat webhook alerts for permanently failed jobs

use async_trait::async_trait;
use courier_core::port::{FailureNotice, Notifier, NotifyError};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts `{"text": <summary>}` to an incoming-webhook URL
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(WEBHOOK_TIMEOUT).build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_failure(&self, notice: &FailureNotice) -> Result<(), NotifyError> {
        self.client
            .post(&self.url)
            .json(&json!({ "text": notice.summary() }))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn notice() -> FailureNotice {
        FailureNotice {
            job_id: 42,
            task_type: "create_order".to_string(),
            attempts: 6,
            max_attempts: 6,
            error: "carrier unavailable".to_string(),
            payload_excerpt: r#"{"order_id":7}"#.to_string(),
        }
    }

    #[tokio::test]
    async fn test_unreachable_webhook_reports_delivery_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier = WebhookNotifier::new(format!("http://{}/hook", addr)).unwrap();
        let err = notifier.notify_failure(&notice()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Delivery(_)));
    }
}
