use crate::events::{CloudEvent, STRUCTURED_CONTENT_TYPE};
use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum SendError {
    #[error("could not send event: {0}")]
    Request(#[from] reqwest::Error),
    #[error("could not encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("event broker rejected event with status {0}")]
    Rejected(reqwest::StatusCode),
}

/// Outbound side of the Keptn event flow.
#[async_trait]
pub trait EventSender: Send + Sync {
    async fn send(&self, event: CloudEvent) -> Result<(), SendError>;
}

/// Posts structured-mode CloudEvents to the Keptn event broker (usually the
/// distributor sidecar).
pub struct HttpEventSender {
    client: reqwest::Client,
    broker_url: String,
}

impl HttpEventSender {
    pub fn new(broker_url: &str) -> Self {
        HttpEventSender {
            client: reqwest::Client::new(),
            broker_url: broker_url.to_string(),
        }
    }
}

#[async_trait]
impl EventSender for HttpEventSender {
    async fn send(&self, event: CloudEvent) -> Result<(), SendError> {
        let response = self
            .client
            .post(&self.broker_url)
            .header(reqwest::header::CONTENT_TYPE, STRUCTURED_CONTENT_TYPE)
            .body(serde_json::to_vec(&event)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SendError::Rejected(response.status()));
        }

        tracing::debug!(event_type = %event.r#type, id = %event.id, "Sent event");
        Ok(())
    }
}

/// Logs events instead of sending them. Used when running outside the cluster.
pub struct LogEventSender;

#[async_trait]
impl EventSender for LogEventSender {
    async fn send(&self, event: CloudEvent) -> Result<(), SendError> {
        tracing::info!(
            event_type = %event.r#type,
            id = %event.id,
            data = %event.data,
            "Not sending event outside of the cluster"
        );
        Ok(())
    }
}
