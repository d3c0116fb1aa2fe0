use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::application::{Notifier, NotifyError};
use crate::domain::ChangeEvent;

/// POSTs the change event as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// `timeout` bounds the whole request, connect to last body byte.
    pub fn new(url: String, timeout: Duration) -> Result<Self, NotifyError> {
        Ok(Self {
            client: http_client(timeout)?,
            url,
        })
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: String,
    event: &'a ChangeEvent,
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            text: event.message(),
            event,
        };

        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        status_to_result(resp.status())
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, NotifyError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| NotifyError::Transport(format!("http client: {e}")))
}

/// 401/403 mean the credentials are wrong; anything else non-2xx is a
/// delivery problem.
pub(crate) fn status_to_result(status: reqwest::StatusCode) -> Result<(), NotifyError> {
    if status.is_success() {
        return Ok(());
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(NotifyError::Auth(format!("http status {status}")));
    }
    Err(NotifyError::Transport(format!("http status {status}")))
}
