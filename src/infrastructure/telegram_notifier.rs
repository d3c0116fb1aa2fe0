use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::application::{Notifier, NotifyError};
use crate::domain::ChangeEvent;
use crate::infrastructure::webhook_notifier::{http_client, status_to_result};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Sends the change message through the Telegram Bot API `sendMessage`.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String, timeout: Duration) -> Result<Self, NotifyError> {
        Self::with_api_base(TELEGRAM_API.to_string(), token, chat_id, timeout)
    }

    pub fn with_api_base(
        api_base: String,
        token: String,
        chat_id: String,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_base,
            token,
            chat_id,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.token)
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<(), NotifyError> {
        let payload = SendMessage {
            chat_id: &self.chat_id,
            text: event.message(),
        };

        // Do not let the token leak into error text via the request url.
        let resp = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.without_url().to_string()))?;

        // Telegram answers 404 for an unknown bot token.
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(NotifyError::Auth("telegram rejected the bot token".into()));
        }
        status_to_result(resp.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_embeds_token() {
        let n = TelegramNotifier::new("123:abc".into(), "42".into(), Duration::from_secs(5)).unwrap();
        assert_eq!(n.endpoint(), "https://api.telegram.org/bot123:abc/sendMessage");
    }

    #[tokio::test]
    async fn silent_api_times_out_without_leaking_the_token() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(sock);
        });

        let n = TelegramNotifier::with_api_base(
            format!("http://{addr}"),
            "123:secret".into(),
            "42".into(),
            Duration::from_millis(300),
        )
        .unwrap();
        let event = ChangeEvent::change(
            crate::domain::WatchId::new(1),
            "https://example.com/",
            chrono::Utc::now(),
            crate::domain::fingerprint(b"A"),
            crate::domain::fingerprint(b"B"),
        );

        match n.notify(&event).await {
            Err(NotifyError::Transport(msg)) => assert!(!msg.contains("secret"), "{msg}"),
            other => panic!("expected transport error, got {other:?}"),
        }
        server.abort();
    }

    #[test]
    fn payload_shape() {
        let payload = SendMessage {
            chat_id: "42",
            text: "hi".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({ "chat_id": "42", "text": "hi" }));
    }
}
