use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::application::{Notifier, NotifyError};
use crate::domain::ChangeEvent;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: String,
}

/// Sends the change message over SMTP. Port 465 uses implicit TLS, any other
/// port STARTTLS.
pub struct EmailNotifier {
    transport: SmtpTransport,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    pub fn new(settings: &EmailSettings) -> Result<Self, NotifyError> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e| NotifyError::Transport(format!("invalid sender address: {e}")))?;
        let to: Mailbox = settings
            .to
            .parse()
            .map_err(|e| NotifyError::Transport(format!("invalid recipient address: {e}")))?;

        let creds = Credentials::new(settings.username.clone(), settings.password.clone());
        let relay = if settings.smtp_port == 465 {
            SmtpTransport::relay(&settings.smtp_host)
        } else {
            SmtpTransport::starttls_relay(&settings.smtp_host)
        }
        .map_err(|e| NotifyError::Transport(format!("smtp relay: {e}")))?;

        let transport = relay
            .port(settings.smtp_port)
            .credentials(creds)
            .build();

        Ok(Self { transport, from, to })
    }

    fn build_message(&self, event: &ChangeEvent) -> Result<Message, NotifyError> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(event.subject())
            .body(event.message())
            .map_err(|e| NotifyError::Transport(format!("failed to build email: {e}")))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<(), NotifyError> {
        let message = self.build_message(event)?;
        let transport = self.transport.clone();

        // The SMTP transport is blocking.
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .map(|_| ())
            .map_err(classify_smtp)
    }
}

fn classify_smtp(e: lettre::transport::smtp::Error) -> NotifyError {
    // 530/534/535: authentication required or rejected.
    let auth = e
        .status()
        .map(|code| matches!(code.to_string().as_str(), "530" | "534" | "535"))
        .unwrap_or(false);
    if auth {
        NotifyError::Auth(e.to_string())
    } else {
        NotifyError::Transport(e.to_string())
    }
}
