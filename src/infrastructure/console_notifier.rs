use async_trait::async_trait;

use crate::application::{Notifier, NotifyError};
use crate::domain::ChangeEvent;

pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<(), NotifyError> {
        println!(
            "NOTIFY: watch={} url={} {} -> {} at={}",
            event.watch_id,
            event.url,
            event.previous_digest.short(),
            event.current_digest.short(),
            event.occurred_at.to_rfc3339()
        );
        Ok(())
    }
}
