use async_trait::async_trait;
use tracing::warn;

use crate::application::{Notifier, NotifyError};
use crate::domain::ChangeEvent;

/// Fans an event out to every channel. One failing channel does not stop the
/// others; the last error is reported.
pub struct MultiNotifier {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<(), NotifyError> {
        let mut last_err = None;

        for n in &self.notifiers {
            if let Err(e) = n.notify(event).await {
                warn!(watch_id = %event.watch_id, error = %e, "notifier channel failed");
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
