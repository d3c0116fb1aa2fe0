use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::application::{FetchFailure, FetchResult, FetchedPage, Fetcher};

/// Fetcher that replays a script of results. Once the script runs out the
/// last result repeats. Records when each fetch started.
#[derive(Default)]
pub struct ScriptedFetcher {
    inner: Mutex<Inner>,
    delay: Duration,
}

#[derive(Default)]
struct Inner {
    script: VecDeque<FetchResult>,
    last: Option<FetchResult>,
    started: Vec<Instant>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each fetch takes `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn push_body(&self, body: impl Into<Vec<u8>>) -> &Self {
        self.push(Ok(FetchedPage {
            body: body.into(),
            final_url: String::new(),
        }))
    }

    pub fn push_failure(&self, failure: FetchFailure) -> &Self {
        self.push(Err(failure))
    }

    fn push(&self, result: FetchResult) -> &Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.script.push_back(result);
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.inner.lock().map(|i| i.started.len()).unwrap_or(0)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.inner
            .lock()
            .map(|i| i.started.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> FetchResult {
        let next = {
            let mut inner = self
                .inner
                .lock()
                .map_err(|_| FetchFailure::Network("script lock poisoned".into()))?;
            inner.started.push(Instant::now());
            let next = inner.script.pop_front().or_else(|| inner.last.clone());
            if let Some(n) = &next {
                inner.last = Some(n.clone());
            }
            next
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match next {
            Some(Ok(mut page)) => {
                if page.final_url.is_empty() {
                    page.final_url = url.to_string();
                }
                Ok(page)
            }
            Some(Err(e)) => Err(e),
            None => Err(FetchFailure::Network("empty script".into())),
        }
    }
}
