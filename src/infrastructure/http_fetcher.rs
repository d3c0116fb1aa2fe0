use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;

use crate::application::{FetchFailure, FetchResult, FetchedPage, Fetcher};

pub const DEFAULT_MAX_REDIRECTS: usize = 5;

pub fn default_user_agent() -> String {
    format!("pagewatch/{}", env!("CARGO_PKG_VERSION"))
}

/// Plain GET over reqwest with a bounded redirect chain and an explicit
/// user agent. The timeout is applied per request.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, max_redirects: usize) -> Result<Self, FetchFailure> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(Policy::limited(max_redirects))
            .build()
            .map_err(|e| FetchFailure::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> FetchResult {
        debug_assert!(!timeout.is_zero(), "fetch timeout must be positive");

        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchFailure::HttpStatus(status.as_u16()));
        }

        let final_url = resp.url().to_string();
        let body = resp.bytes().await.map_err(classify)?;

        Ok(FetchedPage {
            body: body.to_vec(),
            final_url,
        })
    }
}

fn classify(e: reqwest::Error) -> FetchFailure {
    if e.is_timeout() {
        return FetchFailure::Timeout;
    }
    if e.is_redirect() {
        return FetchFailure::TooManyRedirects;
    }
    if let Some(status) = e.status() {
        return FetchFailure::HttpStatus(status.as_u16());
    }
    let chain = error_chain(&e);
    if looks_like_tls(&chain) {
        return FetchFailure::Tls(chain);
    }
    FetchFailure::Network(chain)
}

fn error_chain(e: &reqwest::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}

// reqwest does not expose a typed TLS error; the rustls/webpki messages are
// the only signal.
fn looks_like_tls(chain: &str) -> bool {
    let lower = chain.to_ascii_lowercase();
    ["certificate", "tls", "ssl", "handshake"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves each canned response to one connection, in order.
    async fn serve(responses: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for response in responses {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let _ = sock.read(&mut buf).await;
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    fn ok(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn redirect(to: &str) -> String {
        format!("HTTP/1.1 302 Found\r\nLocation: {to}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
    }

    #[tokio::test]
    async fn returns_body_on_success() {
        let base = serve(vec![ok("hello")]).await;
        let fetcher = HttpFetcher::new(&default_user_agent(), 5).unwrap();

        let page = fetcher.fetch(&base, Duration::from_secs(5)).await.unwrap();
        assert_eq!(page.body, b"hello");
    }

    #[tokio::test]
    async fn maps_error_status() {
        let base = serve(vec![
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
        ])
        .await;
        let fetcher = HttpFetcher::new(&default_user_agent(), 5).unwrap();

        let err = fetcher.fetch(&base, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, FetchFailure::HttpStatus(503));
    }

    #[tokio::test]
    async fn follows_redirects_and_reports_final_url() {
        let base = serve(vec![redirect("/landing"), ok("landed")]).await;
        let fetcher = HttpFetcher::new(&default_user_agent(), 5).unwrap();

        let page = fetcher.fetch(&base, Duration::from_secs(5)).await.unwrap();
        assert_eq!(page.body, b"landed");
        assert!(page.final_url.ends_with("/landing"));
    }

    #[tokio::test]
    async fn bounded_redirect_chain() {
        let base = serve(vec![redirect("/a"), redirect("/b"), redirect("/c")]).await;
        let fetcher = HttpFetcher::new(&default_user_agent(), 1).unwrap();

        let err = fetcher.fetch(&base, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, FetchFailure::TooManyRedirects);
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let fetcher = HttpFetcher::new(&default_user_agent(), 5).unwrap();

        let err = fetcher
            .fetch(&format!("http://{addr}"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err, FetchFailure::Timeout);
    }

    #[tokio::test]
    async fn refused_connection_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let fetcher = HttpFetcher::new(&default_user_agent(), 5).unwrap();

        let err = fetcher
            .fetch(&format!("http://{addr}"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchFailure::Network(_)), "{err:?}");
    }
}
