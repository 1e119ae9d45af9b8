use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use url::Url;

use crate::config::Settings;
use crate::error::FetchError;

/// Raw document retrieval. The only place a crawl suspends.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

/// `reqwest`-backed fetcher with retry on rate limiting and 5xx responses.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
    base_backoff: Duration,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            max_retries: settings.max_retries,
            base_backoff: Duration::from_millis(settings.retry_backoff_ms),
        })
    }

    async fn fetch_once(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let backoff = self.base_backoff * 2u32.pow(attempt);
                    warn!(
                        %url,
                        error = %e,
                        "attempt {}/{} failed, backing off {:.1}s",
                        attempt + 1,
                        self.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Serves canned bodies keyed by full URL; anything else is a 404.
    #[derive(Default)]
    pub struct StaticFetcher {
        pages: HashMap<String, Vec<u8>>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl StaticFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, url: impl AsRef<str>, body: impl Into<Vec<u8>>) -> Self {
            self.pages.insert(url.as_ref().to_string(), body.into());
            self
        }

        pub fn with_fixture(self, url: impl AsRef<str>, fixture: &str) -> Self {
            let body = std::fs::read(format!("tests/fixtures/{}.html", fixture)).unwrap();
            self.with(url, body)
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.pages
                .get(url.as_str())
                .cloned()
                .ok_or(FetchError::Http(404))
        }
    }
}
