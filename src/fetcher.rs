use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::date_cursor::FileReference;
use crate::error::FetchError;

/// A single GET, no retries. Implemented over HTTP in production and by an
/// in-memory stub in tests.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;

    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        debug!("GET {} -> {}", url, response.status());
        Ok(response)
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let body = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;
        Ok(body.to_vec())
    }

    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })
    }
}

/// Retrieves the raw workbook behind a file reference.
pub struct FileFetcher<'a, F: Fetch + ?Sized> {
    transport: &'a F,
    host: &'a Url,
}

impl<'a, F: Fetch + ?Sized> FileFetcher<'a, F> {
    pub fn new(transport: &'a F, host: &'a Url) -> Self {
        Self { transport, host }
    }

    pub async fn fetch(&self, reference: &FileReference) -> Result<Vec<u8>, FetchError> {
        let url = resolve(self.host, reference.href())?;
        self.transport.fetch_bytes(url.as_str()).await
    }
}

pub fn resolve(host: &Url, href: &str) -> Result<Url, FetchError> {
    host.join(href).map_err(|source| FetchError::InvalidUrl {
        reference: href.to_string(),
        base: host.to_string(),
        source,
    })
}
