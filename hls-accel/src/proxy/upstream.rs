//! Upstream HTTP access.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, RANGE};
use tracing::debug;
use url::Url;

use crate::utils::http_client::build_upstream_client;
use crate::{Error, Result};

/// Client for origin servers. Configured headers are sent on every request.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    playlist_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(headers: HeaderMap, playlist_timeout: Duration) -> Self {
        Self {
            client: build_upstream_client(headers),
            playlist_timeout,
        }
    }

    /// Fetch a playlist body. Any non-2xx status is an error.
    pub async fn fetch_playlist(&self, url: &Url) -> Result<Bytes> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.playlist_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        debug!(url = %url, bytes = body.len(), "Fetched upstream playlist");
        Ok(body)
    }

    /// Open a streaming GET for pass-through. The upstream status is returned
    /// as-is for the caller to forward.
    pub async fn open(&self, url: &str, range: Option<&HeaderValue>) -> Result<reqwest::Response> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range.clone());
        }
        Ok(request.send().await?)
    }
}
