use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use memocache::Func;
use reqwest::{StatusCode, Url};

use crate::config::FetchConfig;

/// An error fetching the body of a URL.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request could not be sent, or the body could not be read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The server responded with a non-success status.
    #[error("server responded with {0}")]
    Status(StatusCode),
}

/// Creates the HTTP client used for all fetches.
pub fn create_client(config: &FetchConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .user_agent(&config.user_agent)
        .build()
}

/// Fetches the full body of `url`.
pub async fn http_get_body(client: &reqwest::Client, url: Url) -> Result<Bytes, FetchError> {
    tracing::debug!(%url, "fetching");
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }

    Ok(response.bytes().await?)
}

/// Wraps [`http_get_body`] into a function that can be memoized.
pub fn memoizable(client: reqwest::Client) -> Func<Url, Bytes, FetchError> {
    Arc::new(move |url| {
        let client = client.clone();
        async move { http_get_body(&client, url).await }.boxed()
    })
}
