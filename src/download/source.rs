//! Content sources
//!
//! Where downloaded bytes come from. The HTTP source talks to the Pixiv image
//! host, which refuses requests that lack an artwork referer.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, REFERER, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, instrument};

use super::error::FetchError;
use crate::error::{Error, Result};

/// Default per-request timeout for the HTTP source
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_USER_AGENT: &str = concat!("pixiv-cache/", env!("CARGO_PKG_VERSION"));

/// Remote origin of resource bytes
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Declared size of the resource, if the origin reports one
    async fn content_length(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> std::result::Result<Option<u64>, FetchError>;

    /// Full body of the resource
    async fn download(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> std::result::Result<Bytes, FetchError>;
}

/// `reqwest` backed source
#[derive(Debug, Clone)]
pub struct HttpContentSource {
    client: Client,
}

impl HttpContentSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn with_headers(builder: RequestBuilder, referer: Option<&str>) -> RequestBuilder {
        let builder = builder.header(USER_AGENT, DEFAULT_USER_AGENT);
        match referer {
            Some(referer) => builder.header(REFERER, referer),
            None => builder,
        }
    }

    fn check_status(url: &str, response: &Response) -> std::result::Result<(), FetchError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(FetchError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("unknown").to_string(),
        })
    }

    fn transport(url: &str, err: reqwest::Error) -> FetchError {
        FetchError::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    #[instrument(skip(self, referer))]
    async fn content_length(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> std::result::Result<Option<u64>, FetchError> {
        let response = Self::with_headers(self.client.head(url), referer)
            .send()
            .await
            .map_err(|e| Self::transport(url, e))?;
        Self::check_status(url, &response)?;

        // Read the header itself: a HEAD response has no body to measure.
        let length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        debug!(?length, "HEAD content length");
        Ok(length)
    }

    #[instrument(skip(self, referer))]
    async fn download(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> std::result::Result<Bytes, FetchError> {
        let response = Self::with_headers(self.client.get(url), referer)
            .send()
            .await
            .map_err(|e| Self::transport(url, e))?;
        Self::check_status(url, &response)?;

        let mut body = match response.content_length() {
            Some(len) => BytesMut::with_capacity(len as usize),
            None => BytesMut::new(),
        };
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Self::transport(url, e))?;
            body.extend_from_slice(&chunk);
        }
        debug!(bytes = body.len(), "Downloaded");
        Ok(body.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source() -> HttpContentSource {
        HttpContentSource::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_download_sends_referer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/123_p0.jpg"))
            .and(header("referer", "https://www.pixiv.net/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpegdata".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/img/123_p0.jpg", server.uri());
        let bytes = source()
            .download(&url, Some("https://www.pixiv.net/"))
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"jpegdata");
    }

    #[tokio::test]
    async fn test_download_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let url = format!("{}/img/1_p0.jpg", server.uri());
        let err = source().download(&url, None).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_content_length_from_head() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/img/123_p0.jpg"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "2048"))
            .mount(&server)
            .await;

        let url = format!("{}/img/123_p0.jpg", server.uri());
        let length = source().content_length(&url, None).await.unwrap();
        assert_eq!(length, Some(2048));
    }

    #[tokio::test]
    async fn test_transport_error() {
        // Nothing listens on port 9 locally.
        let err = source()
            .download("http://127.0.0.1:9/none.jpg", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }
}
