//! HTTP file source
//!
//! Reads objects from the file-serving API with a bearer token. References
//! that are absolute `http(s)` URLs are fetched as-is; anything else is
//! resolved against `SOURCE_BASE_URL`.
//!
//! The token is only sent to the origin of `SOURCE_BASE_URL`. Absolute URLs
//! on any other host are fetched without credentials.

use anyhow::Context;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{header, Client, StatusCode, Url};
use std::time::Duration;

use vidrelay_core::{SourceClient, SourceConfig, SourceObject, TransferError};

#[derive(Clone)]
pub struct HttpSource {
    client: Client,
    base_url: Option<String>,
    /// Parsed `base_url`; the bearer token is scoped to its origin.
    token_scope: Option<Url>,
    token: Option<String>,
    open_timeout: Duration,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> anyhow::Result<Self> {
        let open_timeout = Duration::from_secs(config.read_timeout_secs);
        let client = Client::builder()
            .connect_timeout(open_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client for source: {}", e))?;

        let token_scope = config
            .base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .context("SOURCE_BASE_URL is not a valid URL")?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            token_scope,
            token: config.token.clone(),
            open_timeout,
        })
    }

    fn resolve(&self, source_ref: &str) -> Result<Url, TransferError> {
        let url = if source_ref.starts_with("http://") || source_ref.starts_with("https://") {
            source_ref.to_string()
        } else {
            match self.base_url.as_deref() {
                Some(base) => format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    source_ref.trim_start_matches('/')
                ),
                None => {
                    return Err(TransferError::source_permanent(format!(
                        "relative source reference '{}' but SOURCE_BASE_URL is not configured",
                        source_ref
                    )))
                }
            }
        };
        Url::parse(&url).map_err(|e| {
            TransferError::source_permanent(format!("invalid source URL '{}': {}", url, e))
        })
    }

    /// Token for `url`, if it points at the file API.
    fn token_for(&self, url: &Url) -> Option<&str> {
        let scope = self.token_scope.as_ref()?;
        if scope.origin() != url.origin() {
            return None;
        }
        self.token.as_deref()
    }
}

/// Missing objects are permanent. Auth failures are retried because tokens
/// are rotated out of band.
fn classify_status(status: StatusCode, url: &Url) -> TransferError {
    let detail = format!("GET {} returned {}", url, status);
    match status.as_u16() {
        401 | 403 | 408 | 429 | 500..=599 => TransferError::source_transient(detail),
        _ => TransferError::source_permanent(detail),
    }
}

#[async_trait]
impl SourceClient for HttpSource {
    #[tracing::instrument(skip(self))]
    async fn open(&self, source_ref: &str) -> Result<SourceObject, TransferError> {
        let url = self.resolve(source_ref)?;

        let mut request = self.client.get(url.clone());
        match self.token_for(&url) {
            Some(token) => request = request.bearer_auth(token),
            None if self.token.is_some() => {
                tracing::debug!(url = %url, "Source outside the file API origin, sending no token");
            }
            None => {}
        }

        let response = tokio::time::timeout(self.open_timeout, request.send())
            .await
            .map_err(|_| TransferError::Timeout {
                operation: "source open",
                after_secs: self.open_timeout.as_secs(),
            })?
            .map_err(|e| {
                tracing::warn!(error = %e, url = %url, "Source request failed");
                TransferError::source_transient(format!("GET {} failed: {}", url, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), url = %url, "Source rejected request");
            return Err(classify_status(status, &url));
        }

        let size = response.content_length();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        tracing::debug!(
            url = %url,
            size_bytes = ?size,
            content_type = ?content_type,
            "Source opened"
        );

        let stream = response
            .bytes_stream()
            .map_err(|e| TransferError::source_transient(format!("source stream error: {}", e)));

        Ok(SourceObject {
            stream: Box::pin(stream),
            size,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use vidrelay_core::ErrorClass;

    fn source(base_url: Option<String>, token: Option<&str>) -> HttpSource {
        HttpSource::new(&SourceConfig {
            base_url,
            token: token.map(String::from),
            read_timeout_secs: 5,
        })
        .unwrap()
    }

    async fn drain(mut object: SourceObject) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(frame) = object.stream.next().await {
            out.extend_from_slice(&frame.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn streams_body_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/files/abc123")
            .match_header("authorization", "Bearer secret-token")
            .with_status(200)
            .with_header("content-type", "video/mp4")
            .with_body("0123456789")
            .create_async()
            .await;

        let source = source(Some(format!("{}/files/", server.url())), Some("secret-token"));
        let object = source.open("abc123").await.unwrap();
        assert_eq!(object.size, Some(10));
        assert_eq!(object.content_type.as_deref(), Some("video/mp4"));
        assert_eq!(drain(object).await, b"0123456789");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn absolute_url_bypasses_base() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/direct/video.mp4")
            .with_status(200)
            .with_body("abc")
            .create_async()
            .await;

        let source = source(Some("http://unused.invalid".to_string()), None);
        let object = source
            .open(&format!("{}/direct/video.mp4", server.url()))
            .await
            .unwrap();
        assert_eq!(drain(object).await, b"abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn foreign_host_never_receives_token() {
        let mut foreign = mockito::Server::new_async().await;
        let mock = foreign
            .mock("GET", "/steal.mp4")
            .match_header("authorization", mockito::Matcher::Missing)
            .with_status(200)
            .with_body("xyz")
            .create_async()
            .await;

        let source = source(
            Some("https://files.internal.example/files".to_string()),
            Some("secret-token"),
        );
        let object = source
            .open(&format!("{}/steal.mp4", foreign.url()))
            .await
            .unwrap();
        assert_eq!(drain(object).await, b"xyz");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn absolute_url_on_file_api_origin_keeps_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/other/video.mp4")
            .match_header("authorization", "Bearer secret-token")
            .with_status(200)
            .with_body("abc")
            .create_async()
            .await;

        let source = source(Some(format!("{}/files", server.url())), Some("secret-token"));
        let object = source
            .open(&format!("{}/other/video.mp4", server.url()))
            .await
            .unwrap();
        assert_eq!(drain(object).await, b"abc");
        mock.assert_async().await;
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = HttpSource::new(&SourceConfig {
            base_url: Some("not a url".to_string()),
            token: None,
            read_timeout_secs: 5,
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_file_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/files/gone")
            .with_status(404)
            .create_async()
            .await;

        let source = source(Some(format!("{}/files", server.url())), None);
        let err = source.open("gone").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Terminal);
    }

    #[tokio::test]
    async fn expired_token_and_server_errors_are_transient() {
        let mut server = mockito::Server::new_async().await;
        let _unauthorized = server
            .mock("GET", "/files/a")
            .with_status(401)
            .create_async()
            .await;
        let _unavailable = server
            .mock("GET", "/files/b")
            .with_status(503)
            .create_async()
            .await;

        let source = source(Some(format!("{}/files", server.url())), Some("expired"));
        assert!(source.open("a").await.unwrap_err().is_transient());
        assert!(source.open("b").await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn relative_reference_without_base_is_rejected() {
        let source = source(None, None);
        let err = source.open("abc123").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Terminal);
    }
}
