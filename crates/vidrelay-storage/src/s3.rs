use crate::keys::{validate_key, VIDEO_CONTENT_TYPES};
use crate::traits::{ObjectSink, SinkError, SinkResult};
use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::multipart::{MultipartStore, PartId};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{ClientOptions, PutPayload, Result as ObjectResult};
use std::time::{Duration, Instant};

use vidrelay_core::models::{MultipartSession, PartRecord};
use vidrelay_core::{ByteStream, SinkConfig};

/// Lifetime of the presigned URL the server itself uses for streaming PUTs.
const STREAM_PUT_URL_TTL: Duration = Duration::from_secs(3600);

/// Classify an object_store failure. Auth problems and missing upload ids are
/// permanent; everything else has already been retried by object_store and is
/// reported as transient.
fn classify(operation: &'static str, err: ObjectStoreError) -> SinkError {
    match err {
        ObjectStoreError::PermissionDenied { .. }
        | ObjectStoreError::Unauthenticated { .. }
        | ObjectStoreError::NotFound { .. }
        | ObjectStoreError::Precondition { .. }
        | ObjectStoreError::InvalidPath { .. }
        | ObjectStoreError::NotSupported { .. }
        | ObjectStoreError::NotImplemented { .. } => SinkError::permanent(operation, err.to_string()),
        other => SinkError::transient(operation, other.to_string()),
    }
}

/// Client options that tag objects with a content type derived from the key
/// extension.
///
/// object_store opens multipart sessions without per-request attributes, so
/// this is what gives multipart objects their `Content-Type`. Destination keys
/// carry the extension of their content type (see [`crate::keys`]).
fn video_client_options() -> ClientOptions {
    VIDEO_CONTENT_TYPES
        .iter()
        .fold(ClientOptions::new(), |options, (mime, ext)| {
            options.with_content_type_for_suffix(*ext, *mime)
        })
}

/// S3 sink implementation
#[derive(Clone)]
pub struct S3Sink {
    store: AmazonS3,
    http: reqwest::Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>, // Custom endpoint for S3-compatible providers
    public_base_url: Option<String>,
}

impl S3Sink {
    /// Create a new S3Sink from sink settings.
    ///
    /// Credentials not present in `config` are picked up from the standard
    /// `AWS_*` environment variables.
    pub fn new(config: &SinkConfig) -> SinkResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(config.region.clone())
            .with_bucket_name(config.bucket.clone())
            .with_client_options(video_client_options());

        if let Some(ref endpoint) = config.endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }
        if let Some(ref access_key_id) = config.access_key_id {
            builder = builder.with_access_key_id(access_key_id.clone());
        }
        if let Some(ref secret_access_key) = config.secret_access_key {
            builder = builder.with_secret_access_key(secret_access_key.clone());
        }

        let store = builder
            .build()
            .map_err(|e| SinkError::ConfigError(e.to_string()))?;

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SinkError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(S3Sink {
            store,
            http,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint.clone(),
            public_base_url: config.public_base_url.clone(),
        })
    }

    /// Generate public URL for an S3 object
    ///
    /// `PUBLIC_BASE_URL` wins when configured. Otherwise S3-compatible providers
    /// get a path-style `{endpoint}/{bucket}/{key}` and AWS the virtual-hosted
    /// `https://{bucket}.s3.{region}.amazonaws.com/{key}`.
    fn generate_url(&self, key: &str) -> String {
        if let Some(ref base) = self.public_base_url {
            format!("{}/{}", base.trim_end_matches('/'), key)
        } else if let Some(ref endpoint) = self.endpoint_url {
            let base_url = endpoint.trim_end_matches('/');
            format!("{}/{}/{}", base_url, self.bucket, key)
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            )
        }
    }

    fn location(key: &str) -> SinkResult<Path> {
        validate_key(key)?;
        Ok(Path::from(key.to_string()))
    }
}

#[async_trait]
impl ObjectSink for S3Sink {
    /// The object's `Content-Type` follows the key extension; `content_type`
    /// is only logged.
    async fn begin_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> SinkResult<MultipartSession> {
        let location = Self::location(key)?;
        let result: ObjectResult<_> = self.store.create_multipart(&location).await;

        let upload_id = result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                "S3 create multipart failed"
            );
            classify("create_multipart", e)
        })?;

        tracing::debug!(
            bucket = %self.bucket,
            key = %key,
            upload_id = %upload_id,
            content_type = content_type.unwrap_or("application/octet-stream"),
            "S3 multipart session opened"
        );

        Ok(MultipartSession {
            key: key.to_string(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        data: Bytes,
    ) -> SinkResult<String> {
        if part_number == 0 {
            return Err(SinkError::permanent(
                "upload_part",
                "part numbers start at 1",
            ));
        }
        let location = Self::location(&session.key)?;
        let size = data.len() as u64;
        let start = Instant::now();

        // object_store part indices are 0-based.
        let result: ObjectResult<_> = self
            .store
            .put_part(
                &location,
                &session.upload_id,
                (part_number - 1) as usize,
                PutPayload::from(data),
            )
            .await;

        let part = result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %session.key,
                part_number = part_number,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 part upload failed"
            );
            classify("upload_part", e)
        })?;

        tracing::trace!(
            key = %session.key,
            part_number = part_number,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 part uploaded"
        );

        Ok(part.content_id)
    }

    async fn complete_multipart(
        &self,
        session: &MultipartSession,
        parts: &[PartRecord],
    ) -> SinkResult<String> {
        let location = Self::location(&session.key)?;
        let start = Instant::now();
        let part_ids: Vec<PartId> = parts
            .iter()
            .map(|p| PartId {
                content_id: p.e_tag.clone(),
            })
            .collect();
        let size: u64 = parts.iter().map(|p| p.length).sum();

        let result: ObjectResult<_> = self
            .store
            .complete_multipart(&location, &session.upload_id, part_ids)
            .await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %session.key,
                parts = parts.len(),
                "S3 complete multipart failed"
            );
            classify("complete_multipart", e)
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %session.key,
            parts = parts.len(),
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 multipart upload completed"
        );

        Ok(self.generate_url(&session.key))
    }

    async fn abort_multipart(&self, session: &MultipartSession) -> SinkResult<()> {
        let location = Self::location(&session.key)?;
        let result: ObjectResult<_> = self
            .store
            .abort_multipart(&location, &session.upload_id)
            .await;

        result.map_err(|e| classify("abort_multipart", e))?;

        tracing::info!(
            bucket = %self.bucket,
            key = %session.key,
            upload_id = %session.upload_id,
            "S3 multipart session aborted"
        );
        Ok(())
    }

    async fn put_stream(
        &self,
        key: &str,
        content_length: u64,
        content_type: Option<&str>,
        body: ByteStream,
    ) -> SinkResult<String> {
        let location = Self::location(key)?;
        let start = Instant::now();

        let url = self
            .store
            .signed_url(Method::PUT, &location, STREAM_PUT_URL_TTL)
            .await
            .map_err(|e| classify("presign", e))?;

        let response = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_LENGTH, content_length)
            .header(
                reqwest::header::CONTENT_TYPE,
                content_type.unwrap_or("application/octet-stream"),
            )
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    size_bytes = content_length,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 streaming upload failed"
                );
                SinkError::transient("put", e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = status.as_u16(),
                bucket = %self.bucket,
                key = %key,
                size_bytes = content_length,
                "S3 streaming upload rejected"
            );
            return Err(SinkError::from_status("put", status.as_u16(), &body));
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = content_length,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 streaming upload successful"
        );

        Ok(self.generate_url(key))
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> SinkResult<String> {
        let location = Self::location(key)?;
        let url_result: ObjectResult<_> = self
            .store
            .signed_url(Method::PUT, &location, expires_in)
            .await;

        let url = url_result
            .map_err(|e| classify("presign", e))?
            .to_string();

        tracing::debug!(
            bucket = %self.bucket,
            key = %key,
            content_type = %content_type,
            expires_in_secs = expires_in.as_secs(),
            "Presigned PUT URL issued"
        );

        Ok(url)
    }

    fn object_url(&self, key: &str) -> String {
        self.generate_url(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use mockito::Matcher;

    fn config(endpoint: Option<String>) -> SinkConfig {
        SinkConfig {
            bucket: "clips".to_string(),
            region: "us-east-1".to_string(),
            endpoint,
            access_key_id: Some("AKIDEXAMPLE".to_string()),
            secret_access_key: Some("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string()),
            public_base_url: None,
            destination_prefix: "videos".to_string(),
            write_timeout_secs: 5,
            presign_default_expiry_secs: 900,
            presign_max_expiry_secs: 3600,
        }
    }

    fn body(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    #[test]
    fn url_generation() {
        let aws = S3Sink::new(&config(None)).unwrap();
        assert_eq!(
            aws.object_url("videos/a.mp4"),
            "https://clips.s3.us-east-1.amazonaws.com/videos/a.mp4"
        );

        let minio = S3Sink::new(&config(Some("http://localhost:9000/".to_string()))).unwrap();
        assert_eq!(
            minio.object_url("videos/a.mp4"),
            "http://localhost:9000/clips/videos/a.mp4"
        );

        let mut with_cdn = config(None);
        with_cdn.public_base_url = Some("https://cdn.example.com/".to_string());
        let cdn = S3Sink::new(&with_cdn).unwrap();
        assert_eq!(
            cdn.object_url("videos/a.mp4"),
            "https://cdn.example.com/videos/a.mp4"
        );
    }

    #[tokio::test]
    async fn presigned_put_targets_key() {
        let sink = S3Sink::new(&config(None)).unwrap();
        let url = sink
            .presign_put("videos/a.mp4", "video/mp4", Duration::from_secs(900))
            .await
            .unwrap();
        assert!(url.contains("videos/a.mp4"));
        assert!(url.contains("X-Amz-Expires=900"));
    }

    #[tokio::test]
    async fn put_stream_sends_declared_length() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/clips/videos/a.mp4")
            .match_query(Matcher::Any)
            .match_header("content-length", "11")
            .match_body("hello world")
            .with_status(200)
            .create_async()
            .await;

        let sink = S3Sink::new(&config(Some(server.url()))).unwrap();
        let url = sink
            .put_stream(
                "videos/a.mp4",
                11,
                Some("video/mp4"),
                body(vec![b"hello ", b"world"]),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(url, format!("{}/clips/videos/a.mp4", server.url()));
    }

    #[tokio::test]
    async fn put_stream_auth_rejection_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("PUT", "/clips/videos/a.mp4")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("<Error><Code>AccessDenied</Code></Error>")
            .create_async()
            .await;

        let sink = S3Sink::new(&config(Some(server.url()))).unwrap();
        let err = sink
            .put_stream("videos/a.mp4", 5, None, body(vec![b"hello"]))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("AccessDenied"));
    }

    #[test]
    fn video_extensions_map_to_content_types() {
        let options = video_client_options();
        assert_eq!(
            options.get_content_type(&Path::from("videos/a.mov")),
            Some("video/quicktime")
        );
        assert_eq!(
            options.get_content_type(&Path::from("videos/a.mp4")),
            Some("video/mp4")
        );
        assert_eq!(options.get_content_type(&Path::from("videos/a.bin")), None);
    }

    #[tokio::test]
    async fn multipart_session_carries_content_type_from_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/clips/videos/a.webm")
            .match_query(Matcher::Any)
            .match_header("content-type", "video/webm")
            .with_status(200)
            .with_body(
                "<InitiateMultipartUploadResult><Bucket>clips</Bucket>\
                 <Key>videos/a.webm</Key><UploadId>upload-1</UploadId>\
                 </InitiateMultipartUploadResult>",
            )
            .create_async()
            .await;

        let sink = S3Sink::new(&config(Some(server.url()))).unwrap();
        let session = sink
            .begin_multipart("videos/a.webm", Some("video/webm"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(session.upload_id, "upload-1");
    }

    #[tokio::test]
    async fn rejects_invalid_keys() {
        let sink = S3Sink::new(&config(None)).unwrap();
        let err = sink
            .presign_put("../etc/passwd", "video/mp4", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::InvalidKey(_)));
    }
}
