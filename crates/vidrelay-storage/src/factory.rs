#[cfg(feature = "storage-s3")]
use crate::S3Sink;
use crate::{ObjectSink, SinkError, SinkResult};
use std::sync::Arc;
use vidrelay_core::Config;

/// Create the sink described by configuration
pub fn create_sink(config: &Config) -> SinkResult<Arc<dyn ObjectSink>> {
    let sink_config = config.sink();
    if sink_config.bucket.trim().is_empty() {
        return Err(SinkError::ConfigError("S3_BUCKET not configured".to_string()));
    }

    #[cfg(feature = "storage-s3")]
    {
        let sink = S3Sink::new(sink_config)?;
        tracing::info!(
            bucket = %sink_config.bucket,
            region = %sink_config.region,
            endpoint = sink_config.endpoint.as_deref().unwrap_or("aws"),
            "S3 sink initialized"
        );
        Ok(Arc::new(sink))
    }

    #[cfg(not(feature = "storage-s3"))]
    {
        Err(SinkError::ConfigError(
            "S3 sink not available (storage-s3 feature not enabled)".to_string(),
        ))
    }
}
