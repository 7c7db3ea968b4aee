//! Destination key generation and validation.
//!
//! Generated keys are `{prefix}/{uuid}.{ext}`. The extension comes from the
//! content type (or the client's filename) and defaults to `mp4`.

use uuid::Uuid;

use crate::traits::{SinkError, SinkResult};

const DEFAULT_EXTENSION: &str = "mp4";
const MAX_KEY_LENGTH: usize = 1024;

/// Video content types and the key extension each maps to.
pub const VIDEO_CONTENT_TYPES: &[(&str, &str)] = &[
    ("video/mp4", "mp4"),
    ("video/quicktime", "mov"),
    ("video/webm", "webm"),
    ("video/x-matroska", "mkv"),
    ("video/x-msvideo", "avi"),
    ("video/mpeg", "mpeg"),
    ("video/mp2t", "ts"),
    ("video/3gpp", "3gp"),
];

/// File extension for a video content type.
pub fn extension_for(content_type: Option<&str>) -> &'static str {
    let Some(content_type) = content_type else {
        return DEFAULT_EXTENSION;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    VIDEO_CONTENT_TYPES
        .iter()
        .find(|(mime, _)| *mime == essence)
        .map(|(_, ext)| *ext)
        .unwrap_or(DEFAULT_EXTENSION)
}

fn join(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Fresh key for a server-mediated transfer.
pub fn destination_key_for(prefix: &str, content_type: Option<&str>) -> String {
    join(
        prefix,
        &format!("{}.{}", Uuid::new_v4(), extension_for(content_type)),
    )
}

/// Fresh key for a client-direct upload. Keeps a sane extension from the
/// client's filename, otherwise falls back to the content type.
pub fn destination_key_for_filename(prefix: &str, filename: &str, content_type: &str) -> String {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| extension_for(Some(content_type)).to_string());
    join(prefix, &format!("{}.{}", Uuid::new_v4(), ext))
}

/// Reject keys that would escape the bucket layout.
pub fn validate_key(key: &str) -> SinkResult<()> {
    if key.is_empty() {
        return Err(SinkError::InvalidKey("key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(SinkError::InvalidKey(format!(
            "key exceeds {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    if key.starts_with('/') {
        return Err(SinkError::InvalidKey(format!(
            "key cannot start with '/': {}",
            key
        )));
    }
    if key.split('/').any(|segment| segment == ".." || segment.is_empty()) {
        return Err(SinkError::InvalidKey(format!(
            "key contains an invalid path segment: {}",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_use_prefix_and_extension() {
        let key = destination_key_for("videos", Some("video/quicktime"));
        assert!(key.starts_with("videos/"));
        assert!(key.ends_with(".mov"));
        assert!(validate_key(&key).is_ok());

        let key = destination_key_for("/videos/", None);
        assert!(key.starts_with("videos/"));
        assert!(key.ends_with(".mp4"));
    }

    #[test]
    fn filename_extension_preferred_when_sane() {
        let key = destination_key_for_filename("uploads", "Holiday Clip.MKV", "video/mp4");
        assert!(key.ends_with(".mkv"));

        let key = destination_key_for_filename("uploads", "noext", "video/webm");
        assert!(key.ends_with(".webm"));

        let key = destination_key_for_filename("uploads", "weird.p/h", "video/mp4");
        assert!(key.ends_with(".mp4"));
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        assert_eq!(extension_for(Some("video/webm; codecs=vp9")), "webm");
        assert_eq!(extension_for(Some("application/octet-stream")), "mp4");
    }

    #[test]
    fn invalid_keys_rejected() {
        assert!(validate_key("").is_err());
        assert!(validate_key("/videos/a.mp4").is_err());
        assert!(validate_key("videos/../a.mp4").is_err());
        assert!(validate_key("videos//a.mp4").is_err());
        assert!(validate_key(&"a".repeat(2000)).is_err());
        assert!(validate_key("videos/2024/a.mp4").is_ok());
    }
}
