//! API constants

/// API version segment used in every versioned route.
pub const API_VERSION: &str = "v0";

/// Versioned route prefix.
pub const API_PREFIX: &str = "/api/v0";

/// Upper bound on request bodies. The API only takes small JSON documents.
pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Server-level cap on in-flight requests.
pub const HTTP_CONCURRENCY_LIMIT: usize = 10_000;
