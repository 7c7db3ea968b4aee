//! Transfer error taxonomy
//!
//! Every failure of a transfer attempt is expressed as a [`TransferError`]. The
//! orchestrator routes on [`TransferError::class`]: transient errors are retried
//! with backoff, terminal errors fail the job, and cancellation aborts it.

use crate::models::{ErrorKind, JobErrorDetail};

/// How the orchestrator reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Re-enter `Queued` with backoff while the retry budget lasts.
    Transient,
    /// Move straight to `Failed`.
    Terminal,
    /// Move to `Aborted`.
    Cancelled,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransferError {
    /// Reading the source failed (network reset, expired token, missing file).
    #[error("Source unavailable: {detail}")]
    SourceUnavailable { detail: String, retryable: bool },

    /// The sink refused an operation.
    #[error("Sink rejected request: {detail}")]
    SinkRejected { detail: String, retryable: bool },

    #[error("Size mismatch: declared {declared} bytes, transferred {actual} bytes")]
    SizeMismatch { declared: u64, actual: u64 },

    /// Part numbering of a multipart session is not contiguous from 1.
    #[error("Incomplete multipart parts: {detail}")]
    IncompleteParts { detail: String },

    #[error("Timed out after {after_secs}s during {operation}")]
    Timeout {
        operation: &'static str,
        after_secs: u64,
    },

    #[error("Transfer cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn source_transient(detail: impl Into<String>) -> Self {
        TransferError::SourceUnavailable {
            detail: detail.into(),
            retryable: true,
        }
    }

    pub fn source_permanent(detail: impl Into<String>) -> Self {
        TransferError::SourceUnavailable {
            detail: detail.into(),
            retryable: false,
        }
    }

    pub fn sink_transient(detail: impl Into<String>) -> Self {
        TransferError::SinkRejected {
            detail: detail.into(),
            retryable: true,
        }
    }

    pub fn sink_permanent(detail: impl Into<String>) -> Self {
        TransferError::SinkRejected {
            detail: detail.into(),
            retryable: false,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            TransferError::SourceUnavailable { retryable, .. }
            | TransferError::SinkRejected { retryable, .. } => {
                if *retryable {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Terminal
                }
            }
            TransferError::Timeout { .. } => ErrorClass::Transient,
            TransferError::SizeMismatch { .. } | TransferError::IncompleteParts { .. } => {
                ErrorClass::Terminal
            }
            TransferError::Cancelled => ErrorClass::Cancelled,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            TransferError::SinkRejected { .. } => ErrorKind::SinkRejected,
            TransferError::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            TransferError::IncompleteParts { .. } => ErrorKind::IncompleteParts,
            TransferError::Timeout { .. } => ErrorKind::Timeout,
            TransferError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Detail persisted on the job record.
    pub fn detail(&self) -> JobErrorDetail {
        JobErrorDetail::new(self.kind(), self.to_string(), self.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_errors_follow_retryable_flag() {
        assert_eq!(
            TransferError::source_transient("connection reset").class(),
            ErrorClass::Transient
        );
        assert_eq!(
            TransferError::source_permanent("404 Not Found").class(),
            ErrorClass::Terminal
        );
    }

    #[test]
    fn sink_auth_rejection_is_terminal() {
        let err = TransferError::sink_permanent("403 AccessDenied");
        assert_eq!(err.class(), ErrorClass::Terminal);
        assert_eq!(err.kind(), ErrorKind::SinkRejected);
        assert!(!err.detail().retryable);
    }

    #[test]
    fn timeout_is_transient() {
        let err = TransferError::Timeout {
            operation: "source read",
            after_secs: 60,
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("source read"));
    }

    #[test]
    fn invariant_violations_are_terminal() {
        let mismatch = TransferError::SizeMismatch {
            declared: 10,
            actual: 9,
        };
        assert_eq!(mismatch.class(), ErrorClass::Terminal);
        let gap = TransferError::IncompleteParts {
            detail: "missing part 3".into(),
        };
        assert_eq!(gap.class(), ErrorClass::Terminal);
    }

    #[test]
    fn cancellation_has_its_own_class() {
        assert_eq!(TransferError::Cancelled.class(), ErrorClass::Cancelled);
        let detail = TransferError::Cancelled.detail();
        assert_eq!(detail.kind, ErrorKind::Cancelled);
        assert_eq!(detail.message, "Transfer cancelled");
    }
}
