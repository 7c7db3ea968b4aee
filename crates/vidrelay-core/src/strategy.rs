//! Upload strategy selection

use crate::models::TransferStrategy;

/// Size thresholds driving [`select_strategy`], in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyThresholds {
    /// Objects below this size are streamed by the server in one PUT.
    pub direct_upload_threshold: u64,
    /// Objects at or above this size always use the multipart protocol.
    pub multipart_threshold: u64,
}

/// Picks the upload path for an object.
///
/// `ClientDirect` is only ever returned when the caller asked for it. An unknown
/// size falls back to `Multipart`, since a single PUT needs a length up front.
pub fn select_strategy(
    size: Option<u64>,
    thresholds: StrategyThresholds,
    client_direct: bool,
) -> TransferStrategy {
    if client_direct {
        return TransferStrategy::ClientDirect;
    }

    match size {
        None => TransferStrategy::Multipart,
        Some(size)
            if size < thresholds.direct_upload_threshold
                && size < thresholds.multipart_threshold =>
        {
            TransferStrategy::SingleShot
        }
        Some(_) => TransferStrategy::Multipart,
    }
}
