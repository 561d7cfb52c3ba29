//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while decoding or encoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("batch encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("batch decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}
