use thiserror::Error;

/// Reasons an inbound control frame is rejected.
///
/// Decoding never panics; the session logs the error and drops the frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not valid JSON, truncated, missing or extra fields, wrong field types
    #[error("malformed control frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("control frame has an empty boardId")]
    EmptyBoardId,

    /// Neither a sentinel nor an integer level
    #[error("unrecognised command {0:?}")]
    InvalidCommand(String),
}

/// Serialization failure for an outbound frame.
#[derive(Debug, Error)]
#[error("failed to encode outbound frame: {0}")]
pub struct EncodeError(#[from] serde_json::Error);
