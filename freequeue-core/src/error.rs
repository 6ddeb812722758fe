use thiserror::Error;

/// Setup-time errors produced by freequeue-core.
///
/// Every variant is fatal to the construction attempt that raised it; no
/// partially built queue is ever returned.
#[derive(Debug, Error)]
pub enum FreeQueueError {
    #[error("invalid constructor arguments: {0}")]
    Constructor(String),

    #[error("invalid external layout: {0}")]
    InvalidLayout(String),

    #[error("failed to reserve {bytes} bytes of ring storage")]
    Allocation { bytes: usize },

    #[error("invalid queue config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FreeQueueError>;

/// Runtime outcome of a rejected push or pull.
///
/// These are not faults: the queue is untouched and the caller decides
/// whether to retry on the next quantum, drop the block, or back off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("overrun: {requested} frames requested, {available} free")]
    Overrun { requested: usize, available: usize },

    #[error("underrun: {requested} frames requested, {available} buffered")]
    Underrun { requested: usize, available: usize },

    #[error("block has {actual} channels, queue expects {expected}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("channel {channel} holds {len} samples, block needs {frames}")]
    BlockTooShort {
        channel: usize,
        len: usize,
        frames: usize,
    },

    #[error("cursor out of range (read={read}, write={write})")]
    CorruptCursor { read: usize, write: usize },
}

impl TransferError {
    /// `true` for the two "try again later" outcomes.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            TransferError::Overrun { .. } | TransferError::Underrun { .. }
        )
    }
}
