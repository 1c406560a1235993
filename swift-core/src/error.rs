use thiserror::Error;

/// Errors from [`crate::bin::Bin`]/[`crate::binmap::Binmap`] arithmetic.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BinError {
    #[error("bin is out of range for this binmap's capacity")]
    OutOfRange,
}

/// Errors from [`crate::hashtree`] verification.
#[derive(Debug, Error)]
pub enum HashTreeError {
    #[error("bin {0} is inconsistent with the tree's known size")]
    BadHashTreeShape(u64),
    #[error("offer_data called on a non-base bin")]
    NotBaseBin,
    #[error("no verified peak covers this bin yet")]
    NoVerifiedPeak,
    #[error(transparent)]
    Bin(#[from] BinError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from [`crate::storage::ChunkStorage`] implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("read past known content size")]
    OutOfBounds,
}

/// Errors from wire encode/decode, re-exported for composition into
/// [`ChannelError`]. The actual codec lives in `swift-proto`; this variant
/// wraps its error type plus channel-framing-specific failures that aren't
/// primitive codec failures (unknown tag, truncated body, address-scheme
/// mismatch).
#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Codec(#[from] swift_proto::Error),
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),
    #[error("message body truncated")]
    TruncatedBody,
    #[error("chunk address did not match the negotiated addressing scheme")]
    AddressSchemeMismatch,
}

/// Errors from the per-channel state machine.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    HashTree(#[from] HashTreeError),
    #[error(transparent)]
    Bin(#[from] BinError),
    #[error("handshake incomplete: {0}")]
    HandshakeIncomplete(&'static str),
    #[error("peer sent an unknown swarm-id")]
    UnknownSwarm,
    #[error("protocol version mismatch")]
    VersionMismatch,
}

/// Errors surfaced at the `Runtime`/`Transfer` boundary, composing the
/// lower-level error kinds. Malformed-wire and hash-verification failures
/// never bubble this far as `Err` — they are handled at the point they're
/// decoded by closing the offending channel. `CoreError` exists for
/// failures that affect a whole transfer (storage, swarm lifecycle).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("swarm {0} is not open")]
    SwarmNotOpen(String),
    #[error("transfer is no longer operational")]
    NotOperational,
}

pub type Result<T> = std::result::Result<T, CoreError>;
