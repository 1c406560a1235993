use thiserror::Error;

/// Errors raised by the reliability/congestion toolkit used to build a swarm
/// channel's retransmission and send-control logic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReliableError {
    #[error("bin is not a base (leaf) bin")]
    NotBaseBin,
    #[error("retransmit queue entry expired past MAX_POSSIBLE_RTT")]
    RetransmitExpired,
    #[error("invalid congestion algorithm configuration: {0}")]
    InvalidConfig(String),
}
