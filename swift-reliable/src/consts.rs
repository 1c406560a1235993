//! Shared tuning constants for the congestion-control algorithms.

/// Assumed payload size used by algorithms that reason about fragments rather
/// than raw bytes. A swarm's real chunk size is supplied by the caller
/// wherever it is known; this is only a fallback for pacing-rate math.
pub const ESTIMATED_PAYLOAD_SIZE: usize = 1024;

/// Multiplier applied when converting a congestion window into a pacing rate,
/// giving a small burst allowance above the strict `cwnd / rtt` rate.
pub const PACING_GAIN: f32 = 1.25;
