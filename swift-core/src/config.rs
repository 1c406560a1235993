//! Tunable constants and their `Default` values. Every literal named by
//! name in the protocol's behavior lives here rather than scattered through
//! `channel`/`dispatcher` so a deployment can retune without touching logic.

use std::time::Duration;

/// Handshake, keep-alive and reliability tunables for one channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// How many times an unacknowledged HANDSHAKE is retransmitted before
    /// the channel is abandoned.
    pub handshake_max_retries: u32,
    /// Interval between handshake retransmits before any RTT sample exists.
    pub handshake_retry_interval: Duration,
    /// A channel with no datagram exchanged in this long is considered dead
    /// and torn down.
    pub channel_timeout: Duration,
    /// Interval between PING/PONG keep-alives while idle.
    pub keep_alive_interval: Duration,
    /// Out-of-order tolerance before a gap is treated as loss (duplicate-ACK
    /// style fast retransmit threshold).
    pub max_reordering: u32,
    /// Ceiling on any RTT sample/estimate; larger measurements are clamped
    /// so a single bad sample can't poison congestion control.
    pub max_possible_rtt: Duration,
    /// Largest non-DATA datagram we will ever send (ACK/HAVE/PEX bundles
    /// etc.); DATA framing is sized separately against the chunk size.
    pub max_nondata_dgram_size: usize,
    /// Minimum spacing between outgoing PEX requests to one peer.
    pub min_pex_request_interval: Duration,
    /// Multiplier applied to the PEX interval after each response, capped
    /// at `max_pex_request_interval`.
    pub pex_backoff_multiplier: f64,
    pub max_pex_request_interval: Duration,
    /// Maximum outstanding (unanswered) requests/hints a channel will queue
    /// to one peer.
    pub max_outstanding_hints: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            handshake_max_retries: 3,
            handshake_retry_interval: Duration::from_millis(500),
            channel_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(20),
            max_reordering: 4,
            max_possible_rtt: Duration::from_secs(60),
            max_nondata_dgram_size: 1350,
            min_pex_request_interval: Duration::from_secs(1),
            pex_backoff_multiplier: 1.1,
            max_pex_request_interval: Duration::from_secs(30),
            max_outstanding_hints: 64,
        }
    }
}

/// LEDBAT congestion-control tunables.
#[derive(Debug, Clone)]
pub struct LedbatConfig {
    /// Target queueing delay above the rolling-minimum one-way delay.
    pub target: Duration,
    /// Gain applied to the LEDBAT window-growth term.
    pub gain: f64,
    /// Width of each of the four rolling min-OWD buckets; together they
    /// cover `4 * bucket_duration` of history.
    pub owd_bucket_duration: Duration,
    /// Floor under the computed send interval regardless of cwnd/RTT.
    pub min_send_interval: Duration,
    /// cwnd floor in bytes, never reduced below this even after loss.
    pub min_cwnd: f64,
}

impl Default for LedbatConfig {
    fn default() -> Self {
        Self {
            target: Duration::from_millis(100),
            gain: 1.0,
            owd_bucket_duration: Duration::from_secs(30),
            min_send_interval: Duration::from_millis(1),
            min_cwnd: 2.0,
        }
    }
}

/// Tracker/peer-exchange reconnect backoff.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub retry_interval_start: Duration,
    pub retry_interval_max: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retry_interval_start: Duration::from_secs(5),
            retry_interval_max: Duration::from_secs(30 * 60),
        }
    }
}

/// Coefficients for a proportional reciprocity controller. Deliberately
/// carries no protocol-mandated defaults beyond "do nothing special" — a
/// deployment's [`crate::reciprocity::ReciprocityPolicy`] interprets these
/// however it wants; `swift-core` never hardcodes a P-controller gain.
#[derive(Debug, Clone)]
pub struct ReciprocityConfig {
    pub proportional_gain: f64,
    pub target_ratio: f64,
}

impl Default for ReciprocityConfig {
    fn default() -> Self {
        Self {
            proportional_gain: 0.0,
            target_ratio: 1.0,
        }
    }
}

/// Dispatcher-wide tunables.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub cleanup_interval: Duration,
    pub channel: ChannelConfig,
    pub ledbat: LedbatConfig,
    pub tracker: TrackerConfig,
    pub reciprocity: ReciprocityConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(5),
            channel: ChannelConfig::default(),
            ledbat: LedbatConfig::default(),
            tracker: TrackerConfig::default(),
            reciprocity: ReciprocityConfig::default(),
        }
    }
}
