//! # swift-reliable
//!
//! Reliability and congestion-control primitives shared by a swarm channel's
//! send/receive path: RTT/RTO estimation (RFC 6298), a pluggable
//! [`congestion::CongestionControl`] trait with LEDBAT as the default
//! algorithm and AIMD/CUBIC/BBR kept available for experimentation, a token
//! bucket for enforcing a configured maximum transfer speed across a
//! transfer's channels, a small flat associative map tuned for the low
//! cardinalities a single channel's outstanding-request tables see, and the
//! injected-clock abstraction (`TimeProvider`) used everywhere instead of
//! real sleeps so that tests are deterministic.

pub mod congestion;
pub mod consts;
pub mod error;
pub mod flat_map;
pub mod rate;
pub mod rtt;
pub mod time;

pub use congestion::{Algorithm, AlgorithmType, CongestionControl, DeliverySample, Ledbat};
pub use error::ReliableError;
pub use flat_map::FlatMap;
pub use rate::RateLimiter;
pub use rtt::RttEstimator;
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
