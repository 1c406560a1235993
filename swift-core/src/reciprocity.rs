//! The capability boundary through which an external reciprocity/fairness
//! policy (tit-for-tat, seed-rotation, a bandwidth-donation scheme, ...)
//! observes and steers a transfer's channels, without `swift-core` itself
//! ever encoding a specific fairness algorithm.

use crate::config::ReciprocityConfig;
use std::net::SocketAddr;
use std::time::Duration;

/// A read-only snapshot of one channel's state, handed to the policy when
/// it's asked how fast to send.
#[derive(Debug, Clone, Copy)]
pub struct ChannelView {
    pub peer: SocketAddr,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt: Duration,
    pub cwnd: f64,
}

/// Implemented by whatever decides how generous to be with each peer. A
/// transfer calls into its policy at peer add/remove and whenever a
/// channel's send-control loop needs to know how much to throttle beyond
/// what congestion control alone would allow.
pub trait ReciprocityPolicy: Send {
    fn on_peer_add(&mut self, peer: SocketAddr) {
        let _ = peer;
    }

    fn on_peer_del(&mut self, peer: SocketAddr) {
        let _ = peer;
    }

    /// Minimum spacing between DATA sends to this peer, in addition to
    /// whatever congestion control independently computes. Returning
    /// `Duration::ZERO` defers entirely to congestion control.
    fn send_interval_for(&self, view: &ChannelView) -> Duration {
        let _ = view;
        Duration::ZERO
    }

    /// Hook for operator-issued commands (e.g. from a management socket)
    /// that don't warrant a dedicated API, such as "go generous for peer
    /// X" or "enter seed-starvation mode".
    fn external_cmd(&mut self, cmd: &str) {
        let _ = cmd;
    }
}

/// A neutral policy: never throttles beyond congestion control, ignores
/// peer churn and external commands. The default when a transfer isn't
/// given one explicitly.
#[derive(Debug, Clone, Default)]
pub struct DefaultPolicy {
    config: ReciprocityConfig,
}

impl DefaultPolicy {
    pub fn new(config: ReciprocityConfig) -> Self {
        Self { config }
    }
}

impl ReciprocityPolicy for DefaultPolicy {
    fn send_interval_for(&self, view: &ChannelView) -> Duration {
        if self.config.proportional_gain == 0.0 {
            return Duration::ZERO;
        }
        let ratio = if view.bytes_received == 0 {
            view.bytes_sent as f64
        } else {
            view.bytes_sent as f64 / view.bytes_received as f64
        };
        let error = ratio - self.config.target_ratio;
        if error <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((error * self.config.proportional_gain).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_never_throttles_with_zero_gain() {
        let policy = DefaultPolicy::default();
        let view = ChannelView {
            peer: "127.0.0.1:1".parse().unwrap(),
            bytes_sent: 1_000_000,
            bytes_received: 0,
            rtt: Duration::from_millis(50),
            cwnd: 10_000.0,
        };
        assert_eq!(policy.send_interval_for(&view), Duration::ZERO);
    }
}
