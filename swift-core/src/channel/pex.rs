//! Peer exchange: tells a peer about other peers in the same swarm and
//! learns about peers from them, plus the "reverse PEX" courtesy of telling
//! a newly-connected peer about ourselves via a third party shortly after
//! connecting. Backs off a peer that keeps answering so PEX
//! traffic doesn't dominate a well-connected swarm.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

/// Per-peer PEX request pacing: widens on every response up to a cap,
/// matching `MIN_PEX_REQUEST_INTERVAL` / `pex_backoff_multiplier` /
/// `max_pex_request_interval` in [`crate::config::ChannelConfig`].
#[derive(Debug, Clone)]
pub struct PexSchedule {
    next_request_interval: Duration,
    backoff_multiplier: f64,
    max_interval: Duration,
    last_request: Option<Instant>,
}

impl PexSchedule {
    pub fn new(min_interval: Duration, backoff_multiplier: f64, max_interval: Duration) -> Self {
        Self {
            next_request_interval: min_interval,
            backoff_multiplier,
            max_interval,
            last_request: None,
        }
    }

    pub fn should_request(&self, now: Instant) -> bool {
        match self.last_request {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.next_request_interval,
        }
    }

    pub fn record_request(&mut self, now: Instant) {
        self.last_request = Some(now);
    }

    /// Widens the interval after a response, per the backoff multiplier.
    pub fn record_response(&mut self) {
        let widened = self.next_request_interval.mul_f64(self.backoff_multiplier);
        self.next_request_interval = widened.min(self.max_interval);
    }
}

/// Whether an address is eligible to be shared via PEX. Addresses in
/// private ranges are only shared with peers also observed to be on a
/// private range, to avoid leaking LAN topology to the public swarm.
pub fn is_private(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local()
        }
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

pub fn may_share(candidate: SocketAddr, requester: SocketAddr) -> bool {
    if is_private(candidate.ip()) {
        return is_private(requester.ip());
    }
    true
}

/// Fires reverse PEX: 2 seconds after a channel is established, tell one
/// other existing peer about the new peer so the swarm converges on a
/// denser mesh without waiting for the new peer to be asked.
pub const REVERSE_PEX_DELAY: Duration = Duration::from_secs(2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_allows_first_request_immediately() {
        let schedule = PexSchedule::new(Duration::from_secs(1), 1.1, Duration::from_secs(30));
        assert!(schedule.should_request(Instant::now()));
    }

    #[test]
    fn schedule_backs_off_after_response() {
        let mut schedule = PexSchedule::new(Duration::from_secs(1), 2.0, Duration::from_secs(30));
        let now = Instant::now();
        schedule.record_request(now);
        schedule.record_response();
        assert!(!schedule.should_request(now + Duration::from_millis(1500)));
        assert!(schedule.should_request(now + Duration::from_millis(2001)));
    }

    #[test]
    fn backoff_caps_at_max_interval() {
        let mut schedule = PexSchedule::new(Duration::from_secs(20), 3.0, Duration::from_secs(30));
        schedule.record_response();
        assert_eq!(schedule.next_request_interval, Duration::from_secs(30));
    }

    #[test]
    fn private_addresses_only_shared_with_private_peers() {
        let private: SocketAddr = "192.168.1.5:1000".parse().unwrap();
        let public: SocketAddr = "8.8.8.8:1000".parse().unwrap();
        assert!(!may_share(private, public));
        assert!(may_share(private, private));
        assert!(may_share(public, private));
    }
}
