//! The per-channel send-control state machine: a new channel starts in
//! slow-start under a fixed small window, then hands off to the negotiated
//! steady-state congestion controller (LEDBAT by default) once it has seen
//! its first loss or enough RTT samples; an idle channel drops to
//! keep-alive pings; a channel that stops hearing from its peer entirely
//! closes.

use std::time::{Duration, Instant};
use swift_reliable::CongestionControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// Handshake sent, no response yet.
    PingPong,
    /// Handshake complete; grow the window aggressively until first loss.
    SlowStart,
    /// Steady-state: follow the configured `CongestionControl`.
    SteadyState,
    /// No application demand and nothing in flight; send only keep-alives.
    KeepAlive,
    /// Channel torn down; no further sends.
    Closed,
}

pub struct SendControl {
    state: SendState,
    last_activity: Instant,
    channel_timeout: Duration,
    keep_alive_interval: Duration,
    last_send: Option<Instant>,
}

impl SendControl {
    pub fn new(now: Instant, channel_timeout: Duration, keep_alive_interval: Duration) -> Self {
        Self {
            state: SendState::PingPong,
            last_activity: now,
            channel_timeout,
            keep_alive_interval,
            last_send: None,
        }
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn note_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn handshake_established(&mut self) {
        if self.state == SendState::PingPong {
            self.state = SendState::SlowStart;
        }
    }

    pub fn note_loss(&mut self) {
        if self.state == SendState::SlowStart {
            self.state = SendState::SteadyState;
        }
    }

    pub fn note_sent(&mut self, now: Instant) {
        self.last_send = Some(now);
        if self.state == SendState::KeepAlive {
            self.state = SendState::SteadyState;
        }
    }

    pub fn note_idle(&mut self) {
        if matches!(self.state, SendState::SlowStart | SendState::SteadyState) {
            self.state = SendState::KeepAlive;
        }
    }

    pub fn close(&mut self) {
        self.state = SendState::Closed;
    }

    pub fn is_timed_out(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) >= self.channel_timeout
    }

    pub fn needs_keep_alive(&self, now: Instant) -> bool {
        match self.last_send {
            Some(last) => now.saturating_duration_since(last) >= self.keep_alive_interval,
            None => true,
        }
    }

    /// How long to wait before the next DATA send is permitted, combining
    /// congestion control's pacing with the slow-start fixed rate.
    pub fn send_interval(&self, cc: &dyn CongestionControl, min_send_interval: Duration) -> Duration {
        match self.state {
            SendState::Closed => Duration::MAX,
            SendState::PingPong => Duration::MAX,
            SendState::KeepAlive => self.keep_alive_interval,
            SendState::SlowStart | SendState::SteadyState => {
                let rtt = cc.min_rtt().max(Duration::from_millis(1));
                let cwnd = cc.cwnd().max(1);
                (rtt / cwnd as u32).max(min_send_interval)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swift_reliable::Ledbat;

    #[test]
    fn starts_in_ping_pong_then_handshake_moves_to_slow_start() {
        let now = Instant::now();
        let mut sc = SendControl::new(now, Duration::from_secs(60), Duration::from_secs(20));
        assert_eq!(sc.state(), SendState::PingPong);
        sc.handshake_established();
        assert_eq!(sc.state(), SendState::SlowStart);
    }

    #[test]
    fn loss_transitions_out_of_slow_start() {
        let now = Instant::now();
        let mut sc = SendControl::new(now, Duration::from_secs(60), Duration::from_secs(20));
        sc.handshake_established();
        sc.note_loss();
        assert_eq!(sc.state(), SendState::SteadyState);
    }

    #[test]
    fn idle_channel_drops_to_keep_alive_and_resumes_on_send() {
        let now = Instant::now();
        let mut sc = SendControl::new(now, Duration::from_secs(60), Duration::from_secs(20));
        sc.handshake_established();
        sc.note_idle();
        assert_eq!(sc.state(), SendState::KeepAlive);
        sc.note_sent(now);
        assert_eq!(sc.state(), SendState::SteadyState);
    }

    #[test]
    fn timeout_detected_after_channel_timeout_elapses() {
        let now = Instant::now();
        let sc = SendControl::new(now, Duration::from_secs(60), Duration::from_secs(20));
        assert!(!sc.is_timed_out(now + Duration::from_secs(30)));
        assert!(sc.is_timed_out(now + Duration::from_secs(61)));
    }

    #[test]
    fn send_interval_uses_congestion_control_pacing() {
        let now = Instant::now();
        let mut sc = SendControl::new(now, Duration::from_secs(60), Duration::from_secs(20));
        sc.handshake_established();
        let cc = Ledbat::new();
        let interval = sc.send_interval(&cc, Duration::from_millis(1));
        assert!(interval >= Duration::from_millis(1));
    }
}
