use super::CongestionControl;
use std::time::{Duration, Instant};

/// Default target queueing delay above the rolling-minimum one-way delay.
pub const DEFAULT_TARGET: Duration = Duration::from_millis(100);
const INITIAL_CWND: f32 = 2.0;
const MIN_CWND: f32 = 1.0;
const MIN_SEND_INTERVAL: Duration = Duration::from_millis(5);

/// A LEDBAT ("Low Extra Delay Background Transport") congestion controller.
///
/// LEDBAT infers queueing delay by tracking a rolling minimum one-way delay
/// (OWD) and nudging `cwnd` towards keeping the *extra* delay above that
/// minimum close to a small `target`. Unlike loss-based algorithms it treats
/// sustained extra delay as the primary congestion signal and only halves on
/// an explicit loss (NACK/timeout), making it suitable as a low-priority
/// controller that yields to competing traffic.
///
/// Callers pass the one-way-delay sample for an ACK via
/// `DeliverySample::duration`; `bytes_delivered` drives the window increase
/// the same way a TCP-style `bytes_acked` would.
pub struct Ledbat {
    cwnd: f32,
    target: Duration,
    base_delay: Duration,
    last_rtt: Duration,
}

impl Default for Ledbat {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledbat {
    pub fn new() -> Self {
        Self::with_target(DEFAULT_TARGET)
    }

    pub fn with_target(target: Duration) -> Self {
        Self {
            cwnd: INITIAL_CWND,
            target,
            base_delay: Duration::MAX,
            last_rtt: Duration::from_millis(200),
        }
    }

    /// The rolling-minimum one-way delay currently in effect.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// `send_interval = max(rtt / cwnd, min_send_interval)`.
    pub fn send_interval(&self) -> Duration {
        let per_fragment = self.last_rtt.div_f32(self.cwnd.max(MIN_CWND));
        per_fragment.max(MIN_SEND_INTERVAL)
    }
}

impl CongestionControl for Ledbat {
    fn on_ack(
        &mut self,
        rtt: Duration,
        sample: Option<super::DeliverySample>,
        bytes_acked: usize,
        _in_flight: usize,
        _now: Instant,
    ) {
        self.last_rtt = rtt;

        let Some(sample) = sample else { return };
        let owd = sample.duration;
        if owd < self.base_delay {
            self.base_delay = owd;
        }

        let queuing_delay = owd.saturating_sub(self.base_delay);
        let off_target = self.target.saturating_sub(queuing_delay).as_secs_f32()
            - (queuing_delay.saturating_sub(self.target)).as_secs_f32();
        let gain = off_target / self.target.as_secs_f32().max(0.001);

        let fragments_acked =
            bytes_acked as f32 / crate::consts::ESTIMATED_PAYLOAD_SIZE as f32;
        self.cwnd = (self.cwnd + gain * fragments_acked / self.cwnd.max(MIN_CWND)).max(MIN_CWND);
    }

    fn on_nack(&mut self, _now: Instant) {
        self.cwnd = (self.cwnd / 2.0).max(MIN_CWND);
    }

    fn on_timeout(&mut self, _now: Instant) {
        self.cwnd = MIN_CWND;
    }

    fn cwnd(&self) -> usize {
        self.cwnd as usize
    }

    fn pacing_rate(&self) -> f32 {
        let mtu = crate::consts::ESTIMATED_PAYLOAD_SIZE as f32;
        let rtt_secs = self.last_rtt.as_secs_f32().clamp(0.005, 2.0);
        (self.cwnd * mtu) / rtt_secs
    }

    fn min_rtt(&self) -> Duration {
        self.last_rtt
    }

    fn on_fragment_sent(&mut self, _bytes: usize, _now: Instant) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cwnd_grows_when_delay_stays_at_base() {
        let mut c = Ledbat::new();
        let now = Instant::now();
        for _ in 0..20 {
            c.on_ack(
                Duration::from_millis(50),
                Some(super::super::DeliverySample {
                    bytes_delivered: 1024,
                    duration: Duration::from_millis(10),
                    now,
                    app_limited: false,
                }),
                1024,
                0,
                now,
            );
        }
        assert!(c.cwnd() >= 2);
    }

    #[test]
    fn loss_halves_cwnd() {
        let mut c = Ledbat::new();
        let before = c.cwnd().max(4);
        c.cwnd = before as f32;
        c.on_nack(Instant::now());
        assert!(c.cwnd() <= before / 2 + 1);
    }
}
