//! Outstanding-request bookkeeping and the reliable data path: tracks what
//! we've asked for and sent so ACKs can be matched to RTT samples and
//! timeouts can trigger retransmission, the way libswift's own `DataOut*`
//! machinery does.

use crate::bin::Bin;
use std::time::Instant;
use swift_reliable::{CongestionControl, DeliverySample, FlatMap, RttEstimator};

/// One fragment we've sent and are waiting to have ACKed.
#[derive(Debug, Clone, Copy)]
struct Outstanding {
    sent_at: Instant,
    size: usize,
    retransmit_count: u32,
}

/// Tracks in-flight DATA fragments for one channel's send side: RTT
/// estimation off ACKs, timeout-driven retransmission, and handing
/// delivery samples to whatever [`CongestionControl`] the channel is
/// running.
pub struct ReliableSend {
    outstanding: FlatMap<Bin, Outstanding>,
    rtt: RttEstimator,
    max_reordering: u32,
    max_possible_rtt: std::time::Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// First ACK for this bin; caller should mark verified/delivered.
    Accepted,
    /// ACK for a bin we weren't tracking (duplicate or already retired).
    Unknown,
}

impl ReliableSend {
    pub fn new(max_reordering: u32, max_possible_rtt: std::time::Duration) -> Self {
        Self {
            outstanding: FlatMap::new(),
            rtt: RttEstimator::new(),
            max_reordering,
            max_possible_rtt,
        }
    }

    pub fn rto(&self) -> std::time::Duration {
        self.rtt.rto()
    }

    pub fn srtt(&self) -> std::time::Duration {
        self.rtt.srtt()
    }

    /// Records that `bin` was just sent, for timeout/RTT tracking.
    pub fn data_out(&mut self, bin: Bin, size: usize, now: Instant) {
        self.outstanding.insert(
            bin,
            Outstanding {
                sent_at: now,
                size,
                retransmit_count: 0,
            },
        );
    }

    /// Processes an ACK for `bin`, updating RTT and congestion control.
    ///
    /// Also applies the reordering-based fast-retransmit rule: every entry
    /// sent more than `max_reordering` positions before this one and still
    /// unacked is presumed lost and force-expired so the next
    /// [`ReliableSend::data_out_tmo`] call retransmits it immediately,
    /// instead of waiting out the full RTO.
    pub fn ack_in(
        &mut self,
        bin: Bin,
        now: Instant,
        one_way_delay: std::time::Duration,
        cc: &mut dyn CongestionControl,
        in_flight_bytes: usize,
    ) -> AckOutcome {
        let Some(acked_idx) = self.outstanding.iter().position(|(b, _)| *b == bin) else {
            return AckOutcome::Unknown;
        };
        let threshold = acked_idx.saturating_sub(self.max_reordering as usize);
        let presumed_lost: Vec<Bin> = self
            .outstanding
            .iter()
            .take(acked_idx)
            .enumerate()
            .filter(|(idx, _)| *idx < threshold)
            .map(|(_, (b, _))| *b)
            .collect();
        if !presumed_lost.is_empty() {
            let rto = self.rtt.rto();
            for lost in &presumed_lost {
                if let Some(entry) = self.outstanding.get_mut(lost) {
                    entry.sent_at = now.checked_sub(rto).unwrap_or(entry.sent_at);
                }
            }
            cc.on_nack(now);
        }

        let sent = self
            .outstanding
            .remove(&bin)
            .expect("bin located by position above");
        let sample = now.saturating_duration_since(sent.sent_at);
        let clamped = sample.min(self.max_possible_rtt);
        // Karn's algorithm: an ACK for a bin that was itself retransmitted
        // can't tell which of the sends it's acking, so it must not feed
        // the RTT estimator (it would poison rtt/dev with a bogus sample).
        if sent.retransmit_count == 0 {
            self.rtt.update(clamped);
        }
        cc.on_ack(
            clamped,
            Some(DeliverySample {
                bytes_delivered: sent.size,
                duration: one_way_delay.min(self.max_possible_rtt),
                now,
                app_limited: false,
            }),
            sent.size,
            in_flight_bytes,
            now,
        );
        AckOutcome::Accepted
    }

    /// Returns bins whose RTO has elapsed without an ACK, for
    /// retransmission, and bumps their retry counters. Entries beyond
    /// `max_reordering` retransmits are dropped and reported as
    /// permanently lost (the caller should pick a different peer/bin).
    pub fn data_out_tmo(&mut self, now: Instant, cc: &mut dyn CongestionControl) -> (Vec<Bin>, Vec<Bin>) {
        let rto = self.rtt.rto();
        let mut retransmit = Vec::new();
        let mut abandoned = Vec::new();
        let max_reordering = self.max_reordering;
        self.outstanding.retain(|bin, entry| {
            if now.saturating_duration_since(entry.sent_at) < rto {
                return true;
            }
            if entry.retransmit_count >= max_reordering {
                abandoned.push(*bin);
                return false;
            }
            entry.retransmit_count += 1;
            entry.sent_at = now;
            retransmit.push(*bin);
            true
        });
        if !retransmit.is_empty() || !abandoned.is_empty() {
            cc.on_timeout(now);
        }
        (retransmit, abandoned)
    }

    pub fn in_flight_count(&self) -> usize {
        self.outstanding.len()
    }

    pub fn in_flight_bytes(&self) -> usize {
        self.outstanding.values().map(|o| o.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swift_reliable::Ledbat;

    #[test]
    fn ack_updates_rtt_and_clears_outstanding() {
        let mut send = ReliableSend::new(4, std::time::Duration::from_secs(60));
        let mut cc = Ledbat::new();
        let t0 = Instant::now();
        send.data_out(Bin::base(0), 1024, t0);
        assert_eq!(send.in_flight_count(), 1);
        let t1 = t0 + std::time::Duration::from_millis(50);
        let outcome = send.ack_in(Bin::base(0), t1, std::time::Duration::from_millis(50), &mut cc, 0);
        assert_eq!(outcome, AckOutcome::Accepted);
        assert_eq!(send.in_flight_count(), 0);
    }

    #[test]
    fn unknown_ack_is_reported() {
        let mut send = ReliableSend::new(4, std::time::Duration::from_secs(60));
        let mut cc = Ledbat::new();
        let outcome = send.ack_in(Bin::base(9), Instant::now(), std::time::Duration::from_millis(50), &mut cc, 0);
        assert_eq!(outcome, AckOutcome::Unknown);
    }

    #[test]
    fn ack_presumes_earlier_far_outstanding_entries_lost() {
        let mut send = ReliableSend::new(2, std::time::Duration::from_secs(60));
        let mut cc = Ledbat::new();
        let t0 = Instant::now();
        // Five fragments sent back to back; acking the last one first means
        // bin 0 is more than max_reordering (2) positions behind it and
        // should be presumed lost rather than waiting for its own RTO.
        for i in 0..5u64 {
            send.data_out(Bin::base(i), 100, t0 + std::time::Duration::from_millis(i));
        }
        assert_eq!(send.in_flight_count(), 5);

        let t1 = t0 + std::time::Duration::from_millis(50);
        let outcome = send.ack_in(Bin::base(4), t1, std::time::Duration::from_millis(50), &mut cc, 0);
        assert_eq!(outcome, AckOutcome::Accepted);
        assert_eq!(send.in_flight_count(), 4);

        // Bin 0 was pushed two positions further back than max_reordering
        // allows, so it should now look expired on the next timeout sweep
        // even though barely any time has passed.
        let (retransmit, _abandoned) = send.data_out_tmo(t1, &mut cc);
        assert!(retransmit.contains(&Bin::base(0)));
    }

    #[test]
    fn ack_for_a_retransmitted_bin_does_not_update_rtt() {
        // Karn's algorithm: an ACK can't tell which send it's acking once a
        // bin has been retransmitted, so it must not feed the RTT
        // estimator with a (potentially bogus) sample.
        let mut send = ReliableSend::new(4, std::time::Duration::from_secs(60));
        let mut cc = Ledbat::new();
        let t0 = Instant::now();
        send.data_out(Bin::base(0), 1024, t0);
        let rto = send.rto();
        let srtt_before = send.srtt();

        // Force a retransmit by letting the RTO elapse.
        let t1 = t0 + rto + std::time::Duration::from_millis(1);
        let (retransmit, _abandoned) = send.data_out_tmo(t1, &mut cc);
        assert_eq!(retransmit, vec![Bin::base(0)]);

        // The (late) ACK now arrives with an implausibly large one-way
        // delay; if it were allowed to feed the estimator, srtt would jump.
        let t2 = t1 + std::time::Duration::from_secs(10);
        let outcome = send.ack_in(Bin::base(0), t2, std::time::Duration::from_millis(50), &mut cc, 0);
        assert_eq!(outcome, AckOutcome::Accepted);
        assert_eq!(send.srtt(), srtt_before);
    }

    #[test]
    fn timeout_retransmits_then_abandons() {
        let mut send = ReliableSend::new(1, std::time::Duration::from_secs(60));
        let mut cc = Ledbat::new();
        let t0 = Instant::now();
        send.data_out(Bin::base(0), 1024, t0);
        let rto = send.rto();

        let (retransmit, abandoned) = send.data_out_tmo(t0 + rto + std::time::Duration::from_millis(1), &mut cc);
        assert_eq!(retransmit, vec![Bin::base(0)]);
        assert!(abandoned.is_empty());

        let t2 = t0 + rto + rto + std::time::Duration::from_millis(2);
        let (_, abandoned) = send.data_out_tmo(t2, &mut cc);
        assert_eq!(abandoned, vec![Bin::base(0)]);
        assert_eq!(send.in_flight_count(), 0);
    }
}
