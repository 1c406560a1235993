//! The per-peer channel state machine: owns one UDP "conversation" with a
//! single peer about a single swarm, assembling the handshake, reliability,
//! hint-pipeline, PEX and send-control pieces in this module's siblings into
//! the actual message-in/message-out loop.
//!
//! A `Channel` never owns the swarm's content state (hash tree, storage,
//! picker) — those are shared across every channel of a `Transfer` and are
//! threaded in by the caller on each call, the way libswift's own `Channel`
//! reaches back into its `Transfer` rather than duplicating its state.

pub mod handshake;
pub mod hints;
pub mod pex;
pub mod reliability;
pub mod send_control;
pub mod wire;

use crate::bin::Bin;
use crate::binmap::Binmap;
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::hashtree::{HashTreeRead, VerifyOutcome};
use crate::picker::{ChannelId, PiecePicker};
use crate::storage::ChunkStorage;
use handshake::{
    DuplicateResolution, HandshakeParams, HandshakeRetries, HandshakeState, local_identity,
    resolve_duplicate,
};
use hints::{IncomingHints, OutgoingHints};
use pex::PexSchedule;
use rand::SeedableRng;
use rand::rngs::StdRng;
use reliability::{AckOutcome, ReliableSend};
use send_control::{SendControl, SendState};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use swift_proto::{ChunkAddrFormat, PeerId, SwarmId};
use swift_reliable::{Algorithm, AlgorithmType, CongestionControl};
use wire::Message;

/// A piece of data the channel needs the caller to act on after processing a
/// tick or an incoming datagram, beyond "here are some messages to send".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The handshake completed; `have_map` is what we should advertise back
    /// (our own ack_out at the time), already queued as a HAVE burst.
    HandshakeEstablished,
    /// The peer asked for PEX; the owning transfer should pick another
    /// established peer to answer with (this channel has no view of the
    /// rest of the swarm).
    PexRequested,
    /// We learned of another peer, via a PEX response from this channel's
    /// peer.
    PeerDiscovered(SocketAddr),
    /// The channel gave up (handshake exhausted, or timed out) and should be
    /// removed from the owning transfer's table.
    Closed,
}

/// One peer conversation about one swarm.
pub struct Channel {
    id: ChannelId,
    peer_addr: SocketAddr,
    peer_channel_id: Option<u32>,
    swarm_id: SwarmId,
    addr_format: ChunkAddrFormat,
    config: ChannelConfig,

    handshake_state: HandshakeState,
    handshake_retries: HandshakeRetries,
    local_params: HandshakeParams,
    peer_id: PeerId,
    twist: u64,
    is_initiator: bool,

    send_control: SendControl,
    reliable_send: ReliableSend,
    cc: Algorithm,

    outgoing_hints: OutgoingHints,
    incoming_hints: IncomingHints,
    peer_have: Binmap,

    pex_schedule: PexSchedule,
    reverse_pex_done: bool,
    sent_first_data: bool,

    bytes_sent: u64,
    bytes_received: u64,
    last_send_attempt: Option<Instant>,
    created_at: Instant,
}

impl Channel {
    /// Starts a new outbound channel: `id` is our local table index for it
    /// (becomes the `channel_id` we advertise in our HANDSHAKE so the peer
    /// knows where to address replies).
    #[allow(clippy::too_many_arguments)]
    pub fn new_outbound(
        id: ChannelId,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        swarm_id: SwarmId,
        local_params: HandshakeParams,
        capacity_chunks: u64,
        config: ChannelConfig,
        now: Instant,
        rng_seed: u64,
    ) -> Self {
        Self::new(
            id,
            local_addr,
            peer_addr,
            swarm_id,
            local_params,
            capacity_chunks,
            config,
            now,
            rng_seed,
            true,
        )
    }

    pub fn new_inbound(
        id: ChannelId,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        swarm_id: SwarmId,
        local_params: HandshakeParams,
        capacity_chunks: u64,
        config: ChannelConfig,
        now: Instant,
        rng_seed: u64,
    ) -> Self {
        Self::new(
            id,
            local_addr,
            peer_addr,
            swarm_id,
            local_params,
            capacity_chunks,
            config,
            now,
            rng_seed,
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        id: ChannelId,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        swarm_id: SwarmId,
        local_params: HandshakeParams,
        capacity_chunks: u64,
        config: ChannelConfig,
        now: Instant,
        rng_seed: u64,
        is_initiator: bool,
    ) -> Self {
        let local_id = local_identity(local_addr);
        let peer_id = local_identity(peer_addr);
        let twist = xor_twist(&local_id, &peer_id);
        let rng = StdRng::seed_from_u64(rng_seed);
        Self {
            id,
            peer_addr,
            peer_channel_id: None,
            swarm_id,
            addr_format: local_params.addr_format,
            config: config.clone(),
            handshake_state: HandshakeState::AwaitingPeer,
            handshake_retries: HandshakeRetries::new(config.handshake_max_retries),
            local_params,
            peer_id,
            twist,
            is_initiator,
            send_control: SendControl::new(now, config.channel_timeout, config.keep_alive_interval),
            reliable_send: ReliableSend::new(config.max_reordering, config.max_possible_rtt),
            cc: Algorithm::new(AlgorithmType::Ledbat, rng),
            outgoing_hints: OutgoingHints::new(config.max_outstanding_hints),
            incoming_hints: IncomingHints::new(),
            peer_have: Binmap::new(capacity_chunks),
            pex_schedule: PexSchedule::new(
                config.min_pex_request_interval,
                config.pex_backoff_multiplier,
                config.max_pex_request_interval,
            ),
            reverse_pex_done: false,
            sent_first_data: false,
            bytes_sent: 0,
            bytes_received: 0,
            last_send_attempt: None,
            created_at: now,
        }
    }

    /// Microseconds elapsed on this channel's own local clock, for stamping
    /// outgoing DATA and interpreting a peer's stamp on incoming DATA. Each
    /// side runs an independent, unsynchronized clock; LEDBAT only tracks
    /// the *minimum* reported delay and the extra delay above it, so a
    /// constant per-peer clock offset cancels out without needing wall-clock
    /// synchronization between peers.
    pub fn local_micros(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.created_at).as_micros() as u64
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The peer's own channel-id, learned from its HANDSHAKE once received;
    /// this is what the dispatcher addresses as the 4-byte routing prefix on
    /// every datagram sent to this peer after the first.
    pub fn peer_channel_id(&self) -> Option<u32> {
        self.peer_channel_id
    }

    pub fn swarm_id(&self) -> SwarmId {
        self.swarm_id
    }

    pub fn peer_have(&self) -> &Binmap {
        &self.peer_have
    }

    pub fn is_established(&self) -> bool {
        self.handshake_state == HandshakeState::Established
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn rtt(&self) -> Duration {
        self.cc.min_rtt()
    }

    pub fn cwnd(&self) -> f64 {
        self.cc.cwnd() as f64
    }

    /// The initial datagram: a HANDSHAKE advertising our options.
    pub fn open_handshake(&self) -> Message {
        Message::Handshake {
            channel_id: self.id,
            peer_id: Some(self.peer_id),
            options: self.local_params.to_options(),
        }
    }

    /// Processes one decoded message, appending any reply messages to `out`.
    /// `hash_tree`/`storage`/`picker` belong to the owning `Transfer` and are
    /// shared across every channel of that swarm.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_message(
        &mut self,
        msg: Message,
        now: Instant,
        hash_tree: &mut dyn HashTreeMutate,
        storage: &mut dyn ChunkStorage,
        picker: &mut dyn PiecePicker,
        out: &mut Vec<Message>,
    ) -> Result<Vec<ChannelEvent>, ChannelError> {
        self.send_control.note_activity(now);
        let mut events = Vec::new();
        match msg {
            Message::Handshake {
                channel_id,
                peer_id: _,
                options,
            } => {
                let remote = HandshakeParams::from_options(&options)?;
                if remote.swarm_id != self.swarm_id {
                    return Err(ChannelError::UnknownSwarm);
                }
                if remote.version != self.local_params.version {
                    return Err(ChannelError::VersionMismatch);
                }
                self.peer_channel_id = Some(channel_id);
                if self.handshake_state != HandshakeState::Established {
                    self.handshake_state = HandshakeState::Established;
                    self.send_control.handshake_established();
                    if !self.is_initiator {
                        out.push(self.open_handshake());
                    }
                    for bin in hash_tree.ack_out_bins() {
                        out.push(Message::Have { bin });
                    }
                    events.push(ChannelEvent::HandshakeEstablished);
                }
            }
            Message::Data {
                bin,
                timestamp_micros,
                payload,
            } => {
                self.incoming_hints.cancel(bin);
                // A bin we've already verified re-arriving (e.g. our ACK was
                // lost and the peer retransmitted) must not double-credit
                // bytes_received or re-emit HAVE — only the first
                // verification does.
                if !hash_tree.is_filled(bin) {
                    match hash_tree.offer_data(bin, &payload, storage)? {
                        VerifyOutcome::Verified => {
                            self.bytes_received += payload.len() as u64;
                            picker.note_verified(bin);
                            out.push(Message::Have { bin });
                        }
                        VerifyOutcome::Rejected => {}
                    }
                }
                let one_way_delay_micros = self
                    .local_micros(now)
                    .saturating_sub(timestamp_micros)
                    .min(u32::MAX as u64) as u32;
                out.push(Message::Ack {
                    bin,
                    one_way_delay_micros,
                });
            }
            Message::Ack {
                bin,
                one_way_delay_micros,
            } => {
                let in_flight = self.reliable_send.in_flight_bytes();
                let owd = Duration::from_micros(one_way_delay_micros as u64);
                let outcome = self.reliable_send.ack_in(bin, now, owd, &mut self.cc, in_flight);
                if outcome == AckOutcome::Accepted {
                    self.outgoing_hints.fulfil(bin);
                }
            }
            Message::Have { bin } => {
                let _ = self.peer_have.set(bin);
                picker.note_have(self.id, bin);
            }
            Message::Integrity { bin, hash } => {
                hash_tree.offer_hash(bin, hash)?;
            }
            Message::SignedIntegrity { .. } => {
                // Live-signing verification is out of scope.
            }
            Message::Request { bin } => {
                self.incoming_hints.push(bin);
            }
            Message::Cancel { bin } => {
                self.incoming_hints.cancel(bin);
            }
            Message::Choke => {
                self.outgoing_hints = OutgoingHints::new(self.config.max_outstanding_hints);
            }
            Message::Unchoke => {}
            Message::PexReq => {
                events.push(ChannelEvent::PexRequested);
            }
            Message::PexResV4 { addr } => {
                self.pex_schedule.record_response();
                events.push(ChannelEvent::PeerDiscovered(SocketAddr::V4(addr)));
            }
            Message::PexResV6 { addr } => {
                self.pex_schedule.record_response();
                events.push(ChannelEvent::PeerDiscovered(SocketAddr::V6(addr)));
            }
            Message::Randomize { .. } => {}
        }
        Ok(events)
    }

    /// Per-tick duties: handshake retransmit, retransmission of timed-out
    /// DATA, requesting more from the picker, keep-alive, PEX requests, and
    /// reverse PEX. Appends outgoing messages to `out` and returns whether
    /// the channel should be torn down.
    /// `rate_budget` caps how many more base-chunk REQUESTs this call may
    /// emit, in chunks; it is shared and decremented across every channel of
    /// the owning transfer in one tick, approximating the transfer-wide
    /// rate allowance. Pass `usize::MAX` for no cap.
    #[allow(clippy::too_many_arguments)]
    pub fn tick(
        &mut self,
        now: Instant,
        missing: &Binmap,
        picker: &mut dyn PiecePicker,
        out: &mut Vec<Message>,
        rate_budget: &mut usize,
    ) -> Vec<ChannelEvent> {
        let mut events = Vec::new();

        if self.send_control.is_timed_out(now) {
            self.send_control.close();
            picker.note_channel_closed(self.id);
            events.push(ChannelEvent::Closed);
            return events;
        }

        match self.handshake_state {
            HandshakeState::AwaitingPeer => {
                if self.handshake_retries.exhausted() {
                    self.handshake_state = HandshakeState::Failed;
                    events.push(ChannelEvent::Closed);
                    return events;
                }
                let due = self
                    .last_send_attempt
                    .map(|t| now.saturating_duration_since(t) >= self.config.handshake_retry_interval)
                    .unwrap_or(true);
                if due {
                    out.push(self.open_handshake());
                    self.handshake_retries.record_attempt();
                    self.last_send_attempt = Some(now);
                    self.send_control.note_sent(now);
                }
                return events;
            }
            HandshakeState::Failed => {
                events.push(ChannelEvent::Closed);
                return events;
            }
            HandshakeState::Established => {}
        }

        let (retransmit, abandoned) = self.reliable_send.data_out_tmo(now, &mut self.cc);
        if !retransmit.is_empty() || !abandoned.is_empty() {
            self.send_control.note_loss();
        }
        for bin in &retransmit {
            self.outgoing_hints.push(*bin);
        }
        for bin in &abandoned {
            self.outgoing_hints.fulfil(*bin);
        }

        while self.outgoing_hints.has_room() && *rate_budget > 0 {
            let picks = picker.pick(self.id, missing, &self.peer_have, self.twist, 1);
            if picks.is_empty() {
                break;
            }
            for bin in picks {
                self.outgoing_hints.push(bin);
                out.push(Message::Request { bin });
                *rate_budget = rate_budget.saturating_sub(1);
            }
        }

        if self.pex_schedule.should_request(now) {
            out.push(Message::PexReq);
            self.pex_schedule.record_request(now);
        }

        if self.reliable_send.in_flight_count() == 0 && self.outgoing_hints.is_empty() {
            self.send_control.note_idle();
        }

        if self.send_control.needs_keep_alive(now) {
            out.push(Message::Randomize {
                nonce: self.id ^ (self.bytes_sent as u32),
            });
            self.send_control.note_sent(now);
        }

        events
    }

    /// Pops the next bin this channel's peer is waiting on, for the caller
    /// (the owning `Transfer`, which alone holds storage/hash-tree access)
    /// to read and send as a DATA message via [`Channel::record_send`].
    pub fn next_to_serve(&mut self) -> Option<Bin> {
        if self.send_control.state() == SendState::Closed {
            return None;
        }
        self.incoming_hints.pop_next()
    }

    pub fn note_pex_response(&mut self, now: Instant) {
        let _ = now;
        self.pex_schedule.record_response();
    }

    pub fn reverse_pex_due(&self, established_at: Instant, now: Instant) -> bool {
        !self.reverse_pex_done && now.saturating_duration_since(established_at) >= pex::REVERSE_PEX_DELAY
    }

    pub fn mark_reverse_pex_done(&mut self) {
        self.reverse_pex_done = true;
    }

    pub fn may_share_with(&self, candidate: SocketAddr) -> bool {
        pex::may_share(candidate, self.peer_addr)
    }

    /// True on the call before the first DATA this channel ever sends; the
    /// caller should prepend the tree's full peak-hash bundle to that
    /// datagram. Marks itself consumed so later DATA only carries the
    /// uncle-hash witness chain.
    pub fn take_needs_peak_hashes(&mut self) -> bool {
        let first = !self.sent_first_data;
        self.sent_first_data = true;
        first
    }

    pub fn record_send(&mut self, bin: Bin, size: usize, now: Instant) {
        self.bytes_sent += size as u64;
        self.reliable_send.data_out(bin, size, now);
        self.send_control.note_sent(now);
    }

    pub fn send_state(&self) -> SendState {
        self.send_control.state()
    }

    pub fn send_interval(&self) -> Duration {
        self.send_control.send_interval(&self.cc, self.config.handshake_retry_interval.min(Duration::from_millis(1)))
    }

    /// Resolves a duplicate-connection race against another channel already
    /// talking to the same peer.
    pub fn resolve_against(&self, local_addr: SocketAddr) -> DuplicateResolution {
        resolve_duplicate(local_addr, self.peer_addr)
    }
}

fn xor_twist(a: &PeerId, b: &PeerId) -> u64 {
    let mut out = [0u8; 8];
    for i in 0..8 {
        out[i] = a.as_bytes()[i] ^ b.as_bytes()[i];
    }
    u64::from_be_bytes(out)
}

/// The subset of hash-tree operations a `Channel` needs while processing
/// messages, kept as a narrow trait so `Channel` doesn't need to know
/// whether its `Transfer` is backed by [`crate::hashtree::HashTree`] or
/// [`crate::hashtree::ZeroStateHashTree`].
pub trait HashTreeMutate: HashTreeRead {
    fn offer_data(
        &mut self,
        bin: Bin,
        data: &[u8],
        storage: &mut dyn ChunkStorage,
    ) -> Result<VerifyOutcome, crate::error::HashTreeError>;

    fn offer_hash(&mut self, bin: Bin, hash: Vec<u8>) -> Result<(), crate::error::HashTreeError>;

    /// Every currently-verified bin, coalesced, for the initial HAVE burst
    /// sent right after a handshake completes.
    fn ack_out_bins(&self) -> Vec<Bin>;

    /// Whether `bin` is already verified. Checked before `offer_data` so a
    /// re-sent DATA for a bin we already have doesn't double-credit
    /// `bytes_received` or re-emit HAVE.
    fn is_filled(&self, bin: Bin) -> bool;
}

impl<H: crate::hashtree::HashFn> HashTreeMutate for crate::hashtree::HashTree<H> {
    fn offer_data(
        &mut self,
        bin: Bin,
        data: &[u8],
        storage: &mut dyn ChunkStorage,
    ) -> Result<VerifyOutcome, crate::error::HashTreeError> {
        crate::hashtree::HashTree::offer_data(self, bin, data, storage)
    }

    fn offer_hash(&mut self, bin: Bin, hash: Vec<u8>) -> Result<(), crate::error::HashTreeError> {
        crate::hashtree::HashTree::offer_hash(self, bin, hash)
    }

    fn ack_out_bins(&self) -> Vec<Bin> {
        if self.ack_out().is_all_filled() {
            vec![Bin::ALL]
        } else {
            (0..self.num_chunks())
                .filter(|c| self.ack_out().is_filled(Bin::base(*c)))
                .map(Bin::base)
                .collect()
        }
    }

    fn is_filled(&self, bin: Bin) -> bool {
        self.ack_out().is_filled(bin)
    }
}

impl HashTreeMutate for crate::hashtree::ZeroStateHashTree {
    fn offer_data(
        &mut self,
        _bin: Bin,
        _data: &[u8],
        _storage: &mut dyn ChunkStorage,
    ) -> Result<VerifyOutcome, crate::error::HashTreeError> {
        // A zero-state tree only ever seeds; it has no verified-chunk cursor
        // to update and never accepts inbound DATA.
        Ok(VerifyOutcome::Rejected)
    }

    fn offer_hash(&mut self, _bin: Bin, _hash: Vec<u8>) -> Result<(), crate::error::HashTreeError> {
        Ok(())
    }

    fn ack_out_bins(&self) -> Vec<Bin> {
        vec![Bin::ALL]
    }

    fn is_filled(&self, _bin: Bin) -> bool {
        // A zero-state seed never receives DATA for itself; treated as
        // never-filled so the (never-taken) Verified branch stays reachable.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashtree::{HashTree, Sha1HashFn};
    use crate::picker::SequentialPicker;
    use crate::storage::InMemoryStorage;

    fn params(swarm: SwarmId) -> HandshakeParams {
        HandshakeParams {
            version: 1,
            addr_format: ChunkAddrFormat::Chunk32,
            chunk_size: 1024,
            swarm_id: swarm,
            live_discard_window: None,
        }
    }

    #[test]
    fn handshake_establishes_and_sends_have_burst() {
        let now = Instant::now();
        let swarm = SwarmId([1u8; 32]);
        let local: SocketAddr = "10.0.0.1:1000".parse().unwrap();
        let peer: SocketAddr = "10.0.0.2:2000".parse().unwrap();
        let mut channel = Channel::new_outbound(
            7,
            local,
            peer,
            swarm,
            params(swarm),
            4,
            ChannelConfig::default(),
            now,
            42,
        );

        let data = vec![5u8; 1024];
        let hash_fn = Sha1HashFn;
        use crate::hashtree::HashFn;
        let root = hash_fn.hash_leaf(&data);
        let mut tree = HashTree::new(hash_fn, root, 1024, 1, 1024);
        let mut storage = InMemoryStorage::new();
        let mut picker = SequentialPicker::new();
        let mut out = Vec::new();

        let peer_handshake = Message::Handshake {
            channel_id: 3,
            peer_id: None,
            options: params(swarm).to_options(),
        };
        let events = channel
            .handle_message(peer_handshake, now, &mut tree, &mut storage, &mut picker, &mut out)
            .unwrap();
        assert!(events.contains(&ChannelEvent::HandshakeEstablished));
        assert!(channel.is_established());
    }

    #[test]
    fn data_message_verifies_and_acks() {
        let now = Instant::now();
        let swarm = SwarmId([2u8; 32]);
        let local: SocketAddr = "10.0.0.1:1000".parse().unwrap();
        let peer: SocketAddr = "10.0.0.2:2000".parse().unwrap();
        let mut channel = Channel::new_inbound(
            1,
            local,
            peer,
            swarm,
            params(swarm),
            1,
            ChannelConfig::default(),
            now,
            7,
        );

        let data = vec![9u8; 1024];
        let hash_fn = Sha1HashFn;
        use crate::hashtree::HashFn;
        let root = hash_fn.hash_leaf(&data);
        let mut tree = HashTree::new(hash_fn, root, 1024, 1, 1024);
        let mut storage = InMemoryStorage::new();
        let mut picker = SequentialPicker::new();
        let mut out = Vec::new();

        channel
            .handle_message(
                Message::Data {
                    bin: Bin::base(0),
                    timestamp_micros: 0,
                    payload: data,
                },
                now,
                &mut tree,
                &mut storage,
                &mut picker,
                &mut out,
            )
            .unwrap();

        assert!(out.iter().any(|m| matches!(m, Message::Ack { .. })));
        assert!(tree.ack_out().is_filled(Bin::base(0)));
    }

    #[test]
    fn duplicate_data_does_not_double_credit_bytes_received() {
        let now = Instant::now();
        let swarm = SwarmId([2u8; 32]);
        let local: SocketAddr = "10.0.0.1:1000".parse().unwrap();
        let peer: SocketAddr = "10.0.0.2:2000".parse().unwrap();
        let mut channel = Channel::new_inbound(
            1,
            local,
            peer,
            swarm,
            params(swarm),
            1,
            ChannelConfig::default(),
            now,
            7,
        );

        let data = vec![9u8; 1024];
        let hash_fn = Sha1HashFn;
        use crate::hashtree::HashFn;
        let root = hash_fn.hash_leaf(&data);
        let mut tree = HashTree::new(hash_fn, root, 1024, 1, 1024);
        let mut storage = InMemoryStorage::new();
        let mut picker = SequentialPicker::new();

        let mut out = Vec::new();
        channel
            .handle_message(
                Message::Data {
                    bin: Bin::base(0),
                    timestamp_micros: 0,
                    payload: data.clone(),
                },
                now,
                &mut tree,
                &mut storage,
                &mut picker,
                &mut out,
            )
            .unwrap();
        assert_eq!(channel.bytes_received(), data.len() as u64);
        assert_eq!(out.iter().filter(|m| matches!(m, Message::Have { .. })).count(), 1);

        // The same DATA arrives again (peer didn't see our ACK and
        // retransmitted).
        let mut out2 = Vec::new();
        channel
            .handle_message(
                Message::Data {
                    bin: Bin::base(0),
                    timestamp_micros: 0,
                    payload: data.clone(),
                },
                now,
                &mut tree,
                &mut storage,
                &mut picker,
                &mut out2,
            )
            .unwrap();
        assert_eq!(channel.bytes_received(), data.len() as u64);
        assert_eq!(out2.iter().filter(|m| matches!(m, Message::Have { .. })).count(), 0);
        assert_eq!(out2.iter().filter(|m| matches!(m, Message::Ack { .. })).count(), 1);
    }

    #[test]
    fn wrong_swarm_id_is_rejected() {
        let now = Instant::now();
        let swarm = SwarmId([3u8; 32]);
        let other_swarm = SwarmId([4u8; 32]);
        let local: SocketAddr = "10.0.0.1:1000".parse().unwrap();
        let peer: SocketAddr = "10.0.0.2:2000".parse().unwrap();
        let mut channel = Channel::new_outbound(
            1,
            local,
            peer,
            swarm,
            params(swarm),
            4,
            ChannelConfig::default(),
            now,
            1,
        );
        let data = vec![1u8; 1024];
        let hash_fn = Sha1HashFn;
        use crate::hashtree::HashFn;
        let root = hash_fn.hash_leaf(&data);
        let mut tree = HashTree::new(hash_fn, root, 1024, 1, 1024);
        let mut storage = InMemoryStorage::new();
        let mut picker = SequentialPicker::new();
        let mut out = Vec::new();
        let bad_handshake = Message::Handshake {
            channel_id: 2,
            peer_id: None,
            options: params(other_swarm).to_options(),
        };
        let err = channel
            .handle_message(bad_handshake, now, &mut tree, &mut storage, &mut picker, &mut out)
            .unwrap_err();
        assert!(matches!(err, ChannelError::UnknownSwarm));
    }
}
