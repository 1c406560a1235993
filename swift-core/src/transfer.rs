//! A `Transfer` is one open swarm: the hash tree and storage shared by every
//! peer channel talking about it, the single picker strategy chosen at open
//! time, and the reciprocity policy deciding how generously to serve each
//! peer. A `Runtime` owns many transfers, keyed by swarm
//! id; a transfer itself owns many channels, keyed by the dispatcher-wide
//! channel id the `Runtime`'s channel table assigned them.

use crate::bin::Bin;
use crate::binmap::Binmap;
use crate::channel::wire::Message;
use crate::channel::{Channel, ChannelEvent, HashTreeMutate};
use crate::clock::TimeProvider;
use crate::config::ChannelConfig;
use crate::error::CoreError;
use crate::hashtree::{HashFn, HashTree, HashTreeRead, Sha1HashFn, VerifyOutcome, ZeroStateHashTree};
use crate::picker::{ChannelId, PiecePicker};
use crate::reciprocity::{ChannelView, DefaultPolicy, ReciprocityPolicy};
use crate::storage::ChunkStorage;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swift_proto::{ChunkAddrFormat, SwarmId};
use swift_reliable::RateLimiter;

/// Which direction a control-surface rate/speed query or command applies to
/// (`SetMaxSpeed(td, dir, bytes/s)` / `GetCurrentSpeed(td, dir)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Tracks bytes moved in non-overlapping windows to report an approximate
/// current transfer speed, the way [`swift_reliable::RateLimiter`]'s bucket
/// tracks an allowance rather than an instantaneous rate.
#[derive(Debug)]
struct SpeedEstimator {
    window: Duration,
    window_start: Option<Instant>,
    window_bytes: u64,
    last_rate: f64,
}

impl SpeedEstimator {
    fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            window_bytes: 0,
            last_rate: 0.0,
        }
    }

    fn record(&mut self, now: Instant, bytes: u64) {
        let start = *self.window_start.get_or_insert(now);
        self.window_bytes += bytes;
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= self.window {
            self.last_rate = self.window_bytes as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
            self.window_bytes = 0;
            self.window_start = Some(now);
        }
    }

    fn rate(&self) -> f64 {
        self.last_rate
    }
}

/// Which hash-tree backend a transfer uses. Picked at open time: the regular
/// in-memory tree for leechers and normal seeds, or the zero-state facade for
/// bulk seeding without per-swarm RAM.
pub enum TreeMode {
    InMemory(HashTree<Sha1HashFn>),
    ZeroState(ZeroStateHashTree),
}

impl HashTreeRead for TreeMode {
    fn chunk_size(&self) -> u32 {
        match self {
            TreeMode::InMemory(t) => t.chunk_size(),
            TreeMode::ZeroState(t) => t.chunk_size(),
        }
    }

    fn num_chunks(&self) -> u64 {
        match self {
            TreeMode::InMemory(t) => t.num_chunks(),
            TreeMode::ZeroState(t) => t.num_chunks(),
        }
    }

    fn root_hash(&self) -> &[u8] {
        match self {
            TreeMode::InMemory(t) => t.root_hash(),
            TreeMode::ZeroState(t) => t.root_hash(),
        }
    }

    fn peak_for(&self, bin: Bin) -> Bin {
        match self {
            TreeMode::InMemory(t) => t.peak_for(bin),
            TreeMode::ZeroState(t) => t.peak_for(bin),
        }
    }

    fn seq_complete(&self, offset: u64) -> u64 {
        match self {
            TreeMode::InMemory(t) => t.seq_complete(offset),
            TreeMode::ZeroState(t) => t.seq_complete(offset),
        }
    }

    fn hash(&self, bin: Bin) -> Option<Vec<u8>> {
        match self {
            TreeMode::InMemory(t) => t.hash(bin),
            TreeMode::ZeroState(t) => t.hash(bin),
        }
    }

    fn is_complete(&self) -> bool {
        match self {
            TreeMode::InMemory(t) => t.is_complete(),
            TreeMode::ZeroState(t) => t.is_complete(),
        }
    }

    fn peak_hashes(&self) -> Vec<(Bin, Vec<u8>)> {
        match self {
            TreeMode::InMemory(t) => t.peak_hashes(),
            TreeMode::ZeroState(t) => t.peak_hashes(),
        }
    }
}

impl HashTreeMutate for TreeMode {
    fn offer_data(
        &mut self,
        bin: Bin,
        data: &[u8],
        storage: &mut dyn ChunkStorage,
    ) -> Result<VerifyOutcome, crate::error::HashTreeError> {
        match self {
            TreeMode::InMemory(t) => t.offer_data(bin, data, storage),
            TreeMode::ZeroState(t) => HashTreeMutate::offer_data(t, bin, data, storage),
        }
    }

    fn offer_hash(&mut self, bin: Bin, hash: Vec<u8>) -> Result<(), crate::error::HashTreeError> {
        match self {
            TreeMode::InMemory(t) => t.offer_hash(bin, hash),
            TreeMode::ZeroState(t) => HashTreeMutate::offer_hash(t, bin, hash),
        }
    }

    fn ack_out_bins(&self) -> Vec<Bin> {
        match self {
            TreeMode::InMemory(t) => HashTreeMutate::ack_out_bins(t),
            TreeMode::ZeroState(t) => HashTreeMutate::ack_out_bins(t),
        }
    }
}

impl TreeMode {
    /// The binmap of bins we already have, for handing to a [`PiecePicker`]
    /// as its "missing" parameter (eligible bins are the ones *not* filled
    /// here; see `crate::picker`).
    fn have_map(&self) -> Binmap {
        match self {
            TreeMode::InMemory(t) => t.ack_out().clone(),
            TreeMode::ZeroState(t) => {
                let mut m = Binmap::new(t.num_chunks().max(1));
                let _ = m.set(Bin::ALL);
                m
            }
        }
    }
}

/// A read-only snapshot of a transfer's progress, for [`crate::runtime::Runtime::status`].
#[derive(Debug, Clone)]
pub struct TransferStatus {
    pub swarm_id: SwarmId,
    pub num_chunks: u64,
    pub chunk_size: u32,
    pub seq_complete: u64,
    pub is_complete: bool,
    pub num_channels: usize,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

/// How many bins a channel may be asked to serve per tick, bounding how much
/// one swarm's outgoing-data work can dominate a dispatcher tick.
const MAX_SERVE_PER_TICK: usize = 4;

pub struct Transfer {
    swarm_id: SwarmId,
    addr_format: ChunkAddrFormat,
    tree: TreeMode,
    storage: Box<dyn ChunkStorage>,
    picker: Box<dyn PiecePicker>,
    reciprocity: Box<dyn ReciprocityPolicy>,
    channel_config: ChannelConfig,
    channels: HashMap<ChannelId, Channel>,
    established_at: HashMap<ChannelId, Instant>,
    upload_limiter: RateLimiter,
    download_limiter: RateLimiter,
    up_speed: SpeedEstimator,
    down_speed: SpeedEstimator,
    bytes_up: u64,
    bytes_down: u64,
}

impl Transfer {
    pub fn new(
        swarm_id: SwarmId,
        addr_format: ChunkAddrFormat,
        tree: TreeMode,
        storage: Box<dyn ChunkStorage>,
        picker: Box<dyn PiecePicker>,
        channel_config: ChannelConfig,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            swarm_id,
            addr_format,
            tree,
            storage,
            picker,
            reciprocity: Box::new(DefaultPolicy::default()),
            channel_config,
            channels: HashMap::new(),
            established_at: HashMap::new(),
            upload_limiter: RateLimiter::new(clock.clone(), 0.0),
            download_limiter: RateLimiter::new(clock, 0.0),
            up_speed: SpeedEstimator::new(Duration::from_secs(1)),
            down_speed: SpeedEstimator::new(Duration::from_secs(1)),
            bytes_up: 0,
            bytes_down: 0,
        }
    }

    pub fn with_reciprocity(mut self, policy: Box<dyn ReciprocityPolicy>) -> Self {
        self.reciprocity = policy;
        self
    }

    pub fn swarm_id(&self) -> SwarmId {
        self.swarm_id
    }

    pub fn addr_format(&self) -> ChunkAddrFormat {
        self.addr_format
    }

    pub fn chunk_size(&self) -> u32 {
        self.tree.chunk_size()
    }

    pub fn num_chunks(&self) -> u64 {
        self.tree.num_chunks()
    }

    pub fn channel_config(&self) -> &ChannelConfig {
        &self.channel_config
    }

    pub fn set_max_bytes_per_sec(&mut self, dir: Direction, max: f64) {
        match dir {
            Direction::Up => self.upload_limiter.set_max_bytes_per_sec(max),
            Direction::Down => self.download_limiter.set_max_bytes_per_sec(max),
        }
    }

    pub fn max_bytes_per_sec(&self, dir: Direction) -> f64 {
        match dir {
            Direction::Up => self.upload_limiter.max_bytes_per_sec(),
            Direction::Down => self.download_limiter.max_bytes_per_sec(),
        }
    }

    /// Approximate current throughput, per the §6 `GetCurrentSpeed` call.
    pub fn current_speed(&self, dir: Direction) -> f64 {
        match dir {
            Direction::Up => self.up_speed.rate(),
            Direction::Down => self.down_speed.rate(),
        }
    }

    pub fn seek(&mut self, bin: Bin) {
        self.picker.seek(bin);
    }

    pub fn checkpoint(&mut self) -> Result<(), CoreError> {
        self.storage.checkpoint().map_err(CoreError::from)
    }

    pub fn is_complete(&self) -> bool {
        self.tree.is_complete()
    }

    pub fn seq_complete(&self, offset: u64) -> u64 {
        self.tree.seq_complete(offset)
    }

    pub fn status(&self) -> TransferStatus {
        TransferStatus {
            swarm_id: self.swarm_id,
            num_chunks: self.tree.num_chunks(),
            chunk_size: self.tree.chunk_size(),
            seq_complete: self.tree.seq_complete(0),
            is_complete: self.tree.is_complete(),
            num_channels: self.channels.len(),
            bytes_up: self.bytes_up,
            bytes_down: self.bytes_down,
        }
    }

    pub fn add_channel(&mut self, channel: Channel) {
        self.reciprocity.on_peer_add(channel.peer_addr());
        self.channels.insert(channel.id(), channel);
    }

    pub fn has_channel_to(&self, peer: SocketAddr) -> bool {
        self.channels.values().any(|c| c.peer_addr() == peer)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn remove_channel(&mut self, id: ChannelId) {
        if let Some(channel) = self.channels.remove(&id) {
            self.picker.note_channel_closed(id);
            self.reciprocity.on_peer_del(channel.peer_addr());
        }
        self.established_at.remove(&id);
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.keys().copied().collect()
    }

    /// Feeds one decoded message addressed to `channel_id` through that
    /// channel, returning any reply datagram bytes to send back to the peer
    /// plus any channels this closed.
    pub fn handle_message(
        &mut self,
        channel_id: ChannelId,
        msg: Message,
        now: Instant,
    ) -> Result<(Vec<Message>, Vec<ChannelId>), CoreError> {
        let mut to_close = Vec::new();
        let mut out = Vec::new();
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return Ok((out, to_close));
        };
        let events = channel.handle_message(
            msg,
            now,
            &mut self.tree,
            self.storage.as_mut(),
            self.picker.as_mut(),
            &mut out,
        )?;
        for event in events {
            match event {
                ChannelEvent::HandshakeEstablished => {
                    self.established_at.insert(channel_id, now);
                }
                ChannelEvent::PexRequested => {
                    if let Some(addr) = self.pick_pex_candidate(channel_id) {
                        out.push(match addr {
                            SocketAddr::V4(v4) => Message::PexResV4 { addr: v4 },
                            SocketAddr::V6(v6) => Message::PexResV6 { addr: v6 },
                        });
                    }
                }
                ChannelEvent::PeerDiscovered(_addr) => {}
                ChannelEvent::Closed => to_close.push(channel_id),
            }
        }
        self.bytes_down = self.channels.values().map(|c| c.bytes_received()).sum();
        Ok((out, to_close))
    }

    fn pick_pex_candidate(&self, requester: ChannelId) -> Option<SocketAddr> {
        let requester_addr = self.channels.get(&requester)?.peer_addr();
        self.channels
            .iter()
            .filter(|(id, c)| **id != requester && c.is_established())
            .map(|(_, c)| c.peer_addr())
            .find(|addr| crate::channel::pex::may_share(*addr, requester_addr))
    }

    /// Per-swarm periodic work: channel housekeeping (retransmits, new
    /// requests, keep-alives, PEX), serving queued incoming hints, and
    /// reverse-PEX. Returns `(channel, peer, datagram bytes)` triples to
    /// send; the dispatcher needs the channel id to pick the right 4-byte
    /// routing prefix.
    pub fn tick(&mut self, now: Instant) -> Vec<(ChannelId, SocketAddr, Vec<u8>)> {
        let missing = self.tree.have_map();
        let mut outbound = Vec::new();
        let mut to_close = Vec::new();

        let chunk_size = self.tree.chunk_size().max(1) as usize;
        let granted_bytes = self.download_limiter.allow(usize::MAX / 2);
        let mut rate_budget = (granted_bytes / chunk_size).max(if granted_bytes > 0 { 1 } else { 0 });

        for (id, channel) in self.channels.iter_mut() {
            let mut out = Vec::new();
            let events = channel.tick(now, &missing, self.picker.as_mut(), &mut out, &mut rate_budget);
            for event in events {
                if event == ChannelEvent::Closed {
                    to_close.push(*id);
                }
            }
            for _ in 0..MAX_SERVE_PER_TICK {
                let Some(bin) = channel.next_to_serve() else {
                    break;
                };
                let Some(data) = read_chunk(self.storage.as_mut(), &self.tree, bin) else {
                    continue;
                };
                // Rate limiting affects emission, not processing: a throttled
                // channel simply declares "no data" for this bin and tries
                // again next tick, rather than erroring.
                if self.upload_limiter.allow(data.len()) < data.len() {
                    break;
                }
                if channel.take_needs_peak_hashes() {
                    for (peak, hash) in self.tree.peak_hashes() {
                        out.push(Message::Integrity { bin: peak, hash });
                    }
                }
                for msg in witness_messages(&self.tree, bin) {
                    out.push(msg);
                }
                channel.record_send(bin, data.len(), now);
                self.up_speed.record(now, data.len() as u64);
                out.push(Message::Data {
                    bin,
                    timestamp_micros: channel.local_micros(now),
                    payload: data,
                });
            }
            if !out.is_empty() {
                let bytes = crate::channel::wire::encode_datagram(&out, self.addr_format);
                outbound.push((*id, channel.peer_addr(), bytes));
            }
        }

        for id in to_close {
            self.remove_channel(id);
        }

        self.bytes_up = self.channels.values().map(|c| c.bytes_sent()).sum();
        let bytes_down_now = self.channels.values().map(|c| c.bytes_received()).sum();
        if bytes_down_now > self.bytes_down {
            self.down_speed.record(now, bytes_down_now - self.bytes_down);
        }
        self.bytes_down = bytes_down_now;
        outbound
    }

    /// Channels established long enough ago to be due for the reverse-PEX
    /// courtesy: tell a third peer about them.
    pub fn reverse_pex_due(&self, now: Instant) -> Vec<(ChannelId, SocketAddr)> {
        let mut due = Vec::new();
        for (id, channel) in &self.channels {
            if let Some(established) = self.established_at.get(id) {
                if channel.reverse_pex_due(*established, now) {
                    due.push((*id, channel.peer_addr()));
                }
            }
        }
        due
    }

    pub fn mark_reverse_pex_done(&mut self, id: ChannelId) {
        if let Some(channel) = self.channels.get_mut(&id) {
            channel.mark_reverse_pex_done();
        }
    }

    /// Builds the reverse-PEX courtesy datagram for a channel that just
    /// became due: announces `subject` (the channel's own peer) to some
    /// other established channel of this transfer, so symmetric-NAT peers
    /// learn about each other without waiting on a PEX_REQ. Returns the
    /// destination channel and the encoded datagram to send it.
    pub fn reverse_pex_announcement(
        &self,
        subject_channel: ChannelId,
        subject: SocketAddr,
    ) -> Option<(ChannelId, SocketAddr, Vec<u8>)> {
        let (target_id, target_channel) = self
            .channels
            .iter()
            .filter(|(id, c)| **id != subject_channel && c.is_established())
            .find(|(_, c)| crate::channel::pex::may_share(subject, c.peer_addr()))?;
        let msg = match subject {
            SocketAddr::V4(v4) => Message::PexResV4 { addr: v4 },
            SocketAddr::V6(v6) => Message::PexResV6 { addr: v6 },
        };
        let bytes = crate::channel::wire::encode_datagram(&[msg], self.addr_format);
        Some((*target_id, target_channel.peer_addr(), bytes))
    }

    pub fn channel_view(&self, id: ChannelId) -> Option<ChannelView> {
        self.channels.get(&id).map(|c| ChannelView {
            peer: c.peer_addr(),
            bytes_sent: c.bytes_sent(),
            bytes_received: c.bytes_received(),
            rtt: c.rtt(),
            cwnd: c.cwnd(),
        })
    }

    /// The peer's own channel-id for `id`, once learned from its HANDSHAKE,
    /// for the dispatcher's outbound routing-prefix decision.
    pub fn channel_peer_channel_id(&self, id: ChannelId) -> Option<u32> {
        self.channels.get(&id).and_then(|c| c.peer_channel_id())
    }

    /// A snapshot of which bins we currently hold, for the dispatcher's
    /// progress-callback aggregation layer.
    pub fn ack_out(&self) -> Binmap {
        self.tree.have_map()
    }
}

fn read_chunk(storage: &mut dyn ChunkStorage, tree: &TreeMode, bin: Bin) -> Option<Vec<u8>> {
    let chunk_size = tree.chunk_size() as u64;
    let offset = bin.base_offset() * chunk_size;
    let total = storage
        .size_hint()
        .unwrap_or(tree.num_chunks() * chunk_size);
    let len = chunk_size.min(total.saturating_sub(offset)) as usize;
    if len == 0 {
        return None;
    }
    let mut buf = vec![0u8; len];
    match storage.read_chunk(offset, &mut buf) {
        Ok(n) if n > 0 => {
            buf.truncate(n);
            Some(buf)
        }
        _ => None,
    }
}

/// The uncle-hash witness chain for `bin`, as a burst of INTEGRITY messages
/// to send immediately before the DATA message for `bin`.
/// Stops climbing once a known peak is reached or a hash is missing.
fn witness_messages(tree: &dyn HashTreeRead, bin: Bin) -> Vec<Message> {
    let mut msgs = Vec::new();
    let peak = tree.peak_for(bin);
    if peak == Bin::NONE {
        return msgs;
    }
    let mut cur = bin;
    while cur != peak {
        let sibling = cur.sibling();
        if let Some(hash) = tree.hash(sibling) {
            msgs.push(Message::Integrity { bin: sibling, hash });
        }
        cur = cur.parent();
    }
    // Collected leaf-to-peak (ascending layer); emit descending, per the
    // uncle-hash bundling order.
    msgs.reverse();
    msgs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::handshake::HandshakeParams;
    use crate::hashtree::HashFn;
    use crate::picker::SequentialPicker;
    use crate::storage::InMemoryStorage;
    use std::time::Duration;

    fn one_chunk_transfer(swarm_id: SwarmId) -> (Transfer, Vec<u8>) {
        let data = vec![3u8; 16];
        let hash_fn = Sha1HashFn;
        let root = hash_fn.hash_leaf(&data);
        let mut storage = InMemoryStorage::new();
        storage.write_chunk(0, &data).unwrap();
        let tree = HashTree::new(hash_fn, root, 16, 1, 16);
        let clock: Arc<dyn TimeProvider> = Arc::new(crate::clock::ManualTimeProvider::new());
        let transfer = Transfer::new(
            swarm_id,
            ChunkAddrFormat::Chunk32,
            TreeMode::InMemory(tree),
            Box::new(storage),
            Box::new(SequentialPicker::new()),
            ChannelConfig::default(),
            clock,
        );
        (transfer, data)
    }

    #[test]
    fn serves_queued_request_as_data_with_witness() {
        let swarm_id = SwarmId([9u8; 32]);
        let (mut transfer, data) = one_chunk_transfer(swarm_id);
        let now = Instant::now();
        let local: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let peer: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let params = HandshakeParams {
            version: 1,
            addr_format: ChunkAddrFormat::Chunk32,
            chunk_size: 16,
            swarm_id,
            live_discard_window: None,
        };
        let channel = Channel::new_inbound(
            1,
            local,
            peer,
            swarm_id,
            params.clone(),
            1,
            transfer.channel_config().clone(),
            now,
            11,
        );
        transfer.add_channel(channel);

        // Peer's own handshake arrives first, completing the exchange.
        let peer_handshake = Message::Handshake {
            channel_id: 55,
            peer_id: None,
            options: params.to_options(),
        };
        let (_out, closed) = transfer.handle_message(1, peer_handshake, now).unwrap();
        assert!(closed.is_empty());

        let (out, _closed) = transfer
            .handle_message(1, Message::Request { bin: Bin::base(0) }, now)
            .unwrap();
        assert!(out.is_empty());

        let sent = transfer.tick(now + Duration::from_millis(1));
        assert_eq!(sent.len(), 1);
        let (_channel, _peer, bytes) = &sent[0];
        let decoded = crate::channel::wire::decode_datagram(bytes, ChunkAddrFormat::Chunk32).unwrap();
        assert!(decoded
            .iter()
            .any(|m| matches!(m, Message::Data { payload, .. } if payload == &data)));
    }
}
