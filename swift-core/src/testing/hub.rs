//! An in-process virtual network: every `Runtime` in a test talks through a
//! [`SimulatedTransport`] connected to a shared [`VirtualHub`] instead of a
//! real UDP socket, so integration scenarios (duplicate-connection races,
//! PEX fan-out, LEDBAT under loss) run deterministically and without
//! opening ports.

use crate::clock::TimeProvider;
use crate::transport::{Transport, TransportError};
use crossbeam::channel::{Receiver, Sender, unbounded};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::net::SocketAddr;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct DelayedPacket {
    from: SocketAddr,
    to: SocketAddr,
    data: Vec<u8>,
    delivery_time: Instant,
}

impl PartialEq for DelayedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.delivery_time == other.delivery_time
    }
}
impl Eq for DelayedPacket {}

impl Ord for DelayedPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        other.delivery_time.cmp(&self.delivery_time)
    }
}

impl PartialOrd for DelayedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Simulation models for packet loss.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LossModel {
    /// Independent packet loss with a fixed probability.
    Uniform { probability: f32 },
    /// Bursty loss using a 2-state Markov chain (Good/Bad): `p` is
    /// Good-to-Bad, `r` is Bad-to-Good, loss is 100% while in the Bad
    /// state.
    GilbertElliot { p: f32, r: f32 },
}

type NodeSender = Sender<(SocketAddr, Vec<u8>)>;

/// A virtual network hub with configurable loss, latency/jitter, partition
/// and blackout impairments.
pub struct VirtualHub {
    nodes: Mutex<HashMap<SocketAddr, NodeSender>>,
    queue: Mutex<BinaryHeap<DelayedPacket>>,
    partitions: Mutex<Vec<HashSet<SocketAddr>>>,
    blackouts: Mutex<HashMap<SocketAddr, Instant>>,
    loss_model: Mutex<LossModel>,
    loss_state_bad: Mutex<bool>,
    jitter: Mutex<f32>,
    latency: Mutex<Duration>,
    time_provider: Arc<dyn TimeProvider>,
    rng: Mutex<StdRng>,
}

impl VirtualHub {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            queue: Mutex::new(BinaryHeap::new()),
            partitions: Mutex::new(Vec::new()),
            blackouts: Mutex::new(HashMap::new()),
            loss_model: Mutex::new(LossModel::Uniform { probability: 0.0 }),
            loss_state_bad: Mutex::new(false),
            jitter: Mutex::new(0.0),
            latency: Mutex::new(Duration::ZERO),
            time_provider,
            rng: Mutex::new(StdRng::seed_from_u64(4)),
        }
    }

    pub fn set_seed(&self, seed: u64) {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
    }

    pub fn set_impairments(&self, loss: f32, latency: Duration, jitter: f32) {
        *self.loss_model.lock() = LossModel::Uniform { probability: loss };
        *self.latency.lock() = latency;
        *self.jitter.lock() = jitter;
    }

    pub fn set_loss_model(&self, model: LossModel) {
        *self.loss_model.lock() = model;
    }

    /// Nodes in `partition` can only reach each other; nodes outside any
    /// partition can reach anyone.
    pub fn add_partition(&self, partition: HashSet<SocketAddr>) {
        self.partitions.lock().push(partition);
    }

    pub fn clear_partitions(&self) {
        self.partitions.lock().clear();
    }

    pub fn set_blackout(&self, addr: SocketAddr, until: Instant) {
        self.blackouts.lock().insert(addr, until);
    }

    pub fn register(&self, addr: SocketAddr) -> Receiver<(SocketAddr, Vec<u8>)> {
        let (tx, rx) = unbounded();
        self.nodes.lock().insert(addr, tx);
        rx
    }

    fn is_blacked_out(&self, addr: &SocketAddr, now: Instant) -> bool {
        let mut blackouts = self.blackouts.lock();
        if let Some(until) = blackouts.get(addr) {
            if now < *until {
                return true;
            }
            blackouts.remove(addr);
        }
        false
    }

    fn can_communicate(&self, a: &SocketAddr, b: &SocketAddr) -> bool {
        let partitions = self.partitions.lock();
        if partitions.is_empty() {
            return true;
        }
        for p in partitions.iter() {
            if p.contains(a) {
                return p.contains(b);
            }
            if p.contains(b) {
                return p.contains(a);
            }
        }
        true
    }

    pub fn route(&self, from: SocketAddr, to: SocketAddr, data: Vec<u8>) {
        let now = self.time_provider.now();

        if self.is_blacked_out(&from, now) || self.is_blacked_out(&to, now) {
            return;
        }
        if !self.can_communicate(&from, &to) {
            return;
        }

        let mut rng = self.rng.lock();
        let model = *self.loss_model.lock();
        let should_drop = match model {
            LossModel::Uniform { probability } => {
                probability > 0.0 && rng.r#gen::<f32>() < probability
            }
            LossModel::GilbertElliot { p, r } => {
                let mut is_bad = self.loss_state_bad.lock();
                if *is_bad {
                    if r > 0.0 && rng.r#gen::<f32>() < r {
                        *is_bad = false;
                    }
                } else if p > 0.0 && rng.r#gen::<f32>() < p {
                    *is_bad = true;
                }
                *is_bad
            }
        };
        if should_drop {
            return;
        }

        let base_latency = *self.latency.lock();
        let jitter_range = *self.jitter.lock();
        let latency = if jitter_range > 0.0 {
            let factor = rng.gen_range((1.0 - jitter_range)..(1.0 + jitter_range));
            Duration::from_secs_f64(base_latency.as_secs_f64() * factor as f64)
        } else {
            base_latency
        };
        drop(rng);

        if latency.is_zero() {
            let nodes = self.nodes.lock();
            if let Some(tx) = nodes.get(&to) {
                let _ = tx.send((from, data));
            }
        } else {
            self.queue.lock().push(DelayedPacket {
                from,
                to,
                data,
                delivery_time: now + latency,
            });
        }
    }

    /// Delivers any packets whose delay has elapsed. Call once per
    /// simulated dispatcher tick.
    pub fn poll(&self) {
        let now = self.time_provider.now();
        let mut queue = self.queue.lock();
        let nodes = self.nodes.lock();
        while let Some(pkt) = queue.peek() {
            if now >= pkt.delivery_time {
                let pkt = queue.pop().unwrap();
                if let Some(tx) = nodes.get(&pkt.to) {
                    let _ = tx.send((pkt.from, pkt.data));
                }
            } else {
                break;
            }
        }
    }
}

/// A [`Transport`] that routes through a [`VirtualHub`] instead of a real
/// socket.
pub struct SimulatedTransport {
    addr: SocketAddr,
    hub: Arc<VirtualHub>,
    inbox: Receiver<(SocketAddr, Vec<u8>)>,
}

impl SimulatedTransport {
    pub fn new(addr: SocketAddr, hub: Arc<VirtualHub>) -> Self {
        let inbox = hub.register(addr);
        Self { addr, hub, inbox }
    }
}

impl Transport for SimulatedTransport {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn send_to(&self, to: SocketAddr, data: &[u8]) -> Result<(), TransportError> {
        self.hub.route(self.addr, to, data.to_vec());
        Ok(())
    }

    fn try_recv(&self) -> Option<(SocketAddr, Vec<u8>)> {
        self.inbox.try_recv().ok()
    }
}
