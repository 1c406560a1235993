//! A tokio-based control-surface demo wrapping [`swift_core::Runtime`]: the
//! production [`Transport`](swift_core::transport::Transport) plug-in
//! (a real non-blocking UDP socket) plus an async wrapper that drives the
//! single-threaded `Runtime` from a background task on a fixed tick
//! interval, the way the corpus's own node/client split keeps an
//! orchestration loop off the caller's call stack.
//!
//! `swift-core` is deliberately transport- and runtime-agnostic; this crate
//! is the "external collaborator" that supplies both.

pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use swift_core::bin::Bin;
use swift_core::error::CoreError;
use swift_core::picker::PiecePicker;
use swift_core::reciprocity::ReciprocityPolicy;
use swift_core::storage::ChunkStorage;
use swift_core::transfer::{Direction, TransferStatus};
use swift_core::transport::Transport;
use swift_core::{OpenParams, Runtime, RuntimeConfig, RuntimeStatus};
use swift_proto::{ChunkAddrFormat, SwarmId};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

pub use transport::UdpTransport;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("failed to bind UDP transport: {0}")]
    Bind(#[from] std::io::Error),
}

/// Arguments to [`SwarmClient::open`], mirroring [`OpenParams`] but without
/// the runtime-internal `addr_format` default a caller rarely needs to
/// override.
pub struct OpenSwarm {
    pub swarm_id: SwarmId,
    pub chunk_size: u32,
    pub num_chunks: u64,
    pub root_hash: Vec<u8>,
    pub tracker: Option<SocketAddr>,
    pub storage: Box<dyn ChunkStorage>,
    pub picker: Box<dyn PiecePicker>,
    pub zero_state: bool,
    pub reciprocity: Option<Box<dyn ReciprocityPolicy>>,
}

impl From<OpenSwarm> for OpenParams {
    fn from(args: OpenSwarm) -> Self {
        let mut params = OpenParams::new(
            args.swarm_id,
            args.chunk_size,
            args.num_chunks,
            args.root_hash,
            args.storage,
            args.picker,
        );
        if let Some(tracker) = args.tracker {
            params = params.with_tracker(tracker);
        }
        if args.zero_state {
            params = params.zero_state();
        }
        params.addr_format = ChunkAddrFormat::Chunk32;
        params.reciprocity = args.reciprocity;
        params
    }
}

/// A running [`Runtime`] plus the background task driving its tick/drain
/// loop. Dropping the client stops the background task.
pub struct SwarmClient {
    runtime: Arc<Mutex<Runtime<UdpTransport>>>,
    tick_task: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl SwarmClient {
    /// Binds a UDP socket at `bind_addr` and starts the tick loop at
    /// `tick_interval` (libswift itself ticks every event-loop iteration;
    /// a fixed interval is the natural analogue for a task-based runtime).
    pub fn bind(bind_addr: SocketAddr, tick_interval: Duration) -> Result<Self, ClientError> {
        Self::with_config(bind_addr, tick_interval, RuntimeConfig::default())
    }

    pub fn with_config(
        bind_addr: SocketAddr,
        tick_interval: Duration,
        config: RuntimeConfig,
    ) -> Result<Self, ClientError> {
        let transport = UdpTransport::bind(bind_addr)?;
        let local_addr = transport.local_addr();
        let clock = Arc::new(swift_core::clock::SystemTimeProvider);
        let runtime = Arc::new(Mutex::new(Runtime::new(transport, config, clock)));

        let loop_runtime = runtime.clone();
        let tick_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            loop {
                ticker.tick().await;
                let mut rt = loop_runtime.lock().await;
                rt.drain_inbound();
                rt.tick();
            }
        });

        Ok(Self {
            runtime,
            tick_task,
            local_addr,
        })
    }

    /// The UDP address this client is bound to (useful when `bind_addr`
    /// asked for an ephemeral port via `:0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn open(&self, args: OpenSwarm) -> Result<(), ClientError> {
        let swarm_id = args.swarm_id;
        self.runtime.lock().await.open(args.into())?;
        debug!(swarm = ?swarm_id, "swift-client: swarm opened");
        Ok(())
    }

    pub async fn close(&self, swarm_id: SwarmId) {
        self.runtime.lock().await.close(swarm_id);
    }

    pub async fn checkpoint(&self, swarm_id: SwarmId) -> Result<(), ClientError> {
        Ok(self.runtime.lock().await.checkpoint(swarm_id)?)
    }

    pub async fn seek(&self, swarm_id: SwarmId, bin: Bin) -> Result<(), ClientError> {
        Ok(self.runtime.lock().await.seek(swarm_id, bin)?)
    }

    pub async fn size(&self, swarm_id: SwarmId) -> Option<u64> {
        self.runtime.lock().await.size(swarm_id)
    }

    pub async fn is_complete(&self, swarm_id: SwarmId) -> Option<bool> {
        self.runtime.lock().await.is_complete(swarm_id)
    }

    pub async fn seq_complete(&self, swarm_id: SwarmId) -> Option<u64> {
        self.runtime.lock().await.seq_complete(swarm_id)
    }

    pub async fn add_peer(&self, swarm_id: SwarmId, endpoint: SocketAddr) -> Result<(), ClientError> {
        Ok(self.runtime.lock().await.add_peer(swarm_id, endpoint)?)
    }

    pub async fn set_max_speed(
        &self,
        swarm_id: SwarmId,
        dir: Direction,
        bytes_per_sec: f64,
    ) -> Result<(), ClientError> {
        Ok(self
            .runtime
            .lock()
            .await
            .set_max_speed(swarm_id, dir, bytes_per_sec)?)
    }

    pub async fn current_speed(&self, swarm_id: SwarmId, dir: Direction) -> Option<f64> {
        self.runtime.lock().await.current_speed(swarm_id, dir)
    }

    /// Registers a progress callback; `callback` fires once per newly-filled
    /// bin at `layer` or above, from inside the background tick task.
    pub async fn register_progress_callback(
        &self,
        swarm_id: SwarmId,
        layer: u32,
        callback: impl FnMut(SwarmId, Bin) + Send + 'static,
    ) -> Result<(), ClientError> {
        Ok(self
            .runtime
            .lock()
            .await
            .register_progress_callback(swarm_id, layer, callback)?)
    }

    pub async fn status(&self) -> RuntimeStatus {
        self.runtime.lock().await.status()
    }

    pub async fn transfer_status(&self, swarm_id: SwarmId) -> Option<TransferStatus> {
        self.runtime.lock().await.transfer_status(swarm_id)
    }
}

impl Drop for SwarmClient {
    fn drop(&mut self) {
        self.tick_task.abort();
    }
}

/// Hashes `content` into a single-chunk swarm root (SHA-1 over the whole
/// buffer treated as chunk 0), for small seeds/tests that don't need a
/// multi-chunk tree. Larger content should hash per chunk and build the
/// tree's peak bundle instead.
pub fn single_chunk_root(content: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(content);
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_root_is_deterministic() {
        let a = single_chunk_root(b"hello swarm");
        let b = single_chunk_root(b"hello swarm");
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }
}
