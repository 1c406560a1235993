//! A minimal seed/leech demo driving [`swift_client::SwarmClient`] over real
//! UDP loopback. CLI parsing is the one piece of this binary that has no
//! home in `swift-core` itself — it belongs here, in the external
//! collaborator crate.

use clap::Parser;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use swift_client::{OpenSwarm, SwarmClient};
use swift_core::picker::SequentialPicker;
use swift_core::storage::{ChunkStorage, InMemoryStorage};
use swift_proto::SwarmId;
use tracing::info;

type DemoResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Seed or leech a single-chunk file over the swarm transport")]
struct Args {
    /// Address to bind the UDP socket to.
    #[arg(long, default_value = "127.0.0.1:0")]
    bind: SocketAddr,

    /// Act as a seed for `file` instead of leeching it.
    #[arg(long)]
    seed: bool,

    /// Content file to seed, or destination to write while leeching.
    #[arg(long)]
    file: PathBuf,

    /// The seed's content root hash, hex-encoded (printed by `--seed`).
    /// Required when leeching.
    #[arg(long)]
    root_hex: Option<String>,

    /// Peer to dial when leeching.
    #[arg(long)]
    peer: Option<SocketAddr>,

    /// How long to run before giving up, in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> DemoResult<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let args = Args::parse();

    let client = SwarmClient::bind(args.bind, Duration::from_millis(50))?;
    info!(addr = %client.local_addr(), "swift-demo: bound");

    if args.seed {
        run_seed(&client, &args).await
    } else {
        run_leech(&client, &args).await
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> DemoResult<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err("hex string must have even length".into());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.into()))
        .collect()
}

async fn run_seed(client: &SwarmClient, args: &Args) -> DemoResult<()> {
    let content = std::fs::read(&args.file)?;
    let root = swift_client::single_chunk_root(&content);
    let swarm_id = SwarmId(*blake3::hash(&root).as_bytes());

    let mut storage = InMemoryStorage::new();
    storage.write_chunk(0, &content)?;

    client
        .open(OpenSwarm {
            swarm_id,
            chunk_size: content.len() as u32,
            num_chunks: 1,
            root_hash: root.clone(),
            tracker: None,
            storage: Box::new(storage),
            picker: Box::new(SequentialPicker::new()),
            zero_state: false,
            reciprocity: None,
        })
        .await?;

    info!(
        root_hex = %hex_encode(&root),
        addr = %client.local_addr(),
        "seeding; pass --root-hex to a leech, ctrl-c to stop"
    );
    tokio::time::sleep(Duration::from_secs(args.timeout_secs)).await;
    Ok(())
}

async fn run_leech(client: &SwarmClient, args: &Args) -> DemoResult<()> {
    let peer = args.peer.ok_or("--peer is required when leeching")?;
    let root_hex = args.root_hex.as_deref().ok_or("--root-hex is required when leeching")?;
    let root = hex_decode(root_hex)?;
    let swarm_id = SwarmId(*blake3::hash(&root).as_bytes());

    client
        .open(OpenSwarm {
            swarm_id,
            chunk_size: root.len() as u32,
            num_chunks: 1,
            root_hash: root,
            tracker: None,
            storage: Box::new(InMemoryStorage::new()),
            picker: Box::new(SequentialPicker::new()),
            zero_state: false,
            reciprocity: None,
        })
        .await?;
    client.add_peer(swarm_id, peer).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout_secs);
    while client.is_complete(swarm_id).await != Some(true) {
        if tokio::time::Instant::now() >= deadline {
            return Err("transfer did not complete before timeout".into());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!(swarm = ?swarm_id, "leech complete");
    Ok(())
}
