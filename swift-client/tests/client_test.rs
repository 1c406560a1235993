use std::time::Duration;
use swift_client::{OpenSwarm, SwarmClient};
use swift_core::picker::SequentialPicker;
use swift_core::storage::{ChunkStorage, FileStorage, InMemoryStorage};
use swift_proto::SwarmId;

async fn wait_for_completion(client: &SwarmClient, swarm_id: SwarmId, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if client.is_complete(swarm_id).await == Some(true) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("transfer did not complete within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn seed_and_leech_complete_a_transfer_over_real_udp_loopback() {
    let content = vec![7u8; 4096];
    let root = swift_client::single_chunk_root(&content);
    let swarm_id = SwarmId([1u8; 32]);

    let seed = SwarmClient::bind("127.0.0.1:0".parse().unwrap(), Duration::from_millis(20))
        .expect("bind seed");
    let leech = SwarmClient::bind("127.0.0.1:0".parse().unwrap(), Duration::from_millis(20))
        .expect("bind leech");

    let mut seed_storage = InMemoryStorage::new();
    seed_storage.write_chunk(0, &content).unwrap();

    seed.open(OpenSwarm {
        swarm_id,
        chunk_size: content.len() as u32,
        num_chunks: 1,
        root_hash: root.clone(),
        tracker: None,
        storage: Box::new(seed_storage),
        picker: Box::new(SequentialPicker::new()),
        zero_state: false,
        reciprocity: None,
    })
    .await
    .unwrap();

    leech
        .open(OpenSwarm {
            swarm_id,
            chunk_size: content.len() as u32,
            num_chunks: 1,
            root_hash: root,
            tracker: None,
            storage: Box::new(InMemoryStorage::new()),
            picker: Box::new(SequentialPicker::new()),
            zero_state: false,
            reciprocity: None,
        })
        .await
        .unwrap();

    leech.add_peer(swarm_id, seed.local_addr()).await.unwrap();

    wait_for_completion(&leech, swarm_id, Duration::from_secs(5)).await;
}

#[tokio::test]
async fn seed_and_leech_complete_a_transfer_into_a_file_on_disk() {
    let content = vec![3u8; 8192];
    let root = swift_client::single_chunk_root(&content);
    let swarm_id = SwarmId([9u8; 32]);

    let seed = SwarmClient::bind("127.0.0.1:0".parse().unwrap(), Duration::from_millis(20))
        .expect("bind seed");
    let leech = SwarmClient::bind("127.0.0.1:0".parse().unwrap(), Duration::from_millis(20))
        .expect("bind leech");

    let mut seed_storage = InMemoryStorage::new();
    seed_storage.write_chunk(0, &content).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let leech_path = dir.path().join("leech.dat");
    let leech_storage = FileStorage::open(&leech_path).unwrap();

    seed.open(OpenSwarm {
        swarm_id,
        chunk_size: content.len() as u32,
        num_chunks: 1,
        root_hash: root.clone(),
        tracker: None,
        storage: Box::new(seed_storage),
        picker: Box::new(SequentialPicker::new()),
        zero_state: false,
        reciprocity: None,
    })
    .await
    .unwrap();

    leech
        .open(OpenSwarm {
            swarm_id,
            chunk_size: content.len() as u32,
            num_chunks: 1,
            root_hash: root,
            tracker: None,
            storage: Box::new(leech_storage),
            picker: Box::new(SequentialPicker::new()),
            zero_state: false,
            reciprocity: None,
        })
        .await
        .unwrap();

    leech.add_peer(swarm_id, seed.local_addr()).await.unwrap();

    wait_for_completion(&leech, swarm_id, Duration::from_secs(5)).await;

    let mut on_disk = FileStorage::open(&leech_path).unwrap();
    let mut buf = vec![0u8; content.len()];
    on_disk.read_chunk(0, &mut buf).unwrap();
    assert_eq!(buf, content);
}

#[tokio::test]
async fn status_reports_one_transfer_per_open_swarm() {
    let swarm_id = SwarmId([2u8; 32]);
    let root = swift_client::single_chunk_root(&[0u8; 16]);

    let client =
        SwarmClient::bind("127.0.0.1:0".parse().unwrap(), Duration::from_millis(50)).unwrap();
    client
        .open(OpenSwarm {
            swarm_id,
            chunk_size: 16,
            num_chunks: 1,
            root_hash: root,
            tracker: None,
            storage: Box::new(InMemoryStorage::new()),
            picker: Box::new(SequentialPicker::new()),
            zero_state: false,
            reciprocity: None,
        })
        .await
        .unwrap();

    let status = client.status().await;
    assert_eq!(status.transfers.len(), 1);

    client.close(swarm_id).await;
    assert_eq!(client.status().await.transfers.len(), 0);
}
