use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use swift_core::bin::Bin;
use swift_core::binmap::Binmap;
use swift_core::channel::wire::{Message, decode_datagram, encode_datagram};
use swift_core::hashtree::{HashTree, Sha1HashFn};
use swift_core::storage::{ChunkStorage, InMemoryStorage};
use swift_proto::ChunkAddrFormat;

fn bench_binmap_ops(c: &mut Criterion) {
    let mut g = c.benchmark_group("binmap_ops");

    g.bench_function("set_16384_sequential_leaves", |b| {
        b.iter(|| {
            let mut map = Binmap::new(16384);
            for i in 0..16384 {
                let _ = map.set(black_box(Bin::base(i)));
            }
            black_box(map.is_all_filled())
        })
    });

    let mut sparse = Binmap::new(16384);
    for i in (0..16384).step_by(2) {
        let _ = sparse.set(Bin::base(i));
    }
    g.bench_function("cover_half_filled_16384", |b| {
        b.iter(|| black_box(sparse.cover(black_box(Bin::at(14, 0)))))
    });

    let mut ours = Binmap::new(16384);
    for i in 0..8192 {
        let _ = ours.set(Bin::base(i));
    }
    let mut theirs = Binmap::new(16384);
    for i in 4096..16384 {
        let _ = theirs.set(Bin::base(i));
    }
    g.bench_function("find_complement_half_overlap_16384", |b| {
        b.iter(|| black_box(ours.find_complement(black_box(Bin::at(14, 0)), &theirs, 0)))
    });

    g.finish();
}

fn bench_hash_tree_verify(c: &mut Criterion) {
    let mut g = c.benchmark_group("hash_tree_ops");

    let chunk_size = 1024u32;
    let data = vec![0x42u8; chunk_size as usize];
    let root = {
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(&data);
        hasher.finalize().to_vec()
    };

    g.bench_function("offer_data_single_chunk_verify", |b| {
        b.iter(|| {
            let mut tree = HashTree::new(Sha1HashFn, root.clone(), chunk_size, 1, chunk_size as u64);
            let mut storage = InMemoryStorage::new();
            black_box(
                tree.offer_data(black_box(Bin::base(0)), black_box(&data), &mut storage)
                    .unwrap(),
            )
        })
    });

    g.finish();
}

fn bench_wire_codec(c: &mut Criterion) {
    let mut g = c.benchmark_group("wire_codec");

    let messages = vec![
        Message::Have { bin: Bin::base(7) },
        Message::Ack {
            bin: Bin::base(7),
            one_way_delay_micros: 1200,
        },
        Message::Data {
            bin: Bin::base(8),
            timestamp_micros: 987654,
            payload: vec![0xaa; 1024],
        },
    ];

    g.bench_function("encode_datagram_have_ack_data", |b| {
        b.iter(|| black_box(encode_datagram(black_box(&messages), ChunkAddrFormat::Chunk32)))
    });

    let encoded = encode_datagram(&messages, ChunkAddrFormat::Chunk32);
    g.bench_function("decode_datagram_have_ack_data", |b| {
        b.iter(|| {
            black_box(decode_datagram(black_box(&encoded), ChunkAddrFormat::Chunk32).unwrap())
        })
    });

    g.finish();
}

criterion_group!(
    benches,
    bench_binmap_ops,
    bench_hash_tree_verify,
    bench_wire_codec
);
criterion_main!(benches);
