//! Transport engine benchmarks.
//!
//! Measures the wire codec and the reliable state machines on their hot
//! paths.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use dctp::transport::{ChannelType, Packet, ReliableReceiver, ReliableSender, SackBlock};

fn bench_packet_encode(c: &mut Criterion) {
    let packet = Packet::data(ChannelType::Reliable, 42, 1000, Bytes::from(vec![0u8; 1024]));
    let mut buf = BytesMut::with_capacity(2048);

    let mut group = c.benchmark_group("packet_encode");
    group.throughput(Throughput::Bytes(packet.wire_size() as u64));

    group.bench_function("data_1024", |b| {
        b.iter(|| {
            buf.clear();
            packet.encode_into(&mut buf).unwrap();
            black_box(buf.len())
        })
    });

    group.finish();
}

fn bench_packet_decode(c: &mut Criterion) {
    let data = Packet::data(ChannelType::Reliable, 42, 1000, Bytes::from(vec![0u8; 1024]))
        .encode()
        .unwrap();
    let sack = Packet::sack(7, 32, 99, vec![SackBlock::new(9, 12), SackBlock::new(20, 20)])
        .encode()
        .unwrap();

    let mut group = c.benchmark_group("packet_decode");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("data_1024", |b| {
        b.iter(|| black_box(Packet::decode(&data).unwrap()))
    });
    group.bench_function("sack_2_blocks", |b| {
        b.iter(|| black_box(Packet::decode(&sack).unwrap()))
    });

    group.finish();
}

fn bench_sender_window_cycle(c: &mut Criterion) {
    c.bench_function("sender_enqueue_flush_ack_100", |b| {
        b.iter(|| {
            let mut sender = ReliableSender::new(128, 128);
            for i in 0..100u32 {
                let _ = sender.try_enqueue(Bytes::from(vec![i as u8; 100]));
            }
            let frames = sender.due_packets(0);
            let ack = Packet::ack(100, 64, 0);
            sender.on_feedback(&ack, 10);
            black_box((frames.len(), sender.is_drained()))
        })
    });
}

fn bench_receiver_in_order(c: &mut Criterion) {
    c.bench_function("receiver_100_in_order", |b| {
        b.iter(|| {
            let mut receiver = ReliableReceiver::new(64, true);
            for i in 0..100u32 {
                let pkt = Packet::data(ChannelType::Reliable, i, 0, Bytes::from(vec![0u8; 100]));
                black_box(receiver.on_data(&pkt));
            }
            black_box(receiver.pop_deliverable(usize::MAX))
        })
    });
}

fn bench_receiver_reordered(c: &mut Criterion) {
    c.bench_function("receiver_100_reversed_bursts", |b| {
        b.iter(|| {
            let mut receiver = ReliableReceiver::new(64, true);
            for burst in 0..10u32 {
                for i in (0..10u32).rev() {
                    let seq = burst * 10 + i;
                    let pkt =
                        Packet::data(ChannelType::Reliable, seq, 0, Bytes::from(vec![0u8; 100]));
                    black_box(receiver.on_data(&pkt));
                }
            }
            black_box(receiver.pop_deliverable(usize::MAX))
        })
    });
}

criterion_group!(
    benches,
    bench_packet_encode,
    bench_packet_decode,
    bench_sender_window_cycle,
    bench_receiver_in_order,
    bench_receiver_reordered,
);

criterion_main!(benches);
