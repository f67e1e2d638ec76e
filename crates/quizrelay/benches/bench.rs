use bytes::Bytes;
use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use quizrelay::{
    Backbone, ChannelAllocator, ClientIdentity, Family, MemoryBackbone, MemoryStore, Record,
    Relay, RelayConfig, ResponseCorrelator,
    wire::{self, QuestionRequest, QuestionResponse, QuestionType, QuestionWork},
};
use std::{
    sync::Arc,
    thread::scope,
    time::{Duration, Instant},
};
use tokio::runtime::Builder;

// Operations per benchmark iteration (per-thread for multi-threaded).
const TOTAL_OPS: usize = 4096;

fn record(identity: &str) -> Record {
    Record {
        topic: Family::Question.response_topic().to_string(),
        key: identity.to_string(),
        payload: Bytes::from_static(b"{\"v\":1}"),
        offset: 0,
    }
}

fn bench_allocator(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator");
    group.throughput(Throughput::Elements(TOTAL_OPS as u64));

    group.bench_function(format!("sequential/elems/{TOTAL_OPS}"), |b| {
        let allocator = ChannelAllocator::with_pool_sizes(8, 8);
        b.iter(|| {
            for _ in 0..TOTAL_OPS {
                black_box(allocator.next_channel(Family::Question));
            }
        });
    });

    for threads in [2, 4, 8] {
        group.bench_function(format!("contended/threads/{threads}"), |b| {
            let allocator = Arc::new(ChannelAllocator::with_pool_sizes(8, 8));
            b.iter_custom(|iters| {
                let start = Instant::now();
                for _ in 0..iters {
                    scope(|s| {
                        for _ in 0..threads {
                            let allocator = Arc::clone(&allocator);
                            s.spawn(move || {
                                for _ in 0..TOTAL_OPS {
                                    black_box(allocator.next_channel(Family::Question));
                                }
                            });
                        }
                    });
                }
                start.elapsed()
            });
        });
    }

    group.finish();
}

fn bench_correlator(c: &mut Criterion) {
    let identities: Vec<ClientIdentity> = (0..TOTAL_OPS)
        .map(|i| ClientIdentity::from(format!("session-{i}")))
        .collect();
    let records: Vec<Record> = identities.iter().map(|id| record(id.as_str())).collect();

    let mut group = c.benchmark_group("correlator");
    group.throughput(Throughput::Elements(TOTAL_OPS as u64));

    group.bench_function(format!("dispatch_accept_fetch/elems/{TOTAL_OPS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let correlator = ResponseCorrelator::new(Family::Question);
                for (id, record) in identities.iter().zip(&records) {
                    correlator.record_dispatch(id);
                    correlator.accept(record.clone());
                    black_box(correlator.fetch(id));
                }
            }
            start.elapsed()
        });
    });

    group.bench_function(format!("single_client_burst/elems/{TOTAL_OPS}"), |b| {
        let id = ClientIdentity::from("bursty");
        let response = record("bursty");
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let correlator = ResponseCorrelator::new(Family::Question);
                correlator.record_dispatch(&id);
                for _ in 0..TOTAL_OPS {
                    correlator.accept(response.clone());
                }
                black_box(correlator.fetch(&id));
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_relay_round_trip(c: &mut Criterion) {
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");

    let request = QuestionRequest {
        question_type: QuestionType::Topic,
        definition: "topic".to_string(),
        main_text: "passage".to_string(),
    };
    let response = wire::encode(&QuestionResponse {
        question_type: Some(QuestionType::Topic),
        title: "title".to_string(),
        main_text: "passage".to_string(),
        choices: vec!["a".to_string(), "b".to_string()],
        answer: "a".to_string(),
    })
    .expect("failed to encode response");

    let mut group = c.benchmark_group("relay");
    group.throughput(Throughput::Elements(1));
    group.bench_function("dispatch_respond_fetch", |b| {
        b.to_async(&runtime).iter_custom(|iters| {
            let request = request.clone();
            let response = response.clone();
            async move {
                let config = RelayConfig {
                    release_on_delivery: true,
                    ..RelayConfig::default()
                };
                let backbone = MemoryBackbone::new();
                let relay = Relay::new(config, backbone.clone(), MemoryStore::new())
                    .expect("invalid config");
                relay.start().await.expect("failed to start relay");
                let id = ClientIdentity::from("bench");

                let start = Instant::now();
                for _ in 0..iters {
                    relay
                        .dispatch::<QuestionWork>(&id, &request)
                        .await
                        .expect("dispatch failed");
                    backbone
                        .publish(Family::Question.response_topic(), id.as_str(), response.clone())
                        .await
                        .expect("publish failed");
                    black_box(
                        relay
                            .wait_fetch::<QuestionWork>(&id, Duration::from_secs(5))
                            .await
                            .expect("fetch failed"),
                    );
                }
                let elapsed = start.elapsed();
                relay.shutdown().await;
                elapsed
            }
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_allocator,
    bench_correlator,
    bench_relay_round_trip
);
criterion_main!(benches);
