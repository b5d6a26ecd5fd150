use criterion::{criterion_group, criterion_main, Criterion};
use criterion_cycles_per_byte::CyclesPerByte;

use snooplib::bus::DirectoryKind;
use snooplib::coherence::CoherenceKind;
use snooplib::config::SystemConfig;
use snooplib::replacement::ReplacerKind;
use snooplib::simulator::run_single;
use snooplib::trace::TraceRecord;

/// A sharing-heavy synthetic trace: four CPUs ping-ponging over a small
/// working set so the bus actually carries traffic.
fn synthetic_trace(len: usize) -> Vec<TraceRecord> {
    let mut state = 0x9e37_79b9_7f4a_7c15u64;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            TraceRecord {
                cpu: ((state >> 56) % 4) as u8,
                is_write: state >> 40 & 1 == 1,
                addr: ((state >> 8) as u32) % 8192,
            }
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion<CyclesPerByte>) {
    let trace = synthetic_trace(200_000);
    for coherence in CoherenceKind::ALL {
        let config = SystemConfig {
            id: 0,
            cache_size: 4096,
            line_size: 32,
            assoc: 2,
            coherence,
            replacer: ReplacerKind::Lru,
            directory: DirectoryKind::Broadcast,
        };
        c.bench_function(coherence.name(), |b| {
            b.iter(|| run_single(&config, trace.iter().copied(), None))
        });
    }
}

criterion_group!(
    name = benches;
    config = Criterion::default().significance_level(0.1).sample_size(10).with_measurement(CyclesPerByte);
    targets = criterion_benchmark
);
criterion_main!(benches);
