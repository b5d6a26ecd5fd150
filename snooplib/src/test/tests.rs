//! End-to-end scenarios and system-wide invariants, driven through the
//! public memory-system surface with in-memory traces.

use crate::bus::{DirectoryKind, MemorySystem};
use crate::coherence::CoherenceKind;
use crate::config::SystemConfig;
use crate::line::LineState;
use crate::replacement::ReplacerKind;
use crate::simulator::run_single;
use crate::stats::CacheReport;
use crate::trace::TraceRecord;

const R: bool = false;
const W: bool = true;

fn t(cpu: u8, is_write: bool, addr: u32) -> TraceRecord {
    TraceRecord {
        cpu,
        is_write,
        addr,
    }
}

fn config(
    cache_size: u32,
    line_size: u32,
    assoc: u32,
    coherence: CoherenceKind,
    replacer: ReplacerKind,
) -> SystemConfig {
    SystemConfig {
        id: 0,
        cache_size,
        line_size,
        assoc,
        coherence,
        replacer,
        directory: DirectoryKind::Broadcast,
    }
}

/// Deterministic mixed trace without pulling in an RNG: a 64-bit LCG
/// sliced into cpu, op, and address fields.
fn mixed_trace(len: usize, cpus: u8, addr_space: u32) -> Vec<TraceRecord> {
    let mut state = 0x853c_49e6_748f_ea9bu64;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            t(
                ((state >> 56) % cpus as u64) as u8,
                state >> 40 & 1 == 1,
                ((state >> 8) as u32) % addr_space,
            )
        })
        .collect()
}

#[test]
fn msi_two_cpu_read_write_sequence() {
    // One-line direct-mapped caches so every transition is visible
    let cfg = config(4, 4, 1, CoherenceKind::Msi, ReplacerKind::Lru);
    let system = run_single(
        &cfg,
        [t(0, R, 0x0), t(1, R, 0x0), t(0, W, 0x0), t(1, R, 0x0)],
        None,
    );

    let cpu0 = system.cache(0).unwrap().stats();
    let cpu1 = system.cache(1).unwrap().stats();

    assert_eq!(cpu0.processor_reads, 1);
    assert_eq!(cpu0.processor_writes, 1);
    assert_eq!(cpu1.processor_reads, 2);
    assert_eq!(cpu0.bus_reads + cpu1.bus_reads, 3);
    assert_eq!(cpu0.bus_readxs, 1);

    // The write invalidates cpu1's copy; cpu1's re-read pulls cpu0 from M
    // to S, flushing and writing the dirty line back
    assert_eq!(cpu1.invalidations, 1);
    assert_eq!(cpu0.interventions, 1);
    assert_eq!(cpu0.exclusions, 1);
    assert_eq!(cpu0.line_flushes, 1);
    assert_eq!(cpu0.write_backs, 1);
    assert_eq!(cpu1.c2c_transfers, 1);

    assert_eq!(system.cache(0).unwrap().line(0, 0).state, LineState::S);
    assert_eq!(system.cache(1).unwrap().line(0, 0).state, LineState::S);
}

#[test]
fn msi_scenario_matches_expected_report_fixture() {
    let cfg = config(4, 4, 1, CoherenceKind::Msi, ReplacerKind::Lru);
    let system = run_single(
        &cfg,
        [t(0, R, 0x0), t(1, R, 0x0), t(0, W, 0x0), t(1, R, 0x0)],
        None,
    );

    let expected: Vec<CacheReport> = serde_json::from_str(
        r#"[
            {"config":0,"core":0,"miss_rate":0.5,
             "processor_reads":1,"processor_writes":1,
             "bus_reads":1,"bus_readxs":1,"bus_updates":0,"bus_upgrades":0,
             "bus_writes":0,"read_misses":1,"write_misses":0,
             "line_flushes":1,"line_fetches":2,"c2c_transfers":0,
             "write_backs":1,"memory_writes":0,"evictions":0,
             "exclusions":1,"interventions":1,"invalidations":0},
            {"config":0,"core":1,"miss_rate":1.0,
             "processor_reads":2,"processor_writes":0,
             "bus_reads":2,"bus_readxs":0,"bus_updates":0,"bus_upgrades":0,
             "bus_writes":0,"read_misses":2,"write_misses":0,
             "line_flushes":0,"line_fetches":1,"c2c_transfers":1,
             "write_backs":0,"memory_writes":0,"evictions":0,
             "exclusions":0,"interventions":0,"invalidations":1}
        ]"#,
    )
    .unwrap();
    assert_eq!(system.reports(), expected);
}

#[test]
fn mesi_single_writer_never_upgrades() {
    let cfg = config(4, 4, 1, CoherenceKind::Mesi, ReplacerKind::Lru);
    let system = run_single(&cfg, [t(0, R, 0x0), t(0, W, 0x0)], None);
    let stats = system.cache(0).unwrap().stats();

    assert_eq!(stats.bus_reads, 1);
    assert_eq!(stats.bus_readxs, 0);
    assert_eq!(stats.bus_upgrades, 0);
    assert_eq!(stats.read_misses, 1);
    assert_eq!(stats.write_misses, 0);
    assert_eq!(system.cache(0).unwrap().line(0, 0).state, LineState::M);
}

#[test]
fn dragon_updates_instead_of_invalidating() {
    let cfg = config(4, 4, 1, CoherenceKind::Dragon, ReplacerKind::Lru);
    let system = run_single(
        &cfg,
        [t(0, R, 0x0), t(1, R, 0x0), t(0, W, 0x0), t(1, R, 0x0)],
        None,
    );

    for cache in system.caches() {
        assert_eq!(cache.stats().invalidations, 0);
    }
    let cpu0 = system.cache(0).unwrap().stats();
    let cpu1 = system.cache(1).unwrap().stats();
    assert!(cpu0.bus_updates >= 1);
    // cpu1's second read hits the updated copy
    assert_eq!(cpu1.read_misses, 1);
    assert_eq!(system.cache(0).unwrap().line(0, 0).state, LineState::Sm);
    assert_eq!(system.cache(1).unwrap().line(0, 0).state, LineState::Sc);
}

#[test]
fn write_through_write_does_not_allocate() {
    let cfg = config(4, 4, 1, CoherenceKind::WriteThrough, ReplacerKind::Lru);
    let system = run_single(&cfg, [t(0, W, 0x0), t(0, R, 0x0)], None);
    let stats = system.cache(0).unwrap().stats();

    assert_eq!(stats.memory_writes, 1);
    assert_eq!(stats.bus_writes, 1);
    assert_eq!(stats.write_misses, 1);
    // The write left nothing behind, so the read still misses
    assert_eq!(stats.read_misses, 1);
    assert_eq!(system.cache(0).unwrap().line(0, 0).state, LineState::V);
}

#[test]
fn lru_victim_selection() {
    // Single 4-way set; one-byte lines make tags equal addresses
    let cfg = config(4, 1, 4, CoherenceKind::Mesi, ReplacerKind::Lru);
    let accesses = [0x0, 0x1, 0x2, 0x3, 0x0, 0x4].map(|addr| t(0, R, addr));
    let system = run_single(&cfg, accesses, None);
    let cache = system.cache(0).unwrap();

    assert_eq!(cache.stats().evictions, 1);
    let mut tags: Vec<u32> = (0..4)
        .map(|way| cache.line(0, way))
        .filter(|line| line.state.is_valid())
        .map(|line| line.tag)
        .collect();
    tags.sort_unstable();
    // B was least recently used once A got touched again
    assert_eq!(tags, vec![0x0, 0x2, 0x3, 0x4]);
}

#[test]
fn fifo_victim_selection() {
    let cfg = config(4, 1, 4, CoherenceKind::Mesi, ReplacerKind::Fifo);
    let accesses = [0x0, 0x1, 0x2, 0x3, 0x0, 0x4].map(|addr| t(0, R, addr));
    let system = run_single(&cfg, accesses, None);
    let cache = system.cache(0).unwrap();

    assert_eq!(cache.stats().evictions, 1);
    let mut tags: Vec<u32> = (0..4)
        .map(|way| cache.line(0, way))
        .filter(|line| line.state.is_valid())
        .map(|line| line.tag)
        .collect();
    tags.sort_unstable();
    // A went in first, so A goes out first; the re-read is ignored
    assert_eq!(tags, vec![0x1, 0x2, 0x3, 0x4]);
}

#[test]
fn single_cache_traffic_stays_isolated() {
    for coherence in CoherenceKind::ALL {
        let cfg = config(64, 4, 2, coherence, ReplacerKind::Lru);
        let trace: Vec<TraceRecord> = mixed_trace(500, 1, 256)
            .into_iter()
            .map(|record| t(7, record.is_write, record.addr))
            .collect();
        let system = run_single(&cfg, trace, None);

        // No sibling is ever constructed, let alone disturbed
        assert_eq!(system.caches().count(), 1, "{coherence:?}");
        assert_eq!(system.reports().len(), 1, "{coherence:?}");
        assert_eq!(system.reports()[0].core, 7, "{coherence:?}");
    }
}

#[test]
fn miss_accounting_bounds() {
    for coherence in CoherenceKind::ALL {
        let cfg = config(128, 8, 2, coherence, ReplacerKind::Fifo);
        let system = run_single(&cfg, mixed_trace(2000, 4, 1024), None);
        for cache in system.caches() {
            let stats = cache.stats();
            assert!(
                stats.accesses() >= stats.read_misses + stats.write_misses,
                "{coherence:?}"
            );
            if coherence.does_write_no_allocate() {
                assert_eq!(stats.processor_writes, stats.memory_writes, "{coherence:?}");
            }
        }
    }
}

/// After every step, the valid copies of each block must form a multiset
/// the protocol allows: a lone exclusive-family holder, or shared-family
/// copies with at most one dirty owner. Write-through is exempt from the
/// exclusivity half; its `V` lines are not exclusive.
#[test]
fn coherence_invariant_holds_at_every_step() {
    use std::collections::HashMap;

    let invalidating = [
        CoherenceKind::Msi,
        CoherenceKind::MsiUpgr,
        CoherenceKind::Mesi,
        CoherenceKind::Moesi,
        CoherenceKind::Dragon,
    ];
    for coherence in invalidating {
        let cfg = config(64, 4, 2, coherence, ReplacerKind::Lru);
        let mut system = MemorySystem::new(cfg);
        for (step, record) in mixed_trace(1500, 4, 512).into_iter().enumerate() {
            if record.is_write {
                system.pr_wr(record.addr, record.cpu);
            } else {
                system.pr_rd(record.addr, record.cpu);
            }

            // Group every valid line by block identity
            let mut blocks: HashMap<(usize, u32), Vec<LineState>> = HashMap::new();
            for cache in system.caches() {
                for set in 0..cache.num_sets() {
                    for way in 0..cache.assoc() {
                        let line = cache.line(set, way);
                        if line.state.is_valid() {
                            blocks.entry((set, line.tag)).or_default().push(line.state);
                        }
                    }
                }
            }

            for (block, states) in &blocks {
                let exclusive = states
                    .iter()
                    .filter(|s| matches!(s, LineState::M | LineState::D | LineState::E))
                    .count();
                let owners = states
                    .iter()
                    .filter(|s| matches!(s, LineState::O | LineState::Sm))
                    .count();
                assert!(
                    exclusive <= 1,
                    "{coherence:?} step {step}: two exclusive holders of {block:?}: {states:?}"
                );
                assert!(
                    owners <= 1,
                    "{coherence:?} step {step}: two dirty owners of {block:?}: {states:?}"
                );
                if states.len() > 1 {
                    assert_eq!(
                        exclusive, 0,
                        "{coherence:?} step {step}: exclusive state among {} copies of {block:?}: {states:?}",
                        states.len()
                    );
                }
            }
        }
    }
}

#[test]
fn accesses_within_one_set_never_evict() {
    let cfg = config(64, 4, 4, CoherenceKind::Moesi, ReplacerKind::Lru);
    // Four distinct tags that all land in set 0 of a 4-set cache
    let tags = [0x00u32, 0x40, 0x80, 0xc0];
    let trace: Vec<TraceRecord> = (0..200)
        .map(|i| t(0, i % 3 == 0, tags[i % tags.len()]))
        .collect();
    let system = run_single(&cfg, trace, None);
    assert_eq!(system.cache(0).unwrap().stats().evictions, 0);
}

#[test]
fn identical_runs_emit_identical_csv() {
    // Random replacement is the interesting case: its seed derives from
    // the cache dimensions, so reruns must still agree byte for byte
    let cfg = config(64, 4, 4, CoherenceKind::Mesi, ReplacerKind::Rr);
    let rows = |system: &MemorySystem| -> Vec<String> {
        system
            .reports()
            .iter()
            .map(|report| report.to_csv_row())
            .collect()
    };
    let first = run_single(&cfg, mixed_trace(3000, 4, 2048), None);
    let second = run_single(&cfg, mixed_trace(3000, 4, 2048), None);
    assert_eq!(rows(&first), rows(&second));
}

#[test]
fn state_change_counters_stay_below_transition_count() {
    for coherence in CoherenceKind::ALL {
        let cfg = config(128, 8, 2, coherence, ReplacerKind::Lru);
        let system = run_single(&cfg, mixed_trace(2000, 4, 1024), None);

        let caches = system.caches().count() as u64;
        let mut transitions_bound = 0u64;
        let mut state_changes = 0u64;
        for cache in system.caches() {
            let stats = cache.stats();
            let issued = stats.bus_reads
                + stats.bus_readxs
                + stats.bus_updates
                + stats.bus_upgrades
                + stats.bus_writes;
            // Each access transitions at most the local line; each issued
            // message at most one line in every sibling
            transitions_bound += stats.accesses() + issued * (caches - 1);
            state_changes += stats.exclusions + stats.interventions + stats.invalidations;
        }
        assert!(state_changes <= transitions_bound, "{coherence:?}");
    }
}

#[test]
fn clean_protocols_never_write_back() {
    // A read-only MESI run holds lines in E/S only
    let cfg = config(64, 4, 2, CoherenceKind::Mesi, ReplacerKind::Lru);
    let trace: Vec<TraceRecord> = mixed_trace(2000, 3, 1024)
        .into_iter()
        .map(|record| t(record.cpu, R, record.addr))
        .collect();
    let system = run_single(&cfg, trace, None);
    for cache in system.caches() {
        assert_eq!(cache.stats().write_backs, 0);
    }

    // Write-through never needs one, reads or writes
    let cfg = config(64, 4, 2, CoherenceKind::WriteThrough, ReplacerKind::Lru);
    let system = run_single(&cfg, mixed_trace(2000, 3, 1024), None);
    for cache in system.caches() {
        assert_eq!(cache.stats().write_backs, 0);
    }
}

#[test]
fn moesi_dirty_sharing_skips_the_writeback() {
    // cpu0 dirties the block, cpu1 reads it: MOESI keeps the dirty data
    // shared (M -> O) with no writeback, MSI must write back (M -> S)
    let trace = [t(0, W, 0x0), t(1, R, 0x0)];

    let moesi = run_single(
        &config(4, 4, 1, CoherenceKind::Moesi, ReplacerKind::Lru),
        trace,
        None,
    );
    assert_eq!(moesi.cache(0).unwrap().stats().write_backs, 0);
    assert_eq!(moesi.cache(0).unwrap().line(0, 0).state, LineState::O);
    assert_eq!(moesi.cache(1).unwrap().stats().c2c_transfers, 1);

    let msi = run_single(
        &config(4, 4, 1, CoherenceKind::Msi, ReplacerKind::Lru),
        trace,
        None,
    );
    assert_eq!(msi.cache(0).unwrap().stats().write_backs, 1);
}

#[test]
fn trace_limit_cuts_the_run_short() {
    let cfg = config(64, 4, 2, CoherenceKind::Msi, ReplacerKind::Lru);
    let system = run_single(&cfg, mixed_trace(100, 2, 64), Some(7));
    let total: u64 = system.caches().map(|cache| cache.stats().accesses()).sum();
    assert_eq!(total, 7);
}

#[cfg(feature = "write-timestamp")]
#[test]
fn timestamps_agree_across_copies() {
    // A write then a remote read: the reader inherits the writer's stamp
    let cfg = config(4, 4, 1, CoherenceKind::Mesi, ReplacerKind::Lru);
    let system = run_single(&cfg, [t(0, W, 0x0), t(1, R, 0x0)], None);
    let ts0 = system.cache(0).unwrap().line(0, 0).timestamp;
    let ts1 = system.cache(1).unwrap().line(0, 0).timestamp;
    assert_eq!(ts0, 1);
    assert_eq!(ts0, ts1);

    // Dragon distributes writes through BusUpdate
    let cfg = config(4, 4, 1, CoherenceKind::Dragon, ReplacerKind::Lru);
    let system = run_single(&cfg, [t(0, R, 0x0), t(1, R, 0x0), t(0, W, 0x0)], None);
    let ts0 = system.cache(0).unwrap().line(0, 0).timestamp;
    let ts1 = system.cache(1).unwrap().line(0, 0).timestamp;
    assert_eq!(ts0, 3);
    assert_eq!(ts0, ts1);
}
