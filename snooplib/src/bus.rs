//! The memory system: every cache on the bus plus the broadcast directory
//! that carries snoop traffic between them.
//!
//! Caches exist sparsely, created the first time their CPU id appears in
//! the trace, so idle CPUs cost nothing and never join a broadcast. The
//! snoop wires (`copies-exist`, `flushed`) are not shared flags; each
//! broadcast returns them as values OR-ed over the siblings' replies.

use crate::cache::Cache;
use crate::config::{SystemConfig, MAX_N_CACHES};
use crate::line::BusMsg;
use crate::stats::CacheReport;

/// The directory protocols known to the simulator. Snoopy broadcast is the
/// only one today; the registry keeps name resolution uniform with the
/// coherence and replacement registries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectoryKind {
    Broadcast,
}

impl DirectoryKind {
    pub const ALL: [DirectoryKind; 1] = [DirectoryKind::Broadcast];

    pub fn name(self) -> &'static str {
        match self {
            DirectoryKind::Broadcast => "Broadcast",
        }
    }

    /// Case-insensitive name lookup
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }
}

/// One configuration's worth of caches and the bus between them.
pub struct MemorySystem {
    config: SystemConfig,
    caches: Vec<Option<Cache>>,
    /// Number of processor accesses issued so far; doubles as the write
    /// timestamp of the access in flight
    #[cfg(feature = "write-timestamp")]
    access_count: u64,
}

impl MemorySystem {
    pub fn new(config: SystemConfig) -> Self {
        Self {
            config,
            caches: (0..MAX_N_CACHES).map(|_| None).collect(),
            #[cfg(feature = "write-timestamp")]
            access_count: 0,
        }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Issue a processor read to the cache of `cpu`.
    pub fn pr_rd(&mut self, addr: u32, cpu: u8) {
        self.access(addr, cpu, false);
    }

    /// Issue a processor write to the cache of `cpu`.
    pub fn pr_wr(&mut self, addr: u32, cpu: u8) {
        self.access(addr, cpu, true);
    }

    fn access(&mut self, addr: u32, cpu: u8, write: bool) {
        // CPU ids are 7 bits by trace format, so the slot always exists
        let slot = cpu as usize;
        let mut cache = self.caches[slot]
            .take()
            .unwrap_or_else(|| Cache::new(cpu as u32, &self.config));

        #[cfg(feature = "write-timestamp")]
        {
            self.access_count += 1;
        }

        // With the issuing cache moved out of the array, the rest of the
        // system is exactly the sibling set its bus messages must visit
        let mut siblings = Siblings {
            directory: self.config.directory,
            caches: &mut self.caches,
            #[cfg(feature = "write-timestamp")]
            access_timestamp: self.access_count,
        };
        if write {
            cache.receive_pr_wr(addr, &mut siblings);
        } else {
            cache.receive_pr_rd(addr, &mut siblings);
        }
        self.caches[slot] = Some(cache);

        #[cfg(feature = "write-timestamp")]
        self.verify_timestamps(addr, write);
    }

    /// Every constructed cache, ascending CPU id
    pub fn caches(&self) -> impl Iterator<Item = &Cache> {
        self.caches.iter().flatten()
    }

    /// The cache of `cpu`, if it has been constructed
    pub fn cache(&self, cpu: u8) -> Option<&Cache> {
        self.caches[cpu as usize].as_ref()
    }

    /// CSV report rows for every cache that observed at least one access,
    /// ascending CPU id
    pub fn reports(&self) -> Vec<CacheReport> {
        self.caches()
            .filter_map(|cache| cache.report(self.config.id))
            .collect()
    }

    /// Cross-check that all valid copies of `addr`'s block agree on the
    /// newest write. One copy may sit at the maximum timestamp; any valid
    /// copy strictly below it is stale and gets reported. Non-fatal.
    #[cfg(feature = "write-timestamp")]
    fn verify_timestamps(&self, addr: u32, write: bool) {
        let timestamps: Vec<(u32, u64)> = self
            .caches()
            .map(|cache| (cache.id(), cache.timestamp(addr)))
            .collect();

        let mut discrepancy = false;
        let mut max = 0u64;
        for &(_, timestamp) in &timestamps {
            if timestamp == 0 {
                continue;
            }
            if timestamp != max {
                discrepancy = max != 0;
            }
            if timestamp > max {
                max = timestamp;
            }
        }

        if discrepancy {
            let stale: Vec<String> = timestamps
                .iter()
                .filter(|&&(_, timestamp)| timestamp != 0 && timestamp < max)
                .map(|&(id, _)| id.to_string())
                .collect();
            log::warn!(
                "cache lines out of date after {} address {:#x} at step {}: {}",
                if write { "writing to" } else { "reading from" },
                addr,
                self.access_count,
                stale.join(", ")
            );
        }
    }
}

/// The sibling set one bus transaction broadcasts to: every constructed
/// cache except the initiator (which has been moved out of the array for
/// the duration of the access).
pub(crate) struct Siblings<'a> {
    directory: DirectoryKind,
    caches: &'a mut [Option<Cache>],
    /// Global access number of the access in flight
    #[cfg(feature = "write-timestamp")]
    pub access_timestamp: u64,
}

/// The OR-aggregate of every sibling's snoop reply.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SnoopResult {
    pub copies_exist: bool,
    pub flushed: bool,
    /// Newest write timestamp seen among the siblings' copies
    #[cfg(feature = "write-timestamp")]
    pub newest_sibling: u64,
}

/// One sibling's answer to a snooped message.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SnoopReply {
    /// The sibling holds a valid copy (its contribution to copies-exist)
    pub copies: bool,
    /// The sibling's FSM drove the line onto the bus
    pub flushed: bool,
    /// The sibling line's write timestamp after reacting
    #[cfg(feature = "write-timestamp")]
    pub timestamp: u64,
}

impl Siblings<'_> {
    /// One atomic bus transaction: deliver `msg` for `addr` to every
    /// constructed sibling in ascending CPU id and aggregate the replies.
    pub fn broadcast(&mut self, msg: BusMsg, addr: u32) -> SnoopResult {
        match self.directory {
            DirectoryKind::Broadcast => {
                let mut result = SnoopResult::default();
                for cache in self.caches.iter_mut().flatten() {
                    #[cfg(feature = "write-timestamp")]
                    let reply = cache.receive_bus_msg(msg, addr, self.access_timestamp);
                    #[cfg(not(feature = "write-timestamp"))]
                    let reply = cache.receive_bus_msg(msg, addr);

                    result.copies_exist |= reply.copies;
                    result.flushed |= reply.flushed;
                    #[cfg(feature = "write-timestamp")]
                    {
                        result.newest_sibling = result.newest_sibling.max(reply.timestamp);
                    }
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coherence::CoherenceKind;
    use crate::replacement::ReplacerKind;

    fn config(coherence: CoherenceKind) -> SystemConfig {
        SystemConfig {
            id: 0,
            cache_size: 64,
            line_size: 4,
            assoc: 2,
            coherence,
            replacer: ReplacerKind::Lru,
            directory: DirectoryKind::Broadcast,
        }
    }

    #[test]
    fn caches_appear_lazily() {
        let mut system = MemorySystem::new(config(CoherenceKind::Mesi));
        assert_eq!(system.caches().count(), 0);
        system.pr_rd(0x0, 3);
        assert_eq!(system.caches().count(), 1);
        assert!(system.cache(3).is_some());
        assert!(system.cache(0).is_none());
        system.pr_wr(0x10, 120);
        assert_eq!(system.caches().count(), 2);
    }

    #[test]
    fn reports_skip_untouched_caches() {
        let mut system = MemorySystem::new(config(CoherenceKind::Msi));
        system.pr_rd(0x0, 5);
        let reports = system.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].core, 5);
        assert_eq!(reports[0].stats.processor_reads, 1);
    }

    #[test]
    fn directory_registry_resolves_case_insensitively() {
        assert_eq!(
            DirectoryKind::from_name("broadcast"),
            Some(DirectoryKind::Broadcast)
        );
        assert_eq!(DirectoryKind::from_name("mesh"), None);
    }
}
