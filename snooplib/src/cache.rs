//! A single L1 cache: a set-associative array of lines, the coherence
//! protocol instance acting on them, a replacement policy, and the per-cache
//! statistics.
//!
//! One processor access is atomic: every bus message it provokes, and every
//! sibling state change those messages cause, completes before the access
//! returns. The in-flight address therefore travels with the [`CachePort`]
//! handed to the FSM rather than needing any queueing.

use crate::bus::{Siblings, SnoopReply};
use crate::coherence::{BusPort, CoherenceKind};
use crate::config::SystemConfig;
use crate::line::{BusMsg, CacheLine, LineState};
use crate::replacement::{ReplacementPolicy, Replacer};
use crate::stats::{CacheReport, Stats};

pub struct Cache {
    id: u32,
    num_sets: usize,
    assoc: usize,
    /// Bits below the set index field
    line_offset: u32,
    /// Bits below the tag field
    tag_offset: u32,
    lines: Vec<CacheLine>,
    protocol: CoherenceKind,
    replacer: Replacer,
    stats: Stats,
}

impl Cache {
    /// Build an empty cache for `config`. All dimensions are powers of two,
    /// validated at configuration parse time.
    pub fn new(id: u32, config: &SystemConfig) -> Self {
        let num_lines = (config.cache_size / config.line_size) as usize;
        let assoc = config.assoc as usize;
        let num_sets = num_lines / assoc;
        Self {
            id,
            num_sets,
            assoc,
            line_offset: config.line_size.trailing_zeros(),
            tag_offset: (config.cache_size / config.assoc).trailing_zeros(),
            lines: vec![CacheLine::empty(); num_lines],
            protocol: config.coherence,
            replacer: Replacer::new(config.replacer, num_sets, assoc),
            stats: Stats::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn num_sets(&self) -> usize {
        self.num_sets
    }

    pub fn assoc(&self) -> usize {
        self.assoc
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// The line at (`set_idx`, `way_idx`)
    pub fn line(&self, set_idx: usize, way_idx: usize) -> CacheLine {
        self.lines[set_idx * self.assoc + way_idx]
    }

    /// The CSV report row, or `None` for a cache that never saw an access
    pub fn report(&self, config_id: u32) -> Option<CacheReport> {
        if self.stats.accesses() == 0 {
            return None;
        }
        Some(CacheReport {
            config: config_id,
            core: self.id,
            miss_rate: self.stats.miss_rate(),
            stats: self.stats,
        })
    }

    /// Handle a processor read of `addr`.
    pub(crate) fn receive_pr_rd(&mut self, addr: u32, siblings: &mut Siblings<'_>) {
        self.stats.processor_reads += 1;

        let idx = match self.find_line(addr) {
            Some(idx) => idx,
            None => self.allocate(addr),
        };
        if !self.lines[idx].state.is_valid() {
            self.stats.read_misses += 1;
        }

        let prev = self.lines[idx].state;
        let protocol = self.protocol;
        let mut port = CachePort::new(&mut self.stats, addr, siblings);
        protocol.on_pr_rd(&mut self.lines[idx], &mut port);

        #[cfg(feature = "write-timestamp")]
        {
            // A miss fills the line from a sibling or from memory; stamp it
            // with whichever write it actually observed
            let (copies, newest) = (port.last_copies, port.newest_sibling);
            if !prev.is_valid() {
                self.lines[idx].timestamp = if copies {
                    newest
                } else {
                    siblings.access_timestamp
                };
            }
        }

        let after = self.lines[idx].state;
        self.state_change_statistic(prev, after);

        self.replacer.touch(idx / self.assoc, idx % self.assoc);
    }

    /// Handle a processor write of `addr`.
    pub(crate) fn receive_pr_wr(&mut self, addr: u32, siblings: &mut Siblings<'_>) {
        self.stats.processor_writes += 1;
        let protocol = self.protocol;
        let found = self.find_line(addr);

        if protocol.does_write_no_allocate() {
            // The write goes to memory; a miss leaves the cache untouched
            self.stats.memory_writes += 1;
            if found.map_or(true, |idx| !self.lines[idx].state.is_valid()) {
                self.stats.write_misses += 1;
            }
            let Some(idx) = found else {
                let mut port = CachePort::new(&mut self.stats, addr, siblings);
                protocol.on_pr_wr(None, &mut port);
                return;
            };
            let prev = self.lines[idx].state;
            let mut port = CachePort::new(&mut self.stats, addr, siblings);
            protocol.on_pr_wr(Some(&mut self.lines[idx]), &mut port);
            self.finish_write(idx, prev, siblings);
        } else {
            let idx = match found {
                Some(idx) => idx,
                None => self.allocate(addr),
            };
            if !self.lines[idx].state.is_valid() {
                self.stats.write_misses += 1;
            }
            let prev = self.lines[idx].state;
            let mut port = CachePort::new(&mut self.stats, addr, siblings);
            protocol.on_pr_wr(Some(&mut self.lines[idx]), &mut port);
            self.finish_write(idx, prev, siblings);
        }
    }

    /// Post-write bookkeeping shared by the allocate and no-allocate paths.
    #[cfg_attr(not(feature = "write-timestamp"), allow(unused_variables))]
    fn finish_write(&mut self, idx: usize, prev: LineState, siblings: &Siblings<'_>) {
        let after = self.lines[idx].state;
        self.state_change_statistic(prev, after);
        if after.is_valid() {
            self.replacer.touch(idx / self.assoc, idx % self.assoc);
            #[cfg(feature = "write-timestamp")]
            {
                self.lines[idx].timestamp = siblings.access_timestamp;
            }
        }
    }

    /// Snoop a bus message issued by a sibling. A cache without the block
    /// stays silent; otherwise the reply carries the line's validity (the
    /// copies-exist wire) and whether the FSM flushed it.
    pub(crate) fn receive_bus_msg(
        &mut self,
        msg: BusMsg,
        addr: u32,
        #[cfg(feature = "write-timestamp")] access_timestamp: u64,
    ) -> SnoopReply {
        let Some(idx) = self.find_line(addr) else {
            return SnoopReply::default();
        };
        let protocol = self.protocol;
        let prev = self.lines[idx].state;
        let copies = prev.is_valid();

        let flushed = match msg {
            BusMsg::BusRead => {
                let flushed = protocol.on_bus_rd(&mut self.lines[idx]);
                // Supplying the line implies a writeback unless the
                // protocol lets dirty data stay shared
                if flushed
                    && !protocol.does_dirty_sharing()
                    && protocol.is_write_back_needed(prev)
                {
                    self.stats.write_backs += 1;
                }
                flushed
            }
            BusMsg::BusReadX => protocol.on_bus_rd_x(&mut self.lines[idx]),
            BusMsg::BusUpdate => {
                let flushed = protocol.on_bus_updt(&mut self.lines[idx]);
                // BusUpdate is the only message that distributes a write
                #[cfg(feature = "write-timestamp")]
                {
                    self.lines[idx].timestamp = access_timestamp;
                }
                flushed
            }
            BusMsg::BusUpgrade => protocol.on_bus_upgr(&mut self.lines[idx]),
            BusMsg::BusWrite => protocol.on_bus_wr(&mut self.lines[idx]),
        };
        if flushed {
            self.stats.line_flushes += 1;
        }

        let after = self.lines[idx].state;
        self.state_change_statistic(prev, after);

        SnoopReply {
            copies,
            flushed,
            #[cfg(feature = "write-timestamp")]
            timestamp: self.lines[idx].timestamp,
        }
    }

    /// The timestamp of the valid copy of `addr`, or 0 when absent.
    #[cfg(feature = "write-timestamp")]
    pub(crate) fn timestamp(&self, addr: u32) -> u64 {
        match self.find_line(addr) {
            Some(idx) if self.lines[idx].state.is_valid() => self.lines[idx].timestamp,
            _ => 0,
        }
    }

    /// Derive the three state-change statistics from one transition. Only
    /// transitions out of a valid state count; at most one counter bumps.
    fn state_change_statistic(&mut self, before: LineState, after: LineState) {
        if !before.is_valid() {
            return;
        }
        if !after.is_valid() {
            self.stats.invalidations += 1;
        } else if before.is_singular() && after.is_shared() {
            self.stats.interventions += 1;
        } else if before.is_shared() && after.is_singular() {
            self.stats.exclusions += 1;
        }
    }

    /// Claim a line for `addr`, evicting (and writing back) the victim if
    /// needed. The line comes back in `I`; promoting it is the FSM's job.
    fn allocate(&mut self, addr: u32) -> usize {
        let set_idx = self.set_of(addr);
        let base = set_idx * self.assoc;
        let way = self
            .replacer
            .get_victim(set_idx, &self.lines[base..base + self.assoc]);
        let idx = base + way;

        if self.lines[idx].state.is_valid() {
            self.stats.evictions += 1;
            if self.protocol.is_write_back_needed(self.lines[idx].state) {
                self.stats.line_flushes += 1;
                self.stats.write_backs += 1;
            }
        }

        self.lines[idx] = CacheLine {
            tag: addr >> self.tag_offset,
            state: LineState::I,
            #[cfg(feature = "write-timestamp")]
            timestamp: 0,
        };
        idx
    }

    fn set_of(&self, addr: u32) -> usize {
        ((addr >> self.line_offset) as usize) % self.num_sets
    }

    /// Locate the line holding `addr`'s block. Lookup is by tag alone:
    /// lines keep their tag when the protocol invalidates them.
    fn find_line(&self, addr: u32) -> Option<usize> {
        let tag = addr >> self.tag_offset;
        let base = self.set_of(addr) * self.assoc;
        (base..base + self.assoc).find(|&idx| self.lines[idx].tag == tag)
    }
}

/// The FSM's window onto the rest of the system while one access runs: the
/// issuing cache's statistics, the in-flight address, and every sibling
/// cache. Splitting the borrow this way lets the protocol mutate the
/// accessed line and issue bus messages in the same call.
pub(crate) struct CachePort<'a, 'b> {
    stats: &'a mut Stats,
    addr: u32,
    siblings: &'a mut Siblings<'b>,
    #[cfg(feature = "write-timestamp")]
    last_copies: bool,
    #[cfg(feature = "write-timestamp")]
    newest_sibling: u64,
}

impl<'a, 'b> CachePort<'a, 'b> {
    fn new(stats: &'a mut Stats, addr: u32, siblings: &'a mut Siblings<'b>) -> Self {
        Self {
            stats,
            addr,
            siblings,
            #[cfg(feature = "write-timestamp")]
            last_copies: false,
            #[cfg(feature = "write-timestamp")]
            newest_sibling: 0,
        }
    }
}

impl BusPort for CachePort<'_, '_> {
    fn issue_bus_msg(&mut self, msg: BusMsg) -> bool {
        let snoop = self.siblings.broadcast(msg, self.addr);

        // BusRead and BusReadX pull the block in; a sibling's flush means a
        // cache-to-cache transfer, silence means a memory fetch
        if matches!(msg, BusMsg::BusRead | BusMsg::BusReadX) {
            if snoop.flushed {
                self.stats.c2c_transfers += 1;
            } else {
                self.stats.line_fetches += 1;
            }
        }
        self.stats.count_bus_msg(msg);

        #[cfg(feature = "write-timestamp")]
        {
            self.last_copies = snoop.copies_exist;
            self.newest_sibling = self.newest_sibling.max(snoop.newest_sibling);
        }
        snoop.copies_exist
    }
}
