//! Per-cache runtime statistics and the CSV report row.

use serde::{Deserialize, Serialize};

use crate::line::BusMsg;

/// The counters one cache maintains, in CSV column order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub processor_reads: u64,
    pub processor_writes: u64,
    pub bus_reads: u64,
    pub bus_readxs: u64,
    pub bus_updates: u64,
    pub bus_upgrades: u64,
    pub bus_writes: u64,
    pub read_misses: u64,
    pub write_misses: u64,
    /// Line data driven onto the bus, whether snooped by a sibling or
    /// written back during eviction
    pub line_flushes: u64,
    /// Misses satisfied from main memory
    pub line_fetches: u64,
    /// Misses satisfied by a sibling's flush
    pub c2c_transfers: u64,
    pub write_backs: u64,
    /// Direct CPU-to-memory writes (write-no-allocate protocols)
    pub memory_writes: u64,
    pub evictions: u64,
    /// Shared-family to exclusive-family transitions
    pub exclusions: u64,
    /// Exclusive-family to shared-family transitions
    pub interventions: u64,
    /// Valid-to-invalid transitions
    pub invalidations: u64,
}

impl Stats {
    pub fn accesses(&self) -> u64 {
        self.processor_reads + self.processor_writes
    }

    pub fn miss_rate(&self) -> f64 {
        let accesses = self.accesses();
        if accesses == 0 {
            return 0.0;
        }
        (self.read_misses + self.write_misses) as f64 / accesses as f64
    }

    pub(crate) fn count_bus_msg(&mut self, msg: BusMsg) {
        match msg {
            BusMsg::BusRead => self.bus_reads += 1,
            BusMsg::BusReadX => self.bus_readxs += 1,
            BusMsg::BusUpdate => self.bus_updates += 1,
            BusMsg::BusUpgrade => self.bus_upgrades += 1,
            BusMsg::BusWrite => self.bus_writes += 1,
        }
    }
}

/// Header row for the statistics CSV.
pub const CSV_HEADER: &str = "config,core,miss_rate,processor_reads,processor_writes,\
bus_reads,bus_readxs,bus_updates,bus_upgrades,bus_writes,read_misses,write_misses,\
line_flushes,line_fetches,c2c_transfers,write_backs,memory_writes,evictions,\
exclusions,interventions,invalidations";

/// One CSV row: the statistics of a single cache in a single configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheReport {
    pub config: u32,
    pub core: u32,
    pub miss_rate: f64,
    #[serde(flatten)]
    pub stats: Stats,
}

impl CacheReport {
    pub fn to_csv_row(&self) -> String {
        let s = &self.stats;
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.config,
            self.core,
            self.miss_rate,
            s.processor_reads,
            s.processor_writes,
            s.bus_reads,
            s.bus_readxs,
            s.bus_updates,
            s.bus_upgrades,
            s.bus_writes,
            s.read_misses,
            s.write_misses,
            s.line_flushes,
            s.line_fetches,
            s.c2c_transfers,
            s.write_backs,
            s.memory_writes,
            s.evictions,
            s.exclusions,
            s.interventions,
            s.invalidations,
        )
    }
}
