//! Replacement policies.
//!
//! Policies only ever see set and way indices plus the set's lines; they
//! never own cache storage. The concrete policies are wrapped in the
//! [`Replacer`] enum so the cache can dispatch statically without generics
//! bubbling up through the memory system.

use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

use crate::line::CacheLine;

/// A per-set victim chooser with access notifications.
pub trait ReplacementPolicy {
    /// Choose the way to replace in `set_idx`. Called only when an
    /// allocation is forced; `set` holds the set's lines so cold (invalid)
    /// ways can be preferred.
    fn get_victim(&mut self, set_idx: usize, set: &[CacheLine]) -> usize;

    /// Notify the policy that a line was just accessed (hit or allocation)
    fn touch(&mut self, _set_idx: usize, _way_idx: usize) {}

    /// Render the policy's internal state for one set; used only by the
    /// textbook-mode table
    fn fmt_state(&self, _set_idx: usize) -> String {
        String::new()
    }
}

/// The replacement policies known to the simulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplacerKind {
    Lru,
    Fifo,
    Rr,
}

impl ReplacerKind {
    /// Every policy, in the order the usage text lists them
    pub const ALL: [ReplacerKind; 3] = [ReplacerKind::Lru, ReplacerKind::Fifo, ReplacerKind::Rr];

    pub fn name(self) -> &'static str {
        match self {
            ReplacerKind::Lru => "LRU",
            ReplacerKind::Fifo => "FIFO",
            ReplacerKind::Rr => "RR",
        }
    }

    /// Case-insensitive name lookup
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }
}

/// The proverbial "none" policy for direct-mapped caches: the only way in
/// the set is always the victim.
#[derive(Debug, Default)]
pub struct NoPolicy;

impl ReplacementPolicy for NoPolicy {
    fn get_victim(&mut self, _set_idx: usize, _set: &[CacheLine]) -> usize {
        0
    }
}

/// Least recently used.
///
/// Each way carries an integer age. Touching way `w` increments every age
/// not older than `w`'s, then zeroes `w`, so ages stay a permutation-like
/// ranking without a global clock.
#[derive(Debug)]
pub struct Lru {
    age: Vec<u32>,
    assoc: usize,
}

impl Lru {
    pub fn new(num_sets: usize, assoc: usize) -> Self {
        Self {
            age: vec![0; num_sets * assoc],
            assoc,
        }
    }
}

impl ReplacementPolicy for Lru {
    fn get_victim(&mut self, set_idx: usize, set: &[CacheLine]) -> usize {
        let ages = &self.age[set_idx * self.assoc..(set_idx + 1) * self.assoc];
        let mut max_idx = 0;
        let mut max = 0;
        for (way, line) in set.iter().enumerate() {
            // A cold way beats any age comparison
            if !line.state.is_valid() {
                return way;
            }
            if ages[way] > max {
                max = ages[way];
                max_idx = way;
            }
        }
        max_idx
    }

    fn touch(&mut self, set_idx: usize, way_idx: usize) {
        let ages = &mut self.age[set_idx * self.assoc..(set_idx + 1) * self.assoc];
        let touched_age = ages[way_idx];
        for age in ages.iter_mut() {
            if *age <= touched_age {
                *age += 1;
            }
        }
        ages[way_idx] = 0;
    }

    fn fmt_state(&self, set_idx: usize) -> String {
        let ages = &self.age[set_idx * self.assoc..(set_idx + 1) * self.assoc];
        ages.iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// First in, first out: a per-set cursor that ignores accesses entirely.
#[derive(Debug)]
pub struct Fifo {
    up_next: Vec<usize>,
    assoc: usize,
}

impl Fifo {
    pub fn new(num_sets: usize, assoc: usize) -> Self {
        Self {
            up_next: vec![0; num_sets],
            assoc,
        }
    }
}

impl ReplacementPolicy for Fifo {
    fn get_victim(&mut self, set_idx: usize, _set: &[CacheLine]) -> usize {
        let next = self.up_next[set_idx];
        self.up_next[set_idx] = (next + 1) % self.assoc;
        next
    }

    fn fmt_state(&self, set_idx: usize) -> String {
        let next = self.up_next[set_idx];
        (0..self.assoc)
            .map(|i| ((next + i) % self.assoc).to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Uniform random victim.
///
/// Seeded from the cache dimensions so two runs over the same configuration
/// and trace produce identical statistics.
#[derive(Debug)]
pub struct Random {
    rng: Xoshiro256StarStar,
    assoc: usize,
}

impl Random {
    pub fn new(num_sets: usize, assoc: usize) -> Self {
        Self {
            rng: Xoshiro256StarStar::seed_from_u64((num_sets * assoc) as u64),
            assoc,
        }
    }
}

impl ReplacementPolicy for Random {
    fn get_victim(&mut self, _set_idx: usize, _set: &[CacheLine]) -> usize {
        self.rng.gen_range(0..self.assoc)
    }
}

/// Static-dispatch wrapper over the concrete policies.
#[derive(Debug)]
pub enum Replacer {
    None(NoPolicy),
    Lru(Lru),
    Fifo(Fifo),
    Random(Random),
}

impl Replacer {
    /// Build the policy for a cache of `num_sets` x `assoc` lines.
    ///
    /// A direct-mapped cache degenerates to the trivial policy no matter
    /// which name was configured.
    pub fn new(kind: ReplacerKind, num_sets: usize, assoc: usize) -> Self {
        if assoc == 1 {
            return Replacer::None(NoPolicy);
        }
        match kind {
            ReplacerKind::Lru => Replacer::Lru(Lru::new(num_sets, assoc)),
            ReplacerKind::Fifo => Replacer::Fifo(Fifo::new(num_sets, assoc)),
            ReplacerKind::Rr => Replacer::Random(Random::new(num_sets, assoc)),
        }
    }
}

impl ReplacementPolicy for Replacer {
    fn get_victim(&mut self, set_idx: usize, set: &[CacheLine]) -> usize {
        match self {
            Replacer::None(p) => p.get_victim(set_idx, set),
            Replacer::Lru(p) => p.get_victim(set_idx, set),
            Replacer::Fifo(p) => p.get_victim(set_idx, set),
            Replacer::Random(p) => p.get_victim(set_idx, set),
        }
    }

    fn touch(&mut self, set_idx: usize, way_idx: usize) {
        match self {
            Replacer::None(p) => p.touch(set_idx, way_idx),
            Replacer::Lru(p) => p.touch(set_idx, way_idx),
            Replacer::Fifo(p) => p.touch(set_idx, way_idx),
            Replacer::Random(p) => p.touch(set_idx, way_idx),
        }
    }

    fn fmt_state(&self, set_idx: usize) -> String {
        match self {
            Replacer::None(p) => p.fmt_state(set_idx),
            Replacer::Lru(p) => p.fmt_state(set_idx),
            Replacer::Fifo(p) => p.fmt_state(set_idx),
            Replacer::Random(p) => p.fmt_state(set_idx),
        }
    }
}
