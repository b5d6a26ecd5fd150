/// The state of a single cache line.
///
/// The discriminant ordering is load-bearing: `I` is zero, the exclusive
/// family occupies `1..=4` and the shared family `5..=8`, so the
/// invalidation / intervention / exclusion statistics can be derived from
/// which band a transition crosses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LineState {
    /// Invalid. Protocols that never invalidate (Dragon) use this as the
    /// unallocated state of a fresh line.
    #[default]
    I = 0,

    /// Dirty exclusive
    D = 1,
    /// Clean exclusive
    E = 2,
    /// Modified exclusive
    M = 3,
    /// Valid exclusive (write-through)
    V = 4,

    /// Owned
    O = 5,
    /// Shared
    S = 6,
    /// Shared clean
    Sc = 7,
    /// Shared modified
    Sm = 8,
}

impl LineState {
    /// Any non-invalid state holds usable data
    pub fn is_valid(self) -> bool {
        self != LineState::I
    }

    /// States that guarantee no other cache holds the block
    pub fn is_singular(self) -> bool {
        matches!(
            self,
            LineState::D | LineState::E | LineState::M | LineState::V
        )
    }

    /// States that admit copies in other caches
    pub fn is_shared(self) -> bool {
        matches!(
            self,
            LineState::O | LineState::S | LineState::Sc | LineState::Sm
        )
    }

    /// Short display name, as printed by the textbook-mode state column
    pub fn name(self) -> &'static str {
        match self {
            LineState::I => "I",
            LineState::D => "D",
            LineState::E => "E",
            LineState::M => "M",
            LineState::V => "V",
            LineState::O => "O",
            LineState::S => "S",
            LineState::Sc => "Sc",
            LineState::Sm => "Sm",
        }
    }
}

/// Tag value no address can decode to, marking a line that has never been
/// allocated. Lines keep their tag when invalidated by the protocol, so an
/// invalid-but-present line is still found by lookup and must be told apart
/// from a cold slot.
pub const UNALLOCATED_TAG: u32 = u32::MAX;

/// One cache line: the tag identifying the resident block and the coherence
/// state. There is no data field; the simulator only models metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheLine {
    pub tag: u32,
    pub state: LineState,
    /// Global access number of the last write observed by this line.
    #[cfg(feature = "write-timestamp")]
    pub timestamp: u64,
}

impl CacheLine {
    /// A line as it leaves the cache constructor: never allocated, invalid.
    pub fn empty() -> Self {
        Self {
            tag: UNALLOCATED_TAG,
            state: LineState::I,
            #[cfg(feature = "write-timestamp")]
            timestamp: 0,
        }
    }
}

/// The messages a cache can drive onto the bus. `BusRead` and `BusReadX`
/// fetch data (and therefore classify the miss source); the rest only carry
/// coherence side effects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BusMsg {
    BusRead,
    BusReadX,
    BusUpdate,
    BusUpgrade,
    BusWrite,
}

impl BusMsg {
    /// Display name used by the textbook-mode event column
    pub fn name(self) -> &'static str {
        match self {
            BusMsg::BusRead => "BusRd",
            BusMsg::BusReadX => "BusRdX",
            BusMsg::BusUpdate => "BusUpdt",
            BusMsg::BusUpgrade => "BusUpgr",
            BusMsg::BusWrite => "BusWr",
        }
    }
}
