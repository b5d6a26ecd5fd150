//! The coherence protocol family.
//!
//! Every protocol is a finite-state machine over [`LineState`], reacting to
//! processor requests on the local line and to snooped bus messages on
//! sibling lines. The protocols are stateless, so the whole family is a
//! fieldless enum with exhaustive matches per operation; a state a protocol
//! does not model for an operation is a programming error, reported with
//! source context and fatal in debug builds.

use crate::line::{BusMsg, CacheLine, LineState};

/// Capability handed to the FSM for reaching the bus.
///
/// Implemented by the cache for real simulation runs and by the textbook
/// mode's one-line caches; tests substitute a scripted mock. Broadcasts the
/// message for the access currently in flight and returns the aggregated
/// copies-exist signal.
pub trait BusPort {
    fn issue_bus_msg(&mut self, msg: BusMsg) -> bool;
}

/// Report an (operation, state) pair the protocol does not model. The
/// simulation continues in release builds; debug and test builds abort.
macro_rules! state_err {
    ($op:expr, $state:expr) => {{
        log::error!(
            "{}:{}: cache line in invalid state: {:?}",
            file!(),
            $op,
            $state
        );
        debug_assert!(
            false,
            "{}: cache line in invalid state: {:?}",
            $op, $state
        );
    }};
}

/// Report a bus message the protocol does not implement.
macro_rules! unimplemented_msg {
    ($op:expr) => {{
        log::error!("call of unimplemented bus message: {}", $op);
        debug_assert!(false, "call of unimplemented bus message: {}", $op);
    }};
}

/// The coherence protocols known to the simulator.
///
/// `from_name` is the registry: names resolve case-insensitively, as they
/// arrive from the command line or a configs file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoherenceKind {
    Msi,
    MsiUpgr,
    Mesi,
    Moesi,
    Dragon,
    WriteThrough,
}

impl CoherenceKind {
    /// Every protocol, in the order the usage text lists them
    pub const ALL: [CoherenceKind; 6] = [
        CoherenceKind::Msi,
        CoherenceKind::MsiUpgr,
        CoherenceKind::Mesi,
        CoherenceKind::Moesi,
        CoherenceKind::Dragon,
        CoherenceKind::WriteThrough,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CoherenceKind::Msi => "MSI",
            CoherenceKind::MsiUpgr => "MSIUpgr",
            CoherenceKind::Mesi => "MESI",
            CoherenceKind::Moesi => "MOESI",
            CoherenceKind::Dragon => "Dragon",
            CoherenceKind::WriteThrough => "WriteThrough",
        }
    }

    /// Case-insensitive name lookup
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    /// True when dirty data may be passed between caches without a
    /// writeback to main memory (an `O`/`Sm` owner exists)
    pub fn does_dirty_sharing(self) -> bool {
        matches!(self, CoherenceKind::Moesi | CoherenceKind::Dragon)
    }

    /// True for write-through policies whose write misses bypass the cache
    pub fn does_write_no_allocate(self) -> bool {
        matches!(self, CoherenceKind::WriteThrough)
    }

    /// Whether a line in `state` must be written to main memory when it is
    /// evicted or displaced
    pub fn is_write_back_needed(self, state: LineState) -> bool {
        match self {
            CoherenceKind::Msi | CoherenceKind::MsiUpgr | CoherenceKind::Mesi => {
                state == LineState::M
            }
            CoherenceKind::Moesi => state == LineState::M || state == LineState::O,
            CoherenceKind::Dragon => state == LineState::Sm || state == LineState::M,
            CoherenceKind::WriteThrough => false,
        }
    }

    /// React to a processor read. The caller has already materialised an
    /// invalid entry on a miss, so `line` is always present.
    pub fn on_pr_rd(self, line: &mut CacheLine, bus: &mut dyn BusPort) {
        use LineState::*;
        match self {
            CoherenceKind::Msi | CoherenceKind::MsiUpgr => match line.state {
                M | S => {}
                I => {
                    bus.issue_bus_msg(BusMsg::BusRead);
                    line.state = S;
                }
                other => state_err!("PrRd", other),
            },
            CoherenceKind::Mesi | CoherenceKind::Moesi => match line.state {
                M | E | S => {}
                O if self == CoherenceKind::Moesi => {}
                I => {
                    line.state = if bus.issue_bus_msg(BusMsg::BusRead) { S } else { E };
                }
                other => state_err!("PrRd", other),
            },
            CoherenceKind::Dragon => match line.state {
                E | Sc | Sm | M => {}
                // Unallocated: the first access decides between the clean
                // exclusive and shared clean entry points
                I => {
                    line.state = if bus.issue_bus_msg(BusMsg::BusRead) { Sc } else { E };
                }
                other => state_err!("PrRd", other),
            },
            CoherenceKind::WriteThrough => match line.state {
                V => {}
                I => {
                    bus.issue_bus_msg(BusMsg::BusRead);
                    line.state = V;
                }
                other => state_err!("PrRd", other),
            },
        }
    }

    /// React to a processor write. `line` is `None` only for
    /// write-no-allocate protocols with no resident copy.
    pub fn on_pr_wr(self, line: Option<&mut CacheLine>, bus: &mut dyn BusPort) {
        use LineState::*;

        // Write-no-allocate: the write goes straight to memory whether or
        // not a copy is resident, and the resident state never changes.
        if self == CoherenceKind::WriteThrough {
            if let Some(line) = line {
                match line.state {
                    V | I => {}
                    other => {
                        state_err!("PrWr", other);
                        return;
                    }
                }
            }
            bus.issue_bus_msg(BusMsg::BusWrite);
            return;
        }

        let Some(line) = line else {
            state_err!("PrWr", LineState::I);
            return;
        };

        match self {
            CoherenceKind::Msi => match line.state {
                I | S => {
                    bus.issue_bus_msg(BusMsg::BusReadX);
                    line.state = M;
                }
                M => {}
                other => state_err!("PrWr", other),
            },
            CoherenceKind::MsiUpgr => match line.state {
                I => {
                    bus.issue_bus_msg(BusMsg::BusReadX);
                    line.state = M;
                }
                // The upgrade happens whether or not other copies exist;
                // the copies-exist result only influences the counters
                S => {
                    bus.issue_bus_msg(BusMsg::BusUpgrade);
                    line.state = M;
                }
                M => {}
                other => state_err!("PrWr", other),
            },
            CoherenceKind::Mesi => match line.state {
                I => {
                    bus.issue_bus_msg(BusMsg::BusReadX);
                    line.state = M;
                }
                S => {
                    bus.issue_bus_msg(BusMsg::BusUpgrade);
                    line.state = M;
                }
                E => line.state = M,
                M => {}
                other => state_err!("PrWr", other),
            },
            CoherenceKind::Moesi => match line.state {
                I => {
                    bus.issue_bus_msg(BusMsg::BusReadX);
                    line.state = M;
                }
                O | S => {
                    bus.issue_bus_msg(BusMsg::BusUpgrade);
                    line.state = M;
                }
                E => line.state = M,
                M => {}
                other => state_err!("PrWr", other),
            },
            CoherenceKind::Dragon => match line.state {
                E => line.state = M,
                Sc | Sm => {
                    line.state = if bus.issue_bus_msg(BusMsg::BusUpdate) { Sm } else { M };
                }
                M => {}
                // Unallocated write: BusUpdate is only worth issuing when
                // the initial BusRead saw other copies (short-circuit)
                I => {
                    line.state = if bus.issue_bus_msg(BusMsg::BusRead)
                        && bus.issue_bus_msg(BusMsg::BusUpdate)
                    {
                        Sm
                    } else {
                        M
                    };
                }
                other => state_err!("PrWr", other),
            },
            CoherenceKind::WriteThrough => unreachable!(),
        }
    }

    /// React to a snooped BusRd. Returns true iff the line was flushed.
    pub fn on_bus_rd(self, line: &mut CacheLine) -> bool {
        use LineState::*;
        match self {
            CoherenceKind::Msi | CoherenceKind::MsiUpgr => match line.state {
                M => {
                    line.state = S;
                    true
                }
                S | I => false,
                other => {
                    state_err!("BusRd", other);
                    false
                }
            },
            CoherenceKind::Mesi => match line.state {
                // Any sharer may supply the line
                M | E => {
                    line.state = S;
                    true
                }
                S => true,
                I => false,
                other => {
                    state_err!("BusRd", other);
                    false
                }
            },
            CoherenceKind::Moesi => match line.state {
                M => {
                    line.state = O;
                    true
                }
                O => true,
                E => {
                    line.state = S;
                    true
                }
                S | I => false,
                other => {
                    state_err!("BusRd", other);
                    false
                }
            },
            CoherenceKind::Dragon => match line.state {
                E => {
                    line.state = Sc;
                    false
                }
                Sc => false,
                M => {
                    line.state = Sm;
                    true
                }
                Sm => true,
                other => {
                    state_err!("BusRd", other);
                    false
                }
            },
            CoherenceKind::WriteThrough => match line.state {
                V | I => false,
                other => {
                    state_err!("BusRd", other);
                    false
                }
            },
        }
    }

    /// React to a snooped BusRdX. Returns true iff the line was flushed.
    pub fn on_bus_rd_x(self, line: &mut CacheLine) -> bool {
        use LineState::*;
        match self {
            CoherenceKind::Msi | CoherenceKind::MsiUpgr => match line.state {
                M => {
                    line.state = I;
                    true
                }
                S => {
                    line.state = I;
                    false
                }
                I => false,
                other => {
                    state_err!("BusRdX", other);
                    false
                }
            },
            CoherenceKind::Mesi => match line.state {
                M | E | S => {
                    line.state = I;
                    true
                }
                I => false,
                other => {
                    state_err!("BusRdX", other);
                    false
                }
            },
            CoherenceKind::Moesi => match line.state {
                M | O | E => {
                    line.state = I;
                    true
                }
                S => {
                    line.state = I;
                    false
                }
                I => false,
                other => {
                    state_err!("BusRdX", other);
                    false
                }
            },
            CoherenceKind::Dragon | CoherenceKind::WriteThrough => {
                unimplemented_msg!("BusRdX");
                false
            }
        }
    }

    /// React to a snooped BusUpdt. Returns true iff the line was flushed.
    pub fn on_bus_updt(self, line: &mut CacheLine) -> bool {
        use LineState::*;
        match self {
            CoherenceKind::Dragon => match line.state {
                Sm => {
                    line.state = Sc;
                    false
                }
                Sc => false,
                other => {
                    state_err!("BusUpdt", other);
                    false
                }
            },
            _ => {
                unimplemented_msg!("BusUpdt");
                false
            }
        }
    }

    /// React to a snooped BusUpgr. Returns true iff the line was flushed.
    pub fn on_bus_upgr(self, line: &mut CacheLine) -> bool {
        use LineState::*;
        match self {
            CoherenceKind::MsiUpgr | CoherenceKind::Mesi => match line.state {
                S => {
                    line.state = I;
                    false
                }
                I => false,
                other => {
                    state_err!("BusUpgr", other);
                    false
                }
            },
            // An upgrading sibling needs no data, so even the owner's line
            // is dropped without a flush
            CoherenceKind::Moesi => match line.state {
                O | S => {
                    line.state = I;
                    false
                }
                I => false,
                other => {
                    state_err!("BusUpgr", other);
                    false
                }
            },
            _ => {
                unimplemented_msg!("BusUpgr");
                false
            }
        }
    }

    /// React to a snooped BusWr. Returns true iff the line was flushed.
    pub fn on_bus_wr(self, line: &mut CacheLine) -> bool {
        use LineState::*;
        match self {
            CoherenceKind::WriteThrough => match line.state {
                V => {
                    line.state = I;
                    false
                }
                I => false,
                other => {
                    state_err!("BusWr", other);
                    false
                }
            },
            _ => {
                unimplemented_msg!("BusWr");
                false
            }
        }
    }
}
