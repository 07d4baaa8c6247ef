//! Core type definitions for the simulation kernel.
//!
//! Time is kept in picoseconds on a single global timeline. Every entity the
//! engine tracks lives in an arena and is referred to by a small copyable id.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Absolute or relative simulated time, in picoseconds.
pub type SimTime = i64;

/// A cycle count within one clock domain.
pub type Cycles = i64;

/// Returned by time queries when nothing is pending.
pub const NO_PENDING: SimTime = -1;

/// Picoseconds per second, used for frequency/period conversion.
pub const PS_PER_SEC: i64 = 1_000_000_000_000;

/// Number of argument slots carried by every event.
pub const EVENT_ARGS: usize = 4;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Position of this entity in its arena.
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            pub(crate) fn from_index(index: usize) -> Self {
                Self(index as u32)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Identifies a block. Ordering follows creation order, which is also the
    /// tie-break order for blocks due at the same time.
    BlockId,
    "block#"
);
arena_id!(
    /// Identifies a time or clock event.
    EventId,
    "event#"
);
arena_id!(
    /// Identifies a clock domain.
    ClockId,
    "clock#"
);
arena_id!(
    /// Identifies a component in the ownership tree.
    ComponentId,
    "comp#"
);

impl ComponentId {
    /// The root of the component tree.
    pub const ROOT: ComponentId = ComponentId(0);
}

/// Converts a frequency into an integral period in picoseconds.
///
/// Returns `None` for a zero frequency.
#[inline]
pub fn period_from_frequency(hz: u64) -> Option<SimTime> {
    if hz == 0 {
        return None;
    }
    Some((PS_PER_SEC as u64 / hz).max(1) as SimTime)
}
