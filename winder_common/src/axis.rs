//! Axis and direction identifiers.
//!
//! All enums use `#[repr(u8)]` for compact memory layout and single-word
//! atomic transport between the command and tick contexts.

use serde::{Deserialize, Serialize};

use crate::consts::NUM_AXES;

/// Motion axis identifier.
///
/// The traverse axis is the wire-guide lead screw; the spindle axis is the
/// bobbin pulse-train output. Axes are independent — each owns its own move
/// queue and there is no cross-axis ordering guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Axis {
    /// Wire-guide traverse stepper.
    Traverse = 0,
    /// Bobbin spindle pulse train.
    Spindle = 1,
}

impl Axis {
    /// All axes, in index order.
    pub const ALL: [Axis; NUM_AXES] = [Axis::Traverse, Axis::Spindle];

    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Traverse),
            1 => Some(Self::Spindle),
            _ => None,
        }
    }

    /// Array index for per-axis state tables.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Human-readable axis name for diagnostics.
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Traverse => "traverse",
            Self::Spindle => "spindle",
        }
    }
}

/// Step direction for an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    /// Positive travel (away from home).
    Forward = 0,
    /// Negative travel (toward home).
    Reverse = 1,
}

impl Direction {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Forward),
            1 => Some(Self::Reverse),
            _ => None,
        }
    }

    /// Signed step increment for position tracking.
    #[inline]
    pub const fn sign(self) -> i64 {
        match self {
            Self::Forward => 1,
            Self::Reverse => -1,
        }
    }

    /// The opposite direction.
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::Forward
    }
}
