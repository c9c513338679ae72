//! Machine state enum and its atomic cell.
//!
//! Exactly one [`MachineState`] value is active at any time. The value is
//! written by the safety monitor (the single owner of all transition logic)
//! and read concurrently from the tick and command contexts, so it lives
//! behind a single-word atomic cell.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Global machine lifecycle state.
///
/// Created at boot as `Idle`; mutated only through the safety monitor's
/// transition rules; lives for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MachineState {
    /// Ready, no motion in progress.
    Idle = 0,
    /// Homing sequence running on the traverse axis.
    Homing = 1,
    /// Winding process active — queues being fed and consumed.
    Winding = 2,
    /// Feed hold — queued motion retained, step emission suspended.
    Hold = 3,
    /// Latched safety fault — requires explicit reset.
    Alarm = 4,
}

impl MachineState {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Homing),
            2 => Some(Self::Winding),
            3 => Some(Self::Hold),
            4 => Some(Self::Alarm),
            _ => None,
        }
    }

    /// Returns true if the scheduler may generate steps in this state.
    #[inline]
    pub const fn allows_motion(&self) -> bool {
        matches!(self, Self::Homing | Self::Winding | Self::Idle)
    }

    /// Human-readable name for status reports.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Homing => "HOMING",
            Self::Winding => "WINDING",
            Self::Hold => "HOLD",
            Self::Alarm => "ALARM",
        }
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Single-word atomic holder for the machine state.
///
/// The cell only ever stores valid `MachineState` discriminants, so loads
/// decode infallibly.
#[derive(Debug)]
pub struct MachineStateCell {
    inner: AtomicU8,
}

impl MachineStateCell {
    /// Create a cell holding the given initial state.
    pub const fn new(state: MachineState) -> Self {
        Self {
            inner: AtomicU8::new(state as u8),
        }
    }

    /// Read the current state.
    #[inline]
    pub fn load(&self) -> MachineState {
        // Only valid discriminants are ever stored.
        MachineState::from_u8(self.inner.load(Ordering::Acquire)).unwrap_or(MachineState::Alarm)
    }

    /// Overwrite the current state.
    #[inline]
    pub fn store(&self, state: MachineState) {
        self.inner.store(state as u8, Ordering::Release);
    }

    /// Atomically transition `from → to`. Returns false if the current
    /// state was not `from` (another context transitioned first).
    #[inline]
    pub fn transition(&self, from: MachineState, to: MachineState) -> bool {
        self.inner
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for MachineStateCell {
    fn default() -> Self {
        Self::new(MachineState::Idle)
    }
}
