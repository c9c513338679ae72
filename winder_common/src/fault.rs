//! Alarm reasons, fault flags, and the latched fault record.
//!
//! When the safety monitor halts the machine it latches *why* at trigger
//! time; every later status query reports that captured cause until an
//! explicit reset. The latch is built from single-word atomics so the tick
//! context can write it without locks.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::axis::Axis;

/// Reason a safety halt was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AlarmReason {
    /// Emergency-stop input asserted.
    EstopButton = 0,
    /// Minimum-travel endstop triggered.
    EndstopMin = 1,
    /// Maximum-travel endstop triggered.
    EndstopMax = 2,
    /// No step observed on a commanded axis within the stall timeout.
    Stall = 3,
    /// Soft travel limit exceeded.
    SoftLimit = 4,
    /// Homing sequence failed (switch never found, or stuck).
    HomingFailed = 5,
}

impl AlarmReason {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::EstopButton),
            1 => Some(Self::EndstopMin),
            2 => Some(Self::EndstopMax),
            3 => Some(Self::Stall),
            4 => Some(Self::SoftLimit),
            5 => Some(Self::HomingFailed),
            _ => None,
        }
    }

    /// Human-readable description for status reports.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EstopButton => "emergency stop input asserted",
            Self::EndstopMin => "minimum endstop triggered",
            Self::EndstopMax => "maximum endstop triggered",
            Self::Stall => "motor stall detected",
            Self::SoftLimit => "soft travel limit exceeded",
            Self::HomingFailed => "homing sequence failed",
        }
    }
}

bitflags! {
    /// Accumulated fault summary across the life of an alarm.
    ///
    /// The latched [`FaultRecord`] holds the *first* cause; these flags
    /// additionally record every condition seen while the alarm was active.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FaultFlags: u8 {
        /// Emergency-stop input.
        const ESTOP        = 0x01;
        /// Minimum endstop.
        const LIMIT_MIN    = 0x02;
        /// Maximum endstop.
        const LIMIT_MAX    = 0x04;
        /// Stall timeout.
        const STALL        = 0x08;
        /// Soft travel limit.
        const SOFT_LIMIT   = 0x10;
        /// Homing failure.
        const HOMING       = 0x20;
    }
}

impl From<AlarmReason> for FaultFlags {
    fn from(reason: AlarmReason) -> Self {
        match reason {
            AlarmReason::EstopButton => Self::ESTOP,
            AlarmReason::EndstopMin => Self::LIMIT_MIN,
            AlarmReason::EndstopMax => Self::LIMIT_MAX,
            AlarmReason::Stall => Self::STALL,
            AlarmReason::SoftLimit => Self::SOFT_LIMIT,
            AlarmReason::HomingFailed => Self::HOMING,
        }
    }
}

impl Default for FaultFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Snapshot of the cause captured when an alarm triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    /// What tripped.
    pub reason: AlarmReason,
    /// Which axis, when the condition is axis-specific.
    pub axis: Option<Axis>,
    /// Scheduler tick at trigger time.
    pub tick: u64,
}

const NO_FAULT: u8 = 0xFF;
const NO_AXIS: u8 = 0xFF;

/// Lock-free latch for the first fault of an alarm.
///
/// `latch` is first-writer-wins: once a fault is recorded, later triggers
/// only accumulate into the flag summary. Written from the tick context,
/// read from anywhere, cleared only by an explicit reset.
#[derive(Debug)]
pub struct LatchedFault {
    reason: AtomicU8,
    axis: AtomicU8,
    tick: AtomicU64,
    flags: AtomicU8,
}

impl LatchedFault {
    /// Create an empty latch.
    pub const fn new() -> Self {
        Self {
            reason: AtomicU8::new(NO_FAULT),
            axis: AtomicU8::new(NO_AXIS),
            tick: AtomicU64::new(0),
            flags: AtomicU8::new(0),
        }
    }

    /// Record a fault. Returns true if this call latched the first cause,
    /// false if a fault was already latched (the flag summary still
    /// accumulates).
    pub fn latch(&self, reason: AlarmReason, axis: Option<Axis>, tick: u64) -> bool {
        self.flags
            .fetch_or(FaultFlags::from(reason).bits(), Ordering::AcqRel);

        let first = self
            .reason
            .compare_exchange(NO_FAULT, reason as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.axis
                .store(axis.map_or(NO_AXIS, |a| a as u8), Ordering::Release);
            self.tick.store(tick, Ordering::Release);
        }
        first
    }

    /// The latched first cause, if any.
    pub fn record(&self) -> Option<FaultRecord> {
        let reason = AlarmReason::from_u8(self.reason.load(Ordering::Acquire))?;
        Some(FaultRecord {
            reason,
            axis: Axis::from_u8(self.axis.load(Ordering::Acquire)),
            tick: self.tick.load(Ordering::Acquire),
        })
    }

    /// Every condition seen since the latch was last cleared.
    pub fn flags(&self) -> FaultFlags {
        FaultFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Whether a fault is currently latched.
    #[inline]
    pub fn is_latched(&self) -> bool {
        self.reason.load(Ordering::Acquire) != NO_FAULT
    }

    /// Clear the latch. Only the reset path calls this.
    pub fn clear(&self) {
        self.reason.store(NO_FAULT, Ordering::Release);
        self.axis.store(NO_AXIS, Ordering::Release);
        self.tick.store(0, Ordering::Release);
        self.flags.store(0, Ordering::Release);
    }
}

impl Default for LatchedFault {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alarm_reason_roundtrip() {
        for v in 0..=5u8 {
            let reason = AlarmReason::from_u8(v).unwrap();
            assert_eq!(reason as u8, v);
        }
        assert!(AlarmReason::from_u8(6).is_none());
        assert!(AlarmReason::from_u8(255).is_none());
    }

    #[test]
    fn empty_latch_reports_nothing() {
        let latch = LatchedFault::new();
        assert!(!latch.is_latched());
        assert!(latch.record().is_none());
        assert_eq!(latch.flags(), FaultFlags::empty());
    }

    #[test]
    fn first_cause_wins() {
        let latch = LatchedFault::new();
        assert!(latch.latch(AlarmReason::Stall, Some(Axis::Traverse), 100));
        assert!(!latch.latch(AlarmReason::EstopButton, None, 200));

        let record = latch.record().unwrap();
        assert_eq!(record.reason, AlarmReason::Stall);
        assert_eq!(record.axis, Some(Axis::Traverse));
        assert_eq!(record.tick, 100);

        // Both conditions show up in the summary.
        assert!(latch.flags().contains(FaultFlags::STALL | FaultFlags::ESTOP));
    }

    #[test]
    fn clear_empties_the_latch() {
        let latch = LatchedFault::new();
        latch.latch(AlarmReason::EndstopMax, Some(Axis::Traverse), 7);
        latch.clear();
        assert!(!latch.is_latched());
        assert!(latch.record().is_none());
        assert_eq!(latch.flags(), FaultFlags::empty());
    }
}
