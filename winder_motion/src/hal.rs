//! Pin-level hardware abstraction.
//!
//! Two narrow traits split what the motion core drives from what it
//! watches: [`StepPins`] (step/direction/enable outputs) and
//! [`SafetyPins`] (emergency stop, endstops, home switch inputs). Both are
//! called from the scheduler's tick context, so every method carries a
//! hard O(1)/non-blocking contract.
//!
//! # Timing Contracts
//!
//! | Operation | Context | Constraint |
//! |-----------|---------|------------|
//! | `step_pulse` | tick | **HARD** — bounded by the pulse width |
//! | `set_direction` / `set_enable` | tick or command | O(1), non-blocking |
//! | `SafetyPins` reads | tick | O(1), non-blocking |
//!
//! The in-tree backend is [`SimIo`], an atomics-backed simulator used by
//! the binary's simulation mode and the test suite. A GPIO backend for
//! real hardware implements the same traits.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use winder_common::axis::{Axis, Direction};
use winder_common::consts::NUM_AXES;

/// Stepper output pins, one set per axis.
pub trait StepPins: Send + Sync {
    /// Emit one step pulse: drive the step pin high, hold for the
    /// configured pulse width, drive it low.
    fn step_pulse(&self, axis: Axis);

    /// Set the direction pin level.
    fn set_direction(&self, axis: Axis, direction: Direction);

    /// Arm or disarm the driver enable output.
    fn set_enable(&self, axis: Axis, enabled: bool);
}

/// Safety-relevant digital inputs.
pub trait SafetyPins: Send + Sync {
    /// Emergency-stop input level (true = asserted).
    fn estop_asserted(&self) -> bool;

    /// Minimum-travel endstop for an axis (true = triggered).
    fn endstop_min(&self, axis: Axis) -> bool;

    /// Maximum-travel endstop for an axis (true = triggered).
    fn endstop_max(&self, axis: Axis) -> bool;

    /// Traverse home switch (true = at home).
    fn home_switch(&self) -> bool;
}

/// Atomics-backed I/O simulator.
///
/// Outputs are counters and flags the tests observe; inputs are flags the
/// tests (or the simulation main loop) toggle. Every operation is a
/// single-word atomic access, honoring the tick-context contract.
#[derive(Debug, Default)]
pub struct SimIo {
    step_counts: [AtomicU64; NUM_AXES],
    directions: [AtomicU8; NUM_AXES],
    enabled: [AtomicBool; NUM_AXES],
    estop: AtomicBool,
    endstop_min: [AtomicBool; NUM_AXES],
    endstop_max: [AtomicBool; NUM_AXES],
    home: AtomicBool,
}

impl SimIo {
    /// Create a simulator with all inputs released and outputs disarmed.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Test/simulation controls ────────────────────────────────────

    /// Press or release the emergency-stop input.
    pub fn set_estop(&self, pressed: bool) {
        self.estop.store(pressed, Ordering::Release);
    }

    /// Trigger or release the minimum endstop for an axis.
    pub fn set_endstop_min(&self, axis: Axis, triggered: bool) {
        self.endstop_min[axis.index()].store(triggered, Ordering::Release);
    }

    /// Trigger or release the maximum endstop for an axis.
    pub fn set_endstop_max(&self, axis: Axis, triggered: bool) {
        self.endstop_max[axis.index()].store(triggered, Ordering::Release);
    }

    /// Assert or release the home switch.
    pub fn set_home_switch(&self, at_home: bool) {
        self.home.store(at_home, Ordering::Release);
    }

    // ── Observers ───────────────────────────────────────────────────

    /// Pulses emitted on an axis since construction.
    pub fn pulses(&self, axis: Axis) -> u64 {
        self.step_counts[axis.index()].load(Ordering::Acquire)
    }

    /// Last commanded direction for an axis.
    pub fn direction(&self, axis: Axis) -> Direction {
        Direction::from_u8(self.directions[axis.index()].load(Ordering::Acquire))
            .unwrap_or_default()
    }

    /// Whether the driver enable output is armed.
    pub fn is_enabled(&self, axis: Axis) -> bool {
        self.enabled[axis.index()].load(Ordering::Acquire)
    }
}

impl StepPins for SimIo {
    fn step_pulse(&self, axis: Axis) {
        self.step_counts[axis.index()].fetch_add(1, Ordering::AcqRel);
    }

    fn set_direction(&self, axis: Axis, direction: Direction) {
        self.directions[axis.index()].store(direction as u8, Ordering::Release);
    }

    fn set_enable(&self, axis: Axis, enabled: bool) {
        self.enabled[axis.index()].store(enabled, Ordering::Release);
    }
}

impl SafetyPins for SimIo {
    fn estop_asserted(&self) -> bool {
        self.estop.load(Ordering::Acquire)
    }

    fn endstop_min(&self, axis: Axis) -> bool {
        self.endstop_min[axis.index()].load(Ordering::Acquire)
    }

    fn endstop_max(&self, axis: Axis) -> bool {
        self.endstop_max[axis.index()].load(Ordering::Acquire)
    }

    fn home_switch(&self) -> bool {
        self.home.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_observable() {
        let io = SimIo::new();
        io.step_pulse(Axis::Traverse);
        io.step_pulse(Axis::Traverse);
        io.step_pulse(Axis::Spindle);
        assert_eq!(io.pulses(Axis::Traverse), 2);
        assert_eq!(io.pulses(Axis::Spindle), 1);

        io.set_direction(Axis::Traverse, Direction::Reverse);
        assert_eq!(io.direction(Axis::Traverse), Direction::Reverse);

        io.set_enable(Axis::Spindle, true);
        assert!(io.is_enabled(Axis::Spindle));
        assert!(!io.is_enabled(Axis::Traverse));
    }

    #[test]
    fn inputs_togglable() {
        let io = SimIo::new();
        assert!(!io.estop_asserted());
        io.set_estop(true);
        assert!(io.estop_asserted());

        io.set_endstop_min(Axis::Traverse, true);
        assert!(io.endstop_min(Axis::Traverse));
        assert!(!io.endstop_max(Axis::Traverse));

        io.set_home_switch(true);
        assert!(io.home_switch());
    }
}
