//! Safety monitor: the single owner of machine-state transitions.
//!
//! Every transition of the global [`MachineState`] funnels through this
//! module — command-driven ones (`request_home`, `begin_winding`,
//! `request_hold`, `request_reset`, …) and fault-driven ones. The per-tick
//! check runs inside the scheduler's tick context and is O(1) per axis:
//! pin reads and counter comparisons only. When it trips, the alarm path
//! executes synchronously in that same tick — latch the cause, clear every
//! queue, disarm every driver, store `Alarm` — so the halt is bounded by a
//! single tick period.
//!
//! Heavier bookkeeping (the log record for the halt) happens outside the
//! tick: the command loop calls [`SafetyMonitor::drain_fault_log`] after
//! the halt has already taken effect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{error, info};

use winder_common::axis::Axis;
use winder_common::config::MotionConfig;
use winder_common::consts::NUM_AXES;
use winder_common::fault::{AlarmReason, FaultFlags, FaultRecord, LatchedFault};
use winder_common::state::{MachineState, MachineStateCell};

use crate::hal::SafetyPins;
use crate::queue::MoveQueue;

/// Verdict of the per-tick safety check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickVerdict {
    /// Motion is permitted this tick.
    Run,
    /// Skip all step generation this tick.
    Halted,
}

/// Result of a command-driven transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded — new state.
    Ok(MachineState),
    /// Transition rejected — reason.
    Rejected(&'static str),
}

/// Per-axis soft travel limits, pre-converted to steps.
#[derive(Debug, Clone, Copy, Default)]
struct SoftLimit {
    min_steps: i64,
    max_steps: i64,
    enabled: bool,
}

/// The safety supervisor.
pub struct SafetyMonitor {
    state: MachineStateCell,
    fault: LatchedFault,
    queue: Arc<MoveQueue>,
    pins: Arc<dyn SafetyPins>,
    stall_timeout_ticks: u64,
    soft_limits: [SoftLimit; NUM_AXES],
    /// Tick of the most recent per-tick check, for faults reported from
    /// the command context (homing failure).
    last_tick: AtomicU64,
    fault_logged: AtomicBool,
}

impl SafetyMonitor {
    /// Build the monitor from the loaded configuration. Boot state is
    /// `Idle`.
    pub fn new(queue: Arc<MoveQueue>, pins: Arc<dyn SafetyPins>, config: &MotionConfig) -> Self {
        let soft_limits = std::array::from_fn(|i| {
            // Indices come from Axis::ALL, which covers 0..NUM_AXES.
            let axis = Axis::from_u8(i as u8).unwrap_or(Axis::Traverse);
            let ax = config.axis(axis);
            SoftLimit {
                min_steps: (ax.soft_limit_min_mm * ax.steps_per_mm).floor() as i64,
                max_steps: (ax.soft_limit_max_mm * ax.steps_per_mm).ceil() as i64,
                enabled: ax.soft_limits_enabled,
            }
        });
        Self {
            state: MachineStateCell::new(MachineState::Idle),
            fault: LatchedFault::new(),
            queue,
            pins,
            stall_timeout_ticks: config.stall_timeout_ticks(),
            soft_limits,
            last_tick: AtomicU64::new(0),
            fault_logged: AtomicBool::new(false),
        }
    }

    // ── Tick context ────────────────────────────────────────────────

    /// Per-tick safety check. O(1) per axis: pin reads and counter
    /// comparisons. Returns [`TickVerdict::Halted`] when motion must not
    /// be generated this tick.
    pub fn check_tick(&self, now: u64) -> TickVerdict {
        self.last_tick.store(now, Ordering::Relaxed);

        let state = self.state.load();
        if state == MachineState::Alarm {
            return TickVerdict::Halted;
        }

        if self.pins.estop_asserted() {
            self.trigger_alarm(AlarmReason::EstopButton, None, now);
            return TickVerdict::Halted;
        }

        for axis in Axis::ALL {
            if self.pins.endstop_min(axis) {
                self.trigger_alarm(AlarmReason::EndstopMin, Some(axis), now);
                return TickVerdict::Halted;
            }
            if self.pins.endstop_max(axis) {
                self.trigger_alarm(AlarmReason::EndstopMax, Some(axis), now);
                return TickVerdict::Halted;
            }

            // Soft limits are meaningful only once the datum exists, so
            // they gate on the winding state (homing establishes it).
            let limit = &self.soft_limits[axis.index()];
            if limit.enabled && state == MachineState::Winding {
                let position = self.queue.position_steps(axis);
                if position < limit.min_steps || position > limit.max_steps {
                    self.trigger_alarm(AlarmReason::SoftLimit, Some(axis), now);
                    return TickVerdict::Halted;
                }
            }

            // Stall: motion commanded but no step activity for too long.
            // Keyed on the executing chunk, whose load refreshed
            // `last_step_tick` — a chunk still waiting at the ring head
            // must not inherit a stale timestamp.
            let commanded = (state == MachineState::Winding || state == MachineState::Homing)
                && self.queue.is_enabled(axis)
                && !self.queue.is_paused(axis)
                && self.queue.is_executing(axis);
            if commanded
                && now.saturating_sub(self.queue.last_step_tick(axis)) > self.stall_timeout_ticks
            {
                self.trigger_alarm(AlarmReason::Stall, Some(axis), now);
                return TickVerdict::Halted;
            }
        }

        TickVerdict::Run
    }

    /// Unconditionally halt motion and latch the cause.
    ///
    /// Runs synchronously wherever the fault is detected — inside the
    /// tick for pin/stall faults, from the command context for homing
    /// failures. Disarms every driver and clears every queue; queues stay
    /// usable (pushes are still accepted) but nothing executes while the
    /// drivers are disarmed. The reset path re-clears the queues, which
    /// closes the benign window where a tick in flight re-activates a
    /// chunk being cleared from the command context.
    pub fn trigger_alarm(&self, reason: AlarmReason, axis: Option<Axis>, now: u64) {
        let first = self.fault.latch(reason, axis, now);
        if !first && self.state.load() == MachineState::Alarm {
            return;
        }
        for ax in Axis::ALL {
            self.queue.set_enable(ax, false);
            self.queue.clear_queue(ax);
        }
        self.state.store(MachineState::Alarm);
    }

    // ── Command context ─────────────────────────────────────────────

    /// `Idle → Homing` on an explicit home request.
    pub fn request_home(&self) -> TransitionResult {
        if self.state.transition(MachineState::Idle, MachineState::Homing) {
            info!("homing started");
            TransitionResult::Ok(MachineState::Homing)
        } else {
            TransitionResult::Rejected("homing requires IDLE")
        }
    }

    /// `Homing → Idle` on successful completion of the homing sequence.
    pub fn homing_complete(&self) -> TransitionResult {
        if self.state.transition(MachineState::Homing, MachineState::Idle) {
            info!("homing complete");
            TransitionResult::Ok(MachineState::Idle)
        } else {
            TransitionResult::Rejected("not homing")
        }
    }

    /// Homing failure is fatal to the sequence: latch an alarm.
    pub fn homing_failed(&self) {
        let now = self.last_tick.load(Ordering::Relaxed);
        self.trigger_alarm(AlarmReason::HomingFailed, Some(Axis::Traverse), now);
    }

    /// `Idle → Winding` when the winding process starts feeding moves.
    pub fn begin_winding(&self) -> TransitionResult {
        if self.state.transition(MachineState::Idle, MachineState::Winding) {
            info!("winding started");
            TransitionResult::Ok(MachineState::Winding)
        } else {
            TransitionResult::Rejected("winding requires IDLE")
        }
    }

    /// `Winding → Idle` when the winding process finishes.
    pub fn finish_winding(&self) -> TransitionResult {
        if self.state.transition(MachineState::Winding, MachineState::Idle) {
            info!("winding finished");
            TransitionResult::Ok(MachineState::Idle)
        } else {
            TransitionResult::Rejected("not winding")
        }
    }

    /// Feed hold: `Idle/Winding → Hold`. Suspends feeding on every axis;
    /// queued chunks are retained.
    pub fn request_hold(&self) -> TransitionResult {
        let held = self.state.transition(MachineState::Winding, MachineState::Hold)
            || self.state.transition(MachineState::Idle, MachineState::Hold);
        if held {
            for axis in Axis::ALL {
                self.queue.pause_feeding(axis);
            }
            info!("feed hold");
            TransitionResult::Ok(MachineState::Hold)
        } else {
            TransitionResult::Rejected("hold requires IDLE or WINDING")
        }
    }

    /// Resume from feed hold: `Hold → Winding`.
    pub fn request_resume(&self) -> TransitionResult {
        if self.state.transition(MachineState::Hold, MachineState::Winding) {
            for axis in Axis::ALL {
                self.queue.resume_feeding(axis);
            }
            info!("feed resumed");
            TransitionResult::Ok(MachineState::Winding)
        } else {
            TransitionResult::Rejected("resume requires HOLD")
        }
    }

    /// `Alarm → Idle`, refused while any triggering input is still
    /// physically asserted. Drivers stay disarmed — the command layer
    /// re-enables axes explicitly once it is ready to move again.
    pub fn request_reset(&self) -> TransitionResult {
        if self.state.load() != MachineState::Alarm {
            return TransitionResult::Rejected("no alarm latched");
        }
        if self.pins.estop_asserted() {
            return TransitionResult::Rejected("emergency stop still asserted");
        }
        for axis in Axis::ALL {
            if self.pins.endstop_min(axis) || self.pins.endstop_max(axis) {
                return TransitionResult::Rejected("endstop still triggered");
            }
        }

        // The tick context is quiescent in Alarm, so clearing from here
        // is race-free and finishes any clear a tick raced earlier.
        for axis in Axis::ALL {
            self.queue.clear_queue(axis);
        }
        self.fault.clear();
        self.fault_logged.store(false, Ordering::Release);
        self.state.store(MachineState::Idle);
        info!("alarm reset");
        TransitionResult::Ok(MachineState::Idle)
    }

    // ── Observers ───────────────────────────────────────────────────

    /// Current machine state.
    #[inline]
    pub fn state(&self) -> MachineState {
        self.state.load()
    }

    /// Cause captured when the current alarm triggered, if any.
    #[inline]
    pub fn fault(&self) -> Option<FaultRecord> {
        self.fault.record()
    }

    /// Every condition seen while the current alarm has been active.
    #[inline]
    pub fn fault_flags(&self) -> FaultFlags {
        self.fault.flags()
    }

    /// Emit the halt-reason log record once per alarm. Call from the
    /// command loop, never from the tick context.
    pub fn drain_fault_log(&self) {
        if let Some(record) = self.fault.record()
            && !self.fault_logged.swap(true, Ordering::AcqRel)
        {
            error!(
                reason = record.reason.as_str(),
                axis = record.axis.map(|a| a.as_str()).unwrap_or("-"),
                tick = record.tick,
                "motion halted"
            );
        }
    }
}
