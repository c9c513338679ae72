//! Three-phase homing sequence for the traverse axis.
//!
//! Coarse seek toward the home switch, back off a fixed distance, then a
//! slow fine seek for the final datum — each phase with its own speed and
//! travel bound. The sequence runs in the command context: it plans moves
//! through the compressor, feeds chunks to the move queue under
//! backpressure, and watches the home-switch input between ticks. The
//! machine state is gated by the safety monitor (`Idle → Homing` on start,
//! `Homing → Idle` on success, alarm on failure).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use winder_common::axis::{Axis, Direction};
use winder_common::chunk::StepChunk;
use winder_common::config::MotionConfig;

use crate::compress::{MoveRequest, compress_move};
use crate::hal::SafetyPins;
use crate::queue::MoveQueue;
use crate::safety::{SafetyMonitor, TransitionResult};

/// Timing tolerance for homing moves [µs]. Homing cares about the switch,
/// not step placement, so this is deliberately loose — it keeps the chunk
/// count of a full-travel seek small even at speeds whose ideal interval
/// is not a whole number of ticks.
const HOMING_TIMING_ERR_US: f64 = 500.0;

/// Phase of the homing sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingPhase {
    /// Not homing.
    Idle,
    /// Phase 1: seeking the home switch at coarse speed.
    CoarseSeek,
    /// Phase 2: backing off the switch.
    BackOff,
    /// Phase 3: re-approaching at fine speed for the datum.
    FineSeek,
    /// Sequence finished, position zeroed.
    Complete,
    /// Sequence failed (alarm latched).
    Failed,
}

/// Result of one supervisor tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingTick {
    /// Nothing to do.
    Idle,
    /// Sequence still running.
    InProgress,
    /// Homing finished; the machine is back in IDLE with a fresh datum.
    Complete,
    /// Homing failed; the safety monitor has latched an alarm.
    Failed(&'static str),
}

/// Command-context supervisor for the homing sequence.
///
/// Call [`HomingSequence::start`], then [`HomingSequence::tick`] every few
/// milliseconds until it reports `Complete` or `Failed`.
pub struct HomingSequence {
    queue: Arc<MoveQueue>,
    safety: Arc<SafetyMonitor>,
    pins: Arc<dyn SafetyPins>,
    phase: HomingPhase,
    /// Planned chunks not yet accepted by the queue (backpressure buffer).
    pending: VecDeque<StepChunk>,
    coarse_speed_sps: f64,
    fine_speed_sps: f64,
    accel_sps2: f64,
    backoff_steps: u32,
    max_travel_steps: u32,
    tick_period_us: u32,
}

impl HomingSequence {
    /// Build the supervisor from the loaded configuration.
    pub fn new(
        queue: Arc<MoveQueue>,
        safety: Arc<SafetyMonitor>,
        pins: Arc<dyn SafetyPins>,
        config: &MotionConfig,
    ) -> Self {
        let steps_per_mm = config.axis(Axis::Traverse).steps_per_mm;
        Self {
            queue,
            safety,
            pins,
            phase: HomingPhase::Idle,
            pending: VecDeque::new(),
            coarse_speed_sps: config.homing.coarse_speed_sps,
            fine_speed_sps: config.homing.fine_speed_sps,
            accel_sps2: config.homing.accel_sps2,
            backoff_steps: (config.homing.backoff_mm * steps_per_mm).round().max(1.0) as u32,
            max_travel_steps: (config.homing.max_travel_mm * steps_per_mm).round().max(1.0) as u32,
            tick_period_us: config.tick_period_us,
        }
    }

    /// Current phase.
    #[inline]
    pub fn phase(&self) -> HomingPhase {
        self.phase
    }

    /// Whether a sequence is running.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(
            self.phase,
            HomingPhase::CoarseSeek | HomingPhase::BackOff | HomingPhase::FineSeek
        )
    }

    /// Begin the sequence. Transitions the machine `Idle → Homing` and
    /// starts the coarse seek (or the back-off directly, when the switch
    /// is already asserted at start).
    pub fn start(&mut self) -> Result<(), &'static str> {
        if self.is_active() {
            return Err("homing already in progress");
        }
        if let TransitionResult::Rejected(reason) = self.safety.request_home() {
            return Err(reason);
        }

        self.queue.set_enable(Axis::Traverse, true);
        let planned = if self.pins.home_switch() {
            self.begin_backoff()
        } else {
            self.plan_move(Direction::Reverse, self.coarse_speed_sps, self.max_travel_steps)
                .map(|()| {
                    self.phase = HomingPhase::CoarseSeek;
                    info!("homing: coarse seek");
                })
        };
        if let Err(reason) = planned {
            self.phase = HomingPhase::Failed;
            self.safety.homing_failed();
            return Err(reason);
        }
        Ok(())
    }

    /// Advance the sequence. Call from the command loop every few
    /// milliseconds; never from the tick context.
    pub fn tick(&mut self) -> HomingTick {
        match self.phase {
            HomingPhase::Idle => HomingTick::Idle,
            HomingPhase::Complete => HomingTick::Complete,
            HomingPhase::Failed => HomingTick::Failed("homing already failed"),

            HomingPhase::CoarseSeek => {
                self.feed_pending();
                if self.pins.home_switch() {
                    self.halt_motion();
                    match self.begin_backoff() {
                        Ok(()) => HomingTick::InProgress,
                        Err(reason) => self.fail(reason),
                    }
                } else if self.drained() {
                    self.fail("home switch not found within max travel")
                } else {
                    HomingTick::InProgress
                }
            }

            HomingPhase::BackOff => {
                self.feed_pending();
                if !self.drained() {
                    return HomingTick::InProgress;
                }
                if self.pins.home_switch() {
                    return self.fail("home switch stuck after back-off");
                }
                // Fine seek only needs to recross the back-off distance;
                // double it for margin.
                match self.plan_move(
                    Direction::Reverse,
                    self.fine_speed_sps,
                    self.backoff_steps.saturating_mul(2),
                ) {
                    Ok(()) => {
                        self.phase = HomingPhase::FineSeek;
                        info!("homing: fine seek");
                        HomingTick::InProgress
                    }
                    Err(reason) => self.fail(reason),
                }
            }

            HomingPhase::FineSeek => {
                self.feed_pending();
                if self.pins.home_switch() {
                    self.halt_motion();
                    self.queue.zero_position(Axis::Traverse);
                    self.phase = HomingPhase::Complete;
                    self.safety.homing_complete();
                    info!("homing: datum established");
                    HomingTick::Complete
                } else if self.drained() {
                    self.fail("home switch lost during fine seek")
                } else {
                    HomingTick::InProgress
                }
            }
        }
    }

    /// Reset to `Idle` after a completed or failed sequence.
    pub fn reset(&mut self) {
        if !self.is_active() {
            self.phase = HomingPhase::Idle;
            self.pending.clear();
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    fn begin_backoff(&mut self) -> Result<(), &'static str> {
        self.plan_move(Direction::Forward, self.fine_speed_sps, self.backoff_steps)?;
        self.phase = HomingPhase::BackOff;
        info!("homing: back-off");
        Ok(())
    }

    /// Plan a homing move into the pending buffer and start feeding it.
    fn plan_move(
        &mut self,
        direction: Direction,
        speed_sps: f64,
        total_steps: u32,
    ) -> Result<(), &'static str> {
        let request = MoveRequest {
            axis: Axis::Traverse,
            start_velocity: 0.0,
            cruise_velocity: speed_sps,
            acceleration: self.accel_sps2,
            total_steps,
            max_timing_error_us: HOMING_TIMING_ERR_US,
            max_spike_sps: None,
        };
        let chunks = compress_move(&request).map_err(|_| "homing move planning failed")?;
        debug!(
            direction = ?direction,
            steps = total_steps,
            chunks = chunks.len(),
            "homing move planned"
        );
        self.queue.set_direction(Axis::Traverse, direction);
        self.pending.clear();
        self.pending.extend(chunks.iter().copied());
        self.feed_pending();
        Ok(())
    }

    /// Push buffered chunks while the queue accepts them.
    fn feed_pending(&mut self) {
        while let Some(chunk) = self.pending.front() {
            if self.queue.push_chunk(Axis::Traverse, *chunk) {
                self.pending.pop_front();
            } else {
                break;
            }
        }
    }

    /// True when the current move has fully executed: nothing buffered,
    /// nothing queued, nothing active.
    fn drained(&self) -> bool {
        self.pending.is_empty() && !self.queue.is_active(Axis::Traverse)
    }

    /// Stop traverse motion mid-move without tripping the clear contract:
    /// pause feeding, let any in-flight tick finish, then discard.
    fn halt_motion(&mut self) {
        self.queue.pause_feeding(Axis::Traverse);
        std::thread::sleep(Duration::from_micros(2 * self.tick_period_us as u64));
        self.queue.clear_queue(Axis::Traverse);
        self.pending.clear();
        self.queue.resume_feeding(Axis::Traverse);
    }

    fn fail(&mut self, reason: &'static str) -> HomingTick {
        self.halt_motion();
        self.phase = HomingPhase::Failed;
        self.safety.homing_failed();
        HomingTick::Failed(reason)
    }
}
