//! Per-axis move queues: the producer/consumer seam of the motion core.
//!
//! Each axis owns one arena-style ring buffer of [`StepChunk`]s with two
//! monotonic indices: `tail` is written only by the producer (command
//! context), `head` only by the consumer (tick context). Each side reads
//! the other's index without mutating it; combined with the bounded
//! capacity this single-writer-per-index discipline makes the queue safe
//! without locks — the hosted equivalent of an ISR-shared SPSC ring.
//!
//! The consumer additionally owns the active-chunk progress (remaining
//! steps, running interval, countdown accumulator), kept in an
//! `UnsafeCell` that only the tick context touches.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use winder_common::axis::{Axis, Direction};
use winder_common::chunk::StepChunk;
use winder_common::consts::{MOVE_CHUNKS_CAPACITY, NUM_AXES};

use crate::hal::StepPins;

const RING_MASK: u32 = MOVE_CHUNKS_CAPACITY as u32 - 1;

/// Outcome of a bounded completion wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The axis drained: no active chunk and no queued chunks.
    Completed,
    /// The timeout elapsed first. The move keeps executing — a timed-out
    /// wait never cancels anything.
    TimedOut,
}

/// Consumer-owned execution state for the chunk at the ring head.
#[derive(Debug, Default)]
struct ConsumerState {
    /// Steps left in the active chunk.
    remaining: u32,
    /// Running interval [timer ticks].
    interval: u32,
    /// Ticks until the next step is due; carries overshoot so the
    /// long-run step rate tracks the chunk exactly.
    countdown: i64,
    /// Per-step interval delta.
    add: i32,
    /// Direction-setup ticks still to burn before loading the next run.
    dir_wait: u32,
}

/// One axis's ring buffer plus its execution and diagnostic state.
struct AxisQueue {
    /// Chunk arena. Slot `i & RING_MASK` is written by the producer while
    /// it owns index `i` (i.e. `i` is in `[head, head+CAP)` but not yet
    /// published via `tail`) and read by the consumer after observing
    /// `tail > i`.
    slots: [UnsafeCell<StepChunk>; MOVE_CHUNKS_CAPACITY],
    /// Next chunk to consume. Written only by the consumer.
    head: AtomicU32,
    /// Next free slot. Written only by the producer.
    tail: AtomicU32,
    /// Consumer-owned active-chunk progress.
    consumer: UnsafeCell<ConsumerState>,
    /// Whether a chunk is mid-execution.
    active_running: AtomicBool,
    /// Feed hold: retain the queue, stop emitting.
    paused: AtomicBool,
    /// Driver enable output armed.
    enabled: AtomicBool,
    /// Current direction (`Direction` discriminant).
    direction: AtomicU8,
    /// A direction change happened since the last chunk load.
    dir_pending: AtomicBool,
    /// Total steps emitted since boot.
    step_count: AtomicU32,
    /// Signed step position (direction-weighted).
    position_steps: AtomicI64,
    /// Tick of the most recent step (or chunk load), for stall detection.
    last_step_tick: AtomicU64,
}

// SAFETY: `slots` follows the SPSC hand-off above — the producer writes a
// slot strictly before publishing it with a Release store of `tail`, and
// the consumer reads it only after an Acquire load observes that store.
// `consumer` is written from exactly one context at a time (the tick
// thread, or the producer while the consumer is quiescent — see
// `clear_queue`). Everything else is a single-word atomic.
unsafe impl Sync for AxisQueue {}
unsafe impl Send for AxisQueue {}

impl AxisQueue {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| UnsafeCell::new(StepChunk::new(1, 0, 1))),
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            consumer: UnsafeCell::new(ConsumerState::default()),
            active_running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            direction: AtomicU8::new(Direction::Forward as u8),
            dir_pending: AtomicBool::new(false),
            step_count: AtomicU32::new(0),
            position_steps: AtomicI64::new(0),
            last_step_tick: AtomicU64::new(0),
        }
    }
}

/// All per-axis move queues plus the step/direction/enable outputs.
pub struct MoveQueue {
    axes: [AxisQueue; NUM_AXES],
    pins: Arc<dyn StepPins>,
    dir_setup_ticks: u32,
}

impl MoveQueue {
    /// Create the queues. `dir_setup_ticks` is the delay enforced between
    /// a direction change and the first step of the next run.
    pub fn new(pins: Arc<dyn StepPins>, dir_setup_ticks: u32) -> Self {
        Self {
            axes: std::array::from_fn(|_| AxisQueue::new()),
            pins,
            dir_setup_ticks,
        }
    }

    // ── Producer operations (command context) ───────────────────────

    /// Queue a chunk for execution. Returns false when the ring is full —
    /// backpressure the caller must handle (retry or abort); nothing is
    /// dropped silently.
    pub fn push_chunk(&self, axis: Axis, chunk: StepChunk) -> bool {
        let q = &self.axes[axis.index()];
        let tail = q.tail.load(Ordering::Relaxed);
        let head = q.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= MOVE_CHUNKS_CAPACITY as u32 {
            return false;
        }
        // SAFETY: this slot is unpublished (tail not yet advanced past it)
        // and the producer is the only writer of unpublished slots.
        unsafe {
            *q.slots[(tail & RING_MASK) as usize].get() = chunk;
        }
        q.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Discard all queued chunks and the active chunk's progress.
    ///
    /// Contract: callable from the tick context itself (the safety halt
    /// path), or from the command context while the consumer is quiescent
    /// for this axis — scheduler stopped, axis paused, or queue inactive.
    /// Discarded chunks are gone; there is no resume-from-partial-chunk.
    pub fn clear_queue(&self, axis: Axis) {
        let q = &self.axes[axis.index()];
        q.active_running.store(false, Ordering::Release);
        let tail = q.tail.load(Ordering::Acquire);
        q.head.store(tail, Ordering::Release);
    }

    /// Suspend step emission without losing queued chunks (feed hold).
    pub fn pause_feeding(&self, axis: Axis) {
        self.axes[axis.index()].paused.store(true, Ordering::Release);
    }

    /// Resume step emission after a feed hold.
    pub fn resume_feeding(&self, axis: Axis) {
        self.axes[axis.index()].paused.store(false, Ordering::Release);
    }

    /// Arm or disarm the driver output. Queued chunks are unaffected; a
    /// disabled axis is simply skipped by the scheduler, so no pulses are
    /// emitted until it is re-enabled.
    pub fn set_enable(&self, axis: Axis, enabled: bool) {
        self.pins.set_enable(axis, enabled);
        self.axes[axis.index()].enabled.store(enabled, Ordering::Release);
    }

    /// Set the direction pin. The consumer delays the first step of the
    /// next run by the configured setup ticks.
    pub fn set_direction(&self, axis: Axis, direction: Direction) {
        let q = &self.axes[axis.index()];
        self.pins.set_direction(axis, direction);
        q.direction.store(direction as u8, Ordering::Release);
        q.dir_pending.store(true, Ordering::Release);
    }

    /// Reset the signed position counter (homing establishes the datum).
    /// Producer context, consumer quiescent — same contract as
    /// [`Self::clear_queue`].
    pub fn zero_position(&self, axis: Axis) {
        self.axes[axis.index()].position_steps.store(0, Ordering::Release);
    }

    /// Poll until the axis drains or the timeout elapses. Never cancels
    /// the underlying move.
    pub fn wait_for_completion(&self, axis: Axis, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_active(axis) {
                return WaitOutcome::Completed;
            }
            if Instant::now() >= deadline {
                return WaitOutcome::TimedOut;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    // ── Consumer operation (tick context) ───────────────────────────

    /// Advance the axis by one tick. Returns true when a step pulse is due
    /// this tick. Calling with an empty queue is a defined no-op.
    ///
    /// Consumer context only. At most one step fires per tick; intervals
    /// shorter than the tick period degrade to the tick rate rather than
    /// looping.
    pub fn pop_step(&self, axis: Axis, now_tick: u64, period_us: u32) -> bool {
        let q = &self.axes[axis.index()];
        // SAFETY: single consumer — this is the only context mutating
        // `consumer` while the axis is live (see `clear_queue` contract).
        let state = unsafe { &mut *q.consumer.get() };

        if !q.active_running.load(Ordering::Acquire) {
            let head = q.head.load(Ordering::Relaxed);
            let tail = q.tail.load(Ordering::Acquire);
            if head == tail {
                return false;
            }
            // Direction setup: burn the configured delay before the first
            // step of a run that follows a direction change.
            if q.dir_pending.swap(false, Ordering::AcqRel) {
                state.dir_wait = self.dir_setup_ticks;
            }
            if state.dir_wait > 0 {
                state.dir_wait -= 1;
                return false;
            }
            // SAFETY: the Acquire load of `tail` above published this slot.
            let chunk = unsafe { *q.slots[(head & RING_MASK) as usize].get() };
            q.head.store(head.wrapping_add(1), Ordering::Release);
            state.remaining = chunk.count;
            state.interval = chunk.interval;
            state.countdown = chunk.interval as i64;
            state.add = chunk.add;
            q.last_step_tick.store(now_tick, Ordering::Relaxed);
            q.active_running.store(true, Ordering::Release);
            return false;
        }

        state.countdown -= period_us as i64;
        if state.countdown > 0 {
            return false;
        }

        // Step due this tick.
        state.remaining -= 1;
        let next = (state.interval as i64 + state.add as i64).clamp(1, u32::MAX as i64);
        state.interval = next as u32;
        state.countdown += next;
        q.step_count.fetch_add(1, Ordering::Relaxed);
        let direction = Direction::from_u8(q.direction.load(Ordering::Relaxed)).unwrap_or_default();
        q.position_steps.fetch_add(direction.sign(), Ordering::Relaxed);
        q.last_step_tick.store(now_tick, Ordering::Relaxed);
        if state.remaining == 0 {
            q.active_running.store(false, Ordering::Release);
        }
        true
    }

    // ── Observers (any context) ─────────────────────────────────────

    /// True while a chunk is mid-execution or chunks remain queued.
    pub fn is_active(&self, axis: Axis) -> bool {
        let q = &self.axes[axis.index()];
        q.active_running.load(Ordering::Acquire)
            || q.head.load(Ordering::Acquire) != q.tail.load(Ordering::Acquire)
    }

    /// True only while a chunk is mid-execution. Unlike [`Self::is_active`]
    /// this ignores chunks still waiting at the ring head, so
    /// `last_step_tick` is guaranteed fresh whenever this returns true —
    /// the invariant stall detection relies on.
    pub fn is_executing(&self, axis: Axis) -> bool {
        self.axes[axis.index()].active_running.load(Ordering::Acquire)
    }

    /// Chunks queued between head and tail (excludes the active chunk).
    pub fn get_queue_depth(&self, axis: Axis) -> usize {
        let q = &self.axes[axis.index()];
        q.tail
            .load(Ordering::Acquire)
            .wrapping_sub(q.head.load(Ordering::Acquire)) as usize
    }

    /// Whether feeding is held for the axis.
    pub fn is_paused(&self, axis: Axis) -> bool {
        self.axes[axis.index()].paused.load(Ordering::Acquire)
    }

    /// Whether the driver output is armed.
    pub fn is_enabled(&self, axis: Axis) -> bool {
        self.axes[axis.index()].enabled.load(Ordering::Acquire)
    }

    /// Current commanded direction.
    pub fn direction(&self, axis: Axis) -> Direction {
        Direction::from_u8(self.axes[axis.index()].direction.load(Ordering::Acquire))
            .unwrap_or_default()
    }

    /// Total steps emitted on the axis since boot.
    pub fn get_step_count(&self, axis: Axis) -> u32 {
        self.axes[axis.index()].step_count.load(Ordering::Acquire)
    }

    /// Signed, direction-weighted step position.
    pub fn position_steps(&self, axis: Axis) -> i64 {
        self.axes[axis.index()].position_steps.load(Ordering::Acquire)
    }

    /// Tick of the most recent step activity on the axis.
    pub fn last_step_tick(&self, axis: Axis) -> u64 {
        self.axes[axis.index()].last_step_tick.load(Ordering::Acquire)
    }
}
