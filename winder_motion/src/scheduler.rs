//! Fixed-period scheduler: the tick context of the motion core.
//!
//! The scheduler owns a dedicated periodic thread standing in for the
//! hardware-timer interrupt: every period it runs the safety check, feeds
//! each enabled axis from its move queue, fires due step pulses, and
//! increments the monotonic tick counter. The tick body is strictly
//! bounded — no blocking syscalls, no allocation, no floating point, no
//! unbounded loops.
//!
//! ## RT Setup Sequence (`rt` feature)
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)` — lock all pages.
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity` — pin to an isolated CPU core.
//! 4. `sched_setscheduler(SCHED_FIFO)` — RT priority.
//!
//! Pacing uses `clock_nanosleep(TIMER_ABSTIME)` on `CLOCK_MONOTONIC` for
//! drift-free cycles; simulation builds fall back to `std::thread::sleep`
//! and tolerate overruns (they are counted either way).

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::JoinHandle;

use thiserror::Error;
use tracing::{info, warn};

use winder_common::axis::Axis;
use winder_common::consts::DEFAULT_TICK_PERIOD_US;

use crate::hal::StepPins;
use crate::queue::MoveQueue;
use crate::safety::{SafetyMonitor, TickVerdict};

/// Errors from scheduler control or RT setup.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `start` called while the tick thread is live.
    #[error("scheduler already running")]
    AlreadyRunning,

    /// Tick period must be positive.
    #[error("tick period must be positive")]
    ZeroPeriod,

    /// Thread spawn failed.
    #[error("cannot spawn tick thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// An RT system call failed.
    #[error("RT setup error: {0}")]
    RtSetup(String),
}

/// CPU placement and priority for the tick thread (used by the `rt`
/// feature; inert in simulation builds).
#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    /// CPU core to pin the tick thread to.
    pub cpu_core: usize,
    /// SCHED_FIFO priority.
    pub rt_priority: i32,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            cpu_core: 1,
            rt_priority: 80,
        }
    }
}

/// The fixed-period tick driver.
///
/// `STOPPED → start(period) → RUNNING → stop() → STOPPED`. The tick body
/// is exposed as [`Scheduler::tick_body`] so tests can drive it
/// deterministically without the thread.
pub struct Scheduler {
    queue: Arc<MoveQueue>,
    safety: Arc<SafetyMonitor>,
    pins: Arc<dyn StepPins>,
    options: SchedulerOptions,
    period_us: AtomicU32,
    tick_count: AtomicU64,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
    overruns: AtomicU64,
    max_tick_ns: AtomicU64,
}

impl Scheduler {
    /// Create a stopped scheduler. The tick period defaults to
    /// [`DEFAULT_TICK_PERIOD_US`] until [`Scheduler::start`] sets it.
    pub fn new(
        queue: Arc<MoveQueue>,
        safety: Arc<SafetyMonitor>,
        pins: Arc<dyn StepPins>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            queue,
            safety,
            pins,
            options,
            period_us: AtomicU32::new(DEFAULT_TICK_PERIOD_US),
            tick_count: AtomicU64::new(0),
            running: AtomicBool::new(false),
            thread: Mutex::new(None),
            overruns: AtomicU64::new(0),
            max_tick_ns: AtomicU64::new(0),
        }
    }

    /// Start the periodic tick thread with the given period.
    pub fn start(self: &Arc<Self>, period_us: u32) -> Result<(), SchedulerError> {
        if period_us == 0 {
            return Err(SchedulerError::ZeroPeriod);
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.period_us.store(period_us, Ordering::Release);

        let scheduler = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("winder-tick".into())
            .spawn(move || scheduler.run_loop())
            .inspect_err(|_| self.running.store(false, Ordering::Release))?;

        if let Ok(mut guard) = self.thread.lock() {
            *guard = Some(handle);
        }
        info!(period_us, "scheduler started");
        Ok(())
    }

    /// Stop the tick thread and join it. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut guard) = self.thread.lock()
            && let Some(handle) = guard.take()
        {
            let _ = handle.join();
        }
        info!(
            ticks = self.tick_count.load(Ordering::Acquire),
            overruns = self.overruns.load(Ordering::Acquire),
            "scheduler stopped"
        );
    }

    /// Whether the tick thread is live.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Monotonic tick counter (increments every period, halted or not).
    #[inline]
    pub fn get_tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Acquire)
    }

    /// Ticks whose body overran the period.
    #[inline]
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Acquire)
    }

    /// Worst observed tick-body duration [ns].
    #[inline]
    pub fn max_tick_ns(&self) -> u64 {
        self.max_tick_ns.load(Ordering::Acquire)
    }

    /// One scheduler tick.
    ///
    /// Order is fixed: safety check first; on halt, skip all step
    /// generation (the safety monitor already cleared the queues); else
    /// feed every enabled, unpaused axis and fire due pulses; finally
    /// advance the tick counter. Single writer: only the tick thread (or
    /// a test driving it directly) calls this.
    pub fn tick_body(&self) {
        let now = self.tick_count.load(Ordering::Relaxed);
        let period = self.period_us.load(Ordering::Relaxed);

        if self.safety.check_tick(now) == TickVerdict::Run {
            for axis in Axis::ALL {
                if self.queue.is_enabled(axis)
                    && !self.queue.is_paused(axis)
                    && self.queue.pop_step(axis, now, period)
                {
                    self.pins.step_pulse(axis);
                }
            }
        }

        self.tick_count.store(now + 1, Ordering::Release);
    }

    /// Thread body: RT setup for this thread, then pace `tick_body` at the
    /// configured period.
    fn run_loop(&self) {
        if let Err(e) = rt_setup(&self.options) {
            warn!("RT setup failed, continuing without RT guarantees: {e}");
        }

        #[cfg(feature = "rt")]
        self.run_rt_loop();

        #[cfg(not(feature = "rt"))]
        self.run_sim_loop();
    }

    /// Drift-free pacing via absolute-time sleeps on CLOCK_MONOTONIC.
    #[cfg(feature = "rt")]
    fn run_rt_loop(&self) {
        use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

        let clock = ClockId::CLOCK_MONOTONIC;
        let period_ns = self.period_us.load(Ordering::Acquire) as i64 * 1000;
        let mut next_wake = match clock_gettime(clock) {
            Ok(now) => now,
            Err(e) => {
                warn!("clock_gettime failed, tick thread exiting: {e}");
                return;
            }
        };

        while self.running.load(Ordering::Acquire) {
            next_wake = timespec_add_ns(next_wake, period_ns);

            let start = clock_gettime(clock).unwrap_or(next_wake);
            self.tick_body();
            let end = clock_gettime(clock).unwrap_or(start);

            let duration_ns = timespec_diff_ns(&end, &start);
            self.max_tick_ns
                .fetch_max(duration_ns.max(0) as u64, Ordering::Relaxed);
            if duration_ns > period_ns {
                self.overruns.fetch_add(1, Ordering::Relaxed);
            }

            let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake);
        }
    }

    /// Approximate pacing for simulation builds. Overruns are counted but
    /// tolerated.
    #[cfg(not(feature = "rt"))]
    fn run_sim_loop(&self) {
        use std::time::{Duration, Instant};

        let period = Duration::from_micros(self.period_us.load(Ordering::Acquire) as u64);

        while self.running.load(Ordering::Acquire) {
            let start = Instant::now();
            self.tick_body();
            let elapsed = start.elapsed();

            self.max_tick_ns
                .fetch_max(elapsed.as_nanos() as u64, Ordering::Relaxed);
            if elapsed > period {
                self.overruns.fetch_add(1, Ordering::Relaxed);
            } else {
                std::thread::sleep(period - elapsed);
            }
        }
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Lock all current and future memory pages.
#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), SchedulerError> {
    use nix::sys::mman::{MlockAllFlags, mlockall};
    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
        .map_err(|e| SchedulerError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), SchedulerError> {
    Ok(()) // No-op in simulation mode
}

/// Touch a stack region so the RT thread never page-faults on it.
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        // Volatile write so the loop is not optimized away.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

/// Pin the current thread to a CPU core.
#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), SchedulerError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| SchedulerError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| SchedulerError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), SchedulerError> {
    Ok(()) // No-op in simulation mode
}

/// Set SCHED_FIFO with the given priority.
#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), SchedulerError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(SchedulerError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), SchedulerError> {
    Ok(()) // No-op in simulation mode
}

/// Perform the full RT setup sequence for the calling thread.
///
/// In simulation builds (no `rt` feature) every step except the stack
/// prefault is a no-op.
pub fn rt_setup(options: &SchedulerOptions) -> Result<(), SchedulerError> {
    rt_mlockall()?;
    prefault_stack();
    rt_set_affinity(options.cpu_core)?;
    rt_set_scheduler(options.rt_priority)?;
    Ok(())
}

// ─── Time Helpers ───────────────────────────────────────────────────

/// Add nanoseconds to a TimeSpec.
#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let mut secs = ts.tv_sec();
    let mut nanos = ts.tv_nsec() + ns;
    while nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    while nanos < 0 {
        secs -= 1;
        nanos += 1_000_000_000;
    }
    TimeSpec::new(secs, nanos)
}

/// Difference (a - b) in nanoseconds.
#[cfg(feature = "rt")]
fn timespec_diff_ns(a: &nix::sys::time::TimeSpec, b: &nix::sys::time::TimeSpec) -> i64 {
    (a.tv_sec() - b.tv_sec()) * 1_000_000_000 + (a.tv_nsec() - b.tv_nsec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::SimIo;
    use winder_common::chunk::StepChunk;
    use winder_common::config::MotionConfig;

    fn stack() -> (Arc<SimIo>, Arc<MoveQueue>, Arc<SafetyMonitor>, Arc<Scheduler>) {
        let io = Arc::new(SimIo::new());
        let queue = Arc::new(MoveQueue::new(io.clone(), 0));
        let config = MotionConfig::default();
        let safety = Arc::new(SafetyMonitor::new(queue.clone(), io.clone(), &config));
        let scheduler = Arc::new(Scheduler::new(
            queue.clone(),
            safety.clone(),
            io.clone(),
            SchedulerOptions::default(),
        ));
        (io, queue, safety, scheduler)
    }

    #[test]
    fn tick_body_emits_pulses_for_enabled_axes() {
        let (io, queue, _safety, scheduler) = stack();
        queue.set_enable(Axis::Traverse, true);
        queue.push_chunk(Axis::Traverse, StepChunk::new(50, 0, 3));

        for _ in 0..10 {
            scheduler.tick_body();
        }
        assert_eq!(io.pulses(Axis::Traverse), 3);
        assert_eq!(scheduler.get_tick_count(), 10);
    }

    #[test]
    fn disabled_axis_emits_nothing_and_keeps_chunks() {
        let (io, queue, _safety, scheduler) = stack();
        queue.push_chunk(Axis::Traverse, StepChunk::new(50, 0, 3));

        for _ in 0..10 {
            scheduler.tick_body();
        }
        assert_eq!(io.pulses(Axis::Traverse), 0);
        // The queue is not consumed while disabled.
        assert_eq!(queue.get_queue_depth(Axis::Traverse), 1);
    }

    #[test]
    fn paused_axis_emits_nothing() {
        let (io, queue, _safety, scheduler) = stack();
        queue.set_enable(Axis::Spindle, true);
        queue.pause_feeding(Axis::Spindle);
        queue.push_chunk(Axis::Spindle, StepChunk::new(50, 0, 2));

        for _ in 0..10 {
            scheduler.tick_body();
        }
        assert_eq!(io.pulses(Axis::Spindle), 0);

        queue.resume_feeding(Axis::Spindle);
        for _ in 0..10 {
            scheduler.tick_body();
        }
        assert_eq!(io.pulses(Axis::Spindle), 2);
    }

    #[test]
    fn tick_counter_advances_while_halted() {
        let (io, _queue, _safety, scheduler) = stack();
        io.set_estop(true);
        for _ in 0..5 {
            scheduler.tick_body();
        }
        assert_eq!(scheduler.get_tick_count(), 5);
    }

    #[test]
    fn start_stop_lifecycle() {
        let (_io, queue, _safety, scheduler) = stack();
        queue.set_enable(Axis::Traverse, true);
        queue.push_chunk(Axis::Traverse, StepChunk::new(500, 0, 10));

        assert!(!scheduler.is_running());
        scheduler.start(500).unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.start(500),
            Err(SchedulerError::AlreadyRunning)
        ));

        // Generous margin: sleep-based pacing can overshoot heavily.
        std::thread::sleep(std::time::Duration::from_millis(300));
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(scheduler.get_tick_count() >= 10);

        // Idempotent stop.
        scheduler.stop();
    }

    #[test]
    fn zero_period_rejected() {
        let (_io, _queue, _safety, scheduler) = stack();
        assert!(matches!(scheduler.start(0), Err(SchedulerError::ZeroPeriod)));
        assert!(!scheduler.is_running());
    }

    #[test]
    fn rt_setup_is_noop_without_feature() {
        #[cfg(not(feature = "rt"))]
        rt_setup(&SchedulerOptions::default()).unwrap();
    }
}
