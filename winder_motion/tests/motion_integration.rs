//! Integration tests for the winder motion core.
//!
//! These exercise the full stack — compressor → move queue → scheduler
//! tick → safety monitor — the way the command layer drives it. Ticks are
//! driven deterministically through `Scheduler::tick_body`, except for the
//! threaded smoke test at the end.

use std::sync::Arc;
use std::time::{Duration, Instant};

use winder_common::axis::Axis;
use winder_common::chunk::StepChunk;
use winder_common::config::MotionConfig;
use winder_common::consts::MOVE_CHUNKS_CAPACITY;
use winder_common::fault::AlarmReason;
use winder_common::state::MachineState;
use winder_motion::compress::{MoveRequest, compress_move};
use winder_motion::hal::SimIo;
use winder_motion::queue::MoveQueue;
use winder_motion::safety::{SafetyMonitor, TransitionResult};
use winder_motion::scheduler::{Scheduler, SchedulerOptions};

struct Stack {
    io: Arc<SimIo>,
    queue: Arc<MoveQueue>,
    safety: Arc<SafetyMonitor>,
    scheduler: Arc<Scheduler>,
}

fn stack() -> Stack {
    stack_with(MotionConfig::default())
}

fn stack_with(config: MotionConfig) -> Stack {
    let io = Arc::new(SimIo::new());
    let queue = Arc::new(MoveQueue::new(io.clone(), config.dir_setup_ticks));
    let safety = Arc::new(SafetyMonitor::new(queue.clone(), io.clone(), &config));
    let scheduler = Arc::new(Scheduler::new(
        queue.clone(),
        safety.clone(),
        io.clone(),
        SchedulerOptions::default(),
    ));
    Stack {
        io,
        queue,
        safety,
        scheduler,
    }
}

#[test]
fn compressed_move_executes_to_completion() {
    let stack = stack();

    let request = MoveRequest {
        axis: Axis::Traverse,
        start_velocity: 0.0,
        cruise_velocity: 4000.0,
        acceleration: 8000.0,
        total_steps: 800,
        max_timing_error_us: 25.0,
        max_spike_sps: None,
    };
    let chunks = compress_move(&request).unwrap();
    assert!(chunks.len() < 800);

    assert_eq!(
        stack.safety.begin_winding(),
        TransitionResult::Ok(MachineState::Winding)
    );
    stack.queue.set_enable(Axis::Traverse, true);

    // Feed under backpressure while ticking, the way a command loop does.
    let mut pending = chunks.iter().copied().collect::<Vec<StepChunk>>();
    pending.reverse(); // pop() yields execution order
    let mut budget = 20_000_000u64;
    while stack.queue.is_active(Axis::Traverse) || !pending.is_empty() {
        while let Some(chunk) = pending.last() {
            if stack.queue.push_chunk(Axis::Traverse, *chunk) {
                pending.pop();
            } else {
                break;
            }
        }
        stack.scheduler.tick_body();
        budget -= 1;
        assert!(budget > 0, "move never drained");
    }

    assert_eq!(stack.io.pulses(Axis::Traverse), 800);
    assert_eq!(stack.queue.get_step_count(Axis::Traverse), 800);
    assert_eq!(
        stack.safety.finish_winding(),
        TransitionResult::Ok(MachineState::Idle)
    );
}

#[test]
fn estop_halts_within_ticks_and_reset_recovers() {
    let stack = stack();

    stack.safety.begin_winding();
    for axis in Axis::ALL {
        stack.queue.set_enable(axis, true);
        for _ in 0..8 {
            assert!(stack.queue.push_chunk(axis, StepChunk::new(100, 0, 10)));
        }
    }
    // Get some motion going first.
    for _ in 0..50 {
        stack.scheduler.tick_body();
    }
    let pulses_before = stack.io.pulses(Axis::Traverse);
    assert!(pulses_before > 0);

    stack.io.set_estop(true);
    // The halt must land within a small number of ticks.
    for _ in 0..10 {
        stack.scheduler.tick_body();
    }
    assert_eq!(stack.safety.state(), MachineState::Alarm);
    for axis in Axis::ALL {
        assert_eq!(stack.queue.get_queue_depth(axis), 0);
        assert!(!stack.queue.is_enabled(axis));
    }
    let record = stack.safety.fault().unwrap();
    assert_eq!(record.reason, AlarmReason::EstopButton);

    // Pushes still succeed during ALARM, but nothing pulses while the
    // drivers are disarmed.
    assert!(stack.queue.push_chunk(Axis::Traverse, StepChunk::new(100, 0, 5)));
    let pulses_at_halt = stack.io.pulses(Axis::Traverse);
    for _ in 0..100 {
        stack.scheduler.tick_body();
    }
    assert_eq!(stack.io.pulses(Axis::Traverse), pulses_at_halt);

    // Reset refused while the button is held, accepted after release.
    assert!(matches!(
        stack.safety.request_reset(),
        TransitionResult::Rejected(_)
    ));
    stack.io.set_estop(false);
    assert_eq!(
        stack.safety.request_reset(),
        TransitionResult::Ok(MachineState::Idle)
    );
    assert!(stack.safety.fault().is_none());
}

#[test]
fn feed_hold_retains_queued_motion() {
    let stack = stack();

    stack.safety.begin_winding();
    stack.queue.set_enable(Axis::Spindle, true);
    for _ in 0..4 {
        stack.queue.push_chunk(Axis::Spindle, StepChunk::new(100, 0, 5));
    }

    for _ in 0..20 {
        stack.scheduler.tick_body();
    }
    let pulses_at_hold = stack.io.pulses(Axis::Spindle);
    let depth_at_hold = stack.queue.get_queue_depth(Axis::Spindle);

    stack.safety.request_hold();
    for _ in 0..100 {
        stack.scheduler.tick_body();
    }
    // Nothing emitted, nothing lost.
    assert_eq!(stack.io.pulses(Axis::Spindle), pulses_at_hold);
    assert_eq!(stack.queue.get_queue_depth(Axis::Spindle), depth_at_hold);

    stack.safety.request_resume();
    let mut budget = 100_000u64;
    while stack.queue.is_active(Axis::Spindle) {
        stack.scheduler.tick_body();
        budget -= 1;
        assert!(budget > 0, "resume never drained the queue");
    }
    assert_eq!(stack.io.pulses(Axis::Spindle), 20);
}

#[test]
fn backpressure_surfaces_partial_move() {
    let stack = stack();

    for i in 0..MOVE_CHUNKS_CAPACITY {
        assert!(
            stack.queue.push_chunk(Axis::Traverse, StepChunk::new(100, 0, 1)),
            "push {i}"
        );
    }
    // The 65th chunk is rejected; everything already queued is intact.
    assert!(!stack.queue.push_chunk(Axis::Traverse, StepChunk::new(100, 0, 1)));
    assert_eq!(
        stack.queue.get_queue_depth(Axis::Traverse),
        MOVE_CHUNKS_CAPACITY
    );
}

#[test]
fn threaded_scheduler_halts_on_estop() {
    let stack = stack();

    stack.safety.begin_winding();
    stack.queue.set_enable(Axis::Traverse, true);
    for _ in 0..16 {
        stack.queue.push_chunk(Axis::Traverse, StepChunk::new(1000, 0, 50));
    }

    stack.scheduler.start(200).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(stack.scheduler.is_running());

    stack.io.set_estop(true);
    // Generous wall-clock bound; the tick-count bound is what matters and
    // is asserted by the deterministic test above.
    let deadline = Instant::now() + Duration::from_secs(1);
    while stack.safety.state() != MachineState::Alarm {
        assert!(Instant::now() < deadline, "alarm never latched");
        std::thread::sleep(Duration::from_millis(1));
    }

    stack.scheduler.stop();
    assert_eq!(stack.queue.get_queue_depth(Axis::Traverse), 0);
    assert!(!stack.queue.is_enabled(Axis::Traverse));
    stack.safety.drain_fault_log();
}
