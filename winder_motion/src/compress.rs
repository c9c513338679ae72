//! Step compression: trapezoid profiles → bounded-error chunk sequences.
//!
//! The compressor turns the analytically exact step times of a
//! [`TrapezoidProfile`] into a short sequence of [`StepChunk`]s whose
//! integer replay stays within a caller-supplied timing tolerance of the
//! ideal profile. The search is greedy left-to-right: at each position a
//! bisection finds the longest window whose least-squares
//! `interval`/`add` fit — evaluated by replaying the *rounded* integers,
//! so the guarantee survives quantization — meets the tolerance.
//!
//! An optional post-pass bounds the instantaneous velocity discontinuity
//! ("spike") at chunk boundaries: violating boundaries shed steps from
//! their longer neighbor and both sides are re-fit, for at most
//! [`SPIKE_OPT_MAX_PASSES`] passes.

use heapless::Vec as BoundedVec;
use thiserror::Error;
use tracing::debug;

use winder_common::axis::Axis;
use winder_common::chunk::StepChunk;
use winder_common::consts::MAX_MOVE_CHUNKS;

use crate::profile::{ProfileError, TrapezoidProfile};

/// Bounded chunk sequence produced by one compression.
pub type ChunkVec = BoundedVec<StepChunk, MAX_MOVE_CHUNKS>;

/// Upper bound on steps per chunk considered by the bisection search.
const MAX_CHUNK_STEPS: usize = 1024;

/// Maximum boundary-spike optimization passes before accepting a residual
/// spike. Tunable: each pass shrinks the longer neighbor of every violating
/// boundary by a quarter of its step count and re-fits both sides.
pub const SPIKE_OPT_MAX_PASSES: usize = 8;

/// A compressed move request from the command layer.
#[derive(Debug, Clone, Copy)]
pub struct MoveRequest {
    /// Target axis (routing only — the fit is axis-independent).
    pub axis: Axis,
    /// Entry velocity [steps/s].
    pub start_velocity: f64,
    /// Requested cruise velocity [steps/s].
    pub cruise_velocity: f64,
    /// Acceleration [steps/s²].
    pub acceleration: f64,
    /// Total step pulses to emit.
    pub total_steps: u32,
    /// Maximum timing error per step versus the ideal profile [µs].
    pub max_timing_error_us: f64,
    /// Maximum velocity discontinuity at chunk boundaries [steps/s].
    /// `None` disables the boundary optimization pass.
    pub max_spike_sps: Option<f64>,
}

/// Planning failures. No queue or hardware state is touched by any of
/// these — the request is rejected synchronously.
#[derive(Debug, Error)]
pub enum CompressError {
    /// The velocity profile itself is malformed.
    #[error("invalid motion profile: {0}")]
    Profile(#[from] ProfileError),

    /// Tolerance below the 1 µs timer resolution cannot be honored.
    #[error("timing tolerance must be at least 1 µs")]
    ToleranceTooTight,

    /// Spike tolerance must be a positive step rate.
    #[error("velocity spike tolerance must be positive")]
    InvalidSpikeBound,

    /// A step interval does not fit the timer range (velocity too low).
    #[error("step interval exceeds timer range")]
    IntervalOverflow,

    /// The move cannot be represented within the chunk ceiling.
    #[error("move requires more than {} chunks", MAX_MOVE_CHUNKS)]
    TooManyChunks,
}

/// One fitted window: the chunk plus its replayed worst-case error.
#[derive(Debug, Clone, Copy)]
struct Fitted {
    chunk: StepChunk,
    max_err_us: f64,
}

/// Compress a move into a bounded chunk sequence.
///
/// `total_steps == 0` is a no-op (empty sequence), not an error. The sum
/// of `count` over the result equals `total_steps` exactly.
pub fn compress_move(req: &MoveRequest) -> Result<ChunkVec, CompressError> {
    if req.total_steps == 0 {
        return Ok(ChunkVec::new());
    }
    if !req.max_timing_error_us.is_finite() || req.max_timing_error_us < 1.0 {
        return Err(CompressError::ToleranceTooTight);
    }
    if let Some(spike) = req.max_spike_sps
        && (!spike.is_finite() || spike <= 0.0)
    {
        return Err(CompressError::InvalidSpikeBound);
    }

    let profile = TrapezoidProfile::plan(
        req.start_velocity,
        req.cruise_velocity,
        req.acceleration,
        req.total_steps,
    )?;
    let times = profile.step_times_us();

    // Greedy left-to-right bisection over window length.
    let mut chunks = ChunkVec::new();
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut pos = 0usize;
    let mut t_acc = 0i64;
    while pos < times.len() {
        let (end, fitted) = bisect_window(&times, pos, t_acc, req.max_timing_error_us)?;
        t_acc += fitted.chunk.total_ticks();
        chunks
            .push(fitted.chunk)
            .map_err(|_| CompressError::TooManyChunks)?;
        ranges.push((pos, end));
        pos = end;
    }

    // Boundary-spike reduction.
    if let Some(max_spike) = req.max_spike_sps {
        for _ in 0..SPIKE_OPT_MAX_PASSES {
            if !adjust_ranges_for_spikes(&chunks, &mut ranges, max_spike) {
                break;
            }
            let (refit, new_ranges) = fit_ranges(&times, ranges, req.max_timing_error_us)?;
            chunks = refit;
            ranges = new_ranges;
        }
    }

    debug!(
        axis = req.axis.as_str(),
        steps = req.total_steps,
        chunks = chunks.len(),
        peak_sps = profile.peak_velocity(),
        triangular = profile.is_triangular(),
        "move compressed"
    );
    Ok(chunks)
}

/// Largest velocity discontinuity across all chunk boundaries [steps/s].
pub fn max_boundary_spike(chunks: &[StepChunk]) -> f64 {
    chunks
        .windows(2)
        .map(|pair| boundary_spike(&pair[0], &pair[1]))
        .fold(0.0, f64::max)
}

#[inline]
fn boundary_spike(left: &StepChunk, right: &StepChunk) -> f64 {
    let v_exit = 1e6 / left.exit_interval() as f64;
    let v_entry = 1e6 / right.entry_interval() as f64;
    (v_exit - v_entry).abs()
}

/// Binary-search the longest window starting at `pos` whose rounded fit
/// replays within `max_err_us`. Falls back to an exact single-step chunk.
fn bisect_window(
    times: &[f64],
    pos: usize,
    t_acc: i64,
    max_err_us: f64,
) -> Result<(usize, Fitted), CompressError> {
    let mut left = pos + 1;
    let mut right = times.len().min(pos + MAX_CHUNK_STEPS);
    let mut best: Option<(usize, Fitted)> = None;

    while left <= right {
        let mid = left + (right - left) / 2;
        match fit_window(times, pos, mid, t_acc) {
            Some(fitted) if fitted.max_err_us <= max_err_us => {
                best = Some((mid, fitted));
                left = mid + 1;
            }
            _ => {
                if mid == pos + 1 {
                    break;
                }
                right = mid - 1;
            }
        }
    }

    match best {
        Some(found) => Ok(found),
        // Single-step windows only fail on timer-range overflow.
        None => fit_window(times, pos, pos + 1, t_acc)
            .map(|fitted| (pos + 1, fitted))
            .ok_or(CompressError::IntervalOverflow),
    }
}

/// Least-squares fit of `t_k = interval·k + add·k(k-1)/2` over
/// `times[start..end]` relative to the integer replay time `t_acc`, with
/// the error evaluated by replaying the rounded integers.
///
/// Returns `None` when the window cannot be represented: degenerate normal
/// equations, an interval outside the timer range, or a ramp that would
/// need the clamp (implied interval below one tick).
fn fit_window(times: &[f64], start: usize, end: usize, t_acc: i64) -> Option<Fitted> {
    let window = end - start;
    let t0 = t_acc as f64;

    let (interval, add) = if window == 1 {
        let y = times[start] - t0;
        (y.round().max(1.0), 0.0)
    } else {
        // Normal equations for y_k = interval·x1 + add·x2,
        // x1 = k, x2 = k(k-1)/2.
        let mut s11 = 0.0;
        let mut s12 = 0.0;
        let mut s22 = 0.0;
        let mut sy1 = 0.0;
        let mut sy2 = 0.0;
        for i in 0..window {
            let k = (i + 1) as f64;
            let x1 = k;
            let x2 = k * (k - 1.0) / 2.0;
            let y = times[start + i] - t0;
            s11 += x1 * x1;
            s12 += x1 * x2;
            s22 += x2 * x2;
            sy1 += x1 * y;
            sy2 += x2 * y;
        }
        let det = s11 * s22 - s12 * s12;
        if det.abs() < 1e-12 {
            return None;
        }
        (
            ((s22 * sy1 - s12 * sy2) / det).round(),
            ((-s12 * sy1 + s11 * sy2) / det).round(),
        )
    };

    if !(1.0..=u32::MAX as f64).contains(&interval) || add.abs() > i32::MAX as f64 {
        return None;
    }
    let interval_i = interval as i64;
    let add_i = add as i64;
    // Reject ramps that would hit the one-tick clamp mid-chunk; the
    // linear model (and the error guarantee) only holds clamp-free.
    let final_interval = interval_i + add_i * (window as i64 - 1);
    if final_interval < 1 {
        return None;
    }

    let chunk = StepChunk::new(interval_i as u32, add_i as i32, window as u32);

    let mut max_err = 0.0f64;
    for (i, offset) in chunk.offsets().enumerate() {
        let err = (times[start + i] - (t0 + offset as f64)).abs();
        max_err = max_err.max(err);
    }

    Some(Fitted {
        chunk,
        max_err_us: max_err,
    })
}

/// Re-fit a full range partition in replay order. A range whose fit no
/// longer meets the tolerance is split at its midpoint and retried, so the
/// result always satisfies the error bound (or overflows the chunk
/// ceiling).
fn fit_ranges(
    times: &[f64],
    ranges: Vec<(usize, usize)>,
    max_err_us: f64,
) -> Result<(ChunkVec, Vec<(usize, usize)>), CompressError> {
    let mut work = ranges;
    let mut chunks = ChunkVec::new();
    let mut out_ranges = Vec::with_capacity(work.len());
    let mut t_acc = 0i64;
    let mut i = 0;
    while i < work.len() {
        let (start, end) = work[i];
        match fit_window(times, start, end, t_acc) {
            Some(fitted) if fitted.max_err_us <= max_err_us => {
                t_acc += fitted.chunk.total_ticks();
                chunks
                    .push(fitted.chunk)
                    .map_err(|_| CompressError::TooManyChunks)?;
                out_ranges.push((start, end));
                i += 1;
            }
            _ if end - start > 1 => {
                let mid = start + (end - start) / 2;
                work[i] = (start, mid);
                work.insert(i + 1, (mid, end));
            }
            _ => return Err(CompressError::IntervalOverflow),
        }
    }
    Ok((chunks, out_ranges))
}

/// Move steps away from the longer side of every boundary whose velocity
/// discontinuity exceeds `max_spike`. Returns false when nothing was (or
/// could be) adjusted — either all boundaries are clean or every violating
/// neighbor is already a single step.
fn adjust_ranges_for_spikes(
    chunks: &ChunkVec,
    ranges: &mut [(usize, usize)],
    max_spike: f64,
) -> bool {
    let mut adjusted = false;
    for i in 0..chunks.len().saturating_sub(1) {
        if boundary_spike(&chunks[i], &chunks[i + 1]) <= max_spike {
            continue;
        }
        let left_len = ranges[i].1 - ranges[i].0;
        let right_len = ranges[i + 1].1 - ranges[i + 1].0;
        if left_len >= right_len && left_len > 1 {
            // Shed the tail of the left chunk into the right one.
            let shed = (left_len / 4).max(1);
            ranges[i].1 -= shed;
            ranges[i + 1].0 -= shed;
            adjusted = true;
        } else if right_len > 1 {
            // Shed the head of the right chunk into the left one.
            let shed = (right_len / 4).max(1);
            ranges[i].1 += shed;
            ranges[i + 1].0 += shed;
            adjusted = true;
        }
    }
    adjusted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(
        start: f64,
        cruise: f64,
        accel: f64,
        steps: u32,
        err_us: f64,
        spike: Option<f64>,
    ) -> MoveRequest {
        MoveRequest {
            axis: Axis::Traverse,
            start_velocity: start,
            cruise_velocity: cruise,
            acceleration: accel,
            total_steps: steps,
            max_timing_error_us: err_us,
            max_spike_sps: spike,
        }
    }

    /// Replay a chunk sequence into absolute step times [ticks].
    fn replay(chunks: &[StepChunk]) -> Vec<i64> {
        let mut out = Vec::new();
        let mut t_acc = 0i64;
        for chunk in chunks {
            for offset in chunk.offsets() {
                out.push(t_acc + offset);
            }
            t_acc = *out.last().unwrap();
        }
        out
    }

    fn assert_replay_within(req: &MoveRequest, chunks: &[StepChunk]) {
        let profile = TrapezoidProfile::plan(
            req.start_velocity,
            req.cruise_velocity,
            req.acceleration,
            req.total_steps,
        )
        .unwrap();
        let ideal = profile.step_times_us();
        let actual = replay(chunks);
        assert_eq!(actual.len(), ideal.len());
        for (k, (t_ideal, t_actual)) in ideal.iter().zip(&actual).enumerate() {
            let err = (t_ideal - *t_actual as f64).abs();
            assert!(
                err <= req.max_timing_error_us,
                "step {k}: error {err:.2} µs exceeds {} µs",
                req.max_timing_error_us
            );
        }
    }

    #[test]
    fn zero_steps_is_empty_noop() {
        let chunks = compress_move(&request(0.0, 1000.0, 2000.0, 0, 25.0, None)).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn step_counts_are_exact() {
        for steps in [1, 7, 64, 500, 2000] {
            let chunks = compress_move(&request(0.0, 2000.0, 4000.0, steps, 25.0, None)).unwrap();
            let total: u64 = chunks.iter().map(|c| c.count as u64).sum();
            assert_eq!(total, steps as u64, "for {steps} steps");
        }
    }

    #[test]
    fn replay_stays_within_tolerance() {
        let req = request(100.0, 3000.0, 6000.0, 1500, 20.0, None);
        let chunks = compress_move(&req).unwrap();
        assert_replay_within(&req, &chunks);
    }

    #[test]
    fn example_800_step_triangle_compresses_small() {
        // The worked scenario: 0 → 4000 sps at 8000 sps² over 800 steps
        // degrades to a triangle and must compress far below one chunk per
        // step, with the final step time inside the error bound of the
        // analytic deceleration endpoint.
        let req = request(0.0, 4000.0, 8000.0, 800, 25.0, None);
        let chunks = compress_move(&req).unwrap();
        let total: u64 = chunks.iter().map(|c| c.count as u64).sum();
        assert_eq!(total, 800);
        assert!(chunks.len() < 800, "got {} chunks", chunks.len());

        let profile = TrapezoidProfile::plan(0.0, 4000.0, 8000.0, 800).unwrap();
        let last = *replay(&chunks).last().unwrap() as f64;
        assert!((last - profile.total_time_us()).abs() <= 25.0);

        assert_replay_within(&req, &chunks);
    }

    #[test]
    fn constant_velocity_compresses_to_few_chunks() {
        let chunks = compress_move(&request(500.0, 500.0, 0.0, 4000, 5.0, None)).unwrap();
        // 2000 µs intervals, exactly representable: the window cap is the
        // only thing forcing more than one chunk.
        assert!(chunks.len() <= 4);
        for chunk in &chunks {
            assert_eq!(chunk.interval, 2000);
            assert_eq!(chunk.add, 0);
        }
    }

    #[test]
    fn spike_bound_holds_after_optimization() {
        let req = request(200.0, 1000.0, 4000.0, 400, 10.0, Some(100.0));
        let chunks = compress_move(&req).unwrap();
        assert!(
            max_boundary_spike(&chunks) <= 100.0,
            "residual spike {:.1} sps",
            max_boundary_spike(&chunks)
        );
        // The error bound survives the re-fits.
        assert_replay_within(&req, &chunks);
    }

    #[test]
    fn adjust_sheds_steps_from_longer_side() {
        // 1000 sps → 2000 sps across the boundary: spike of 1000 sps.
        let mut chunks = ChunkVec::new();
        chunks.push(StepChunk::new(1000, 0, 20)).unwrap();
        chunks.push(StepChunk::new(500, 0, 4)).unwrap();
        let mut ranges = [(0usize, 20usize), (20, 24)];
        assert!(adjust_ranges_for_spikes(&chunks, &mut ranges, 100.0));
        // Left was longer: its tail moved into the right range.
        assert_eq!(ranges[0], (0, 15));
        assert_eq!(ranges[1], (15, 24));
    }

    #[test]
    fn adjust_leaves_clean_boundaries_alone() {
        let mut chunks = ChunkVec::new();
        chunks.push(StepChunk::new(1000, 0, 10)).unwrap();
        chunks.push(StepChunk::new(1010, 0, 10)).unwrap();
        let mut ranges = [(0usize, 10usize), (10, 20)];
        assert!(!adjust_ranges_for_spikes(&chunks, &mut ranges, 100.0));
        assert_eq!(ranges[0], (0, 10));
    }

    #[test]
    fn chunk_ceiling_is_enforced() {
        // More steps than MAX_MOVE_CHUNKS windows can ever hold.
        let steps = (MAX_MOVE_CHUNKS * MAX_CHUNK_STEPS + 1) as u32;
        let result = compress_move(&request(10_000.0, 10_000.0, 0.0, steps, 5.0, None));
        assert!(matches!(result, Err(CompressError::TooManyChunks)));
    }

    #[test]
    fn tolerance_below_timer_resolution_rejected() {
        let result = compress_move(&request(0.0, 1000.0, 2000.0, 100, 0.5, None));
        assert!(matches!(result, Err(CompressError::ToleranceTooTight)));
    }

    #[test]
    fn invalid_spike_bound_rejected() {
        let result = compress_move(&request(0.0, 1000.0, 2000.0, 100, 10.0, Some(0.0)));
        assert!(matches!(result, Err(CompressError::InvalidSpikeBound)));
    }

    #[test]
    fn malformed_profile_rejected() {
        let result = compress_move(&request(0.0, 0.0, 2000.0, 100, 10.0, None));
        assert!(matches!(result, Err(CompressError::Profile(_))));
    }
}
