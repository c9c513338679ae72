//! Analytic trapezoidal velocity profiles.
//!
//! A profile answers one question exactly: at what absolute time does the
//! k-th step of a move occur? The answer comes from the closed-form phase
//! equations of the trapezoid (accelerate → cruise → decelerate), never
//! from numeric integration, so the compressor has a drift-free reference
//! to fit against.
//!
//! When the requested acceleration cannot reach cruise velocity before the
//! midpoint of the move, the profile degrades to a triangular shape: the
//! nominal peak velocity is lowered to `sqrt(sv² + a·n)` so the accelerate
//! and decelerate halves meet exactly — the cruise phase is never clipped
//! asymmetrically.

use thiserror::Error;

/// Rejection reasons for a malformed profile request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProfileError {
    /// A velocity or acceleration was NaN/infinite or negative.
    #[error("profile parameter is not a finite non-negative number")]
    NotFinite,
    /// Cruise velocity must be positive for any motion to occur.
    #[error("cruise velocity must be positive")]
    ZeroCruise,
    /// Zero acceleration is only meaningful for constant-velocity moves.
    #[error("zero acceleration requires cruise velocity == start velocity")]
    ZeroAccelRamp,
}

/// A planned trapezoidal (or degraded triangular) velocity profile.
///
/// Velocities in steps/s, acceleration in steps/s², times in seconds.
#[derive(Debug, Clone, Copy)]
pub struct TrapezoidProfile {
    start_velocity: f64,
    peak_velocity: f64,
    acceleration: f64,
    total_steps: u32,
    /// Steps spent accelerating (fractional — phase boundaries need not
    /// land on a step).
    accel_steps: f64,
    /// Step position where deceleration begins.
    decel_start: f64,
    /// Time at the end of the acceleration phase [s].
    t_accel_end: f64,
    /// Time at the end of the cruise phase [s].
    t_cruise_end: f64,
}

impl TrapezoidProfile {
    /// Plan a profile.
    ///
    /// `cruise_velocity` below `start_velocity` is clamped up to the start
    /// velocity (a move never decelerates below its entry speed mid-ramp).
    pub fn plan(
        start_velocity: f64,
        cruise_velocity: f64,
        acceleration: f64,
        total_steps: u32,
    ) -> Result<Self, ProfileError> {
        if !start_velocity.is_finite()
            || !cruise_velocity.is_finite()
            || !acceleration.is_finite()
            || start_velocity < 0.0
            || acceleration < 0.0
        {
            return Err(ProfileError::NotFinite);
        }
        if cruise_velocity <= 0.0 {
            return Err(ProfileError::ZeroCruise);
        }

        let sv = start_velocity;
        let cruise = cruise_velocity.max(sv);
        let n = total_steps as f64;

        if acceleration == 0.0 {
            if (cruise - sv).abs() > f64::EPSILON * cruise.abs() {
                return Err(ProfileError::ZeroAccelRamp);
            }
            // Constant velocity: no ramp phases at all.
            return Ok(Self {
                start_velocity: sv,
                peak_velocity: cruise,
                acceleration: 0.0,
                total_steps,
                accel_steps: 0.0,
                decel_start: n,
                t_accel_end: 0.0,
                t_cruise_end: n / cruise,
            });
        }

        let a = acceleration;
        // Steps needed to ramp between start and cruise velocity.
        let ramp_steps = (cruise * cruise - sv * sv) / (2.0 * a);

        let (peak, accel_steps) = if 2.0 * ramp_steps > n {
            // Triangular: lower the peak until the halves meet.
            let peak = (sv * sv + a * n).sqrt();
            (peak, (peak * peak - sv * sv) / (2.0 * a))
        } else {
            (cruise, ramp_steps)
        };

        let decel_start = n - accel_steps;
        let t_accel_end = (peak - sv) / a;
        let cruise_time = if peak > 0.0 {
            (decel_start - accel_steps) / peak
        } else {
            0.0
        };

        Ok(Self {
            start_velocity: sv,
            peak_velocity: peak,
            acceleration: a,
            total_steps,
            accel_steps,
            decel_start,
            t_accel_end,
            t_cruise_end: t_accel_end + cruise_time,
        })
    }

    /// Nominal peak velocity actually reached [steps/s].
    #[inline]
    pub fn peak_velocity(&self) -> f64 {
        self.peak_velocity
    }

    /// Total steps in the move.
    #[inline]
    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    /// True when the requested cruise velocity was unreachable and the
    /// profile degraded to accelerate-then-decelerate.
    #[inline]
    pub fn is_triangular(&self) -> bool {
        self.acceleration > 0.0 && self.decel_start - self.accel_steps < 1e-9
    }

    /// Absolute time of the k-th step (1-based) in seconds.
    ///
    /// Position `s` steps into the move occurs at the time the continuous
    /// profile has traveled `s` steps; the k-th pulse fires at `time(k)`.
    pub fn step_time(&self, k: u32) -> f64 {
        let s = f64::from(k.min(self.total_steps));
        let sv = self.start_velocity;
        let a = self.acceleration;
        let peak = self.peak_velocity;

        if a == 0.0 {
            return s / peak;
        }
        if s <= self.accel_steps {
            return ((sv * sv + 2.0 * a * s).sqrt() - sv) / a;
        }
        if s <= self.decel_start {
            return self.t_accel_end + (s - self.accel_steps) / peak;
        }
        let r = s - self.decel_start;
        // Float dust can push the radicand a hair below sv² at the final step.
        let v = (peak * peak - 2.0 * a * r).max(sv * sv).sqrt();
        self.t_cruise_end + (peak - v) / a
    }

    /// Absolute time of the k-th step in microseconds.
    #[inline]
    pub fn step_time_us(&self, k: u32) -> f64 {
        self.step_time(k) * 1e6
    }

    /// Absolute step times for the whole move, in microseconds.
    pub fn step_times_us(&self) -> Vec<f64> {
        (1..=self.total_steps).map(|k| self.step_time_us(k)).collect()
    }

    /// Total move duration in microseconds.
    #[inline]
    pub fn total_time_us(&self) -> f64 {
        self.step_time_us(self.total_steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trapezoid_reaches_cruise() {
        // Ramp 0 → 1000 sps at 2000 sps² takes 250 steps; 1000-step move
        // leaves a 500-step cruise.
        let p = TrapezoidProfile::plan(0.0, 1000.0, 2000.0, 1000).unwrap();
        assert!(!p.is_triangular());
        assert!((p.peak_velocity() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn triangular_degrades_peak() {
        // Ramp 0 → 4000 sps at 8000 sps² needs 1000 steps each way; an
        // 800-step move cannot reach cruise.
        let p = TrapezoidProfile::plan(0.0, 4000.0, 8000.0, 800).unwrap();
        assert!(p.is_triangular());
        let expected_peak = (8000.0f64 * 800.0).sqrt();
        assert!((p.peak_velocity() - expected_peak).abs() < 1e-6);
        assert!(p.peak_velocity() < 4000.0);
    }

    #[test]
    fn step_times_strictly_increase() {
        let p = TrapezoidProfile::plan(0.0, 4000.0, 8000.0, 800).unwrap();
        let times = p.step_times_us();
        assert_eq!(times.len(), 800);
        for pair in times.windows(2) {
            assert!(pair[1] > pair[0], "step times must be strictly monotonic");
        }
    }

    #[test]
    fn intervals_shrink_during_acceleration() {
        let p = TrapezoidProfile::plan(100.0, 2000.0, 4000.0, 600).unwrap();
        let times = p.step_times_us();
        let first_interval = times[1] - times[0];
        let tenth_interval = times[10] - times[9];
        assert!(tenth_interval < first_interval);
    }

    #[test]
    fn constant_velocity_is_uniform() {
        let p = TrapezoidProfile::plan(500.0, 500.0, 0.0, 10).unwrap();
        let times = p.step_times_us();
        for (k, t) in times.iter().enumerate() {
            let expected = (k as f64 + 1.0) / 500.0 * 1e6;
            assert!((t - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn cruise_below_start_is_clamped() {
        let p = TrapezoidProfile::plan(200.0, 100.0, 1000.0, 50).unwrap();
        assert!(p.peak_velocity() >= 200.0);
    }

    #[test]
    fn zero_accel_with_ramp_rejected() {
        assert!(matches!(
            TrapezoidProfile::plan(100.0, 200.0, 0.0, 50),
            Err(ProfileError::ZeroAccelRamp),
        ));
    }

    #[test]
    fn non_finite_parameters_rejected() {
        assert!(matches!(
            TrapezoidProfile::plan(f64::NAN, 100.0, 100.0, 10),
            Err(ProfileError::NotFinite),
        ));
        assert!(matches!(
            TrapezoidProfile::plan(0.0, f64::INFINITY, 100.0, 10),
            Err(ProfileError::NotFinite),
        ));
        assert!(matches!(
            TrapezoidProfile::plan(0.0, 100.0, -5.0, 10),
            Err(ProfileError::NotFinite),
        ));
    }

    #[test]
    fn zero_cruise_rejected() {
        assert!(matches!(
            TrapezoidProfile::plan(0.0, 0.0, 100.0, 10),
            Err(ProfileError::ZeroCruise),
        ));
    }

    #[test]
    fn decel_endpoint_returns_to_start_velocity() {
        // Final inter-step interval should approach the start-velocity
        // interval as the profile decelerates back down.
        let p = TrapezoidProfile::plan(500.0, 2000.0, 4000.0, 2000).unwrap();
        let times = p.step_times_us();
        let last_interval = times[1999] - times[1998];
        let start_interval = 1e6 / 500.0;
        // Within a couple of percent — the last step ends the ramp.
        assert!((last_interval - start_interval).abs() / start_interval < 0.05);
    }
}
