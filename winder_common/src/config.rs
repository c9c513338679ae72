//! TOML configuration loading and validation.
//!
//! The configuration layer owns every tunable the motion core consumes:
//! steps-per-millimeter, acceleration ceilings, soft travel limits, the
//! scheduler tick period, the stall timeout, and the homing parameters.
//! All fields carry serde defaults so a partial file (or no file at all)
//! yields a usable simulation setup.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::axis::Axis;
use crate::consts::{
    DEFAULT_DIR_SETUP_TICKS, DEFAULT_STALL_TIMEOUT_MS, DEFAULT_STEP_PULSE_US,
    DEFAULT_TICK_PERIOD_US,
};

/// Errors from configuration loading or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the file failed.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML syntax or type error.
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value failed validation.
    #[error("invalid config: {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Per-axis mechanical configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Full steps per millimeter of travel (microstepping included).
    #[serde(default = "default_steps_per_mm")]
    pub steps_per_mm: f64,
    /// Maximum commandable acceleration [steps/s²].
    #[serde(default = "default_max_accel")]
    pub max_accel_sps2: f64,
    /// Soft travel limit, low end [mm].
    #[serde(default)]
    pub soft_limit_min_mm: f64,
    /// Soft travel limit, high end [mm].
    #[serde(default = "default_soft_limit_max")]
    pub soft_limit_max_mm: f64,
    /// Whether soft limits are enforced (off for rotary outputs).
    #[serde(default = "default_true")]
    pub soft_limits_enabled: bool,
}

fn default_steps_per_mm() -> f64 {
    // 200 full steps × 16 microsteps over an 8 mm lead screw.
    400.0
}
fn default_max_accel() -> f64 {
    5000.0
}
fn default_soft_limit_max() -> f64 {
    200.0
}
fn default_true() -> bool {
    true
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            steps_per_mm: default_steps_per_mm(),
            max_accel_sps2: default_max_accel(),
            soft_limit_min_mm: 0.0,
            soft_limit_max_mm: default_soft_limit_max(),
            soft_limits_enabled: true,
        }
    }
}

/// Three-phase homing parameters for the traverse axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomingConfig {
    /// Coarse seek speed toward the home switch [steps/s].
    #[serde(default = "default_coarse_speed")]
    pub coarse_speed_sps: f64,
    /// Fine seek speed for the final approach [steps/s].
    #[serde(default = "default_fine_speed")]
    pub fine_speed_sps: f64,
    /// Acceleration used for homing moves [steps/s²].
    #[serde(default = "default_homing_accel")]
    pub accel_sps2: f64,
    /// Back-off distance after the coarse hit [mm].
    #[serde(default = "default_backoff")]
    pub backoff_mm: f64,
    /// Maximum travel allowed while seeking before homing fails [mm].
    #[serde(default = "default_max_travel")]
    pub max_travel_mm: f64,
}

fn default_coarse_speed() -> f64 {
    1500.0
}
fn default_fine_speed() -> f64 {
    300.0
}
fn default_homing_accel() -> f64 {
    2000.0
}
fn default_backoff() -> f64 {
    2.0
}
fn default_max_travel() -> f64 {
    210.0
}

impl Default for HomingConfig {
    fn default() -> Self {
        Self {
            coarse_speed_sps: default_coarse_speed(),
            fine_speed_sps: default_fine_speed(),
            accel_sps2: default_homing_accel(),
            backoff_mm: default_backoff(),
            max_travel_mm: default_max_travel(),
        }
    }
}

/// Top-level motion-core configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Scheduler tick period [µs].
    #[serde(default = "default_tick_period")]
    pub tick_period_us: u32,
    /// Step pulse width [µs]. Must fit inside a tick.
    #[serde(default = "default_step_pulse")]
    pub step_pulse_us: u32,
    /// Ticks to wait between a direction change and the first step of a run.
    #[serde(default = "default_dir_setup")]
    pub dir_setup_ticks: u32,
    /// Stall timeout [ms]: no step on a commanded axis for this long → alarm.
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_ms: u32,
    /// Traverse axis mechanics.
    #[serde(default)]
    pub traverse: AxisConfig,
    /// Spindle pulse-train mechanics.
    #[serde(default = "default_spindle_axis")]
    pub spindle: AxisConfig,
    /// Homing sequence parameters.
    #[serde(default)]
    pub homing: HomingConfig,
}

fn default_tick_period() -> u32 {
    DEFAULT_TICK_PERIOD_US
}
fn default_step_pulse() -> u32 {
    DEFAULT_STEP_PULSE_US
}
fn default_dir_setup() -> u32 {
    DEFAULT_DIR_SETUP_TICKS
}
fn default_stall_timeout() -> u32 {
    DEFAULT_STALL_TIMEOUT_MS
}
fn default_spindle_axis() -> AxisConfig {
    // The spindle is a rotary pulse train — travel limits do not apply.
    AxisConfig {
        soft_limits_enabled: false,
        ..AxisConfig::default()
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            tick_period_us: default_tick_period(),
            step_pulse_us: default_step_pulse(),
            dir_setup_ticks: default_dir_setup(),
            stall_timeout_ms: default_stall_timeout(),
            traverse: AxisConfig::default(),
            spindle: default_spindle_axis(),
            homing: HomingConfig::default(),
        }
    }
}

impl MotionConfig {
    /// Per-axis config lookup.
    #[inline]
    pub fn axis(&self, axis: Axis) -> &AxisConfig {
        match axis {
            Axis::Traverse => &self.traverse,
            Axis::Spindle => &self.spindle,
        }
    }

    /// Validate cross-field constraints. Called by [`load_config`]; call
    /// directly when building a config in code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period_us == 0 {
            return Err(ConfigError::Invalid {
                field: "tick_period_us",
                reason: "must be positive",
            });
        }
        if self.step_pulse_us >= self.tick_period_us {
            return Err(ConfigError::Invalid {
                field: "step_pulse_us",
                reason: "pulse width must fit inside one tick",
            });
        }
        if self.stall_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "stall_timeout_ms",
                reason: "must be positive",
            });
        }
        for axis in Axis::ALL {
            let ax = self.axis(axis);
            if ax.steps_per_mm <= 0.0 {
                return Err(ConfigError::Invalid {
                    field: "steps_per_mm",
                    reason: "must be positive",
                });
            }
            if ax.max_accel_sps2 <= 0.0 {
                return Err(ConfigError::Invalid {
                    field: "max_accel_sps2",
                    reason: "must be positive",
                });
            }
            if ax.soft_limits_enabled && ax.soft_limit_max_mm <= ax.soft_limit_min_mm {
                return Err(ConfigError::Invalid {
                    field: "soft_limit_max_mm",
                    reason: "must exceed soft_limit_min_mm",
                });
            }
        }
        if self.homing.coarse_speed_sps <= 0.0 || self.homing.fine_speed_sps <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "homing",
                reason: "seek speeds must be positive",
            });
        }
        if self.homing.fine_speed_sps > self.homing.coarse_speed_sps {
            return Err(ConfigError::Invalid {
                field: "homing.fine_speed_sps",
                reason: "fine seek must not be faster than coarse seek",
            });
        }
        if self.homing.backoff_mm <= 0.0 || self.homing.max_travel_mm <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "homing",
                reason: "distances must be positive",
            });
        }
        Ok(())
    }

    /// Stall timeout expressed in scheduler ticks.
    #[inline]
    pub fn stall_timeout_ticks(&self) -> u64 {
        (self.stall_timeout_ms as u64 * 1000).div_ceil(self.tick_period_us as u64)
    }
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<MotionConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let config: MotionConfig = toml::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        MotionConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config: MotionConfig = toml::from_str("").unwrap();
        assert_eq!(config.tick_period_us, DEFAULT_TICK_PERIOD_US);
        assert!(config.traverse.soft_limits_enabled);
        assert!(!config.spindle.soft_limits_enabled);
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_overrides() {
        let config: MotionConfig = toml::from_str(
            r#"
tick_period_us = 100
stall_timeout_ms = 250

[traverse]
steps_per_mm = 800.0
soft_limit_max_mm = 50.0
"#,
        )
        .unwrap();
        assert_eq!(config.tick_period_us, 100);
        assert_eq!(config.traverse.steps_per_mm, 800.0);
        assert_eq!(config.traverse.soft_limit_max_mm, 50.0);
        // Untouched fields keep their defaults.
        assert_eq!(config.homing.backoff_mm, 2.0);
        config.validate().unwrap();
    }

    #[test]
    fn pulse_wider_than_tick_rejected() {
        let config = MotionConfig {
            tick_period_us: 10,
            step_pulse_us: 10,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "step_pulse_us",
                ..
            })
        ));
    }

    #[test]
    fn inverted_soft_limits_rejected() {
        let mut config = MotionConfig::default();
        config.traverse.soft_limit_min_mm = 100.0;
        config.traverse.soft_limit_max_mm = 50.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn fine_faster_than_coarse_rejected() {
        let mut config = MotionConfig::default();
        config.homing.fine_speed_sps = config.homing.coarse_speed_sps * 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn stall_timeout_tick_conversion() {
        let config = MotionConfig {
            tick_period_us: 50,
            stall_timeout_ms: 1000,
            ..Default::default()
        };
        assert_eq!(config.stall_timeout_ticks(), 20_000);
    }

    #[test]
    fn load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tick_period_us = 200").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.tick_period_us, 200);
    }

    #[test]
    fn load_config_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tick_period_us = \"fast\"").unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
