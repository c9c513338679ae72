//! Prelude module for common re-exports.
//!
//! `use winder_common::prelude::*;` pulls in the types nearly every
//! consumer needs without listing individual paths.

// ─── Axes & Chunks ──────────────────────────────────────────────────
pub use crate::axis::{Axis, Direction};
pub use crate::chunk::StepChunk;

// ─── Machine State ──────────────────────────────────────────────────
pub use crate::state::{MachineState, MachineStateCell};

// ─── Faults ─────────────────────────────────────────────────────────
pub use crate::fault::{AlarmReason, FaultFlags, FaultRecord, LatchedFault};

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{AxisConfig, ConfigError, HomingConfig, MotionConfig, load_config};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{MAX_MOVE_CHUNKS, MOVE_CHUNKS_CAPACITY, NUM_AXES, TIMER_HZ};
