//! System-wide constants for the winder workspace.
//!
//! Single source of truth for all numeric limits and default paths.
//! Imported by all crates — no duplication permitted.

/// Number of motion axes (traverse + spindle pulse train).
pub const NUM_AXES: usize = 2;

/// Timer timebase in Hz. Chunk `interval`/`add` fields are integers in
/// units of this timebase (1 MHz → microsecond ticks).
pub const TIMER_HZ: u32 = 1_000_000;

/// Per-axis move queue capacity in chunks. Power of two — the ring
/// indices are masked, not wrapped by modulo.
pub const MOVE_CHUNKS_CAPACITY: usize = 64;

/// Maximum chunks a single compressed move may produce.
pub const MAX_MOVE_CHUNKS: usize = 512;

/// Default scheduler tick period in microseconds (20 kHz).
pub const DEFAULT_TICK_PERIOD_US: u32 = 50;

/// Default step pulse width in microseconds.
pub const DEFAULT_STEP_PULSE_US: u32 = 2;

/// Default direction setup delay before the first step of a run [ticks].
pub const DEFAULT_DIR_SETUP_TICKS: u32 = 2;

/// Default stall timeout in milliseconds.
pub const DEFAULT_STALL_TIMEOUT_MS: u32 = 1000;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/winder.toml";
