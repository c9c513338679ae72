//! # Winder Motion Core
//!
//! Real-time motion generation for the winding machine: trapezoidal
//! profiles compressed into bounded-error step chunks, per-axis
//! single-producer/single-consumer move queues, a fixed-period scheduler
//! tick that emits step pulses, and a safety monitor that halts everything
//! within a bounded number of ticks.
//!
//! # Module Structure
//!
//! - [`profile`] - Analytic trapezoid/triangular velocity profiles
//! - [`compress`] - Step compression (bisection + least-squares fitting)
//! - [`queue`] - Per-axis lock-free move queues
//! - [`scheduler`] - Fixed-period tick thread and RT setup
//! - [`safety`] - Machine-state transitions and the per-tick safety check
//! - [`homing`] - Three-phase homing sequence supervisor
//! - [`hal`] - Pin-level hardware abstraction and simulation backend
//!
//! # Contexts
//!
//! Two execution contexts share the per-axis queues: the *command* context
//! (configuration thread — plans moves, pushes chunks, polls status) and
//! the *tick* context (the scheduler's periodic thread — consumes chunks
//! and fires pulses). The tick context never blocks, never allocates, and
//! never touches floating point; everything it reads or writes is either
//! consumer-owned or a single-word atomic.

pub mod compress;
pub mod hal;
pub mod homing;
pub mod profile;
pub mod queue;
pub mod safety;
pub mod scheduler;
