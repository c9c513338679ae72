//! Winder Common Library
//!
//! Shared leaf types and configuration for the winder motion workspace.
//!
//! # Module Structure
//!
//! - [`axis`] - Axis and direction identifiers
//! - [`chunk`] - The compressed step-chunk unit of motion
//! - [`state`] - Machine state enum and its atomic cell
//! - [`fault`] - Alarm reasons, fault flags, and the latched fault record
//! - [`config`] - TOML configuration loading and validation
//! - [`consts`] - System-wide constants
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use winder_common::prelude::*;
//! ```

pub mod axis;
pub mod chunk;
pub mod config;
pub mod consts;
pub mod fault;
pub mod prelude;
pub mod state;
