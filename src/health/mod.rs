//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer (or check_all() on demand)
//!     → TCP connect probe to each backend, concurrently
//!     → Backend::set_alive(result)
//!
//! Passive demotion (dispatch):
//!     Failed forward observed
//!     → Backend marked dead immediately
//! ```
//!
//! # Design Decisions
//! - The probe is the only path that revives a dead backend
//! - Probe failures are logged, never surfaced to callers
//! - Each probe is bounded by its own timeout
//! - Health state is per-backend, not per-pool

pub mod active;

pub use active::{HealthMonitor, HealthTask, ProbeError};
