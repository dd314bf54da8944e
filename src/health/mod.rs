//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer
//!     → TCP connect to every upstream (active.rs)
//!     → UpstreamPool::set_alive
//!     → balancer remove (went down) / add (came back)
//! ```
//!
//! # Design Decisions
//! - Liveness is a plain flag; one failed probe marks a host down
//! - Selection never consults the flag, membership changes instead

pub mod active;

pub use active::HealthMonitor;
