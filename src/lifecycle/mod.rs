//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger → broadcast to server, health monitor, reload task
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//! ```
//!
//! # Design Decisions
//! - Startup fails fast: any construction error stops before binding
//! - Shutdown stops accepting, then drains in-flight requests

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
