//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → dispatch.rs (select upstream, fault boundary)
//!     → headers.rs (client IP, proxy headers)
//!     → forward.rs (rewrite URI, send upstream)
//!     → Send response to client
//! ```

pub mod dispatch;
pub mod forward;
pub mod headers;
pub mod server;

pub use dispatch::Dispatcher;
pub use forward::{ForwardError, Forwarder, HttpForwarder};
pub use server::HttpServer;
