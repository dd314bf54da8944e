//! Load-balancing reverse proxy.
//!
//! Requests are spread over a pool of backend hosts by a pluggable
//! [`Balancer`](load_balancer::Balancer) chosen by name from a
//! [`BalancerFactory`](load_balancer::BalancerFactory).

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use load_balancer::{Balancer, BalancerError, BalancerFactory};
