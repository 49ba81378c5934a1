//! ISR gateway library: routing, incremental cache coordination and
//! on-demand revalidation in front of a rendering server.

pub mod admin;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod queue;
pub mod resilience;
pub mod routing;

pub use config::schema::GatewayConfig;
pub use dispatch::Dispatcher;
pub use http::GatewayServer;
pub use lifecycle::{build_gateway, Gateway, Shutdown};
