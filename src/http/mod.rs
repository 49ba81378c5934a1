//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, body buffering)
//!     → request.rs (InternalRequest: path, query, cookies, headers)
//!     → [dispatch: routing, then render or proxy]
//!     → response.rs (InternalResponse, base64 bodies decoded on the wire)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{InternalRequest, X_REQUEST_ID};
pub use response::InternalResponse;
pub use server::GatewayServer;
