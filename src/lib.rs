//! Filter gateway library.
//!
//! An HTTP gateway that runs every exchange through an ordered chain of
//! filters in front of a routing dispatcher and an upstream client.

// Pipeline building blocks
pub mod context;
pub mod entity;
pub mod error;
pub mod message;
pub mod promise;

// Pipeline stages
pub mod filter;
pub mod handler;
pub mod routing;
pub mod session;

// Boundary and process concerns
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use context::Context;
pub use error::GatewayError;
pub use handler::{Chain, Filter, Handler, Next, ResponsePromise};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use message::{Request, Response};
pub use promise::Promise;
