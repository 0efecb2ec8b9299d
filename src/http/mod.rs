//! HTTP boundary subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, tracing, boundary timeout)
//!     → convert.rs (wire request → Request + root Context)
//!     → filter chain → dispatcher → ClientHandler
//!         → convert.rs (Request → hyper request, hyper response → Response)
//!     → convert.rs (Response → wire response)
//!     → Send to client
//! ```

pub mod convert;
pub mod server;

pub use server::HttpServer;
