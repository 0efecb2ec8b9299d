//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, headers)
//!     → router.rs (route lookup, URI rebase)
//!     → matcher.rs (evaluate match conditions)
//!     → matched route's handler, or 404
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Sort by priority
//!     → Compile matchers
//!     → Freeze as immutable DispatchHandler
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod router;

pub use matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};
pub use router::{DispatchHandler, Route, UriRouterContext};
