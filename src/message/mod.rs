//! HTTP message subsystem.
//!
//! # Data Flow
//! ```text
//! boundary adapter
//!     → Request (method, Url, headers, Entity)
//!     → filters read/modify headers, cookies, body
//!     → Response (status, headers, Entity, optional cause)
//!     → boundary adapter writes it back
//! ```
//!
//! # Design Decisions
//! - Fields are public so the entity and headers can be borrowed together
//! - Body convenience methods (`get_string`, `set_json`, ...) live on the
//!   message because they read and update its headers

/// Body convenience methods shared by `Request` and `Response`.
macro_rules! entity_accessors {
    ($message:ty) => {
        impl $message {
            /// Body with `Content-Encoding` removed.
            pub async fn get_bytes(&mut self) -> Result<bytes::Bytes, crate::entity::EntityError> {
                self.entity.get_bytes(&self.headers).await
            }

            /// Body decoded as text.
            pub async fn get_string(
                &mut self,
                charset: Option<crate::entity::Charset>,
            ) -> Result<String, crate::entity::EntityError> {
                self.entity.get_string(&self.headers, charset).await
            }

            /// Body parsed as JSON.
            pub async fn get_json(&mut self) -> Result<serde_json::Value, crate::entity::EntityError> {
                self.entity.get_json(&self.headers).await
            }

            pub fn set_bytes(&mut self, bytes: impl Into<bytes::Bytes>) {
                self.entity.set_bytes(&mut self.headers, bytes)
            }

            pub fn set_string(&mut self, text: &str) -> Result<(), crate::entity::EntityError> {
                self.entity.set_string(&mut self.headers, text)
            }

            pub fn set_json(
                &mut self,
                value: &serde_json::Value,
            ) -> Result<(), crate::entity::EntityError> {
                self.entity.set_json(&mut self.headers, value)
            }
        }
    };
}

pub(crate) use entity_accessors;

pub mod cookie;
pub mod headers;
pub mod request;
pub mod response;

pub use cookie::{Cookie, CookieHeader};
pub use request::Request;
pub use response::{Cause, Response};
