//! Context kinds created by the boundary adapter.

use std::net::SocketAddr;

use dashmap::DashMap;
use serde_json::Value;

use crate::context::ContextData;

/// Marker for the root of every chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct RootContext;

impl ContextData for RootContext {
    const NAME: &'static str = "root";
}

/// Request-scoped attributes shared by every filter of one exchange.
///
/// The node itself is immutable; the map inside is concurrent so filters
/// running on different tasks can record values without coordination.
#[derive(Debug, Default)]
pub struct AttributesContext {
    attributes: DashMap<String, Value>,
}

impl AttributesContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).map(|v| v.value().clone())
    }

    pub fn insert(&self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.attributes.insert(name.into(), value)
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.attributes.remove(name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl ContextData for AttributesContext {
    const NAME: &'static str = "attributes";
}

/// Information about the user agent that sent the request.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub remote_address: Option<SocketAddr>,
    pub local_address: Option<SocketAddr>,
    pub user_agent: Option<String>,
    pub is_secure: bool,
}

impl ClientContext {
    /// Remote IP rendered as text, used as a partition key.
    pub fn remote_ip(&self) -> Option<String> {
        self.remote_address.map(|addr| addr.ip().to_string())
    }
}

impl ContextData for ClientContext {
    const NAME: &'static str = "client";
}
