//! Per-request context chain.
//!
//! # Data Flow
//! ```text
//! boundary adapter
//!     → Context::root() (fresh id)
//!     → push(ClientContext) → push(AttributesContext)
//!     → filters push SessionContext / TransactionIdContext / UriRouterContext
//!     → handler looks data up with as_context::<T>() or get_context(name)
//! ```
//!
//! # Design Decisions
//! - Nodes are immutable and reference counted; "adding" information means
//!   pushing a child and passing the child to the next handler
//! - Lookups walk from the current node towards the root and return the
//!   nearest match
//! - A miss is a typed error: `NotFound` when the walk reaches the root,
//!   `WrongType` when a node with the requested name holds other data

pub mod kinds;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use kinds::{AttributesContext, ClientContext, RootContext};

/// Data carried by one node of the chain.
pub trait ContextData: Any + Send + Sync {
    /// Discriminator used by name-based lookups.
    const NAME: &'static str;
}

/// Failed context lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("no context named '{0}' in the chain")]
    NotFound(String),

    #[error("context '{name}' does not hold {expected}")]
    WrongType { name: String, expected: &'static str },
}

struct Node {
    name: &'static str,
    id: Option<String>,
    data: Arc<dyn Any + Send + Sync>,
    parent: Option<Context>,
}

/// A node of the context chain; cloning shares the node.
#[derive(Clone)]
pub struct Context {
    node: Arc<Node>,
}

impl Context {
    /// A root context with a generated id.
    pub fn root() -> Self {
        Self::root_with_id(uuid::Uuid::new_v4().to_string())
    }

    /// A root context with the given id.
    pub fn root_with_id(id: impl Into<String>) -> Self {
        Self {
            node: Arc::new(Node {
                name: RootContext::NAME,
                id: Some(id.into()),
                data: Arc::new(RootContext),
                parent: None,
            }),
        }
    }

    /// Derive a child holding `data`, with `self` as its parent.
    pub fn push<T: ContextData>(&self, data: T) -> Context {
        self.push_with_id(data, None)
    }

    /// Derive a child holding `data` under an explicit id.
    pub fn push_with_id<T: ContextData>(&self, data: T, id: Option<String>) -> Context {
        Context {
            node: Arc::new(Node {
                name: T::NAME,
                id,
                data: Arc::new(data),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.node.name
    }

    pub fn id(&self) -> Option<&str> {
        self.node.id.as_deref()
    }

    pub fn parent(&self) -> Option<&Context> {
        self.node.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.node.parent.is_none()
    }

    /// The root of the chain.
    pub fn root_context(&self) -> &Context {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// This node's data, if it is a `T`.
    pub fn data<T: ContextData>(&self) -> Option<&T> {
        self.node.data.downcast_ref::<T>()
    }

    /// Nearest node (self included) holding a `T`.
    pub fn find<T: ContextData>(&self) -> Result<&Context, ContextError> {
        self.ancestors()
            .find(|ctx| ctx.node.data.is::<T>())
            .ok_or_else(|| ContextError::NotFound(T::NAME.to_string()))
    }

    /// Nearest `T` in the chain.
    pub fn as_context<T: ContextData>(&self) -> Result<&T, ContextError> {
        let ctx = self.find::<T>()?;
        ctx.data::<T>().ok_or_else(|| ContextError::WrongType {
            name: ctx.name().to_string(),
            expected: std::any::type_name::<T>(),
        })
    }

    pub fn contains_context<T: ContextData>(&self) -> bool {
        self.find::<T>().is_ok()
    }

    /// Nearest node whose name is `name`.
    pub fn get_context(&self, name: &str) -> Result<&Context, ContextError> {
        self.ancestors()
            .find(|ctx| ctx.name() == name)
            .ok_or_else(|| ContextError::NotFound(name.to_string()))
    }

    /// Nearest node named `name`, required to hold a `T`.
    pub fn get_context_as<T: ContextData>(&self, name: &str) -> Result<&T, ContextError> {
        let ctx = self.get_context(name)?;
        ctx.data::<T>().ok_or_else(|| ContextError::WrongType {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
        })
    }

    pub fn contains_context_named(&self, name: &str) -> bool {
        self.get_context(name).is_ok()
    }

    /// Iterate from this node up to the root.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            next: Some(self),
        }
    }

    /// True if both handles point at the same node.
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.ancestors().map(|ctx| (ctx.name(), ctx.id())))
            .finish()
    }
}

/// Iterator over a context and its ancestors.
pub struct Ancestors<'a> {
    next: Option<&'a Context>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Context;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}
