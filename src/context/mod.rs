//! Service context for dependency injection
//!
//! A [`ServiceContext`] is an immutable chain of capability bindings. Binding
//! a service produces a new context that shares the old one as its tail, so
//! a child fiber extending its context never affects its parent or siblings,
//! and "popping" a binding is just going back to the previous value.
//!
//! Services are keyed by type, usually a trait object:
//!
//! ```
//! use fibrant::context::ServiceContext;
//! use std::sync::Arc;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//!
//! struct English;
//! impl Greeter for English {
//!     fn greet(&self) -> String {
//!         "hello".to_string()
//!     }
//! }
//!
//! let greeter: Arc<dyn Greeter> = Arc::new(English);
//! let context = ServiceContext::empty().with::<dyn Greeter>(greeter);
//! assert_eq!(context.get::<dyn Greeter>().unwrap().greet(), "hello");
//! ```

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Identifies a capability by its type.
#[derive(Clone, Copy)]
pub struct ServiceKey {
    id: TypeId,
    name: &'static str,
}

impl ServiceKey {
    pub fn of<S: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<S>(),
            name: type_name::<S>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceKey {}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// One capability bound to its implementation.
///
/// The implementation is stored as the `Arc<S>` itself so lookups can hand
/// out clones of the same allocation.
#[derive(Clone)]
pub(crate) struct Binding {
    key: ServiceKey,
    service: Arc<dyn Any + Send + Sync>,
}

impl Binding {
    pub(crate) fn new<S>(service: Arc<S>) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        Self {
            key: ServiceKey::of::<S>(),
            service: Arc::new(service),
        }
    }

    pub(crate) fn key(&self) -> ServiceKey {
        self.key
    }
}

struct Link {
    binding: Binding,
    next: Option<Arc<Link>>,
}

/// Immutable mapping from capability to implementation.
#[derive(Clone, Default)]
pub struct ServiceContext {
    head: Option<Arc<Link>>,
}

impl ServiceContext {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A new context in which `S` resolves to `service`.
    pub fn with<S>(&self, service: Arc<S>) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.with_binding(Binding::new(service))
    }

    pub(crate) fn with_binding(&self, binding: Binding) -> Self {
        Self {
            head: Some(Arc::new(Link {
                binding,
                next: self.head.clone(),
            })),
        }
    }

    /// The nearest binding for `S`, if any.
    pub fn get<S>(&self) -> Option<Arc<S>>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.lookup(ServiceKey::of::<S>())
            .and_then(|service| service.downcast_ref::<Arc<S>>())
            .cloned()
    }

    pub fn contains<S: ?Sized + 'static>(&self) -> bool {
        self.lookup(ServiceKey::of::<S>()).is_some()
    }

    pub(crate) fn lookup(&self, key: ServiceKey) -> Option<&(dyn Any + Send + Sync)> {
        self.links()
            .find(|link| link.binding.key == key)
            .map(|link| link.binding.service.as_ref())
    }

    /// Names of the bound capabilities, nearest first, shadowed ones included.
    pub fn bound_services(&self) -> Vec<&'static str> {
        self.links().map(|link| link.binding.key.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    fn links(&self) -> impl Iterator<Item = &Link> {
        std::iter::successors(self.head.as_deref(), |link| link.next.as_deref())
    }
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.bound_services()).finish()
    }
}
