//! Resource lifecycle callbacks.
//!
//! The pool knows nothing about the resources it manages. Creating and
//! tearing them down is delegated to a factory and an optional destructor
//! supplied at construction time.

use std::fmt;

use crate::error::PoolError;

/// Callback producing a new resource, or `None` when it could not.
pub type Factory<R> = Box<dyn Fn() -> Option<R> + Send + Sync>;

/// Callback invoked on a resource that is being permanently discarded.
pub type Destructor<R> = Box<dyn Fn(&R) + Send + Sync>;

/// Factory and destructor pair for one pool.
pub struct Lifecycle<R> {
    factory: Factory<R>,
    destructor: Option<Destructor<R>>,
}

impl<R> Lifecycle<R> {
    /// Create a lifecycle with the given factory and no destructor.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Option<R> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            destructor: None,
        }
    }

    /// Set the destructor.
    #[must_use]
    pub fn with_destructor<D>(mut self, destructor: D) -> Self
    where
        D: Fn(&R) + Send + Sync + 'static,
    {
        self.destructor = Some(Box::new(destructor));
        self
    }

    /// Check whether a destructor is configured.
    #[must_use]
    pub fn has_destructor(&self) -> bool {
        self.destructor.is_some()
    }

    /// Create a new resource.
    ///
    /// A factory that yields nothing is a configuration bug, reported as
    /// [`PoolError::InvalidFactoryResult`].
    pub fn create(&self) -> Result<R, PoolError> {
        (self.factory)().ok_or(PoolError::InvalidFactoryResult)
    }

    /// Run the destructor on `resource`, if one is configured.
    pub fn destroy(&self, resource: &R) {
        if let Some(destructor) = &self.destructor {
            destructor(resource);
        }
    }
}

impl<R> fmt::Debug for Lifecycle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("destructor", &self.destructor.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_create() {
        let lifecycle = Lifecycle::new(|| Some(String::from("conn")));
        assert_eq!(lifecycle.create().unwrap(), "conn");
    }

    #[test]
    fn test_create_rejects_empty_result() {
        let lifecycle: Lifecycle<String> = Lifecycle::new(|| None);
        assert_eq!(lifecycle.create(), Err(PoolError::InvalidFactoryResult));
    }

    #[test]
    fn test_destroy() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&destroyed);

        let plain = Lifecycle::new(|| Some(1u32));
        assert!(!plain.has_destructor());
        plain.destroy(&1);

        let lifecycle =
            Lifecycle::new(|| Some(1u32)).with_destructor(move |_: &u32| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        assert!(lifecycle.has_destructor());
        lifecycle.destroy(&1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }
}
