//! Owner identity and liveness.
//!
//! Every checkout is keyed by the [`Owner`] that performed it. An owner is a
//! cheap handle standing for one execution unit, usually a thread. The pool
//! only keeps a weak link to it, so it can later ask whether the owner still
//! exists and reclaim the resource of one that does not.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Owner = Owner::new();
}

/// Stable identity of an [`Owner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Get the raw numeric value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner-{}", self.0)
    }
}

type LivenessProbe = Box<dyn Fn() -> bool + Send + Sync>;

struct OwnerState {
    id: OwnerId,
    probe: Option<LivenessProbe>,
}

impl OwnerState {
    fn probe_alive(&self) -> bool {
        self.probe.as_ref().is_none_or(|probe| probe())
    }
}

/// Handle identifying the execution unit that holds a pooled resource.
///
/// Clones share identity and liveness. An owner is alive while at least one
/// clone exists and, when created with [`Owner::with_liveness`], its probe
/// reports true.
///
/// An owner stands for a single execution unit and must only be used by one
/// thread at a time. The pool treats every hold under the same identity as
/// nested, so two threads holding with clones of one owner share a single
/// resource, and once the first of them releases it another owner may check
/// it out while the second thread is still using it. Give each thread its
/// own owner, for example via [`Owner::current`].
///
/// # Example
///
/// ```rust
/// use affine_pool::Owner;
///
/// let owner = Owner::new();
/// let copy = owner.clone();
/// assert_eq!(owner.id(), copy.id());
/// assert!(owner.is_alive());
/// ```
#[derive(Clone)]
pub struct Owner {
    state: Arc<OwnerState>,
}

impl Owner {
    /// Create an owner with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self::from_probe(None)
    }

    /// Create an owner whose liveness is also gated by `probe`.
    ///
    /// The probe is evaluated under the pool lock during salvage. It must be
    /// cheap and must not call back into the pool.
    #[must_use]
    pub fn with_liveness<F>(probe: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self::from_probe(Some(Box::new(probe)))
    }

    /// Get the calling thread's own owner handle.
    ///
    /// The thread keeps one copy in thread-local storage and drops it when
    /// the thread exits, so a finished thread is reported dead once every
    /// other clone of its handle is gone too.
    #[must_use]
    pub fn current() -> Self {
        CURRENT.with(Clone::clone)
    }

    fn from_probe(probe: Option<LivenessProbe>) -> Self {
        let id = OwnerId(NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            state: Arc::new(OwnerState { id, probe }),
        }
    }

    /// Get the owner's identity.
    #[must_use]
    pub fn id(&self) -> OwnerId {
        self.state.id
    }

    /// Check whether the owner is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state.probe_alive()
    }

    pub(crate) fn link(&self) -> OwnerLink {
        OwnerLink(Arc::downgrade(&self.state))
    }
}

impl Default for Owner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("id", &self.state.id)
            .field("probe", &self.state.probe.is_some())
            .finish()
    }
}

/// Weak link from a pool entry back to its owner.
#[derive(Clone)]
pub(crate) struct OwnerLink(Weak<OwnerState>);

impl OwnerLink {
    pub(crate) fn is_alive(&self) -> bool {
        self.0.upgrade().is_some_and(|state| state.probe_alive())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    #[test]
    fn test_owner_ids_are_unique() {
        let a = Owner::new();
        let b = Owner::new();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.clone().id());
    }

    #[test]
    fn test_link_dies_with_last_handle() {
        let owner = Owner::new();
        let copy = owner.clone();
        let link = owner.link();

        drop(owner);
        assert!(link.is_alive());

        drop(copy);
        assert!(!link.is_alive());
    }

    #[test]
    fn test_probe_gates_liveness() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let owner = Owner::with_liveness(move || flag.load(Ordering::SeqCst));
        let link = owner.link();

        assert!(owner.is_alive());
        assert!(link.is_alive());

        running.store(false, Ordering::SeqCst);
        assert!(!owner.is_alive());
        assert!(!link.is_alive());
    }

    #[test]
    fn test_current_is_per_thread() {
        let here = Owner::current();
        assert_eq!(here.id(), Owner::current().id());

        let (there, link) = std::thread::spawn(|| {
            let owner = Owner::current();
            (owner.id(), owner.link())
        })
        .join()
        .unwrap();

        assert_ne!(here.id(), there);
        // The thread-local copy was dropped when the thread exited.
        assert!(!link.is_alive());
    }

    #[test]
    fn test_owner_id_display() {
        let owner = Owner::new();
        assert_eq!(
            owner.id().to_string(),
            format!("owner-{}", owner.id().as_u64())
        );
    }
}
