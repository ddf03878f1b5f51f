//! Registry of resources a client holds open on behalf of callers.
//!
//! Cursors and body streams register on creation and receive a
//! [`Registration`]. The resource releases its own registration when it
//! finishes; the owning client force-closes whatever is still registered when
//! it is passivated. The registry holds plain handles, so there is no
//! reference cycle between a resource and its owner.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

/// A resource that must be closed exactly once.
///
/// `close` may be called from the registry while the resource is also
/// finishing on its own, so implementations must be idempotent.
pub trait Disposable: Send + Sync {
    fn close(&self);
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    entries: HashMap<u64, Arc<dyn Disposable>>,
}

/// Thread-safe set of open resources.
#[derive(Clone, Default)]
pub struct DisposableRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl DisposableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, resource: Arc<dyn Disposable>) -> Registration {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.entries.insert(id, resource);
        Registration {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Number of resources still open.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every registered resource, returning how many were closed.
    ///
    /// The set is taken out under the lock and closed outside it, so a
    /// resource releasing itself concurrently finds nothing to remove.
    pub fn dispose_all(&self) -> usize {
        let entries = std::mem::take(&mut self.inner.lock().entries);
        let count = entries.len();
        for (id, resource) in entries {
            debug!("Force closing disposable {}", id);
            resource.close();
        }
        count
    }
}

impl fmt::Debug for DisposableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposableRegistry")
            .field("open", &self.len())
            .finish()
    }
}

/// Proof of registration. Dropping it unregisters the resource.
pub struct Registration {
    id: u64,
    registry: Weak<Mutex<RegistryInner>>,
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unregister now, without closing.
    pub fn release(self) {}
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Registration").field(&self.id).finish()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.lock().entries.remove(&self.id);
        }
    }
}
