//! Shared slot for the one ASN capability.
//!
//! Decoding an mmdb file is expensive and the result never changes, so every
//! middleware instance built against the same [`Registry`] shares a single
//! [`AsnLookup`]. The slot moves out of `Empty` at most once per epoch:
//!
//! ```text
//!            ensure_initialized ok
//!   Empty ────────────────────────────▶ Ready(lookup)
//!     │                                   │
//!     │ ensure_initialized err            │
//!     ▼                                   │
//!   Failed ◀── (no retry) ──┐             │
//!     │                     │             │
//!     └───────── reset ─────┴──── reset ──┘──▶ Empty
//! ```
//!
//! The first writer wins: once `Ready` or `Failed`, further calls to
//! [`Registry::ensure_initialized`] return without looking at their source.

use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::lookup::{AsnLookup, DatabaseSource, MmdbAsnLookup};

/// Builds a capability from a source. Called at most once per epoch.
type Opener = Box<dyn Fn(&DatabaseSource) -> Result<Arc<dyn AsnLookup>, Error> + Send + Sync>;

enum Slot {
    Empty,
    Failed,
    Ready(Arc<dyn AsnLookup>),
}

/// Process-wide default, for hosts that do not thread their own registry.
static GLOBAL: LazyLock<Arc<Registry>> = LazyLock::new(|| Arc::new(Registry::new()));

pub struct Registry {
    slot: RwLock<Slot>,
    opener: Opener,
}

impl Registry {
    /// A registry that opens sources with the MaxMind adapter.
    pub fn new() -> Self {
        Self::with_opener(|source| {
            let lookup = MmdbAsnLookup::open(source)?;
            debug!(db = %source, db_type = lookup.database_type(), "decoded ASN database");
            let lookup: Arc<dyn AsnLookup> = Arc::new(lookup);
            Ok(lookup)
        })
    }

    /// A registry that builds its capability with `opener` instead.
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn(&DatabaseSource) -> Result<Arc<dyn AsnLookup>, Error> + Send + Sync + 'static,
    {
        Self { slot: RwLock::new(Slot::Empty), opener: Box::new(opener) }
    }

    /// The lazily created process-wide registry.
    pub fn global() -> Arc<Registry> {
        Arc::clone(&GLOBAL)
    }

    /// Installs a capability built from `source` unless this epoch already
    /// made its attempt.
    ///
    /// Never fails: an unusable source is logged and leaves the registry
    /// without a capability until [`reset`](Registry::reset).
    pub fn ensure_initialized(&self, source: &DatabaseSource) {
        if !matches!(*self.read(), Slot::Empty) {
            return;
        }

        // The write lock is held across the open so that racing constructions
        // cannot both see `Empty` and readers never see a half-built lookup.
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*slot, Slot::Empty) {
            return;
        }

        *slot = match (self.opener)(source) {
            Ok(lookup) => {
                info!(db = %source, "ASN database loaded");
                Slot::Ready(lookup)
            }
            Err(err) => {
                warn!(db = %source, err = %err, "ASN database is not initialized");
                Slot::Failed
            }
        };
    }

    /// The installed capability, if any.
    pub fn current(&self) -> Option<Arc<dyn AsnLookup>> {
        match &*self.read() {
            Slot::Ready(lookup) => Some(Arc::clone(lookup)),
            Slot::Empty | Slot::Failed => None,
        }
    }

    /// Drops the capability and starts a new epoch.
    ///
    /// For test isolation. Not a reconfiguration mechanism: requests already
    /// holding the old capability keep using it.
    pub fn reset(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Slot::Empty;
    }

    // Every write leaves the slot in a valid state, so a poisoned lock is
    // still safe to read.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Registry {
    fn default() -> Self { Self::new() }
}
