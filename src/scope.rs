//! Redraw scopes: caller-owned lifetimes for cached entries.
//!
//! Entries submitted through an encoder tagged with a [`RedrawScope`] stay
//! alive (their version is refreshed every tick) for as long as the scope is
//! alive, and are released at the first tick after it is disposed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Weak;

use crate::drawer::DrawerShared;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of a [`RedrawScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        Self(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn to_bits(self) -> u64 {
        self.0
    }
}

/// Keeps the entries tagged with it alive until disposed or dropped.
#[derive(Debug)]
pub struct RedrawScope {
    id: ScopeId,
    drawer: Weak<DrawerShared>,
    disposed: AtomicBool,
}

impl RedrawScope {
    pub(crate) fn new(drawer: Weak<DrawerShared>) -> (Self, ScopeId) {
        let id = ScopeId::next();
        let scope = Self {
            id,
            drawer,
            disposed: AtomicBool::new(false),
        };
        (scope, id)
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// End the scope. Entries tagged with it are released at the next tick.
    ///
    /// Calling this more than once has no further effect.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(drawer) = self.drawer.upgrade() {
            drawer.end_scope(self.id);
        }
    }
}

impl Drop for RedrawScope {
    fn drop(&mut self) {
        self.dispose();
    }
}
