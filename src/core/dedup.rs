/*!
 * Duplicate detection by content identity
 *
 * Identities are claimed before their download starts, and a claim is never
 * released: a later item with the same identity stays skipped even if the item
 * that claimed it fails to download.
 */

use crate::remote::ContentIdentity;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Shared set of content identities already scheduled in this scope
#[derive(Debug, Clone, Default)]
pub struct DedupSet {
    seen: Arc<Mutex<HashSet<ContentIdentity>>>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, identity: &ContentIdentity) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(identity)
    }

    /// Claim an identity. Returns `false` if it was already claimed.
    pub fn claim(&self, identity: &ContentIdentity) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.clone())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
