//! Guest identity allocation
//!
//! An explicit free list of guest numbers, shared by the listener (initial
//! assignment) and the room directory (identity changes). The lock is a sync
//! mutex held only for short, await-free sections, so directory operations
//! can consult the allocator from inside their own critical section.

use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

use crate::protocol::messages::{is_valid_identity_name, GUEST_PREFIX};

/// Parse the `guest<N>` pattern, returning the guest number.
///
/// Matches on the string shape alone; a custom identity spelled `guest7`
/// parses the same as an auto-assigned one.
pub fn guest_number(identity: &str) -> Option<u32> {
    identity
        .strip_prefix(GUEST_PREFIX)
        .filter(|tail| !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|tail| tail.parse().ok())
}

/// Allocator for `guest<N>` identities
///
/// Tracks the set of guest numbers currently in use and always hands out the
/// lowest unused one. Numbers are also claimed when a client takes a custom
/// identity that happens to have the `guest<N>` shape, so the canonical form
/// of an allocated number can never collide with a live identity.
pub struct IdentityAllocator {
    in_use: Mutex<BTreeSet<u32>>,
}

impl IdentityAllocator {
    /// Create an allocator with every guest number free
    pub fn new() -> Self {
        Self {
            in_use: Mutex::new(BTreeSet::new()),
        }
    }

    /// Allocate the guest identity with the smallest unused number.
    ///
    /// Two concurrent calls never return the same identity.
    pub fn allocate(&self) -> String {
        let mut in_use = self.in_use.lock().unwrap_or_else(|e| e.into_inner());
        let mut number = 1;
        while in_use.contains(&number) {
            number += 1;
        }
        in_use.insert(number);
        format!("{GUEST_PREFIX}{number}")
    }

    /// Claim a specific guest number, e.g. for a custom identity spelled
    /// `guest<N>`. Returns false if the number is already in use.
    pub fn try_claim(&self, number: u32) -> bool {
        let mut in_use = self.in_use.lock().unwrap_or_else(|e| e.into_inner());
        in_use.insert(number)
    }

    /// Free the guest number of an identity matching `guest<N>`.
    ///
    /// The release is purely pattern-based: any identity that parses as
    /// `guest<N>` frees slot N, however the identity was obtained. Anything
    /// else is a no-op.
    pub fn release(&self, identity: &str) {
        if let Some(number) = guest_number(identity) {
            let mut in_use = self.in_use.lock().unwrap_or_else(|e| e.into_inner());
            in_use.remove(&number);
        }
    }

    /// Check whether `candidate` may become a live identity: charset/length
    /// rule, not currently held by a live connection, and (for `guest<N>`
    /// shapes) slot N not marked in use.
    pub fn is_valid_identity(&self, candidate: &str, live: &HashSet<String>) -> bool {
        if !is_valid_identity_name(candidate) || live.contains(candidate) {
            return false;
        }
        match guest_number(candidate) {
            Some(number) => {
                let in_use = self.in_use.lock().unwrap_or_else(|e| e.into_inner());
                !in_use.contains(&number)
            }
            None => true,
        }
    }
}

impl Default for IdentityAllocator {
    fn default() -> Self {
        Self::new()
    }
}
