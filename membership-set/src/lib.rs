// membership-set/src/lib.rs

//! Address Membership Set (C2): an exact, in-memory mirror of every
//! currently-active watched address, used to pre-screen broadcast
//! transactions in O(1) before anything touches the store.
//!
//! `MembershipSet` does not know about the store directly (that would
//! make this leaf crate depend on `store`, inverting the dependency
//! order in the design). Instead the caller (`tracker-app`, at startup,
//! and the `api` crate, on every address add/remove) is responsible for
//! keeping it in sync: populate once via [`MembershipSet::load`], then
//! call [`MembershipSet::add`]/[`MembershipSet::remove`] as the store
//! changes. A false negative here is a correctness bug; a stale
//! positive is fine; it is filtered out by the store lookup in `intake`.

use dashmap::DashSet;
use std::collections::HashSet;

/// Exact, concurrent set of watched addresses. Cheap to clone (an `Arc`
/// internally would be the caller's job); this type is itself the shared
/// handle since `DashSet` is safe to use behind a plain reference or an
/// `Arc<MembershipSet>`.
#[derive(Debug, Default)]
pub struct MembershipSet {
    addresses: DashSet<String>,
}

impl MembershipSet {
    pub fn new() -> Self {
        Self {
            addresses: DashSet::new(),
        }
    }

    /// Bulk-populate from an iterator, typically every `active=true`
    /// address streamed from the store at startup. Replaces any existing
    /// contents.
    pub fn load<I: IntoIterator<Item = String>>(&self, addresses: I) {
        self.addresses.clear();
        for addr in addresses {
            self.addresses.insert(addr);
        }
    }

    pub fn add(&self, address: impl Into<String>) {
        self.addresses.insert(address.into());
    }

    pub fn add_many<I: IntoIterator<Item = String>>(&self, addresses: I) {
        for addr in addresses {
            self.addresses.insert(addr);
        }
    }

    pub fn remove(&self, address: &str) {
        self.addresses.remove(address);
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    /// Returns the subset of `candidates` that are currently watched.
    pub fn filter<I: IntoIterator<Item = String>>(&self, candidates: I) -> HashSet<String> {
        candidates
            .into_iter()
            .filter(|addr| self.addresses.contains(addr))
            .collect()
    }

    pub fn size(&self) -> usize {
        self.addresses.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_replaces_prior_contents() {
        let set = MembershipSet::new();
        set.load(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(set.size(), 2);
        set.load(vec!["c".to_string()]);
        assert_eq!(set.size(), 1);
        assert!(!set.contains("a"));
        assert!(set.contains("c"));
    }

    #[test]
    fn filter_returns_only_watched_candidates() {
        let set = MembershipSet::new();
        set.add("watched1");
        set.add("watched2");
        let matched = set.filter(vec![
            "watched1".to_string(),
            "unwatched".to_string(),
            "watched2".to_string(),
        ]);
        assert_eq!(matched.len(), 2);
        assert!(matched.contains("watched1"));
        assert!(matched.contains("watched2"));
    }

    #[test]
    fn remove_drops_membership() {
        let set = MembershipSet::new();
        set.add("x");
        assert!(set.contains("x"));
        set.remove("x");
        assert!(!set.contains("x"));
    }

    #[test]
    fn add_many_is_idempotent_with_duplicates() {
        let set = MembershipSet::new();
        set.add_many(vec!["a".to_string(), "a".to_string(), "b".to_string()]);
        assert_eq!(set.size(), 2);
    }
}
