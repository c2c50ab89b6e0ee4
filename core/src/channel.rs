//! Minimal channel model
//!
//! Only what the propagation fabric needs: membership and per-member status
//! modes. Full channel semantics (topics, keys, ban checks, the JOIN/PART
//! command family) live in handler modules, not here.

use std::collections::{HashMap, HashSet};

/// A channel as the core sees it
#[derive(Debug, Clone, Default)]
pub struct Channel {
    /// Channel name, case preserved
    pub name: String,
    /// Member UID → status mode names held there (op, voice, ...)
    members: HashMap<String, HashSet<String>>,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: HashMap::new(),
        }
    }

    /// Add a member; no-op if already present
    pub fn add_member(&mut self, uid: &str) {
        self.members.entry(uid.to_string()).or_default();
    }

    /// Remove a member; returns true if they were present
    pub fn remove_member(&mut self, uid: &str) -> bool {
        self.members.remove(uid).is_some()
    }

    pub fn has_member(&self, uid: &str) -> bool {
        self.members.contains_key(uid)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Grant a status mode to a member; returns false if not a member
    pub fn set_status(&mut self, uid: &str, mode: &str) -> bool {
        match self.members.get_mut(uid) {
            Some(statuses) => {
                statuses.insert(mode.to_string());
                true
            }
            None => false,
        }
    }

    /// Revoke a status mode from a member
    pub fn unset_status(&mut self, uid: &str, mode: &str) -> bool {
        self.members
            .get_mut(uid)
            .map(|s| s.remove(mode))
            .unwrap_or(false)
    }

    /// Status mode names a member holds, sorted for stable output
    pub fn statuses(&self, uid: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .members
            .get(uid)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// All member UIDs
    pub fn member_uids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }
}
