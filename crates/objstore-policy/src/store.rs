//! Id-keyed policy registry shared by lifecycle and replication.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::{PolicyError, PolicyResult};

/// Anything stored in a [`PolicyStore`].
pub trait Policy: Clone + Send + Sync {
    /// Unique id.
    fn id(&self) -> &str;
}

/// In-memory registry of policies keyed by id.
///
/// Callers validate before calling [`PolicyStore::add`]; the store only enforces id uniqueness.
/// Reads return clones, never references into the map.
#[derive(Debug)]
pub struct PolicyStore<P> {
    policies: RwLock<BTreeMap<String, P>>,
}

impl<P> Default for PolicyStore<P> {
    fn default() -> Self {
        Self {
            policies: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<P: Policy> PolicyStore<P> {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a policy; fails with `PolicyAlreadyExists` if the id is taken.
    pub fn add(&self, policy: P) -> PolicyResult<()> {
        let mut policies = self.policies.write();
        if policies.contains_key(policy.id()) {
            return Err(PolicyError::PolicyAlreadyExists {
                id: policy.id().to_string(),
            });
        }
        policies.insert(policy.id().to_string(), policy);
        Ok(())
    }

    /// Removes and returns a policy.
    pub fn remove(&self, id: &str) -> PolicyResult<P> {
        self.policies
            .write()
            .remove(id)
            .ok_or_else(|| PolicyError::not_found(id))
    }

    /// Copy of one policy.
    pub fn get(&self, id: &str) -> PolicyResult<P> {
        self.policies
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| PolicyError::not_found(id))
    }

    /// Copies of every policy, ordered by id.
    pub fn list(&self) -> Vec<P> {
        self.policies.read().values().cloned().collect()
    }

    /// Whether a policy exists.
    pub fn contains(&self, id: &str) -> bool {
        self.policies.read().contains_key(id)
    }

    /// Number of policies.
    pub fn len(&self) -> usize {
        self.policies.read().len()
    }

    /// True when no policies are stored.
    pub fn is_empty(&self) -> bool {
        self.policies.read().is_empty()
    }

    /// Applies `f` to a stored policy under the write lock.
    pub(crate) fn modify<F>(&self, id: &str, f: F) -> PolicyResult<()>
    where
        F: FnOnce(&mut P),
    {
        let mut policies = self.policies.write();
        let policy = policies
            .get_mut(id)
            .ok_or_else(|| PolicyError::not_found(id))?;
        f(policy);
        Ok(())
    }

    /// Adds every policy whose id is not already present. Returns how many were added.
    pub(crate) fn extend(&self, items: impl IntoIterator<Item = P>) -> usize {
        let mut policies = self.policies.write();
        let mut added = 0;
        for policy in items {
            if !policies.contains_key(policy.id()) {
                policies.insert(policy.id().to_string(), policy);
                added += 1;
            }
        }
        added
    }
}
