//! Per-provider credential collection with health bookkeeping.
//!
//! The pool owns the activation invariant: at most one key is active, and a
//! non-empty pool always has exactly one active key (the first key added to
//! an empty pool is activated automatically). Rotation *decisions* live in
//! [`crate::rotation`]; the pool only does bookkeeping.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ControllerError, Result};
use crate::state::{ApiKey, Provider};
use crate::util::mask_key;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct KeyPool {
    keys: Vec<ApiKey>,
}

impl KeyPool {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ApiKey> {
        self.keys.iter()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.keys.iter().any(|k| k.value == value)
    }

    pub fn active(&self) -> Option<&ApiKey> {
        self.keys.iter().find(|k| k.is_active)
    }

    fn get_mut(&mut self, value: &str) -> Result<&mut ApiKey> {
        self.keys
            .iter_mut()
            .find(|k| k.value == value)
            .ok_or_else(|| ControllerError::NotFound(mask_key(value)))
    }

    /// Insert a new key. The key goes in inactive, except into an empty pool,
    /// where it becomes active immediately (bootstrap case).
    pub fn add(&mut self, value: &str) -> Result<()> {
        if self.contains(value) {
            return Err(ControllerError::DuplicateKey);
        }
        let mut key = ApiKey::new(value);
        key.is_active = self.keys.is_empty();
        self.keys.push(key);
        Ok(())
    }

    /// Remove a key. Removing an active key is rejected here; when other keys
    /// exist the controller rotates away from it first and retries.
    pub fn remove(&mut self, value: &str) -> Result<()> {
        let key = self
            .keys
            .iter()
            .find(|k| k.value == value)
            .ok_or_else(|| ControllerError::NotFound(mask_key(value)))?;

        if key.is_active {
            let reason = if self.keys.len() == 1 {
                "cannot remove the only remaining API key"
            } else {
                "cannot remove the active API key; rotate first"
            };
            return Err(ControllerError::Validation(reason.to_string()));
        }

        self.keys.retain(|k| k.value != value);
        Ok(())
    }

    /// Make `value` the single active key and reset its error budget.
    /// Activating the already-active key is a no-op, so retries cannot
    /// double-reset anything.
    pub fn activate(&mut self, value: &str) -> Result<()> {
        if !self.contains(value) {
            return Err(ControllerError::NotFound(mask_key(value)));
        }
        let already_active = self.active().is_some_and(|k| k.value == value);
        if !already_active {
            for key in &mut self.keys {
                key.is_active = false;
            }
            let key = self.get_mut(value)?;
            key.is_active = true;
            key.error_count = 0;
        }
        Ok(())
    }

    pub fn record_success(&mut self, value: &str) -> Result<()> {
        let key = self.get_mut(value)?;
        key.last_used = Some(OffsetDateTime::now_utc());
        key.error_count = 0;
        Ok(())
    }

    pub fn record_failure(&mut self, value: &str) -> Result<u32> {
        let key = self.get_mut(value)?;
        key.last_used = Some(OffsetDateTime::now_utc());
        key.error_count += 1;
        Ok(key.error_count)
    }

    /// The key that would become active on rotation: the inactive key with
    /// the lowest `error_count` still below `max_error_count`. Ties go to
    /// the key that follows the active one in insertion order, wrapping
    /// around, so repeated rotations walk the whole pool instead of
    /// bouncing between two keys. `Ok(None)` means every standby key is
    /// exhausted.
    pub fn next_candidate(&self, max_error_count: u32) -> Result<Option<&ApiKey>> {
        if self.keys.is_empty() {
            return Err(ControllerError::NoActiveKey(Provider::Openrouter));
        }
        let start = self
            .keys
            .iter()
            .position(|k| k.is_active)
            .map_or(0, |i| i + 1);
        let n = self.keys.len();
        // min_by_key keeps the first of equals, i.e. the cyclic successor.
        Ok((0..n)
            .map(|offset| &self.keys[(start + offset) % n])
            .filter(|k| !k.is_active && k.error_count < max_error_count)
            .min_by_key(|k| k.error_count))
    }

    #[cfg(test)]
    pub(crate) fn set_error_count(&mut self, value: &str, count: u32) {
        self.get_mut(value).unwrap().error_count = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(values: &[&str]) -> KeyPool {
        let mut pool = KeyPool::default();
        for v in values {
            pool.add(v).unwrap();
        }
        pool
    }

    fn assert_single_active(pool: &KeyPool) {
        assert_eq!(pool.iter().filter(|k| k.is_active).count(), 1);
    }

    #[test]
    fn first_key_added_to_empty_pool_becomes_active() {
        let pool = pool_with(&["key-a", "key-b"]);
        assert_eq!(pool.active().unwrap().value, "key-a");
        assert_single_active(&pool);
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let mut pool = pool_with(&["key-a"]);
        assert!(matches!(
            pool.add("key-a"),
            Err(ControllerError::DuplicateKey)
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn removing_the_sole_active_key_fails_and_leaves_pool_unchanged() {
        let mut pool = pool_with(&["key-a"]);
        assert!(matches!(
            pool.remove("key-a"),
            Err(ControllerError::Validation(_))
        ));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.active().unwrap().value, "key-a");
    }

    #[test]
    fn removing_an_unknown_key_is_not_found() {
        let mut pool = pool_with(&["key-a"]);
        assert!(matches!(
            pool.remove("key-z"),
            Err(ControllerError::NotFound(_))
        ));
    }

    #[test]
    fn removing_an_inactive_key_works() {
        let mut pool = pool_with(&["key-a", "key-b"]);
        pool.remove("key-b").unwrap();
        assert_eq!(pool.len(), 1);
        assert_single_active(&pool);
    }

    #[test]
    fn activate_switches_the_single_active_slot_and_resets_errors() {
        let mut pool = pool_with(&["key-a", "key-b"]);
        pool.set_error_count("key-b", 2);

        pool.activate("key-b").unwrap();
        assert_eq!(pool.active().unwrap().value, "key-b");
        assert_eq!(pool.active().unwrap().error_count, 0);
        assert_single_active(&pool);
    }

    #[test]
    fn activate_twice_is_idempotent() {
        let mut pool = pool_with(&["key-a", "key-b"]);
        pool.activate("key-b").unwrap();
        pool.record_failure("key-b").unwrap();

        // A repeated activation must not reset the counter again.
        pool.activate("key-b").unwrap();
        assert_eq!(pool.active().unwrap().error_count, 1);
        assert_single_active(&pool);
    }

    #[test]
    fn success_resets_the_error_count_and_stamps_last_used() {
        let mut pool = pool_with(&["key-a"]);
        pool.record_failure("key-a").unwrap();
        pool.record_failure("key-a").unwrap();

        pool.record_success("key-a").unwrap();
        let key = pool.active().unwrap();
        assert_eq!(key.error_count, 0);
        assert!(key.last_used.is_some());
    }

    #[test]
    fn next_candidate_prefers_lowest_error_count_then_insertion_order() {
        let mut pool = pool_with(&["key-a", "key-b", "key-c", "key-d"]);
        pool.set_error_count("key-b", 1);
        pool.set_error_count("key-c", 0);
        pool.set_error_count("key-d", 0);

        // key-a is active; key-c and key-d tie at zero, key-c was added first.
        let candidate = pool.next_candidate(3).unwrap().unwrap();
        assert_eq!(candidate.value, "key-c");
    }

    #[test]
    fn next_candidate_ties_walk_forward_from_the_active_key() {
        let mut pool = pool_with(&["key-a", "key-b", "key-c"]);
        pool.activate("key-b").unwrap();

        // All standbys at zero errors; the cyclic successor of key-b wins.
        let candidate = pool.next_candidate(3).unwrap().unwrap();
        assert_eq!(candidate.value, "key-c");

        pool.activate("key-c").unwrap();
        let candidate = pool.next_candidate(3).unwrap().unwrap();
        assert_eq!(candidate.value, "key-a");
    }

    #[test]
    fn next_candidate_skips_keys_at_the_error_limit() {
        let mut pool = pool_with(&["key-a", "key-b"]);
        pool.set_error_count("key-b", 3);
        assert!(pool.next_candidate(3).unwrap().is_none());
    }

    #[test]
    fn next_candidate_on_an_empty_pool_is_no_active_key() {
        let pool = KeyPool::default();
        assert!(matches!(
            pool.next_candidate(3),
            Err(ControllerError::NoActiveKey(_))
        ));
    }
}
