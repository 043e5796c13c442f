//! Pure rotation decision logic.
//!
//! The *trigger* (`should_rotate`, error threshold) and the *algorithm*
//! (candidate selection, done by [`KeyPool::next_candidate`]) are kept
//! separate so each can be tested on its own. The controller decides when
//! to call `rotate`; this module never looks at the clock or the network.

use tracing::info;

use crate::error::{ControllerError, Result};
use crate::pool::KeyPool;
use crate::state::ApiKey;
use crate::util::mask_key;

/// True when `key` has used up its error budget and should be rotated away.
pub fn should_rotate(key: &ApiKey, max_error_count: u32) -> bool {
    key.error_count >= max_error_count
}

/// Rotate the pool to its next candidate and return the new active key
/// value. `PoolExhausted` means every standby key has hit the error limit;
/// that is the controller's cue to fall back to another provider, not to
/// retry locally.
pub fn rotate(pool: &mut KeyPool, max_error_count: u32) -> Result<String> {
    let candidate = pool
        .next_candidate(max_error_count)?
        .map(|k| k.value.clone())
        .ok_or(ControllerError::PoolExhausted)?;

    pool.activate(&candidate)?;
    info!(key = %mask_key(&candidate), "rotated to next API key");
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_errors(entries: &[(&str, u32)]) -> KeyPool {
        let mut pool = KeyPool::default();
        for (value, errors) in entries {
            pool.add(value).unwrap();
            pool.set_error_count(value, *errors);
        }
        pool
    }

    #[test]
    fn threshold_trigger() {
        let mut key = ApiKey::new("key-a");
        key.error_count = 2;
        assert!(!should_rotate(&key, 3));
        key.error_count = 3;
        assert!(should_rotate(&key, 3));
        key.error_count = 4;
        assert!(should_rotate(&key, 3));
    }

    #[test]
    fn rotation_picks_the_healthiest_oldest_standby() {
        // A(err=3, active), B(err=1), C(err=2): B wins.
        let mut pool = pool_with_errors(&[("key-a", 3), ("key-b", 1), ("key-c", 2)]);

        let new_active = rotate(&mut pool, 3).unwrap();
        assert_eq!(new_active, "key-b");
        assert_eq!(pool.active().unwrap().value, "key-b");
        assert_eq!(pool.active().unwrap().error_count, 0);
        assert!(!pool.iter().find(|k| k.value == "key-a").unwrap().is_active);
    }

    #[test]
    fn rotation_signals_exhaustion_when_all_standbys_hit_the_limit() {
        let mut pool = pool_with_errors(&[("key-a", 3), ("key-b", 3)]);
        assert!(matches!(
            rotate(&mut pool, 3),
            Err(ControllerError::PoolExhausted)
        ));
        // The exhausted key stays active; state is unchanged.
        assert_eq!(pool.active().unwrap().value, "key-a");
    }

    #[test]
    fn rotation_on_a_single_key_pool_is_exhaustion() {
        let mut pool = pool_with_errors(&[("key-a", 0)]);
        assert!(matches!(
            rotate(&mut pool, 3),
            Err(ControllerError::PoolExhausted)
        ));
    }
}
