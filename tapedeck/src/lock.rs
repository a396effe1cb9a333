//! Named distributed locks.
//!
//! Physical actions are fenced by two named locks: `TapeDrive-{slot}` for
//! any per-drive LTFS action and `TapeChanger` for robot motion. The
//! [`Locker`] seam lets deployments plug in an external lock service; the
//! bundled [`InProcessLocker`] covers single-node installations.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// TTL for per-drive locks.
pub const DRIVE_LOCK_TTL: Duration = Duration::from_secs(5 * 60);

/// TTL for changer locks held across load/unload motions.
pub const CHANGER_LOCK_TTL: Duration = Duration::from_secs(5 * 60);

/// TTL for short changer acquisitions (slot-to-slot transfers).
pub const CHANGER_LOCK_SHORT_TTL: Duration = Duration::from_secs(2 * 60);

/// Name of the global changer lock.
pub const CHANGER_LOCK: &str = "TapeChanger";

/// Name of the lock fencing a drive.
pub fn drive_lock_name(slot_number: u32) -> String {
    format!("TapeDrive-{slot_number}")
}

/// A held lock; released on drop.
pub struct LockGuard {
    name: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    /// Build a guard that runs `release` when dropped.
    pub fn new(name: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            release: Some(Box::new(release)),
        }
    }

    /// Name of the held lock.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("name", &self.name).finish()
    }
}

/// Provider of named, TTL-bounded, mutually exclusive locks.
#[async_trait]
pub trait Locker: Send + Sync {
    /// Try to take `name` for `owner`.
    ///
    /// Returns `None` when another owner holds the lock. A held lock
    /// expires on its own after `ttl` if the guard is leaked (e.g. the
    /// process died mid-operation).
    async fn acquire(&self, name: &str, owner: &str, ttl: Duration) -> Option<LockGuard>;
}

#[derive(Debug)]
struct Holding {
    owner: String,
    expires_at: Instant,
}

/// Single-process [`Locker`] backed by an in-memory table.
#[derive(Debug, Default)]
pub struct InProcessLocker {
    holdings: Arc<Mutex<HashMap<String, Holding>>>,
}

impl InProcessLocker {
    /// Create a locker with no held locks.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Locker for InProcessLocker {
    async fn acquire(&self, name: &str, owner: &str, ttl: Duration) -> Option<LockGuard> {
        let mut holdings = self.holdings.lock().unwrap();
        let now = Instant::now();

        if let Some(current) = holdings.get(name) {
            if current.expires_at > now && current.owner != owner {
                debug!(lock = name, holder = %current.owner, "lock is held");
                return None;
            }
        }

        holdings.insert(
            name.to_string(),
            Holding {
                owner: owner.to_string(),
                expires_at: now + ttl,
            },
        );

        let table = Arc::clone(&self.holdings);
        let lock_name = name.to_string();
        let lock_owner = owner.to_string();
        Some(LockGuard::new(name, move || {
            let mut holdings = table.lock().unwrap();
            if holdings
                .get(&lock_name)
                .is_some_and(|holding| holding.owner == lock_owner)
            {
                holdings.remove(&lock_name);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release_on_drop() {
        let locker = InProcessLocker::new();

        let guard = locker
            .acquire("TapeChanger", "op-1", CHANGER_LOCK_TTL)
            .await
            .expect("first acquire succeeds");
        assert_eq!(guard.name(), "TapeChanger");

        assert!(
            locker
                .acquire("TapeChanger", "op-2", CHANGER_LOCK_TTL)
                .await
                .is_none(),
            "held lock rejects other owners"
        );

        drop(guard);
        assert!(locker
            .acquire("TapeChanger", "op-2", CHANGER_LOCK_TTL)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_different_names_do_not_contend() {
        let locker = InProcessLocker::new();
        let _drive1 = locker
            .acquire(&drive_lock_name(1), "op-1", DRIVE_LOCK_TTL)
            .await
            .unwrap();
        assert!(locker
            .acquire(&drive_lock_name(2), "op-2", DRIVE_LOCK_TTL)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_taken_over() {
        let locker = InProcessLocker::new();
        let guard = locker
            .acquire("TapeChanger", "op-1", Duration::ZERO)
            .await
            .unwrap();

        // TTL elapsed; a new owner may steal the lock even though the
        // guard still exists.
        let stolen = locker
            .acquire("TapeChanger", "op-2", CHANGER_LOCK_TTL)
            .await;
        assert!(stolen.is_some());

        // The stale guard must not release the new owner's holding.
        drop(guard);
        assert!(
            locker
                .acquire("TapeChanger", "op-3", CHANGER_LOCK_TTL)
                .await
                .is_none(),
            "op-2 still holds the lock"
        );
    }

    #[tokio::test]
    async fn test_same_owner_reacquires() {
        let locker = InProcessLocker::new();
        let _first = locker
            .acquire("TapeChanger", "op-1", CHANGER_LOCK_TTL)
            .await
            .unwrap();
        assert!(locker
            .acquire("TapeChanger", "op-1", CHANGER_LOCK_TTL)
            .await
            .is_some());
    }
}
