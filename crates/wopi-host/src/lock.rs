//! Per-file WOPI locks
//!
//! Each file id owns a slot guarded by its own async mutex. Slots are created
//! lazily on first access, so operations on different files never contend,
//! while every state transition on one file (check-then-act on the lock, or
//! a lock check followed by a content write) runs inside that file's slot.
//!
//! Lock states are `Unlocked` or `Locked(token, expires_at)`. Expiry is never
//! swept by a timer for correctness: whoever inspects a slot after its lock
//! expired reaps it inline. A slot left unlocked and unused is dropped when
//! its last guard goes away, so reads of unknown ids leave nothing behind.
//! [`LockManager::prune_idle`] reclaims slots whose lock lapsed unobserved.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::{WopiError, WopiResult};

/// Default lock lifetime used by WOPI clients
pub const DEFAULT_LOCK_TTL_SECS: i64 = 30 * 60;

/// Source of "now" for lock expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: StdMutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: StdMutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An active lock as held in a slot
#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveLock {
    token: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl ActiveLock {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Lock info for API responses and logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub file_id: String,
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Lock state of one file
#[derive(Debug, Default)]
pub struct LockSlot {
    lock: Option<ActiveLock>,
}

type SharedSlot = Arc<Mutex<LockSlot>>;
type SlotMap = Arc<DashMap<String, SharedSlot>>;

/// Owns all lock state for one server process
pub struct LockManager {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slots: SlotMap,
}

impl LockManager {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            slots: Arc::new(DashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Enter the exclusion region of `file_id`.
    ///
    /// The returned guard serializes against every other operation on the
    /// same file until it is dropped. Hold it only for a single transition.
    pub async fn enter(&self, file_id: &str) -> FileGuard {
        let slot = self
            .slots
            .entry(file_id.to_string())
            .or_default()
            .value()
            .clone();

        FileGuard {
            file_id: file_id.to_string(),
            slot: slot.lock_owned().await,
            ttl: self.ttl,
            clock: self.clock.clone(),
            slots: self.slots.clone(),
        }
    }

    pub async fn lock(&self, file_id: &str, token: &str) -> WopiResult<LockInfo> {
        self.enter(file_id).await.lock(token)
    }

    pub async fn unlock(&self, file_id: &str, token: &str) -> WopiResult<()> {
        self.enter(file_id).await.unlock(token)
    }

    pub async fn refresh_lock(&self, file_id: &str, token: &str) -> WopiResult<LockInfo> {
        self.enter(file_id).await.refresh(token)
    }

    pub async fn unlock_and_relock(
        &self,
        file_id: &str,
        old_token: &str,
        new_token: &str,
    ) -> WopiResult<LockInfo> {
        self.enter(file_id).await.unlock_and_relock(old_token, new_token)
    }

    /// Current lock token, if a live lock exists
    pub async fn get_lock(&self, file_id: &str) -> Option<String> {
        self.enter(file_id).await.current_token().map(str::to_string)
    }

    /// Number of slots currently tracked
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Drop slots that hold no live lock and are not in use by any request.
    /// Returns the number of slots removed.
    pub fn prune_idle(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;

        // `retain` holds the shard lock, so no new handle to a slot can be
        // cloned while its reference count is inspected.
        self.slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let keep = match slot.try_lock() {
                Ok(guard) => guard.lock.as_ref().is_some_and(|l| !l.is_expired(now)),
                Err(_) => true,
            };
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            debug!("Pruned {} idle lock slots", removed);
        }
        removed
    }
}

/// Exclusive access to one file's lock slot
pub struct FileGuard {
    file_id: String,
    slot: OwnedMutexGuard<LockSlot>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slots: SlotMap,
}

impl FileGuard {
    /// Reap an expired lock, then return the live one.
    fn live_lock(&mut self) -> Option<&ActiveLock> {
        let now = self.clock.now();
        if self.slot.lock.as_ref().is_some_and(|l| l.is_expired(now)) {
            if let Some(expired) = self.slot.lock.take() {
                debug!(
                    "Reaped expired lock on {} (expired at {})",
                    self.file_id, expired.expires_at
                );
            }
        }
        self.slot.lock.as_ref()
    }

    /// Token of the live lock, reaping an expired one first
    pub fn current_token(&mut self) -> Option<&str> {
        self.live_lock().map(|l| l.token.as_str())
    }

    fn mismatch(&self, current: Option<&str>) -> WopiError {
        WopiError::LockMismatch {
            file_id: self.file_id.clone(),
            current: current.map(str::to_string),
        }
    }

    fn install(
        &mut self,
        token: &str,
        acquired_at: Option<DateTime<Utc>>,
    ) -> WopiResult<LockInfo> {
        let now = self.clock.now();
        let expires_at = now.checked_add_signed(self.ttl).ok_or_else(|| {
            WopiError::Internal(format!("Lock ttl {} is out of range", self.ttl))
        })?;
        let lock = ActiveLock {
            token: token.to_string(),
            acquired_at: acquired_at.unwrap_or(now),
            expires_at,
        };
        let info = LockInfo {
            file_id: self.file_id.clone(),
            token: lock.token.clone(),
            acquired_at: lock.acquired_at,
            expires_at: lock.expires_at,
        };
        self.slot.lock = Some(lock);
        Ok(info)
    }

    /// Lock an unlocked (or expired) file. Re-locking with the held token
    /// succeeds and extends the expiry.
    pub fn lock(&mut self, token: &str) -> WopiResult<LockInfo> {
        match self.live_lock() {
            None => {
                let info = self.install(token, None)?;
                info!("Lock acquired on {}", self.file_id);
                Ok(info)
            }
            Some(held) if held.token == token => {
                let acquired_at = held.acquired_at;
                self.install(token, Some(acquired_at))
            }
            Some(held) => {
                let current = held.token.clone();
                Err(self.mismatch(Some(&current)))
            }
        }
    }

    pub fn unlock(&mut self, token: &str) -> WopiResult<()> {
        match self.live_lock() {
            None => Err(WopiError::NotLocked(self.file_id.clone())),
            Some(held) if held.token == token => {
                self.slot.lock = None;
                info!("Lock released on {}", self.file_id);
                Ok(())
            }
            Some(held) => {
                let current = held.token.clone();
                Err(self.mismatch(Some(&current)))
            }
        }
    }

    /// Extend the expiry of the held lock.
    ///
    /// The holder may refresh a lock whose TTL has lapsed as long as nobody
    /// else has claimed the file since; the refresh is itself the inspection
    /// that would otherwise reap it.
    pub fn refresh(&mut self, token: &str) -> WopiResult<LockInfo> {
        let held = self
            .slot
            .lock
            .as_ref()
            .filter(|l| l.token == token)
            .map(|l| l.acquired_at);

        match held {
            Some(acquired_at) => {
                debug!("Lock refreshed on {}", self.file_id);
                self.install(token, Some(acquired_at))
            }
            None => match self.live_lock() {
                None => Err(WopiError::NotLocked(self.file_id.clone())),
                Some(other) => {
                    let current = other.token.clone();
                    Err(self.mismatch(Some(&current)))
                }
            },
        }
    }

    /// Swap the lock token in one transition; the file is never observably
    /// unlocked in between.
    pub fn unlock_and_relock(&mut self, old_token: &str, new_token: &str) -> WopiResult<LockInfo> {
        match self.live_lock() {
            None => Err(WopiError::NotLocked(self.file_id.clone())),
            Some(held) if held.token == old_token => {
                let info = self.install(new_token, None)?;
                info!("Lock replaced on {}", self.file_id);
                Ok(info)
            }
            Some(held) => {
                let current = held.token.clone();
                Err(self.mismatch(Some(&current)))
            }
        }
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        if self.slot.lock.is_some() {
            return;
        }
        // One handle lives in the map and one in this guard. Any other
        // request waiting on the slot holds a third, and the shard lock
        // taken by `remove_if` keeps new handles from being cloned meanwhile.
        self.slots
            .remove_if(&self.file_id, |_, slot| Arc::strong_count(slot) == 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn manager() -> (LockManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let manager = LockManager::with_clock(Duration::minutes(30), clock.clone());
        (manager, clock)
    }

    fn current_of(err: WopiError) -> Option<String> {
        match err {
            WopiError::LockMismatch { current, .. } => current,
            other => panic!("expected lock mismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lock_on_unknown_file_starts_unlocked() {
        let (locks, _) = manager();
        assert_eq!(locks.get_lock("doc1").await, None);
        let info = locks.lock("doc1", "tok1").await.unwrap();
        assert_eq!(info.token, "tok1");
        assert_eq!(locks.get_lock("doc1").await.as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn test_second_lock_surfaces_current_token() {
        let (locks, _) = manager();
        locks.lock("doc1", "tok1").await.unwrap();
        let err = locks.lock("doc1", "tok2").await.unwrap_err();
        assert_eq!(current_of(err).as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn test_relock_with_same_token_extends_expiry() {
        let (locks, clock) = manager();
        let first = locks.lock("doc1", "tok1").await.unwrap();
        clock.advance(Duration::minutes(10));
        let second = locks.lock("doc1", "tok1").await.unwrap();
        assert_eq!(second.acquired_at, first.acquired_at);
        assert!(second.expires_at > first.expires_at);
    }

    #[tokio::test]
    async fn test_unlock_then_reacquire() {
        let (locks, _) = manager();
        locks.lock("doc1", "tok1").await.unwrap();
        locks.unlock("doc1", "tok1").await.unwrap();
        locks.lock("doc1", "tok2").await.unwrap();
        assert_eq!(locks.get_lock("doc1").await.as_deref(), Some("tok2"));
    }

    #[tokio::test]
    async fn test_unlock_failures() {
        let (locks, _) = manager();
        assert!(matches!(
            locks.unlock("doc1", "tok1").await,
            Err(WopiError::NotLocked(_))
        ));

        locks.lock("doc1", "tok1").await.unwrap();
        let err = locks.unlock("doc1", "wrong").await.unwrap_err();
        assert_eq!(current_of(err).as_deref(), Some("tok1"));
        assert_eq!(locks.get_lock("doc1").await.as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn test_expired_lock_is_reaped_lazily() {
        let (locks, clock) = manager();
        locks.lock("doc1", "tok1").await.unwrap();
        clock.advance(Duration::minutes(31));

        assert_eq!(locks.get_lock("doc1").await, None);
        assert!(matches!(
            locks.unlock("doc1", "tok1").await,
            Err(WopiError::NotLocked(_))
        ));
        locks.lock("doc1", "tok2").await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_with_wrong_token_does_not_extend() {
        let (locks, clock) = manager();
        let original = locks.lock("doc1", "tok1").await.unwrap();

        clock.advance(Duration::minutes(20));
        let err = locks.refresh_lock("doc1", "tok2").await.unwrap_err();
        assert_eq!(current_of(err).as_deref(), Some("tok1"));

        // Original expiry still applies
        clock.advance(Duration::minutes(11));
        assert!(clock.now() > original.expires_at);
        assert_eq!(locks.get_lock("doc1").await, None);
    }

    #[tokio::test]
    async fn test_refresh_extends_expiry() {
        let (locks, clock) = manager();
        locks.lock("doc1", "tok1").await.unwrap();
        clock.advance(Duration::minutes(20));
        let refreshed = locks.refresh_lock("doc1", "tok1").await.unwrap();
        assert_eq!(refreshed.expires_at, clock.now() + Duration::minutes(30));

        clock.advance(Duration::minutes(20));
        assert_eq!(locks.get_lock("doc1").await.as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn test_refresh_unlocked_fails() {
        let (locks, _) = manager();
        assert!(matches!(
            locks.refresh_lock("doc1", "tok1").await,
            Err(WopiError::NotLocked(_))
        ));
    }

    #[tokio::test]
    async fn test_holder_can_refresh_lapsed_lock_before_reap() {
        let (locks, clock) = manager();
        locks.lock("doc1", "tok1").await.unwrap();
        clock.advance(Duration::minutes(31));
        locks.refresh_lock("doc1", "tok1").await.unwrap();
        assert_eq!(locks.get_lock("doc1").await.as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn test_unlock_and_relock() {
        let (locks, _) = manager();
        locks.lock("doc1", "tok1").await.unwrap();

        let err = locks
            .unlock_and_relock("doc1", "wrong", "tok2")
            .await
            .unwrap_err();
        assert_eq!(current_of(err).as_deref(), Some("tok1"));

        let info = locks.unlock_and_relock("doc1", "tok1", "tok2").await.unwrap();
        assert_eq!(info.token, "tok2");
        assert_eq!(locks.get_lock("doc1").await.as_deref(), Some("tok2"));

        assert!(matches!(
            locks.unlock_and_relock("doc2", "a", "b").await,
            Err(WopiError::NotLocked(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lock_on_expired_has_single_winner() {
        for _ in 0..50 {
            let (locks, clock) = manager();
            let locks = Arc::new(locks);
            locks.lock("doc1", "stale").await.unwrap();
            clock.advance(Duration::minutes(45));

            let a = tokio::spawn({
                let locks = locks.clone();
                async move { locks.lock("doc1", "tokA").await }
            });
            let b = tokio::spawn({
                let locks = locks.clone();
                async move { locks.lock("doc1", "tokB").await }
            });
            let (a, b) = (a.await.unwrap(), b.await.unwrap());

            match (a, b) {
                (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => {
                    assert_eq!(current_of(lost).as_deref(), Some(won.token.as_str()));
                }
                other => panic!("expected exactly one winner, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_guard_serializes_same_file_only() {
        let (locks, _) = manager();
        let locks = Arc::new(locks);
        let guard = locks.enter("doc1").await;

        // Other files stay available while doc1 is held
        locks.lock("doc2", "tok").await.unwrap();

        let pending = tokio::spawn({
            let locks = locks.clone();
            async move { locks.lock("doc1", "tok1").await }
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        drop(guard);
        pending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unlocked_slots_released_with_guard() {
        let (locks, _) = manager();
        for i in 0..100 {
            assert_eq!(locks.get_lock(&format!("ghost{}", i)).await, None);
        }
        assert_eq!(locks.slot_count(), 0);

        locks.lock("doc1", "tok1").await.unwrap();
        assert_eq!(locks.slot_count(), 1);
        locks.unlock("doc1", "tok1").await.unwrap();
        assert_eq!(locks.slot_count(), 0);
    }

    #[tokio::test]
    async fn test_slot_kept_while_another_request_waits() {
        let (locks, _) = manager();
        let locks = Arc::new(locks);
        let guard = locks.enter("doc1").await;

        let waiting = tokio::spawn({
            let locks = locks.clone();
            async move { locks.lock("doc1", "tok1").await }
        });
        tokio::task::yield_now().await;

        drop(guard);
        waiting.await.unwrap().unwrap();
        assert_eq!(locks.slot_count(), 1);
        assert_eq!(locks.get_lock("doc1").await.as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_an_error() {
        let locks = LockManager::new(Duration::seconds(10_000_000_000_000));
        assert!(matches!(
            locks.lock("doc1", "tok1").await,
            Err(WopiError::Internal(_))
        ));
        assert_eq!(locks.get_lock("doc1").await, None);
    }

    #[tokio::test]
    async fn test_prune_idle_drops_lapsed_locks() {
        let (locks, clock) = manager();
        locks.lock("held", "tok").await.unwrap();
        locks.lock("stale", "tok").await.unwrap();
        assert_eq!(locks.slot_count(), 2);
        assert_eq!(locks.prune_idle(), 0);

        clock.advance(Duration::minutes(10));
        locks.refresh_lock("held", "tok").await.unwrap();
        clock.advance(Duration::minutes(25));
        assert_eq!(locks.prune_idle(), 1);
        assert_eq!(locks.slot_count(), 1);
        assert_eq!(locks.get_lock("held").await.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_prune_skips_slots_in_use() {
        let (locks, clock) = manager();
        locks.lock("busy", "tok").await.unwrap();
        clock.advance(Duration::minutes(31));

        let guard = locks.enter("busy").await;
        assert_eq!(locks.prune_idle(), 0);
        drop(guard);
        assert_eq!(locks.prune_idle(), 1);
        assert_eq!(locks.slot_count(), 0);
    }
}
