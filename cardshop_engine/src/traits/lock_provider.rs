use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

/// A short-lived hold on a settlement id while a notification is being processed.
///
/// The hold is an optimization that sheds duplicate notifications before they open a database
/// transaction. It is **not** the correctness mechanism; the durable settlement status is re-checked
/// inside the settlement transaction, so losing a hold (restart, expired TTL, [`NoopLockProvider`])
/// degrades to slightly more database work, never to a double delivery.
#[allow(async_fn_in_trait)]
pub trait LockProvider: Clone {
    /// Tries to take the hold for `key`. Returns `true` if the hold was acquired, `false` if another
    /// holder has it. The hold lapses on its own after `ttl`.
    async fn acquire(&self, key: &str, ttl: Duration) -> bool;

    /// Releases the hold for `key` early. Releasing a hold you do not have is a no-op.
    async fn release(&self, key: &str);
}

/// An in-process lock provider backed by a mutex-guarded map. Suitable for a single-process
/// deployment; a multi-process deployment wants a shared store behind the same trait.
#[derive(Clone, Default)]
pub struct MemoryLockProvider {
    holds: Arc<Mutex<HashMap<String, Instant>>>,
}

impl MemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockProvider for MemoryLockProvider {
    async fn acquire(&self, key: &str, ttl: Duration) -> bool {
        let mut holds = match self.holds.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        holds.retain(|_, deadline| *deadline > now);
        if holds.contains_key(key) {
            return false;
        }
        holds.insert(key.to_string(), now + ttl);
        true
    }

    async fn release(&self, key: &str) {
        let mut holds = match self.holds.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        holds.remove(key);
    }
}

/// A lock provider that never holds anything. Every notification proceeds straight to the database,
/// which stays correct because the settlement transaction re-checks the durable status.
#[derive(Clone, Copy, Default)]
pub struct NoopLockProvider;

impl LockProvider for NoopLockProvider {
    async fn acquire(&self, _key: &str, _ttl: Duration) -> bool {
        true
    }

    async fn release(&self, _key: &str) {}
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn memory_holds_are_exclusive_until_released() {
        let locks = MemoryLockProvider::new();
        assert!(locks.acquire("PAY123", Duration::from_secs(60)).await);
        assert!(!locks.acquire("PAY123", Duration::from_secs(60)).await);
        assert!(locks.acquire("PAY456", Duration::from_secs(60)).await);
        locks.release("PAY123").await;
        assert!(locks.acquire("PAY123", Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn memory_holds_lapse_after_ttl() {
        let locks = MemoryLockProvider::new();
        assert!(locks.acquire("PAY123", Duration::from_millis(20)).await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(locks.acquire("PAY123", Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn noop_provider_always_grants() {
        let locks = NoopLockProvider;
        assert!(locks.acquire("PAY123", Duration::from_secs(60)).await);
        assert!(locks.acquire("PAY123", Duration::from_secs(60)).await);
    }
}
