use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One mutex per key, created on first use.
///
/// Transitions on the same playbook run one at a time; different playbooks
/// proceed in parallel. Entries are never evicted, which is fine for the
/// handful of playbooks a single process touches.
#[derive(Debug, Default)]
pub struct KeyedLock {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key.to_string()).or_default().clone()
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// A panic in an earlier holder does not wedge the key: the guarded data
    /// is `()`, so a poisoned mutex is simply taken over.
    pub fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let slot = self.slot(key);
        let _guard: MutexGuard<'_, ()> = slot.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_key_is_serialized() {
        let lock = Arc::new(KeyedLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (lock, inside, max_seen) = (lock.clone(), inside.clone(), max_seen.clone());
                thread::spawn(move || {
                    lock.with_lock("pb-1", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(lock.len(), 1);
    }

    #[test]
    fn poisoned_key_is_recovered() {
        let lock = Arc::new(KeyedLock::new());
        let l = lock.clone();
        let _ = thread::spawn(move || l.with_lock("pb-1", || panic!("boom"))).join();
        assert_eq!(lock.with_lock("pb-1", || 7), 7);
    }
}
