//! Per-name locking
//!
//! Serializes work on one named entity within the process while letting
//! different names proceed in parallel. Other processes are not covered.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard};

/// A set of named locks, created on demand and dropped when released
#[derive(Debug, Default)]
pub struct NameLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Held lock on one name; released on drop
#[derive(Debug)]
pub struct NameGuard<'a> {
    locks: &'a NameLocks,
    name: String,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `name` is free, then hold it
    pub fn acquire(&self, name: &str) -> NameGuard<'_> {
        let mut held = self.held_set();
        while held.contains(name) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        held.insert(name.to_string());

        NameGuard {
            locks: self,
            name: name.to_string(),
        }
    }

    // The set is only touched in single insert/remove steps, so a poisoned
    // lock still holds a consistent set.
    fn held_set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        self.locks.held_set().remove(&self.name);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, mpsc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn acquires_within(locks: &Arc<NameLocks>, name: &'static str, wait: Duration) -> bool {
        let (tx, rx) = mpsc::channel();
        let locks = locks.clone();
        thread::spawn(move || {
            let _guard = locks.acquire(name);
            let _ = tx.send(());
        });
        rx.recv_timeout(wait).is_ok()
    }

    #[test]
    fn guard_releases_on_drop() {
        let locks = Arc::new(NameLocks::new());
        {
            let _guard = locks.acquire("dev-1");
            assert!(!acquires_within(&locks, "dev-1", Duration::from_millis(50)));
        }
        assert!(acquires_within(&locks, "dev-1", Duration::from_secs(5)));
    }

    #[test]
    fn different_names_do_not_block() {
        let locks = Arc::new(NameLocks::new());
        let _a = locks.acquire("dev-1");
        assert!(acquires_within(&locks, "dev-2", Duration::from_secs(5)));
    }

    #[test]
    fn same_name_is_exclusive_across_threads() {
        let locks = Arc::new(NameLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    let _guard = locks.acquire("req-9");
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
