use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use switchboard_core::types::SessionKey;

use crate::thinking::ThinkingLevel;

/// Per-conversation settings consulted before every AI round trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub thinking_level: ThinkingLevel,
    pub verbose: bool,
}

/// Shared handle to the single settings instance of one session.
pub type SettingsHandle = Arc<RwLock<SessionSettings>>;

/// Thread-safe, in-memory session settings.
///
/// Entries are created lazily on first access and live until [`clear`]
/// removes them or the store is dropped. Nothing is persisted.
///
/// The map is read-mostly: lookups take the shared lock, and only a miss
/// escalates to the exclusive lock (re-checking before inserting so two
/// racing callers still end up with one instance).
///
/// [`clear`]: SessionStore::clear
#[derive(Debug, Default)]
pub struct SessionStore {
    settings: RwLock<HashMap<SessionKey, SettingsHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a consistent snapshot of the settings for `key`, creating
    /// the defaults (`medium`, not verbose) on first access.
    pub fn get(&self, key: &SessionKey) -> SessionSettings {
        let handle = self.handle(key);
        let snapshot = *read(&handle);
        snapshot
    }

    /// Return the shared settings instance for `key`, creating it if absent.
    pub fn handle(&self, key: &SessionKey) -> SettingsHandle {
        if let Some(existing) = read(&self.settings).get(key) {
            return Arc::clone(existing);
        }

        let mut map = write(&self.settings);
        // Another caller may have inserted while we waited for the write lock.
        if let Some(existing) = map.get(key) {
            return Arc::clone(existing);
        }

        debug!(session = %key, "creating default session settings");
        let handle: SettingsHandle = Arc::new(RwLock::new(SessionSettings::default()));
        map.insert(key.clone(), Arc::clone(&handle));
        handle
    }

    pub fn set_thinking_level(&self, key: &SessionKey, level: ThinkingLevel) {
        let handle = self.handle(key);
        write(&handle).thinking_level = level;
    }

    pub fn set_verbose(&self, key: &SessionKey, verbose: bool) {
        let handle = self.handle(key);
        write(&handle).verbose = verbose;
    }

    /// Remove the settings for `key`. Returns `true` if an entry existed.
    ///
    /// The next [`get`](SessionStore::get) recreates the defaults.
    pub fn clear(&self, key: &SessionKey) -> bool {
        write(&self.settings).remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        read(&self.settings).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// A panic while holding one of these locks cannot leave a half-written
// `SessionSettings` (both fields are written with single stores), so a
// poisoned lock is still safe to use.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn key(s: &str) -> SessionKey {
        SessionKey::from(s)
    }

    #[test]
    fn unseen_key_gets_defaults() {
        let store = SessionStore::new();
        let s = store.get(&key("slack:U1"));
        assert_eq!(s.thinking_level, ThinkingLevel::Medium);
        assert!(!s.verbose);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn set_thinking_level_is_visible_to_get() {
        let store = SessionStore::new();
        let k = key("telegram:42");
        store.set_thinking_level(&k, ThinkingLevel::High);
        assert_eq!(store.get(&k).thinking_level, ThinkingLevel::High);
    }

    #[test]
    fn set_verbose_keeps_thinking_level() {
        let store = SessionStore::new();
        let k = key("discord:7");
        store.set_thinking_level(&k, ThinkingLevel::Low);
        store.set_verbose(&k, true);
        let s = store.get(&k);
        assert_eq!(s.thinking_level, ThinkingLevel::Low);
        assert!(s.verbose);
    }

    #[test]
    fn clear_restores_defaults() {
        let store = SessionStore::new();
        let k = key("wecom:zhangsan");
        store.set_thinking_level(&k, ThinkingLevel::High);
        store.set_verbose(&k, true);
        assert!(store.clear(&k));
        assert!(store.is_empty());
        assert_eq!(store.get(&k), SessionSettings::default());
        assert!(!store.clear(&key("wecom:unknown")));
    }

    #[test]
    fn keys_are_independent() {
        let store = SessionStore::new();
        store.set_thinking_level(&key("slack:U1"), ThinkingLevel::Off);
        assert_eq!(
            store.get(&key("telegram:U1")).thinking_level,
            ThinkingLevel::Medium
        );
    }

    #[test]
    fn racing_first_access_creates_one_instance() {
        let store = Arc::new(SessionStore::new());
        let barrier = Arc::new(Barrier::new(16));
        let k = key("feishu:oc_race");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                let k = k.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.handle(&k)
                })
            })
            .collect();

        let instances: Vec<SettingsHandle> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        for inst in &instances[1..] {
            assert!(Arc::ptr_eq(&instances[0], inst));
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_writers_never_expose_partial_state() {
        let store = Arc::new(SessionStore::new());
        let k = key("slack:busy");
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let k = k.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        let level = ThinkingLevel::ALL[i % 4];
                        store.set_thinking_level(&k, level);
                        store.set_verbose(&k, i % 2 == 0);
                        let s = store.get(&k);
                        assert!(ThinkingLevel::ALL.contains(&s.thinking_level));
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(store.len(), 1);
    }
}
