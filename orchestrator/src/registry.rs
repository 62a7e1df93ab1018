//! In-memory process table of record.
//!
//! The registry is deliberately not persisted: after a restart every session
//! reads as unregistered and the status reconciler falls back to file
//! artifacts. Registry membership is a hint, never ground truth.

use std::collections::HashMap;
use std::process::Child;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::session::SessionKey;

/// Liveness of the local submission process for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// No handle registered (never launched, or launched before a restart).
    NotRegistered,
    /// A registered handle is still running.
    Alive,
    /// A registered handle had exited; it has been removed (lazy cleanup).
    Exited,
}

/// Map from session key to the owned local-process handle.
///
/// Only three components touch this map: the launcher inserts, the status
/// reconciler lazily deletes dead handles, and the cancellation coordinator
/// deletes. The mutex serializes registration and removal per key so a
/// cancel racing a re-launch can never leave a dangling handle.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<SessionKey, Child>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle, replacing any prior one for the same key. The
    /// replaced child is dropped without being killed: it keeps running,
    /// orphaned. Callers that care must cancel before re-launching.
    pub fn register(&self, key: SessionKey, child: Child) {
        let mut map = self.lock();
        if let Some(prev) = map.insert(key.clone(), child) {
            warn!(%key, orphaned_pid = prev.id(), "replacing live handle; previous process orphaned");
        }
    }

    /// Poll liveness without blocking. Exited handles are removed on the
    /// spot, so repeated polls after exit report `NotRegistered`.
    pub fn poll(&self, key: &SessionKey) -> Liveness {
        let mut map = self.lock();
        let Some(child) = map.get_mut(key) else {
            return Liveness::NotRegistered;
        };
        match child.try_wait() {
            Ok(None) => Liveness::Alive,
            Ok(Some(status)) => {
                debug!(%key, exit_code = ?status.code(), "local process exited, removing handle");
                map.remove(key);
                Liveness::Exited
            }
            Err(e) => {
                warn!(%key, err = %e, "liveness poll failed, removing handle");
                map.remove(key);
                Liveness::Exited
            }
        }
    }

    /// Take ownership of the handle so the caller can terminate it outside
    /// the lock. Idempotent: returns `None` if nothing was registered.
    pub fn remove(&self, key: &SessionKey) -> Option<Child> {
        self.lock().remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionKey, Child>> {
        // A poisoned map only means a panic mid-mutation elsewhere; the map
        // itself (key -> Child) stays structurally valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn spawn_sleep(secs: &str) -> Child {
        Command::new("sleep")
            .arg(secs)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn sleep")
    }

    fn spawn_true() -> Child {
        Command::new("true")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn true")
    }

    #[test]
    fn unregistered_key_reports_not_registered() {
        let registry = SessionRegistry::new();
        assert_eq!(
            registry.poll(&SessionKey::new("row", 0)),
            Liveness::NotRegistered
        );
    }

    #[test]
    fn live_handle_reports_alive() {
        let registry = SessionRegistry::new();
        let key = SessionKey::new("row", 0);
        registry.register(key.clone(), spawn_sleep("5"));
        assert_eq!(registry.poll(&key), Liveness::Alive);

        let mut child = registry.remove(&key).expect("handle");
        child.kill().expect("kill");
        child.wait().expect("wait");
    }

    #[test]
    fn exited_handle_is_removed_lazily() {
        let registry = SessionRegistry::new();
        let key = SessionKey::new("row", 0);
        let mut child = spawn_true();
        child.wait().expect("wait for exit");
        // try_wait on an already-reaped child reports the stored status.
        registry.register(key.clone(), child);

        assert_eq!(registry.poll(&key), Liveness::Exited);
        assert_eq!(registry.poll(&key), Liveness::NotRegistered);
        assert!(registry.is_empty());
    }

    #[test]
    fn register_replaces_prior_handle() {
        let registry = SessionRegistry::new();
        let key = SessionKey::new("row", 0);
        registry.register(key.clone(), spawn_sleep("1"));
        registry.register(key.clone(), spawn_sleep("1"));

        let mut only = registry.remove(&key).expect("one handle");
        assert!(registry.remove(&key).is_none(), "exactly one handle per key");
        only.kill().expect("kill");
        only.wait().expect("wait");
    }
}
