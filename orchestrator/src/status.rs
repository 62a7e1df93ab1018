//! StatusReconciler: answers "what is the state of session X".
//!
//! No single source is authoritative, so state is derived on every call:
//! the registry hint first, then the result record on disk. Liveness is
//! checked before completion because a just-finished process may not have
//! flushed its record yet; Processing is the deliberate unknown/in-flight
//! bucket covering both that race and the post-restart blind spot (the
//! registry is not persisted). That bounded ambiguity window is accepted
//! instead of paying for persistent process tracking.

use tracing::instrument;

use crate::registry::{Liveness, SessionRegistry};
use crate::session::{SessionKey, SessionStatus};
use crate::store::LogStore;

/// Derive the current status of a session.
#[instrument(skip_all, fields(key = %key))]
pub fn reconcile(registry: &SessionRegistry, store: &LogStore, key: &SessionKey) -> SessionStatus {
    match registry.poll(key) {
        Liveness::Alive => return SessionStatus::Running,
        Liveness::Exited | Liveness::NotRegistered => {}
    }
    match store.load_result(key) {
        Some(record) => SessionStatus::Completed(record),
        None => SessionStatus::Processing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ResultRecord;

    #[test]
    fn never_launched_is_processing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = LogStore::new(temp.path());
        let registry = SessionRegistry::new();

        let status = reconcile(&registry, &store, &SessionKey::new("row", 0));
        assert_eq!(status, SessionStatus::Processing);
    }

    #[test]
    fn result_record_wins_once_no_handle_is_live() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = LogStore::new(temp.path());
        let registry = SessionRegistry::new();
        let key = SessionKey::new("row", 0);

        let record = ResultRecord {
            success: true,
            stdout: vec!["done".to_string()],
            exec_time: Some(1.0),
            status: None,
            message: None,
        };
        store.write_result(&key, &record).expect("write");

        assert_eq!(
            reconcile(&registry, &store, &key),
            SessionStatus::Completed(record)
        );
    }

    #[test]
    fn malformed_record_is_processing_not_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = LogStore::new(temp.path());
        let registry = SessionRegistry::new();
        let key = SessionKey::new("row", 0);

        let path = store.result_path(&key);
        std::fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        std::fs::write(&path, "not json at all").expect("write");

        assert_eq!(reconcile(&registry, &store, &key), SessionStatus::Processing);
    }
}
