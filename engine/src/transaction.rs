//! Transactional pairing of a local write with a remote call.
//!
//! The remote side can't be rolled back. If a local write succeeds and the
//! remote call fails, the local write is undone; if the remote call succeeds
//! and a later step fails, the remote change stays. A list refresh only
//! writes locally, so it runs as one transaction and a failed refresh leaves
//! no row pulled.

use crate::{error::Result, remote::RemoteApi, store::LocalStore};
use tracing::{debug, warn};

/// Run `f` inside a local transaction.
///
/// Commits on `Ok`, rolls back on `Err`. A failing rollback is logged and
/// the original error is returned.
pub fn atomic<S, T, F>(store: &mut S, f: F) -> Result<T>
where
    S: LocalStore + ?Sized,
    F: FnOnce(&mut S) -> Result<T>,
{
    store.begin()?;
    match f(store) {
        Ok(value) => {
            store.commit()?;
            Ok(value)
        }
        Err(err) => {
            debug!(error = %err, "rolling back local transaction");
            if let Err(rollback_err) = store.rollback() {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Run a local write followed by a remote call as one unit.
///
/// `local` runs first; its output is handed to `remote_call`, which may
/// write to the store again (e.g. to record stamps returned by the remote
/// side). Local effects are committed only if both succeed.
pub fn run<S, R, A, T, L, C>(store: &mut S, remote: &R, local: L, remote_call: C) -> Result<T>
where
    S: LocalStore + ?Sized,
    R: RemoteApi + ?Sized,
    L: FnOnce(&mut S) -> Result<A>,
    C: FnOnce(&R, &mut S, A) -> Result<T>,
{
    atomic(store, |store| {
        let staged = local(store)?;
        remote_call(remote, store, staged)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MockRemote, RemoteError, RemoteOp, RemoteSnapshot};
    use crate::{Entity, Error, MemoryStore};

    fn simple() -> Entity {
        Entity::new("simple").with("name", "a")
    }

    #[test]
    fn commits_when_both_sides_succeed() {
        let mut store = MemoryStore::new();
        let remote = MockRemote::new();

        let id = run(
            &mut store,
            &remote,
            |s| s.insert(&simple()),
            |r, _, id| {
                r.create("Simple", &RemoteSnapshot::new())?;
                Ok(id)
            },
        )
        .unwrap();

        assert!(store.get("simple", id).unwrap().is_some());
        assert!(!store.in_transaction());
        assert_eq!(remote.call_count(RemoteOp::Create), 1);
    }

    #[test]
    fn remote_failure_rolls_back_local_write() {
        let mut store = MemoryStore::new();
        let remote = MockRemote::new();
        remote.fail(RemoteOp::Create, RemoteError::Transport("reset".into()));

        let result = run(
            &mut store,
            &remote,
            |s| s.insert(&simple()),
            |r, _, id| {
                r.create("Simple", &RemoteSnapshot::new())?;
                Ok(id)
            },
        );

        assert!(matches!(result, Err(Error::Remote(RemoteError::Transport(_)))));
        assert_eq!(store.count("simple").unwrap(), 0);
        assert!(!store.in_transaction());
    }

    #[test]
    fn local_failure_skips_remote_call() {
        let mut store = MemoryStore::new();
        let remote = MockRemote::new();

        let result: Result<()> = run(
            &mut store,
            &remote,
            |s| s.update(&simple()),
            |r, _, ()| {
                r.delete("Simple", "x")?;
                Ok(())
            },
        );

        assert!(matches!(result, Err(Error::NotPersisted(_))));
        assert_eq!(remote.total_calls(), 0);
    }

    #[test]
    fn atomic_rolls_back_every_write() {
        let mut store = MemoryStore::new();
        let result: Result<()> = atomic(&mut store, |s| {
            s.insert(&simple())?;
            s.insert(&simple())?;
            Err(Error::Transaction("abort".into()))
        });

        assert!(result.is_err());
        assert_eq!(store.count("simple").unwrap(), 0);
    }
}
