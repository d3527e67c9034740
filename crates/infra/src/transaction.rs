//! Thread-bound transaction manager.
//!
//! Transactions live on the thread that began them. Each open transaction
//! keeps an undo log; resources that mutate shared state register a compensating
//! action with [`TransactionManager::register_rollback`], and a rollback runs
//! the log in reverse.
//!
//! ```text
//! begin ─▶ after_begin ─▶ work ─▶ before_commit ─▶ commit ─▶ after_commit
//!                           │            │ (error)
//!                           ▼            ▼
//!                        rollback: undo log (reverse) ─▶ after_rollback
//! ```
//!
//! `Propagation::Required` joins an open transaction without firing any hooks;
//! rolling back a joined transaction marks the owner rollback-only.

use std::cell::RefCell;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use finback_events::{NotifyError, TransactionHost, TransactionSynchronization};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Propagation {
    /// Join the open transaction, or begin one if none is open.
    #[default]
    Required,
    /// Always begin a new (nested) transaction.
    RequiresNew,
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction synchronization failed: {0}")]
    Synchronization(#[from] NotifyError),

    #[error("transaction was marked rollback-only and has been rolled back")]
    RollbackOnly,

    #[error("transaction handle completed out of order (expected depth {expected}, found {found})")]
    OutOfOrder { expected: usize, found: usize },
}

type UndoAction = Box<dyn FnOnce()>;

#[derive(Default)]
struct ActiveTransaction {
    undo: Vec<UndoAction>,
    rollback_only: bool,
}

thread_local! {
    static ACTIVE: RefCell<Vec<ActiveTransaction>> = RefCell::new(Vec::new());
}

/// Begins, commits and rolls back transactions on the calling thread, and
/// notifies registered [`TransactionSynchronization`]s of each transition.
#[derive(Default)]
pub struct TransactionManager {
    synchronizations: Vec<Arc<dyn TransactionSynchronization>>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("synchronizations", &self.synchronizations.len())
            .finish()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_synchronization(mut self, sync: Arc<dyn TransactionSynchronization>) -> Self {
        self.synchronizations.push(sync);
        self
    }

    /// Number of transactions open on this thread.
    pub fn depth() -> usize {
        ACTIVE.with(|a| a.borrow().len())
    }

    pub fn is_active() -> bool {
        Self::depth() > 0
    }

    /// Register `undo` with the innermost open transaction.
    ///
    /// Returns `false` (and drops `undo`) when no transaction is open; the
    /// caller's change is then final.
    pub fn register_rollback(undo: impl FnOnce() + 'static) -> bool {
        ACTIVE.with(|a| match a.borrow_mut().last_mut() {
            Some(tx) => {
                tx.undo.push(Box::new(undo));
                true
            }
            None => false,
        })
    }

    /// Mark the innermost open transaction rollback-only.
    pub fn set_rollback_only() {
        ACTIVE.with(|a| {
            if let Some(tx) = a.borrow_mut().last_mut() {
                tx.rollback_only = true;
            }
        });
    }

    pub fn begin(&self, propagation: Propagation) -> Result<TransactionHandle<'_>, TransactionError> {
        if propagation == Propagation::Required && Self::is_active() {
            return Ok(TransactionHandle {
                manager: self,
                kind: HandleKind::Joined,
                finished: false,
            });
        }

        let depth = ACTIVE.with(|a| {
            let mut active = a.borrow_mut();
            active.push(ActiveTransaction::default());
            active.len()
        });
        debug!(depth, ?propagation, "transaction begun");

        for sync in &self.synchronizations {
            if let Err(err) = sync.after_begin() {
                warn!(error = %err, "after_begin failed; rolling back");
                self.rollback_owned(depth)?;
                return Err(err.into());
            }
        }

        Ok(TransactionHandle {
            manager: self,
            kind: HandleKind::Owned { depth },
            finished: false,
        })
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err` (or panic).
    pub fn execute<T, E, F>(&self, propagation: Propagation, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<TransactionError>,
    {
        let tx = self.begin(propagation)?;
        match f() {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "rollback after failure did not complete cleanly");
                }
                Err(err)
            }
        }
    }

    fn check_depth(expected: usize) -> Result<(), TransactionError> {
        let found = Self::depth();
        if found == expected {
            Ok(())
        } else {
            Err(TransactionError::OutOfOrder { expected, found })
        }
    }

    fn commit_owned(&self, depth: usize) -> Result<(), TransactionError> {
        Self::check_depth(depth)?;

        let rollback_only = ACTIVE.with(|a| a.borrow().last().is_some_and(|tx| tx.rollback_only));
        if rollback_only {
            self.rollback_owned(depth)?;
            return Err(TransactionError::RollbackOnly);
        }

        for sync in &self.synchronizations {
            if let Err(err) = sync.before_commit() {
                warn!(depth, error = %err, "before_commit failed; rolling back");
                self.rollback_owned(depth)?;
                return Err(err.into());
            }
        }

        // Discarding the undo log is the commit.
        ACTIVE.with(|a| a.borrow_mut().pop());
        debug!(depth, "transaction committed");

        let mut first_err = None;
        for sync in &self.synchronizations {
            if let Err(err) = sync.after_commit() {
                warn!(depth, error = %err, "after_commit failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), |e| Err(e.into()))
    }

    fn rollback_owned(&self, depth: usize) -> Result<(), TransactionError> {
        Self::check_depth(depth)?;

        let tx = ACTIVE.with(|a| a.borrow_mut().pop()).unwrap_or_default();
        let undone = tx.undo.len();
        for undo in tx.undo.into_iter().rev() {
            undo();
        }
        debug!(depth, undone, "transaction rolled back");

        let mut first_err = None;
        for sync in &self.synchronizations {
            if let Err(err) = sync.after_rollback() {
                warn!(depth, error = %err, "after_rollback failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), |e| Err(e.into()))
    }
}

#[derive(Debug, Copy, Clone)]
enum HandleKind {
    Joined,
    Owned { depth: usize },
}

/// An open transaction. Rolled back on drop unless committed.
#[must_use = "an unfinished transaction rolls back when dropped"]
pub struct TransactionHandle<'a> {
    manager: &'a TransactionManager,
    kind: HandleKind,
    finished: bool,
}

impl TransactionHandle<'_> {
    /// `true` when this handle began the transaction (rather than joining one).
    pub fn is_new(&self) -> bool {
        matches!(self.kind, HandleKind::Owned { .. })
    }

    pub fn commit(mut self) -> Result<(), TransactionError> {
        self.finished = true;
        match self.kind {
            HandleKind::Joined => Ok(()),
            HandleKind::Owned { depth } => self.manager.commit_owned(depth),
        }
    }

    pub fn rollback(mut self) -> Result<(), TransactionError> {
        self.finished = true;
        match self.kind {
            HandleKind::Joined => {
                TransactionManager::set_rollback_only();
                Ok(())
            }
            HandleKind::Owned { depth } => self.manager.rollback_owned(depth),
        }
    }
}

impl Drop for TransactionHandle<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.kind {
            HandleKind::Joined => TransactionManager::set_rollback_only(),
            HandleKind::Owned { depth } => {
                warn!(depth, "transaction dropped without commit; rolling back");
                if let Err(err) = self.manager.rollback_owned(depth) {
                    warn!(depth, error = %err, "implicit rollback failed");
                }
            }
        }
    }
}

/// [`TransactionHost`] backed by the calling thread's transaction stack.
#[derive(Debug, Copy, Clone, Default)]
pub struct ThreadTransactionHost;

impl TransactionHost for ThreadTransactionHost {
    fn is_transaction_active(&self) -> bool {
        TransactionManager::is_active()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::sync::Mutex;

    use proptest::prelude::*;

    use super::*;

    #[derive(Default)]
    struct HookLog {
        calls: Mutex<Vec<&'static str>>,
        fail_before_commit: bool,
    }

    impl HookLog {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TransactionSynchronization for HookLog {
        fn after_begin(&self) -> Result<(), NotifyError> {
            self.calls.lock().unwrap().push("begin");
            Ok(())
        }

        fn before_commit(&self) -> Result<(), NotifyError> {
            self.calls.lock().unwrap().push("before_commit");
            if self.fail_before_commit {
                return Err(NotifyError::NoActiveFrame);
            }
            Ok(())
        }

        fn after_commit(&self) -> Result<(), NotifyError> {
            self.calls.lock().unwrap().push("after_commit");
            Ok(())
        }

        fn after_rollback(&self) -> Result<(), NotifyError> {
            self.calls.lock().unwrap().push("after_rollback");
            Ok(())
        }
    }

    fn manager(log: &Arc<HookLog>) -> TransactionManager {
        TransactionManager::new().with_synchronization(log.clone())
    }

    #[test]
    fn commit_fires_hooks_in_order() {
        let log = Arc::new(HookLog::default());
        let tm = manager(&log);

        let out: Result<u32, TransactionError> = tm.execute(Propagation::Required, || {
            assert!(ThreadTransactionHost.is_transaction_active());
            Ok(7)
        });

        assert_eq!(out.unwrap(), 7);
        assert_eq!(log.calls(), vec!["begin", "before_commit", "after_commit"]);
        assert_eq!(TransactionManager::depth(), 0);
    }

    #[test]
    fn failure_runs_undo_log_in_reverse() {
        let log = Arc::new(HookLog::default());
        let tm = manager(&log);
        let order = Rc::new(RefCell::new(Vec::new()));

        let out: Result<(), TransactionError> = tm.execute(Propagation::Required, || {
            for n in 1..=3 {
                let order = order.clone();
                assert!(TransactionManager::register_rollback(move || order.borrow_mut().push(n)));
            }
            Err(TransactionError::RollbackOnly)
        });

        assert!(out.is_err());
        assert_eq!(*order.borrow(), vec![3, 2, 1]);
        assert_eq!(log.calls(), vec!["begin", "after_rollback"]);
    }

    #[test]
    fn required_joins_without_hooks() {
        let log = Arc::new(HookLog::default());
        let tm = manager(&log);

        let outer = tm.begin(Propagation::Required).unwrap();
        let inner = tm.begin(Propagation::Required).unwrap();
        assert!(!inner.is_new());
        assert_eq!(TransactionManager::depth(), 1);
        inner.commit().unwrap();
        outer.commit().unwrap();

        assert_eq!(log.calls(), vec!["begin", "before_commit", "after_commit"]);
    }

    #[test]
    fn joined_rollback_dooms_the_owner() {
        let log = Arc::new(HookLog::default());
        let tm = manager(&log);

        let outer = tm.begin(Propagation::Required).unwrap();
        let inner = tm.begin(Propagation::Required).unwrap();
        inner.rollback().unwrap();

        assert!(matches!(outer.commit(), Err(TransactionError::RollbackOnly)));
        assert_eq!(log.calls(), vec!["begin", "after_rollback"]);
    }

    #[test]
    fn requires_new_nests() {
        let log = Arc::new(HookLog::default());
        let tm = manager(&log);

        let outer = tm.begin(Propagation::Required).unwrap();
        let inner = tm.begin(Propagation::RequiresNew).unwrap();
        assert_eq!(TransactionManager::depth(), 2);
        inner.rollback().unwrap();
        outer.commit().unwrap();

        assert_eq!(
            log.calls(),
            vec!["begin", "begin", "after_rollback", "before_commit", "after_commit"]
        );
    }

    #[test]
    fn before_commit_failure_becomes_rollback() {
        let log = Arc::new(HookLog {
            fail_before_commit: true,
            ..HookLog::default()
        });
        let tm = manager(&log);
        let undone = Rc::new(RefCell::new(false));

        let tx = tm.begin(Propagation::Required).unwrap();
        let flag = undone.clone();
        TransactionManager::register_rollback(move || *flag.borrow_mut() = true);

        assert!(matches!(tx.commit(), Err(TransactionError::Synchronization(_))));
        assert!(*undone.borrow());
        assert_eq!(log.calls(), vec!["begin", "before_commit", "after_rollback"]);
        assert_eq!(TransactionManager::depth(), 0);
    }

    #[test]
    fn dropped_handle_rolls_back() {
        let log = Arc::new(HookLog::default());
        let tm = manager(&log);
        {
            let _tx = tm.begin(Propagation::RequiresNew).unwrap();
        }
        assert_eq!(log.calls(), vec!["begin", "after_rollback"]);
        assert!(!TransactionManager::register_rollback(|| {}));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        // Each RequiresNew level keeps its own undo log: a level's write
        // survives exactly when that level commits.
        #[test]
        fn requires_new_levels_are_independent(commits in proptest::collection::vec(any::<bool>(), 1..8)) {
            let log = Arc::new(HookLog::default());
            let tm = manager(&log);
            let state = Rc::new(RefCell::new(Vec::new()));

            let mut handles = Vec::new();
            for level in 0..commits.len() {
                let handle = tm.begin(Propagation::RequiresNew).unwrap();
                state.borrow_mut().push(level);
                let undo = state.clone();
                TransactionManager::register_rollback(move || undo.borrow_mut().retain(|v| *v != level));
                handles.push(handle);
            }
            for (level, handle) in handles.into_iter().enumerate().rev() {
                if commits[level] {
                    handle.commit().unwrap();
                } else {
                    handle.rollback().unwrap();
                }
            }

            let expected: Vec<usize> = (0..commits.len()).filter(|l| commits[*l]).collect();
            prop_assert_eq!(state.borrow().clone(), expected);
            prop_assert_eq!(TransactionManager::depth(), 0);
            let begins = log.calls().iter().filter(|c| **c == "begin").count();
            prop_assert_eq!(begins, commits.len());
        }
    }
}
