// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Ambient transactions and commit driving.
//!
//! A [`Transaction`] is a cheaply cloneable handle shared between the worker
//! that opened it and every resource enlisted in it. Ambient discovery uses a
//! thread-local scope stack: [`TxnScope::begin`] pushes a fresh transaction,
//! [`Transaction::current`] reads the top of the stack, and the scope drives
//! the two-phase-commit outcome when it ends. Dropping a scope that was never
//! completed rolls the transaction back.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::error::TxnError;
use super::{Participant, PrepareVote};

/// Unique transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId(pub u64);

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

type CompletionHook = Box<dyn FnOnce(&Transaction) + Send>;

struct TxnInner {
    id: TxnId,
    state: Mutex<TxnState>,
    participants: Mutex<Vec<Arc<dyn Participant>>>,
    completions: Mutex<Vec<CompletionHook>>,
}

thread_local! {
    static AMBIENT: RefCell<Vec<Transaction>> = const { RefCell::new(Vec::new()) };
}

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// A transaction handle.
///
/// Handles are `Send + Sync` and compare equal when they refer to the same
/// transaction. Enlisted participants receive the two-phase-commit callbacks
/// on the thread that drives the outcome; the manager serializes those
/// callbacks per transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxnInner>,
}

impl Transaction {
    fn new() -> Self {
        Self {
            inner: Arc::new(TxnInner {
                id: TxnId(NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed)),
                state: Mutex::new(TxnState::Active),
                participants: Mutex::new(Vec::new()),
                completions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the ambient transaction for the calling thread, if any.
    pub fn current() -> Option<Transaction> {
        AMBIENT.with(|stack| stack.borrow().last().cloned())
    }

    /// Returns the transaction ID.
    #[inline]
    pub fn id(&self) -> TxnId {
        self.inner.id
    }

    /// Returns the current state.
    pub fn state(&self) -> TxnState {
        *self.inner.state.lock()
    }

    /// Returns true if the transaction is active.
    pub fn is_active(&self) -> bool {
        self.state() == TxnState::Active
    }

    /// Enlists a volatile participant.
    ///
    /// The participant will receive exactly one outcome callback
    /// (`commit`, `rollback`, or `in_doubt`), possibly preceded by `prepare`.
    /// The manager drops its participant references once the transaction
    /// terminates.
    pub fn enlist_volatile(&self, participant: Arc<dyn Participant>) -> Result<(), TxnError> {
        match self.state() {
            TxnState::Active => {
                self.inner.participants.lock().push(participant);
                Ok(())
            }
            TxnState::Committed => Err(TxnError::AlreadyCommitted),
            TxnState::Aborted => Err(TxnError::AlreadyAborted),
        }
    }

    /// Registers a one-shot hook fired when the transaction terminates for
    /// any reason. If the transaction has already terminated, the hook runs
    /// immediately on the calling thread.
    pub fn on_completed<F>(&self, hook: F)
    where
        F: FnOnce(&Transaction) + Send + 'static,
    {
        {
            let state = self.inner.state.lock();
            if *state == TxnState::Active {
                self.inner.completions.lock().push(Box::new(hook));
                return;
            }
        }
        hook(self);
    }

    /// Drives the commit protocol.
    ///
    /// A single enlisted participant gets a single-phase `commit` with no
    /// prepare round. Otherwise every participant is prepared in enlistment
    /// order; any `ForceRollback` vote aborts the transaction and delivers
    /// `rollback` to every participant.
    fn drive_commit(&self) -> Result<(), TxnError> {
        {
            let state = self.inner.state.lock();
            match *state {
                TxnState::Active => {}
                TxnState::Committed => return Err(TxnError::AlreadyCommitted),
                TxnState::Aborted => return Err(TxnError::AlreadyAborted),
            }
        }

        let participants: Vec<_> = self.inner.participants.lock().clone();
        let result = if participants.len() == 1 {
            participants[0].commit()
        } else {
            self.two_phase_commit(&participants)
        };

        let outcome = if result.is_ok() {
            TxnState::Committed
        } else {
            TxnState::Aborted
        };
        *self.inner.state.lock() = outcome;
        debug!(txn = self.inner.id.0, ?outcome, "transaction completed");
        self.terminate();
        result
    }

    fn two_phase_commit(&self, participants: &[Arc<dyn Participant>]) -> Result<(), TxnError> {
        for participant in participants {
            if let PrepareVote::ForceRollback(err) = participant.prepare() {
                debug!(txn = self.inner.id.0, error = %err, "prepare vote forced rollback");
                for p in participants {
                    p.rollback();
                }
                return Err(err);
            }
        }
        for participant in participants {
            // The second phase cannot fail once every vote was Prepared.
            if let Err(err) = participant.commit() {
                debug!(txn = self.inner.id.0, error = %err, "commit callback failed");
            }
        }
        Ok(())
    }

    /// Drives rollback: every participant is told to roll back.
    fn drive_rollback(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state != TxnState::Active {
                return;
            }
            *state = TxnState::Aborted;
        }

        let participants: Vec<_> = self.inner.participants.lock().clone();
        for participant in &participants {
            participant.rollback();
        }
        debug!(txn = self.inner.id.0, "transaction rolled back");
        self.terminate();
    }

    /// Releases participant references and fires completion hooks.
    fn terminate(&self) {
        self.inner.participants.lock().clear();
        let hooks: Vec<CompletionHook> = std::mem::take(&mut *self.inner.completions.lock());
        for hook in hooks {
            hook(self);
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Transaction {}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

/// An ambient transaction scope.
///
/// Opening a scope makes a fresh transaction the ambient transaction for the
/// calling thread. Scopes nest; each scope owns an independent transaction.
/// Calling [`complete`](TxnScope::complete) commits; dropping the scope
/// without completing rolls back.
pub struct TxnScope {
    txn: Transaction,
    completed: bool,
    // Scopes are pinned to the thread whose ambient stack they pushed.
    _not_send: PhantomData<*const ()>,
}

impl TxnScope {
    /// Opens a new scope and makes its transaction ambient.
    pub fn begin() -> Self {
        let txn = Transaction::new();
        trace!(txn = txn.id().0, "transaction scope opened");
        AMBIENT.with(|stack| stack.borrow_mut().push(txn.clone()));
        Self {
            txn,
            completed: false,
            _not_send: PhantomData,
        }
    }

    /// Returns the scope's transaction handle.
    pub fn txn(&self) -> &Transaction {
        &self.txn
    }

    /// Completes the scope, committing the transaction.
    pub fn complete(mut self) -> Result<(), TxnError> {
        self.completed = true;
        self.pop_ambient();
        self.txn.drive_commit()
    }

    fn pop_ambient(&self) {
        AMBIENT.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|t| t.id() == self.txn.id()) {
                stack.remove(pos);
            }
        });
    }
}

impl Drop for TxnScope {
    fn drop(&mut self) {
        if !self.completed {
            self.pop_ambient();
            self.txn.drive_rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records callback deliveries and votes as configured.
    struct Probe {
        log: Mutex<Vec<&'static str>>,
        vote_force_rollback: bool,
    }

    impl Probe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                log: Mutex::new(Vec::new()),
                vote_force_rollback: false,
            })
        }

        fn voting_force_rollback() -> Arc<Self> {
            Arc::new(Self {
                log: Mutex::new(Vec::new()),
                vote_force_rollback: true,
            })
        }

        fn log(&self) -> Vec<&'static str> {
            self.log.lock().clone()
        }
    }

    impl Participant for Probe {
        fn prepare(&self) -> PrepareVote {
            self.log.lock().push("prepare");
            if self.vote_force_rollback {
                PrepareVote::ForceRollback(TxnError::NoTransaction)
            } else {
                PrepareVote::Prepared
            }
        }

        fn commit(&self) -> Result<(), TxnError> {
            self.log.lock().push("commit");
            Ok(())
        }

        fn rollback(&self) {
            self.log.lock().push("rollback");
        }

        fn in_doubt(&self) {
            self.log.lock().push("in_doubt");
        }
    }

    #[test]
    fn test_no_ambient_outside_scope() {
        assert!(Transaction::current().is_none());
        let scope = TxnScope::begin();
        assert_eq!(Transaction::current().unwrap(), *scope.txn());
        drop(scope);
        assert!(Transaction::current().is_none());
    }

    #[test]
    fn test_nested_scopes() {
        let outer = TxnScope::begin();
        {
            let inner = TxnScope::begin();
            assert_eq!(Transaction::current().unwrap(), *inner.txn());
            assert_ne!(*inner.txn(), *outer.txn());
            inner.complete().unwrap();
        }
        assert_eq!(Transaction::current().unwrap(), *outer.txn());
    }

    #[test]
    fn test_complete_commits() {
        let scope = TxnScope::begin();
        let txn = scope.txn().clone();
        scope.complete().unwrap();
        assert_eq!(txn.state(), TxnState::Committed);
    }

    #[test]
    fn test_drop_rolls_back() {
        let txn = {
            let scope = TxnScope::begin();
            scope.txn().clone()
        };
        assert_eq!(txn.state(), TxnState::Aborted);
    }

    #[test]
    fn test_single_participant_single_phase() {
        let probe = Probe::new();
        let scope = TxnScope::begin();
        scope.txn().enlist_volatile(probe.clone()).unwrap();
        scope.complete().unwrap();

        // No prepare round with one participant.
        assert_eq!(probe.log(), vec!["commit"]);
    }

    #[test]
    fn test_two_participants_full_protocol() {
        let a = Probe::new();
        let b = Probe::new();
        let scope = TxnScope::begin();
        scope.txn().enlist_volatile(a.clone()).unwrap();
        scope.txn().enlist_volatile(b.clone()).unwrap();
        scope.complete().unwrap();

        assert_eq!(a.log(), vec!["prepare", "commit"]);
        assert_eq!(b.log(), vec!["prepare", "commit"]);
    }

    #[test]
    fn test_force_rollback_aborts_all() {
        let good = Probe::new();
        let bad = Probe::voting_force_rollback();
        let scope = TxnScope::begin();
        let txn = scope.txn().clone();
        scope.txn().enlist_volatile(good.clone()).unwrap();
        scope.txn().enlist_volatile(bad.clone()).unwrap();

        assert!(scope.complete().is_err());
        assert_eq!(txn.state(), TxnState::Aborted);
        assert_eq!(good.log(), vec!["prepare", "rollback"]);
        assert_eq!(bad.log(), vec!["prepare", "rollback"]);
    }

    #[test]
    fn test_rollback_delivered_on_drop() {
        let probe = Probe::new();
        {
            let scope = TxnScope::begin();
            scope.txn().enlist_volatile(probe.clone()).unwrap();
        }
        assert_eq!(probe.log(), vec!["rollback"]);
    }

    #[test]
    fn test_enlist_after_termination_fails() {
        let scope = TxnScope::begin();
        let txn = scope.txn().clone();
        scope.complete().unwrap();

        let probe = Probe::new();
        assert!(matches!(
            txn.enlist_volatile(probe),
            Err(TxnError::AlreadyCommitted)
        ));
    }

    #[test]
    fn test_completed_hook_fires_once() {
        let fired = Arc::new(Mutex::new(0));
        let scope = TxnScope::begin();
        let counter = Arc::clone(&fired);
        scope.txn().on_completed(move |_| *counter.lock() += 1);
        scope.complete().unwrap();
        assert_eq!(*fired.lock(), 1);
    }

    #[test]
    fn test_completed_hook_on_terminated_txn_runs_immediately() {
        let scope = TxnScope::begin();
        let txn = scope.txn().clone();
        scope.complete().unwrap();

        let fired = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&fired);
        txn.on_completed(move |t| {
            assert_eq!(t.state(), TxnState::Committed);
            *flag.lock() = true;
        });
        assert!(*fired.lock());
    }

    #[test]
    fn test_empty_transaction_commits() {
        let scope = TxnScope::begin();
        let txn = scope.txn().clone();
        scope.complete().unwrap();
        assert_eq!(txn.state(), TxnState::Committed);
    }
}
