// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Fair transaction-scoped mutual exclusion.
//!
//! The gate serializes the commit-time critical sections of every shadow that
//! shares a backing store. Ownership is keyed by transaction identity, not by
//! thread: a transaction that already owns the gate re-enters freely, and on
//! release ownership passes to the longest-waiting transaction. Grant order
//! is strictly FIFO across distinct transactions.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::transaction::TxnId;

#[derive(Default)]
struct Signal {
    woken: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn wait(&self) {
        let mut woken = self.woken.lock();
        while !*woken {
            self.cond.wait(&mut woken);
        }
    }

    fn set(&self) {
        let mut woken = self.woken.lock();
        *woken = true;
        self.cond.notify_all();
    }
}

struct Waiter {
    txn: TxnId,
    signal: Arc<Signal>,
}

#[derive(Default)]
struct GateInner {
    owner: Option<TxnId>,
    waiters: VecDeque<Waiter>,
}

/// A fair mutual-exclusion gate keyed by transaction identity.
///
/// Unlike a plain mutex, the gate is reentrant for the owning transaction
/// (from any thread) and hands ownership over in arrival order. It has no
/// intrinsic timeout; a waiter blocks until granted or until its transaction
/// is cancelled out of the queue with [`cancel`](TxnGate::cancel).
pub struct TxnGate {
    inner: Mutex<GateInner>,
}

impl TxnGate {
    /// Creates an unowned gate.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GateInner::default()),
        }
    }

    /// Requests ownership on behalf of the transaction.
    ///
    /// Returns immediately if the gate is unowned or already owned by the
    /// same transaction. Otherwise the caller blocks in FIFO order until
    /// ownership is handed over, or until the transaction is cancelled out
    /// of the queue.
    pub fn lock(&self, txn: TxnId) {
        let signal = {
            let mut inner = self.inner.lock();
            match inner.owner {
                None => {
                    inner.owner = Some(txn);
                    trace!(txn = txn.0, "gate acquired");
                    return;
                }
                Some(owner) if owner == txn => return,
                Some(_) => {
                    let signal = Arc::new(Signal::default());
                    inner.waiters.push_back(Waiter {
                        txn,
                        signal: Arc::clone(&signal),
                    });
                    trace!(txn = txn.0, "gate wait enqueued");
                    signal
                }
            }
        };
        signal.wait();
    }

    /// Releases ownership.
    ///
    /// Ownership transfers to the head waiter, if any, before the internal
    /// mutex is released; no thread can observe an unowned gate while
    /// waiters are queued.
    pub fn unlock(&self) {
        let mut inner = self.inner.lock();
        match inner.waiters.pop_front() {
            Some(next) => {
                inner.owner = Some(next.txn);
                trace!(txn = next.txn.0, "gate handed over");
                next.signal.set();
            }
            None => {
                inner.owner = None;
                trace!("gate released");
            }
        }
    }

    /// Removes the transaction from the wait queue and wakes its waiter.
    ///
    /// Used when a transaction terminates while still waiting for the gate;
    /// the blocked `lock` call returns without ownership. A no-op if the
    /// transaction is not queued.
    pub fn cancel(&self, txn: TxnId) {
        let mut inner = self.inner.lock();
        inner.waiters.retain(|waiter| {
            if waiter.txn == txn {
                trace!(txn = txn.0, "gate wait cancelled");
                waiter.signal.set();
                false
            } else {
                true
            }
        });
    }

    /// Returns true if any transaction owns the gate.
    pub fn is_locked(&self) -> bool {
        self.inner.lock().owner.is_some()
    }

    /// Returns the owning transaction, if any.
    pub fn owner(&self) -> Option<TxnId> {
        self.inner.lock().owner
    }

    /// Returns the number of queued waiters.
    pub fn waiting(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}

impl Default for TxnGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn spin_until(gate: &TxnGate, waiting: usize) {
        for _ in 0..1000 {
            if gate.waiting() == waiting {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("gate never reached {} waiters", waiting);
    }

    #[test]
    fn test_lock_unowned() {
        let gate = TxnGate::new();
        assert!(!gate.is_locked());

        gate.lock(TxnId(1));
        assert!(gate.is_locked());
        assert_eq!(gate.owner(), Some(TxnId(1)));

        gate.unlock();
        assert!(!gate.is_locked());
        assert_eq!(gate.owner(), None);
    }

    #[test]
    fn test_reentrant_same_txn() {
        let gate = TxnGate::new();
        gate.lock(TxnId(1));
        gate.lock(TxnId(1));
        assert_eq!(gate.owner(), Some(TxnId(1)));
        assert_eq!(gate.waiting(), 0);

        gate.unlock();
        assert!(!gate.is_locked());
    }

    #[test]
    fn test_fifo_handoff() {
        let gate = Arc::new(TxnGate::new());
        gate.lock(TxnId(1));

        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::new();
        for id in 2..=4 {
            let gate_clone = Arc::clone(&gate);
            let tx = tx.clone();
            // Enqueue strictly in id order.
            spin_until(&gate, (id - 2) as usize);
            handles.push(thread::spawn(move || {
                gate_clone.lock(TxnId(id));
                tx.send(id).unwrap();
                gate_clone.unlock();
            }));
            spin_until(&gate, (id - 1) as usize);
        }

        gate.unlock();
        let granted: Vec<u64> = (0..3).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(granted, vec![2, 3, 4]);

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!gate.is_locked());
    }

    #[test]
    fn test_handoff_inside_unlock() {
        let gate = Arc::new(TxnGate::new());
        gate.lock(TxnId(1));

        let waiter_gate = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            waiter_gate.lock(TxnId(2));
            assert_eq!(waiter_gate.owner(), Some(TxnId(2)));
            waiter_gate.unlock();
        });

        spin_until(&gate, 1);
        gate.unlock();
        // The gate is never observably unowned between unlock and handoff.
        assert!(gate.owner() == Some(TxnId(2)) || !gate.is_locked());
        handle.join().unwrap();
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let gate = Arc::new(TxnGate::new());
        gate.lock(TxnId(1));

        let waiter_gate = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            waiter_gate.lock(TxnId(2));
        });

        spin_until(&gate, 1);
        gate.cancel(TxnId(2));

        // The blocked lock call returns even though ownership was never granted.
        handle.join().unwrap();
        assert_eq!(gate.owner(), Some(TxnId(1)));
        assert_eq!(gate.waiting(), 0);
    }

    #[test]
    fn test_cancel_not_queued_is_noop() {
        let gate = TxnGate::new();
        gate.lock(TxnId(1));
        gate.cancel(TxnId(2));
        assert_eq!(gate.owner(), Some(TxnId(1)));
    }
}
