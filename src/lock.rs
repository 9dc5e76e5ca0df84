//! Per-index serial lock.
//!
//! Every mutation of the index runs under this lock, so each logical
//! operation sees and produces a fully committed state. Acquisition is FIFO:
//! callers are served strictly in arrival order. Recursive removal paths,
//! which are always entered from inside a running mutation, re-enter with
//! [`SerialLock::reenter`] instead of queueing.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::model::TxId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    /// The lock was destroyed; queued and future acquisitions fail.
    #[error("serial lock destroyed")]
    Destroyed,
    #[error("serial lock poisoned")]
    Poisoned,
}

impl<T> From<PoisonError<T>> for LockError {
    fn from(_err: PoisonError<T>) -> Self {
        LockError::Poisoned
    }
}

#[derive(Default)]
struct State {
    held: bool,
    next_ticket: u64,
    now_serving: u64,
    pending: HashSet<TxId>,
    destroyed: bool,
}

/// FIFO mutex with a pending-transaction set for backpressure signalling.
#[derive(Default)]
pub struct SerialLock {
    state: Mutex<State>,
    cond: Condvar,
}

/// One-shot release token. Dropping it hands the lock to the next waiter.
/// Re-entrant tokens release nothing.
pub struct Guard<'a> {
    lock: &'a SerialLock,
    reentrant: bool,
}

impl SerialLock {
    pub fn new() -> Self {
        Default::default()
    }

    /// Take the lock, queueing in FIFO order behind earlier callers.
    pub fn acquire(&self) -> Result<Guard<'_>, LockError> {
        let mut state = self.state.lock()?;
        if state.destroyed {
            return Err(LockError::Destroyed);
        }
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while !state.destroyed && (state.held || state.now_serving != ticket) {
            state = self.cond.wait(state)?;
        }
        if state.destroyed {
            // Pass the turn on so the remaining queue keeps draining.
            if state.now_serving == ticket {
                state.now_serving += 1;
                self.cond.notify_all();
            }
            return Err(LockError::Destroyed);
        }
        state.held = true;
        Ok(Guard {
            lock: self,
            reentrant: false,
        })
    }

    /// Re-enter a lock that an ancestor frame already holds. The returned
    /// token is a no-op. Forcing an idle lock is a programming error.
    pub fn reenter(&self) -> Guard<'_> {
        let state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        assert!(state.held, "forced re-entry on an idle serial lock");
        Guard {
            lock: self,
            reentrant: true,
        }
    }

    /// Register a queued `add` in the pending set.
    pub fn track(&self, txid: TxId) -> Result<(), LockError> {
        let mut state = self.state.lock()?;
        if state.destroyed {
            return Err(LockError::Destroyed);
        }
        state.pending.insert(txid);
        Ok(())
    }

    /// Unregister a finished `add`. Returns true when this call emptied the
    /// pending set, i.e. the caller should signal a drain.
    pub fn untrack(&self, txid: &TxId) -> bool {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return false,
        };
        let removed = state.pending.remove(txid);
        let drained = removed && state.pending.is_empty();
        if drained {
            self.cond.notify_all();
        }
        drained
    }

    /// Whether the transaction is queued but not yet fully added.
    pub fn has_pending(&self, txid: &TxId) -> bool {
        match self.state.lock() {
            Ok(state) => state.pending.contains(txid),
            Err(_) => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        match self.state.lock() {
            Ok(state) => state.pending.len(),
            Err(_) => 0,
        }
    }

    /// Block until the pending set is empty.
    pub fn wait_for_drain(&self) -> Result<(), LockError> {
        let mut state = self.state.lock()?;
        while !state.pending.is_empty() && !state.destroyed {
            state = self.cond.wait(state)?;
        }
        Ok(())
    }

    /// Drop all queued work and the pending set. Queued and future
    /// acquisitions fail with [`LockError::Destroyed`]; the current holder
    /// runs to completion.
    pub fn destroy(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.destroyed = true;
        state.pending.clear();
        self.cond.notify_all();
    }

    fn release(&self) {
        let mut state: MutexGuard<'_, State> = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.held = false;
        state.now_serving += 1;
        self.cond.notify_all();
    }
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        if !self.reentrant {
            self.lock.release();
        }
    }
}
