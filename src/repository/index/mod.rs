//! The per-wallet transaction index.
//!
//! Tracks every transaction touching the wallet, the unspent outputs it
//! owns, and the links between them: spend records, undo records, and
//! orphaned inputs waiting for their referenced outputs. All mutations are
//! serialized through a per-wallet FIFO lock and applied as a single atomic
//! batch per logical step; queries read the store directly.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::CoinCache;
use crate::db::{Database, WriteBatch as _};
use crate::events::{Event, EventSink, NullSink};
use crate::lock::SerialLock;
use crate::model::{
    AddOutcome, Balance, Coin, Outpoint, PathInfo, RangeOpts, Transaction, TxId, TxRecord,
};
use crate::params::Params;
use crate::constants;

use super::keys::{self, Keys};
use super::{Error, Result};

#[cfg(test)]
mod tests;

/// Script verification capability. Implemented outside the index; `None`
/// disables verification.
pub trait ScriptVerifier: Send + Sync {
    /// Whether input `index` of `tx` validly spends `coin`.
    fn verify_input(&self, tx: &Transaction, index: usize, coin: &Coin) -> bool;
}

/// Resolver answering which wallet accounts own the addresses touched by a
/// transaction. Implemented by the outer wallet; consulted for transactions
/// already in the store, whose path info was not passed in by the caller.
pub trait PathResolver: Send + Sync {
    fn path_info(&self, tx: &Transaction) -> PathInfo;
}

/// The transaction index for a single wallet.
pub struct TxIndex<T> {
    db: T,
    keys: Keys,
    params: Params,
    cache: CoinCache,
    lock: SerialLock,
    session_open: AtomicBool,
    sink: Arc<dyn EventSink>,
    verifier: Option<Arc<dyn ScriptVerifier>>,
    resolver: Arc<dyn PathResolver>,
}

/// Staged mutation: every put and delete of one logical operation, plus the
/// cache updates and events to apply once the store acknowledges the batch.
/// At most one session is open per index at a time.
struct Session<'a, T: Database> {
    index: &'a TxIndex<T>,
    batch: Option<T::WriteBatch>,
    cache_puts: Vec<(Outpoint, Vec<u8>)>,
    cache_dels: Vec<Outpoint>,
    events: Vec<Event>,
}

impl<T: Database> Session<'_, T> {
    fn put<V>(&mut self, key: String, value: &V) -> Result<()>
    where
        V: serde::Serialize,
    {
        if let Some(batch) = self.batch.as_mut() {
            batch.put(key, value)?;
        }

        Ok(())
    }

    fn put_raw(&mut self, key: String, value: Vec<u8>) {
        if let Some(batch) = self.batch.as_mut() {
            batch.put_raw(key, value);
        }
    }

    /// Stage a presence flag: a key with an empty value.
    fn flag(&mut self, key: String) {
        self.put_raw(key, Vec::new());
    }

    fn delete(&mut self, key: String) {
        if let Some(batch) = self.batch.as_mut() {
            batch.delete(key);
        }
    }

    fn cache_put(&mut self, outpoint: Outpoint, bytes: Vec<u8>) {
        self.cache_puts.push((outpoint, bytes));
    }

    fn cache_del(&mut self, outpoint: Outpoint) {
        self.cache_dels.push(outpoint);
    }

    fn event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Atomically apply the batch. Cache updates and events happen only after
    /// the store acknowledged the write; an error drops everything staged.
    fn commit(mut self) -> Result<()> {
        let batch = match self.batch.take() {
            Some(batch) => batch,
            None => return Ok(()),
        };
        self.index.db.write(batch)?;

        for (outpoint, bytes) in self.cache_puts.drain(..) {
            self.index.cache.insert(&outpoint, bytes);
        }
        for outpoint in self.cache_dels.drain(..) {
            self.index.cache.remove(&outpoint);
        }
        for event in std::mem::take(&mut self.events) {
            self.index.sink.emit(event);
        }

        Ok(())
    }
}

impl<T: Database> Drop for Session<'_, T> {
    fn drop(&mut self) {
        self.index.session_open.store(false, Ordering::SeqCst);
    }
}

/// What `add` decided to do with one wallet-owned output.
struct OutputPlan {
    vout: u32,
    account: u32,
    coin: Coin,
    /// Waiting spender that claims the coin the moment it appears.
    claim: Option<Outpoint>,
    had_orphans: bool,
}

impl<T> TxIndex<T>
where
    T: Database,
{
    pub fn new(db: T, params: Params, resolver: Arc<dyn PathResolver>) -> Self {
        let keys = Keys::new(&params.wallet_id);
        let cache = CoinCache::new(params.coin_cache_size);

        Self {
            db,
            keys,
            params,
            cache,
            lock: SerialLock::new(),
            session_open: AtomicBool::new(false),
            sink: Arc::new(NullSink),
            verifier: None,
            resolver,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn ScriptVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn wallet_id(&self) -> &str {
        &self.params.wallet_id
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Insert a transaction, or confirm it in place if it is already known.
    ///
    /// Arbitrates double spends against existing spenders and registers
    /// orphaned inputs whose referenced outputs are not yet known. Returns
    /// [`AddOutcome::Rejected`] (not an error) when verification fails or an
    /// existing spender wins arbitration.
    pub fn add(&self, record: TxRecord, path_info: &PathInfo) -> Result<AddOutcome> {
        let txid = record.txid();
        self.lock.track(txid)?;
        let result = match self.lock.acquire() {
            Ok(_guard) => self._add(record, path_info),
            Err(err) => Err(err.into()),
        };
        if self.lock.untrack(&txid) {
            self.sink.emit(Event::Drain);
        }

        result
    }

    /// Strip a transaction of its block after a chain reorganization.
    /// Returns false when the transaction is unknown or already unconfirmed.
    pub fn unconfirm(&self, hash: &TxId) -> Result<bool> {
        let _guard = self.lock.acquire()?;

        self._unconfirm(hash)
    }

    /// Remove a transaction and, recursively, every transaction spending any
    /// of its outputs. Returns the removed ids, dependents first; an unknown
    /// hash is a no-op.
    pub fn remove(&self, hash: &TxId) -> Result<Vec<TxId>> {
        let _guard = self.lock.acquire()?;

        let record = match self.get_tx(hash)? {
            Some(record) => record,
            None => return Ok(Vec::new()),
        };
        let path_info = self.resolver.path_info(&record.tx);
        let mut removed = Vec::new();
        self._remove_recursive(&record, &path_info, &mut removed)?;

        Ok(removed)
    }

    /// Sweep unconfirmed transactions older than `age` seconds, optionally
    /// restricted to one account.
    pub fn zap(&self, account: Option<u32>, age: u64) -> Result<Vec<TxId>> {
        let _guard = self.lock.acquire()?;

        let threshold = now_timestamp().saturating_sub(age);
        let end = threshold.min(constants::MAX_KEY_TIME);
        let (gte, lte) = match account {
            Some(account) => self.keys.acct_time_range(account, 0, end),
            None => self.keys.time_range(0, end),
        };
        let hashes: Vec<TxId> = {
            let iter = self.db.range(gte.as_bytes(), lte.as_bytes(), false)?;
            iter.filter_map(|(key, _value)| keys::tail_hash(&key)).collect()
        };

        let mut removed = Vec::new();
        for hash in hashes {
            // May already be gone: zapping one transaction removes its
            // dependents too.
            let record = match self.get_tx(&hash)? {
                Some(record) => record,
                None => continue,
            };
            if record.is_confirmed() || record.ps >= threshold {
                continue;
            }
            let path_info = self.resolver.path_info(&record.tx);
            self._remove_recursive(&record, &path_info, &mut removed)?;
        }
        if !removed.is_empty() {
            log::debug!("zapped {} stale transactions", removed.len());
        }

        Ok(removed)
    }

    /// Forcibly remove a transaction that is still pending. Fails with
    /// [`Error::NotPending`] for confirmed or unknown transactions.
    pub fn abandon(&self, hash: &TxId) -> Result<Vec<TxId>> {
        let _guard = self.lock.acquire()?;

        if !self.db.contains(&self.keys.pending(hash))? {
            return Err(Error::NotPending(*hash));
        }
        let record = match self.get_tx(hash)? {
            Some(record) => record,
            None => {
                return Err(Error::Consistency(format!(
                    "pending flag present but transaction {} missing",
                    hash
                )));
            }
        };
        let path_info = self.resolver.path_info(&record.tx);
        let mut removed = Vec::new();
        self._remove_recursive(&record, &path_info, &mut removed)?;

        Ok(removed)
    }

    /// Block until every queued `add` has finished.
    pub fn wait_for_drain(&self) -> Result<()> {
        self.lock.wait_for_drain()?;

        Ok(())
    }

    /// Whether an `add` for this transaction is queued but not finished.
    pub fn has_queued(&self, hash: &TxId) -> bool {
        self.lock.has_pending(hash)
    }

    /// Drop all queued work. In-flight operations run to completion; later
    /// calls fail.
    pub fn destroy(&self) {
        self.lock.destroy();
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;

        Ok(())
    }

    // Queries. None of these take the lock.

    pub fn get_tx(&self, hash: &TxId) -> Result<Option<TxRecord>> {
        let record = self.db.get_opt(&self.keys.tx(hash))?;

        Ok(record)
    }

    pub fn has_tx(&self, hash: &TxId) -> Result<bool> {
        let present = self.db.contains(&self.keys.tx(hash))?;

        Ok(present)
    }

    /// The coin for an outpoint, if owned by the wallet and unspent.
    pub fn get_coin(&self, outpoint: &Outpoint) -> Result<Option<Coin>> {
        self.read_coin(outpoint)
    }

    pub fn has_coin(&self, outpoint: &Outpoint) -> Result<bool> {
        let coin = self.read_coin(outpoint)?;

        Ok(coin.is_some())
    }

    /// The outpoint spending the given prevout, if any.
    pub fn get_spender(&self, outpoint: &Outpoint) -> Result<Option<Outpoint>> {
        let key = self.keys.spend(&outpoint.hash, outpoint.index);
        match self.db.get_raw(&key)? {
            Some(bytes) => Ok(Some(Outpoint::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Ids of all unconfirmed transactions.
    pub fn pending_hashes(&self, account: Option<u32>) -> Result<Vec<TxId>> {
        let (gte, lte) = match account {
            Some(account) => self.keys.acct_pending_range(account),
            None => self.keys.pending_range(),
        };
        let iter = self.db.range(gte.as_bytes(), lte.as_bytes(), false)?;

        Ok(iter.filter_map(|(key, _value)| keys::tail_hash(&key)).collect())
    }

    /// All unconfirmed transactions.
    pub fn unconfirmed(&self, account: Option<u32>) -> Result<Vec<TxRecord>> {
        let hashes = self.pending_hashes(account)?;
        let mut records = Vec::with_capacity(hashes.len());
        for hash in hashes {
            match self.get_tx(&hash)? {
                Some(record) => records.push(record),
                None => log::warn!("dangling pending flag for {}", hash),
            }
        }

        Ok(records)
    }

    /// Transaction history ordered by received-at-wallet time.
    pub fn history(&self, account: Option<u32>, opts: &RangeOpts) -> Result<Vec<TxRecord>> {
        let end = opts.end.min(constants::MAX_KEY_TIME);
        let (gte, lte) = match account {
            Some(account) => self.keys.acct_time_range(account, opts.start, end),
            None => self.keys.time_range(opts.start, end),
        };

        self.records_in(&gte, &lte, opts)
    }

    /// Confirmed transactions ordered by block height.
    pub fn range_by_height(&self, account: Option<u32>, opts: &RangeOpts) -> Result<Vec<TxRecord>> {
        let start = u32::try_from(opts.start).unwrap_or(u32::MAX);
        let end = u32::try_from(opts.end).unwrap_or(u32::MAX);
        let (gte, lte) = match account {
            Some(account) => self.keys.acct_height_range(account, start, end),
            None => self.keys.height_range(start, end),
        };

        self.records_in(&gte, &lte, opts)
    }

    /// All coins owned by the wallet, with their outpoints.
    pub fn coins(&self, account: Option<u32>) -> Result<Vec<(Outpoint, Coin)>> {
        let mut coins = Vec::new();
        match account {
            None => {
                let (gte, lte) = self.keys.coin_range();
                for (key, value) in self.db.range(gte.as_bytes(), lte.as_bytes(), false)? {
                    match keys::tail_outpoint(&key) {
                        Some((hash, vout)) => {
                            coins.push((Outpoint::new(hash, vout), Coin::from_bytes(&value)?));
                        }
                        None => log::warn!("unparseable coin key: {:?}", key),
                    }
                }
            }
            Some(account) => {
                let (gte, lte) = self.keys.acct_coin_range(account);
                let outpoints: Vec<Outpoint> = self
                    .db
                    .range(gte.as_bytes(), lte.as_bytes(), false)?
                    .filter_map(|(key, _value)| keys::tail_outpoint(&key))
                    .map(|(hash, vout)| Outpoint::new(hash, vout))
                    .collect();
                for outpoint in outpoints {
                    match self.read_coin(&outpoint)? {
                        Some(coin) => coins.push((outpoint, coin)),
                        None => log::warn!("dangling account coin flag for {}", outpoint),
                    }
                }
            }
        }

        Ok(coins)
    }

    /// Balance partitioned by confirmation state, computed from the coin
    /// records alone.
    pub fn balance(&self, account: Option<u32>) -> Result<Balance> {
        let mut balance = Balance::default();
        let mut tally = |bytes: &[u8]| -> Result<()> {
            let value = Coin::value_of(bytes)?;
            let slot = if Coin::height_of(bytes)? == constants::UNCONFIRMED_COIN_HEIGHT {
                &mut balance.unconfirmed
            } else {
                &mut balance.confirmed
            };
            *slot = slot.checked_add(value).ok_or(Error::BalanceOverflow)?;

            Ok(())
        };

        match account {
            None => {
                let (gte, lte) = self.keys.coin_range();
                for (_key, value) in self.db.range(gte.as_bytes(), lte.as_bytes(), false)? {
                    tally(&value)?;
                }
            }
            Some(account) => {
                let (gte, lte) = self.keys.acct_coin_range(account);
                let outpoint_keys: Vec<String> = self
                    .db
                    .range(gte.as_bytes(), lte.as_bytes(), false)?
                    .filter_map(|(key, _value)| keys::tail_outpoint(&key))
                    .map(|(hash, vout)| self.keys.coin(&hash, vout))
                    .collect();
                for key in outpoint_keys {
                    match self.db.get_raw(&key)? {
                        Some(bytes) => tally(&bytes)?,
                        None => log::warn!("dangling account coin flag: {}", key),
                    }
                }
            }
        }

        Ok(balance)
    }

    // Internals. Everything below runs with the serial lock already held.

    fn _add(&self, mut record: TxRecord, path_info: &PathInfo) -> Result<AddOutcome> {
        record.normalize();
        let txid = record.txid();

        if let Some(existing) = self.get_tx(&txid)? {
            self._confirm(existing, record, path_info)?;
            return Ok(AddOutcome::Existing);
        }

        // Resolve every wallet input to its coin, arbitrating double spends
        // and collecting orphans. No batch is open yet: a rejection leaves
        // the store untouched.
        let mut resolved: HashMap<usize, Coin> = HashMap::new();
        let mut orphans: Vec<(usize, Outpoint)> = Vec::new();
        if !record.tx.is_coinbase() {
            for (i, input) in record.tx.inputs.iter().enumerate() {
                let address = match input.address {
                    Some(address) => address,
                    None => continue,
                };
                if !path_info.has_path(&address) {
                    continue;
                }
                let prevout = input.prevout;
                match self.read_coin(&prevout)? {
                    Some(coin) => {
                        if !self.verify_input(&record.tx, i, &coin) {
                            return Ok(AddOutcome::Rejected);
                        }
                        resolved.insert(i, coin);
                    }
                    None => match self.get_spender(&prevout)? {
                        Some(spender) => {
                            if !self._resolve_conflict(&prevout, &spender, &record)? {
                                return Ok(AddOutcome::Rejected);
                            }
                            let coin = self.read_coin(&prevout)?.ok_or_else(|| {
                                Error::Consistency(format!(
                                    "coin {} missing after conflict removal",
                                    prevout
                                ))
                            })?;
                            if !self.verify_input(&record.tx, i, &coin) {
                                return Ok(AddOutcome::Rejected);
                            }
                            resolved.insert(i, coin);
                        }
                        None => orphans.push((i, prevout)),
                    },
                }
            }
        }

        // Plan the wallet-owned outputs, resolving waiting orphans. Losing
        // waiters are removed here, each in its own batch.
        let mut outputs: Vec<OutputPlan> = Vec::new();
        for vout in 0..record.tx.outputs.len() as u32 {
            let output = &record.tx.outputs[vout as usize];
            let address = match output.address {
                Some(address) => address,
                None => continue,
            };
            if output.is_unspendable() {
                continue;
            }
            let path = match path_info.get_path(&address) {
                Some(path) => path,
                None => continue,
            };
            let coin = match Coin::from_output(&record, vout) {
                Some(coin) => coin,
                None => continue,
            };
            let (claim, had_orphans) = self._resolve_orphans(&txid, vout, &coin)?;
            outputs.push(OutputPlan {
                vout,
                account: path.account,
                coin,
                claim,
                had_orphans,
            });
        }

        let accounts = path_info.accounts();
        let mut session = self.start();

        session.put(self.keys.tx(&txid), &record)?;
        if record.is_confirmed() {
            session.flag(self.keys.height(record.height, &txid)?);
        } else {
            session.flag(self.keys.pending(&txid));
        }
        session.flag(self.keys.time(record.ps, &txid));
        for &account in &accounts {
            session.flag(self.keys.acct_tx(account, &txid));
            if record.is_confirmed() {
                session.flag(self.keys.acct_height(account, record.height, &txid)?);
            } else {
                session.flag(self.keys.acct_pending(account, &txid));
            }
            session.flag(self.keys.acct_time(account, record.ps, &txid));
        }

        // Wallet inputs: consume the resolved coin behind each, or register
        // the input as an orphan awaiting its prevout.
        for (i, coin) in &resolved {
            let prevout = record.tx.inputs[*i].prevout;
            let spender = Outpoint::new(txid, *i as u32);
            session.put_raw(
                self.keys.spend(&prevout.hash, prevout.index),
                spender.to_bytes().to_vec(),
            );
            session.put_raw(self.keys.undo(&txid, *i as u32), coin.to_bytes());
            session.delete(self.keys.coin(&prevout.hash, prevout.index));
            if let Some(path) = path_info.get_path(&coin.address) {
                session.delete(self.keys.acct_coin(path.account, &prevout.hash, prevout.index));
            }
            session.cache_del(prevout);
        }
        for (i, prevout) in &orphans {
            let key = self.keys.orphan(&prevout.hash, prevout.index);
            let mut list = self.db.get_raw(&key)?.unwrap_or_default();
            list.extend_from_slice(&Outpoint::new(txid, *i as u32).to_bytes());
            session.put_raw(key, list);
        }

        // Wallet outputs: mint the coin, unless a waiting spender claimed it
        // the moment it appeared.
        for plan in &outputs {
            if plan.had_orphans {
                session.delete(self.keys.orphan(&txid, plan.vout));
            }
            match plan.claim {
                Some(claimant) => {
                    session.put_raw(
                        self.keys.spend(&txid, plan.vout),
                        claimant.to_bytes().to_vec(),
                    );
                    session.put_raw(
                        self.keys.undo(&claimant.hash, claimant.index),
                        plan.coin.to_bytes(),
                    );
                }
                None => {
                    let bytes = plan.coin.to_bytes();
                    session.put_raw(self.keys.coin(&txid, plan.vout), bytes.clone());
                    session.flag(self.keys.acct_coin(plan.account, &txid, plan.vout));
                    session.cache_put(Outpoint::new(txid, plan.vout), bytes);
                }
            }
        }

        session.event(Event::Tx {
            record: record.clone(),
            path_info: path_info.clone(),
        });
        if record.is_confirmed() {
            session.event(Event::Confirmed {
                record: record.clone(),
                path_info: path_info.clone(),
            });
        }
        session.commit()?;
        log::debug!(
            "indexed transaction {} touching {} accounts",
            txid,
            accounts.len()
        );

        Ok(AddOutcome::Added)
    }

    /// Confirm an already-known transaction in place. No-op when the stored
    /// record is already confirmed or the incoming one carries no block.
    fn _confirm(&self, existing: TxRecord, incoming: TxRecord, path_info: &PathInfo) -> Result<bool> {
        if existing.is_confirmed() || !incoming.is_confirmed() {
            return Ok(false);
        }

        let mut record = incoming;
        // The wallet first saw this transaction before the block did.
        record.ps = existing.ps;
        let txid = record.txid();

        let mut session = self.start();
        session.put(self.keys.tx(&txid), &record)?;
        session.delete(self.keys.pending(&txid));
        session.flag(self.keys.height(record.height, &txid)?);
        for &account in &path_info.accounts() {
            session.delete(self.keys.acct_pending(account, &txid));
            session.flag(self.keys.acct_height(account, record.height, &txid)?);
        }
        self.reheight_coins(&mut session, &record)?;

        session.event(Event::Tx {
            record: record.clone(),
            path_info: path_info.clone(),
        });
        session.event(Event::Confirmed {
            record,
            path_info: path_info.clone(),
        });
        session.commit()?;

        Ok(true)
    }

    fn _unconfirm(&self, hash: &TxId) -> Result<bool> {
        let existing = match self.get_tx(hash)? {
            Some(record) => record,
            None => return Ok(false),
        };
        if !existing.is_confirmed() {
            return Ok(false);
        }
        let path_info = self.resolver.path_info(&existing.tx);
        let old_height = existing.height;

        let mut record = existing;
        record.height = constants::UNCONFIRMED_HEIGHT;
        record.ts = 0;
        record.index = -1;
        record.block = None;
        let txid = record.txid();

        let mut session = self.start();
        session.put(self.keys.tx(&txid), &record)?;
        session.delete(self.keys.height(old_height, &txid)?);
        session.flag(self.keys.pending(&txid));
        for &account in &path_info.accounts() {
            session.delete(self.keys.acct_height(account, old_height, &txid)?);
            session.flag(self.keys.acct_pending(account, &txid));
        }
        self.reheight_coins(&mut session, &record)?;

        session.event(Event::Unconfirmed {
            record,
            path_info,
        });
        session.commit()?;

        Ok(true)
    }

    /// Rewrite the still-unspent coins minted by `record` with its current
    /// height, leaving every other serialized field untouched.
    fn reheight_coins(&self, session: &mut Session<'_, T>, record: &TxRecord) -> Result<()> {
        let txid = record.txid();
        for vout in 0..record.tx.outputs.len() as u32 {
            let outpoint = Outpoint::new(txid, vout);
            if let Some(mut coin) = self.read_coin(&outpoint)? {
                coin.height = record.height;
                let bytes = coin.to_bytes();
                session.put_raw(self.keys.coin(&txid, vout), bytes.clone());
                session.cache_put(outpoint, bytes);
            }
        }

        Ok(())
    }

    /// Double-spend arbitration. Returns true when the existing spender lost
    /// and has been removed (the caller may claim the prevout), false when it
    /// survives (the caller must reject the incoming transaction).
    fn _resolve_conflict(
        &self,
        prevout: &Outpoint,
        spender: &Outpoint,
        incoming: &TxRecord,
    ) -> Result<bool> {
        let current = self.get_tx(&spender.hash)?.ok_or_else(|| {
            Error::Consistency(format!(
                "spender {} of {} not found",
                spender.hash, prevout
            ))
        })?;

        // A confirmed spender always beats a pending one. Between two
        // confirmed ones the earlier block timestamp wins; between two
        // pending ones the later arrival replaces the earlier.
        let keep = match (current.is_confirmed(), incoming.is_confirmed()) {
            (true, false) => true,
            (true, true) => incoming.ts >= current.ts,
            (false, true) => false,
            (false, false) => incoming.ps <= current.ps,
        };
        if keep {
            log::debug!(
                "keeping spender {} of {}; rejecting {}",
                spender.hash,
                prevout,
                incoming.txid()
            );
            return Ok(false);
        }

        log::debug!(
            "double spend of {}: replacing {} with {}",
            prevout,
            spender.hash,
            incoming.txid()
        );
        let path_info = self.resolver.path_info(&current.tx);
        let mut removed = Vec::new();
        self._remove_recursive(&current, &path_info, &mut removed)?;
        self.sink.emit(Event::Conflict {
            record: current,
            path_info,
        });

        Ok(true)
    }

    /// Scan the orphan list of `(txid, vout)`, if any. The first waiter that
    /// verifies against `coin` claims it; every other waiter is removed as a
    /// conflicting spender. Removal happens immediately, one batch per
    /// transaction; the claim itself is staged by the caller.
    fn _resolve_orphans(
        &self,
        txid: &TxId,
        vout: u32,
        coin: &Coin,
    ) -> Result<(Option<Outpoint>, bool)> {
        let key = self.keys.orphan(txid, vout);
        let bytes = match self.db.get_raw(&key)? {
            Some(bytes) => bytes,
            None => return Ok((None, false)),
        };
        let waiters = Outpoint::parse_list(&bytes)?;

        let mut claim: Option<Outpoint> = None;
        let mut losers: Vec<TxId> = Vec::new();
        for waiter in waiters {
            let spender = self.get_tx(&waiter.hash)?.ok_or_else(|| {
                Error::Consistency(format!(
                    "orphaned spender {} of {}/{} not found",
                    waiter.hash, txid, vout
                ))
            })?;
            if claim.is_none() && self.verify_input(&spender.tx, waiter.index as usize, coin) {
                claim = Some(waiter);
            } else {
                losers.push(waiter.hash);
            }
        }

        for loser in losers {
            // A loser may already be gone as a dependent of an earlier one.
            let record = match self.get_tx(&loser)? {
                Some(record) => record,
                None => continue,
            };
            let path_info = self.resolver.path_info(&record.tx);
            let mut removed = Vec::new();
            self._remove_recursive(&record, &path_info, &mut removed)?;
            self.sink.emit(Event::Conflict {
                record,
                path_info,
            });
        }

        Ok((claim, true))
    }

    /// Remove `record` and, depth-first, every transaction spending any of
    /// its outputs. One batch per transaction; dependents commit first.
    fn _remove_recursive(
        &self,
        record: &TxRecord,
        path_info: &PathInfo,
        removed: &mut Vec<TxId>,
    ) -> Result<()> {
        // Recursive removal only ever runs inside an already-held critical
        // section.
        let _reentry = self.lock.reenter();
        let txid = record.txid();

        for vout in 0..record.tx.outputs.len() as u32 {
            let spender = match self.get_spender(&Outpoint::new(txid, vout))? {
                Some(spender) => spender,
                None => continue,
            };
            let dependent = self.get_tx(&spender.hash)?.ok_or_else(|| {
                Error::Consistency(format!(
                    "spender {} of {}/{} not found",
                    spender.hash, txid, vout
                ))
            })?;
            let dependent_info = self.resolver.path_info(&dependent.tx);
            self._remove_recursive(&dependent, &dependent_info, removed)?;
        }

        self._remove_single(record, path_info)?;
        removed.push(txid);

        Ok(())
    }

    /// Remove a single transaction: delete its records and indexes, restore
    /// the coins it consumed from the undo records, and delete the coins it
    /// minted. Callers have already removed every dependent spender.
    fn _remove_single(&self, record: &TxRecord, path_info: &PathInfo) -> Result<()> {
        let txid = record.txid();
        let mut session = self.start();

        session.delete(self.keys.tx(&txid));
        if record.is_confirmed() {
            session.delete(self.keys.height(record.height, &txid)?);
        } else {
            session.delete(self.keys.pending(&txid));
        }
        session.delete(self.keys.time(record.ps, &txid));
        for &account in &path_info.accounts() {
            session.delete(self.keys.acct_tx(account, &txid));
            if record.is_confirmed() {
                session.delete(self.keys.acct_height(account, record.height, &txid)?);
            } else {
                session.delete(self.keys.acct_pending(account, &txid));
            }
            session.delete(self.keys.acct_time(account, record.ps, &txid));
        }

        if !record.tx.is_coinbase() {
            for (i, input) in record.tx.inputs.iter().enumerate() {
                let prevout = input.prevout;
                match self.db.get_raw(&self.keys.undo(&txid, i as u32))? {
                    Some(coin_bytes) => {
                        // Resurrect the consumed coin.
                        let coin = Coin::from_bytes(&coin_bytes)?;
                        session.put_raw(
                            self.keys.coin(&prevout.hash, prevout.index),
                            coin_bytes.clone(),
                        );
                        if let Some(path) = path_info.get_path(&coin.address) {
                            session.flag(self.keys.acct_coin(
                                path.account,
                                &prevout.hash,
                                prevout.index,
                            ));
                        }
                        session.delete(self.keys.spend(&prevout.hash, prevout.index));
                        session.delete(self.keys.orphan(&prevout.hash, prevout.index));
                        session.delete(self.keys.undo(&txid, i as u32));
                        session.cache_put(prevout, coin_bytes);
                    }
                    None => {
                        // A wallet input that never resolved: drop this
                        // transaction from the prevout's orphan list.
                        let ours = input
                            .address
                            .map(|address| path_info.has_path(&address))
                            .unwrap_or(false);
                        if !ours {
                            continue;
                        }
                        let key = self.keys.orphan(&prevout.hash, prevout.index);
                        if let Some(bytes) = self.db.get_raw(&key)? {
                            let this = Outpoint::new(txid, i as u32);
                            let remaining: Vec<u8> = Outpoint::parse_list(&bytes)?
                                .into_iter()
                                .filter(|waiter| *waiter != this)
                                .flat_map(|waiter| waiter.to_bytes().to_vec())
                                .collect();
                            if remaining.is_empty() {
                                session.delete(key);
                            } else {
                                session.put_raw(key, remaining);
                            }
                        }
                    }
                }
            }
        }

        for vout in 0..record.tx.outputs.len() as u32 {
            let output = &record.tx.outputs[vout as usize];
            session.delete(self.keys.coin(&txid, vout));
            if let Some(address) = output.address {
                if let Some(path) = path_info.get_path(&address) {
                    session.delete(self.keys.acct_coin(path.account, &txid, vout));
                }
            }
            session.cache_del(Outpoint::new(txid, vout));
        }

        session.event(Event::RemoveTx {
            record: record.clone(),
            path_info: path_info.clone(),
        });
        session.commit()
    }

    /// Open the (single) staging session. Opening a second one is a
    /// programming error.
    fn start(&self) -> Session<'_, T> {
        let was_open = self.session_open.swap(true, Ordering::SeqCst);
        assert!(!was_open, "batch session already open");

        Session {
            index: self,
            batch: Some(self.db.batch()),
            cache_puts: Vec::new(),
            cache_dels: Vec::new(),
            events: Vec::new(),
        }
    }

    fn read_coin(&self, outpoint: &Outpoint) -> Result<Option<Coin>> {
        if let Some(bytes) = self.cache.get(outpoint) {
            return Ok(Some(Coin::from_bytes(&bytes)?));
        }
        match self.db.get_raw(&self.keys.coin(&outpoint.hash, outpoint.index))? {
            Some(bytes) => {
                let coin = Coin::from_bytes(&bytes)?;
                self.cache.insert(outpoint, bytes);
                Ok(Some(coin))
            }
            None => Ok(None),
        }
    }

    fn verify_input(&self, tx: &Transaction, index: usize, coin: &Coin) -> bool {
        match &self.verifier {
            Some(verifier) => verifier.verify_input(tx, index, coin),
            None => true,
        }
    }

    fn records_in(&self, gte: &str, lte: &str, opts: &RangeOpts) -> Result<Vec<TxRecord>> {
        let limit = opts
            .limit
            .unwrap_or(constants::DEFAULT_RANGE_LIMIT)
            .min(constants::MAX_RANGE_LIMIT);
        let hashes: Vec<TxId> = self
            .db
            .range(gte.as_bytes(), lte.as_bytes(), opts.reverse)?
            .filter_map(|(key, _value)| keys::tail_hash(&key))
            .take(limit)
            .collect();

        let mut records = Vec::with_capacity(hashes.len());
        for hash in hashes {
            match self.get_tx(&hash)? {
                Some(record) => records.push(record),
                None => log::warn!("dangling index entry for {}", hash),
            }
        }

        Ok(records)
    }
}

fn now_timestamp() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
