//! Builders and parsers for the index keyspace.
//!
//! Keys are ASCII, slash-delimited, and always prefixed with the owning
//! wallet id so that many indexes can share one physical store. Heights and
//! timestamps are zero-padded to a fixed width so lexicographic order matches
//! numeric order; `~` sorts after every component character and terminates
//! range upper bounds.

use std::convert::TryFrom;
use std::str;

use crate::constants::{KEY_PAD_WIDTH, RANGE_SENTINEL};
use crate::model::TxId;

use super::{Error, Result};

/// Key builder scoped to one wallet id.
#[derive(Debug, Clone)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(wallet_id: &str) -> Self {
        Self {
            prefix: format!("{}/", wallet_id),
        }
    }

    /// A transaction record.
    #[inline]
    pub fn tx(&self, hash: &TxId) -> String {
        format!("{}t/{}", self.prefix, hash)
    }

    /// Flag present while a transaction is unconfirmed.
    #[inline]
    pub fn pending(&self, hash: &TxId) -> String {
        format!("{}p/{}", self.prefix, hash)
    }

    /// Height index entry of a confirmed transaction.
    #[inline]
    pub fn height(&self, height: i32, hash: &TxId) -> Result<String> {
        let height = u32::try_from(height).map_err(|_| Error::NegativeHeight(height))?;

        Ok(format!(
            "{}h/{:0width$}/{}",
            self.prefix,
            height,
            hash,
            width = KEY_PAD_WIDTH
        ))
    }

    /// Time index entry, keyed by the received-at-wallet timestamp.
    #[inline]
    pub fn time(&self, ps: u64, hash: &TxId) -> String {
        format!("{}m/{:0width$}/{}", self.prefix, ps, hash, width = KEY_PAD_WIDTH)
    }

    /// An unspent coin owned by the wallet.
    #[inline]
    pub fn coin(&self, hash: &TxId, vout: u32) -> String {
        format!("{}c/{}/{}", self.prefix, hash, vout)
    }

    /// The outpoint spending the given prevout.
    #[inline]
    pub fn spend(&self, hash: &TxId, vout: u32) -> String {
        format!("{}s/{}/{}", self.prefix, hash, vout)
    }

    /// Copy of the coin consumed by input `index` of the given transaction.
    #[inline]
    pub fn undo(&self, hash: &TxId, index: u32) -> String {
        format!("{}d/{}/{}", self.prefix, hash, index)
    }

    /// List of inputs waiting for the given output to appear.
    #[inline]
    pub fn orphan(&self, hash: &TxId, vout: u32) -> String {
        format!("{}o/{}/{}", self.prefix, hash, vout)
    }

    /// Per-account transaction membership.
    #[inline]
    pub fn acct_tx(&self, account: u32, hash: &TxId) -> String {
        format!("{}T/{}/{}", self.prefix, account, hash)
    }

    /// Per-account pending flag.
    #[inline]
    pub fn acct_pending(&self, account: u32, hash: &TxId) -> String {
        format!("{}P/{}/{}", self.prefix, account, hash)
    }

    /// Per-account height index entry.
    #[inline]
    pub fn acct_height(&self, account: u32, height: i32, hash: &TxId) -> Result<String> {
        let height = u32::try_from(height).map_err(|_| Error::NegativeHeight(height))?;

        Ok(format!(
            "{}H/{}/{:0width$}/{}",
            self.prefix,
            account,
            height,
            hash,
            width = KEY_PAD_WIDTH
        ))
    }

    /// Per-account time index entry.
    #[inline]
    pub fn acct_time(&self, account: u32, ps: u64, hash: &TxId) -> String {
        format!(
            "{}M/{}/{:0width$}/{}",
            self.prefix,
            account,
            ps,
            hash,
            width = KEY_PAD_WIDTH
        )
    }

    /// Per-account coin membership.
    #[inline]
    pub fn acct_coin(&self, account: u32, hash: &TxId, vout: u32) -> String {
        format!("{}C/{}/{}/{}", self.prefix, account, hash, vout)
    }

    /// Bounds covering height index entries in `start..=end`.
    pub fn height_range(&self, start: u32, end: u32) -> (String, String) {
        (
            format!("{}h/{:0width$}/", self.prefix, start, width = KEY_PAD_WIDTH),
            format!(
                "{}h/{:0width$}/{}",
                self.prefix,
                end,
                RANGE_SENTINEL,
                width = KEY_PAD_WIDTH
            ),
        )
    }

    /// Bounds covering time index entries in `start..=end`.
    pub fn time_range(&self, start: u64, end: u64) -> (String, String) {
        (
            format!("{}m/{:0width$}/", self.prefix, start, width = KEY_PAD_WIDTH),
            format!(
                "{}m/{:0width$}/{}",
                self.prefix,
                end,
                RANGE_SENTINEL,
                width = KEY_PAD_WIDTH
            ),
        )
    }

    /// Per-account bounds covering height index entries in `start..=end`.
    pub fn acct_height_range(&self, account: u32, start: u32, end: u32) -> (String, String) {
        (
            format!(
                "{}H/{}/{:0width$}/",
                self.prefix,
                account,
                start,
                width = KEY_PAD_WIDTH
            ),
            format!(
                "{}H/{}/{:0width$}/{}",
                self.prefix,
                account,
                end,
                RANGE_SENTINEL,
                width = KEY_PAD_WIDTH
            ),
        )
    }

    /// Per-account bounds covering time index entries in `start..=end`.
    pub fn acct_time_range(&self, account: u32, start: u64, end: u64) -> (String, String) {
        (
            format!(
                "{}M/{}/{:0width$}/",
                self.prefix,
                account,
                start,
                width = KEY_PAD_WIDTH
            ),
            format!(
                "{}M/{}/{:0width$}/{}",
                self.prefix,
                account,
                end,
                RANGE_SENTINEL,
                width = KEY_PAD_WIDTH
            ),
        )
    }

    /// Bounds covering every pending flag.
    pub fn pending_range(&self) -> (String, String) {
        self.family_range("p/")
    }

    /// Per-account bounds covering every pending flag.
    pub fn acct_pending_range(&self, account: u32) -> (String, String) {
        self.family_range(&format!("P/{}/", account))
    }

    /// Bounds covering every coin.
    pub fn coin_range(&self) -> (String, String) {
        self.family_range("c/")
    }

    /// Per-account bounds covering every coin membership flag.
    pub fn acct_coin_range(&self, account: u32) -> (String, String) {
        self.family_range(&format!("C/{}/", account))
    }

    fn family_range(&self, family: &str) -> (String, String) {
        (
            format!("{}{}", self.prefix, family),
            format!("{}{}{}", self.prefix, family, RANGE_SENTINEL),
        )
    }
}

/// Parse the trailing `<hash>` component of a composite key.
pub fn tail_hash(key: &[u8]) -> Option<TxId> {
    let key = str::from_utf8(key).ok()?;
    let component = key.rsplit('/').next()?;

    component.parse().ok()
}

/// Parse the trailing `<hash>/<vout>` components of a composite key.
pub fn tail_outpoint(key: &[u8]) -> Option<(TxId, u32)> {
    let key = str::from_utf8(key).ok()?;
    let mut components = key.rsplit('/');
    let vout = components.next()?.parse().ok()?;
    let hash = components.next()?.parse().ok()?;

    Some((hash, vout))
}
