use thiserror::Error;

use crate::{db, lock, model};

#[derive(Debug, Error)]
pub enum Error {
    #[error("database failed: {0}")]
    Db(#[from] db::Error),
    #[error("lock failed: {0}")]
    Lock(#[from] lock::LockError),
    #[error("record decode failed: {0}")]
    Decode(#[from] model::DecodeError),
    /// An expected record is missing or malformed. Signals a bug or external
    /// tampering with the store.
    #[error("consistency violation: {0}")]
    Consistency(String),
    #[error("height must be non-negative, got {0}")]
    NegativeHeight(i32),
    #[error("transaction {0} is not pending")]
    NotPending(model::TxId),
    #[error("balance overflowed")]
    BalanceOverflow,
}
