use std::sync::PoisonError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("db key not found")]
    KeyNotFound,
    #[error("mutex poison error")]
    MutexPoison,
    #[error("bincode failed: {0}")]
    Bincode(#[from] bincode::Error),
    #[cfg(feature = "rocksdb-backend")]
    #[error("rocksdb failed: {0}")]
    Rocksdb(#[from] rocksdb::Error),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_err: PoisonError<T>) -> Self {
        Error::MutexPoison
    }
}
