//! RocksDB backend.

use std::sync::Arc;

use rocksdb::{Direction, IteratorMode};

use super::{Batch, BatchOp, Database, Result, StorageIterator};

/// Persistent backend over a shared RocksDB handle.
#[derive(Clone)]
pub struct RocksDb {
    db: Arc<rocksdb::DB>,
}

impl RocksDb {
    pub fn new(db: Arc<rocksdb::DB>) -> Self {
        Self { db }
    }
}

impl Database for RocksDb {
    type WriteBatch = Batch;

    fn get_raw<K>(&self, key: &K) -> Result<Option<Vec<u8>>>
    where
        K: AsRef<[u8]> + ?Sized,
    {
        let opt = self.db.get(key.as_ref())?;

        Ok(opt)
    }

    fn put<K, V>(&self, key: K, value: V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize,
    {
        let bytes = bincode::serialize(&value)?;
        self.db.put(key, bytes)?;

        Ok(())
    }

    fn write(&self, batch: Batch) -> Result<()> {
        let mut inner = rocksdb::WriteBatch::default();

        for op in batch.ops {
            match op {
                BatchOp::Put(key, value) => inner.put(key, value),
                BatchOp::Delete(key) => inner.delete(key),
            }
        }

        self.db.write(inner)?;

        Ok(())
    }

    fn batch(&self) -> Batch {
        Default::default()
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;

        Ok(())
    }

    fn range<'a>(&'a self, gte: &[u8], lte: &[u8], reverse: bool) -> Result<StorageIterator<'a>> {
        let lower = gte.to_vec();
        let upper = lte.to_vec();

        let iterator: StorageIterator<'a> = if reverse {
            // Seeks to the largest key <= the upper bound.
            let mode = IteratorMode::From(&upper, Direction::Reverse);
            Box::new(
                self.db
                    .iterator(mode)
                    .filter_map(|result| result.ok())
                    .map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .take_while(move |(k, _v)| k.as_slice() >= lower.as_slice()),
            )
        } else {
            let mode = IteratorMode::From(&lower, Direction::Forward);
            Box::new(
                self.db
                    .iterator(mode)
                    .filter_map(|result| result.ok())
                    .map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .take_while(move |(k, _v)| k.as_slice() <= upper.as_slice()),
            )
        };

        Ok(iterator)
    }
}
