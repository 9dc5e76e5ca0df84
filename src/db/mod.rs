//! Backing store abstraction: an ordered byte keyspace with point reads,
//! atomic write batches, and ranged iteration.

mod btreemap;
mod error;
#[cfg(feature = "rocksdb-backend")]
mod rocks;

pub use btreemap::BTreeDb;
pub use error::Error;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksDb;

pub type Result<T> = std::result::Result<T, Error>;

/// Iterator over raw key-value pairs, in key order.
pub type StorageIterator<'a> = Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>;

pub trait Database {
    type WriteBatch: WriteBatch;

    fn get<K, V>(&self, key: &K) -> Result<V>
    where
        K: AsRef<[u8]> + ?Sized,
        V: serde::de::DeserializeOwned,
    {
        let opt = self.get_opt(key)?;

        opt.ok_or(Error::KeyNotFound)
    }

    fn get_opt<K, V>(&self, key: &K) -> Result<Option<V>>
    where
        K: AsRef<[u8]> + ?Sized,
        V: serde::de::DeserializeOwned,
    {
        match self.get_raw(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn contains<K>(&self, key: &K) -> Result<bool>
    where
        K: AsRef<[u8]> + ?Sized,
    {
        let opt = self.get_raw(key)?;

        Ok(opt.is_some())
    }

    fn get_raw<K>(&self, key: &K) -> Result<Option<Vec<u8>>>
    where
        K: AsRef<[u8]> + ?Sized;

    fn put<K, V>(&self, key: K, value: V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize;

    /// Atomically apply a batch of writes.
    fn write(&self, batch: Self::WriteBatch) -> Result<()>;

    fn batch(&self) -> Self::WriteBatch;

    fn flush(&self) -> Result<()>;

    /// Iterate keys in `gte..=lte`, in key order, reversed on request.
    fn range<'a>(&'a self, gte: &[u8], lte: &[u8], reverse: bool) -> Result<StorageIterator<'a>>;
}

pub trait WriteBatch {
    fn put<K, V>(&mut self, key: K, value: V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize;

    fn put_raw<K>(&mut self, key: K, value: Vec<u8>)
    where
        K: AsRef<[u8]>;

    fn delete<K>(&mut self, key: K)
    where
        K: AsRef<[u8]>;
}

/// A staged batch of operations, applied in order by `Database::write`.
#[derive(Default)]
pub struct Batch {
    pub(crate) ops: Vec<BatchOp>,
}

pub(crate) enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

impl WriteBatch for Batch {
    fn put<K, V>(&mut self, key: K, value: V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize,
    {
        let bytes = bincode::serialize(&value)?;
        self.ops.push(BatchOp::Put(key.as_ref().to_vec(), bytes));

        Ok(())
    }

    fn put_raw<K>(&mut self, key: K, value: Vec<u8>)
    where
        K: AsRef<[u8]>,
    {
        self.ops.push(BatchOp::Put(key.as_ref().to_vec(), value));
    }

    fn delete<K>(&mut self, key: K)
    where
        K: AsRef<[u8]>,
    {
        self.ops.push(BatchOp::Delete(key.as_ref().to_vec()));
    }
}
