//! Ordered in-memory backend over a heap-allocated BTreeMap.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use super::{Batch, BatchOp, Database, Result, StorageIterator};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory backend. Cloning shares the underlying map.
#[derive(Default, Clone)]
pub struct BTreeDb {
    rc: Arc<RwLock<Map>>,
}

impl BTreeDb {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Database for BTreeDb {
    type WriteBatch = Batch;

    fn get_raw<K>(&self, key: &K) -> Result<Option<Vec<u8>>>
    where
        K: AsRef<[u8]> + ?Sized,
    {
        let map = self.rc.read()?;

        Ok(map.get(key.as_ref()).cloned())
    }

    fn put<K, V>(&self, key: K, value: V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize,
    {
        let bytes = bincode::serialize(&value)?;
        self.rc.write()?.insert(key.as_ref().to_vec(), bytes);

        Ok(())
    }

    fn write(&self, batch: Batch) -> Result<()> {
        let mut map = self.rc.write()?;

        for op in batch.ops {
            match op {
                BatchOp::Put(key, value) => {
                    map.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }

        Ok(())
    }

    fn batch(&self) -> Batch {
        Default::default()
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn range<'a>(&'a self, gte: &[u8], lte: &[u8], reverse: bool) -> Result<StorageIterator<'a>> {
        if gte > lte {
            return Ok(Box::new(std::iter::empty()));
        }

        Ok(Box::new(RangeIter {
            data: self.rc.read()?,
            gte: gte.to_vec(),
            lte: lte.to_vec(),
            skip: 0,
            reverse,
        }))
    }
}

struct RangeIter<'a> {
    data: RwLockReadGuard<'a, Map>,
    gte: Vec<u8>,
    lte: Vec<u8>,
    skip: usize,
    reverse: bool,
}

impl Iterator for RangeIter<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let bounds = (
            Bound::Included(self.gte.as_slice()),
            Bound::Included(self.lte.as_slice()),
        );
        let mut range = self.data.range::<[u8], _>(bounds);
        let item = if self.reverse {
            range.rev().nth(self.skip)
        } else {
            range.nth(self.skip)
        };

        item.map(|(k, v)| {
            self.skip += 1;
            (k.clone(), v.clone())
        })
    }
}
