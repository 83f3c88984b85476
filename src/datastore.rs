//! Local key/value storage consumed by the DHT.

use std::collections::HashMap;
use std::fmt::Debug;

use bytes::Bytes;

use crate::{Key, Result};

/// Storage for values this node holds.
///
/// A missing key is `Ok(None)`, never an error.
pub trait Datastore: Debug + Send {
    fn get(&self, key: &Key) -> Result<Option<Bytes>>;

    fn put(&mut self, key: Key, value: Bytes) -> Result<()>;

    fn has(&self, key: &Key) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Every stored key, used to seed locally providable content at startup.
    fn list_keys(&self) -> Result<Vec<Key>>;
}

#[derive(Debug, Default, Clone)]
/// In-memory [Datastore].
pub struct MemoryDatastore {
    values: HashMap<Key, Bytes>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Datastore for MemoryDatastore {
    fn get(&self, key: &Key) -> Result<Option<Bytes>> {
        Ok(self.values.get(key).cloned())
    }

    fn put(&mut self, key: Key, value: Bytes) -> Result<()> {
        self.values.insert(key, value);
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<Key>> {
        Ok(self.values.keys().cloned().collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn put_get() {
        let mut store = MemoryDatastore::new();

        store
            .put(Key::from("foo"), Bytes::from_static(b"bar"))
            .unwrap();

        assert_eq!(
            store.get(&Key::from("foo")).unwrap(),
            Some(Bytes::from_static(b"bar"))
        );
        assert_eq!(store.get(&Key::from("baz")).unwrap(), None);
        assert!(store.has(&Key::from("foo")).unwrap());
        assert_eq!(store.list_keys().unwrap(), vec![Key::from("foo")]);
    }
}
