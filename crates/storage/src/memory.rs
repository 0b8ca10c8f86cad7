use std::collections::BTreeMap;

use dragonnet_common::errors::{DcResult, DragonNetError};
use parking_lot::Mutex;

use crate::object_store::ObjectStore;

/// In-memory backend, used for tests and ephemeral nodes.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemoryStore {
    fn get(&self, key: &str) -> DcResult<Vec<u8>> {
        self.objects
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| DragonNetError::not_found(key.to_string()))
    }

    fn put(&self, key: &str, value: &[u8]) -> DcResult<()> {
        self.objects.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> DcResult<()> {
        self.objects.lock().remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> DcResult<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn delete_prefix(&self, prefix: &str) -> DcResult<()> {
        let mut objects = self.objects.lock();
        let doomed: Vec<String> = objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            objects.remove(&key);
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> DcResult<bool> {
        Ok(self.objects.lock().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_is_prefix_scoped_and_sorted() {
        let store = MemoryStore::new();
        store.put("BLOCK/2-l2-b", b"x").unwrap();
        store.put("BLOCK/2-l2-a", b"x").unwrap();
        store.put("BLOCK/2-l3-a", b"x").unwrap();
        store.put("TRANSACTION/2", b"x").unwrap();

        assert_eq!(
            store.list("BLOCK/2-l2").unwrap(),
            vec!["BLOCK/2-l2-a".to_string(), "BLOCK/2-l2-b".to_string()]
        );
    }

    #[test]
    fn delete_prefix_removes_only_matches() {
        let store = MemoryStore::new();
        store.put("BROADCAST/TO_BROADCAST/9/a", b"x").unwrap();
        store.put("BROADCAST/TO_BROADCAST/9/b", b"x").unwrap();
        store.put("BROADCAST/LAST_BLOCK", b"9").unwrap();

        store.delete_prefix("BROADCAST/TO_BROADCAST/9/").unwrap();
        assert!(store.list("BROADCAST/TO_BROADCAST/9/").unwrap().is_empty());
        assert!(store.exists("BROADCAST/LAST_BLOCK").unwrap());
    }
}
