use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::storage::ObjectStore;

/// In-memory object store for testing. Thread-safe via Mutex.
pub struct MemoryBackend {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }

    /// All stored keys, sorted, for assertions on the remote layout.
    pub fn keys(&self) -> Vec<String> {
        let map = self.data.lock().unwrap();
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl ObjectStore for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.data.lock().unwrap();
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        map.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        for key in keys {
            map.remove(key);
        }
        Ok(())
    }

    fn head_bucket(&self) -> Result<()> {
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let map = self.data.lock().unwrap();
        let mut keys: Vec<String> = map
            .keys()
            .filter(|k| k.starts_with(prefix) && !k.ends_with('/'))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
