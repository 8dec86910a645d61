use std::collections::HashMap;
use std::marker::PhantomData;

use tokio::sync::Mutex;

use crate::graph::{downcast, erase, GraphValue, Value};

/// Typed key into [`AgentStorage`].
pub struct StorageKey<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> StorageKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for StorageKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StorageKey<T> {}

/// Run-scoped key-value storage shared by every node of a run.
#[derive(Default)]
pub struct AgentStorage {
    values: Mutex<HashMap<&'static str, Value>>,
}

impl AgentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set<T: GraphValue>(&self, key: StorageKey<T>, value: T) {
        self.values.lock().await.insert(key.name, erase(value));
    }

    /// Stored value, or `None` when absent or stored under another type.
    pub async fn get<T: GraphValue>(&self, key: StorageKey<T>) -> Option<T> {
        let value = self.values.lock().await.get(key.name).cloned()?;
        downcast(value)
    }

    pub async fn remove<T: GraphValue>(&self, key: StorageKey<T>) -> Option<T> {
        let value = self.values.lock().await.remove(key.name)?;
        downcast(value)
    }

    pub async fn clear(&self) {
        self.values.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNT: StorageKey<u32> = StorageKey::new("count");
    const NAME: StorageKey<String> = StorageKey::new("name");

    #[tokio::test]
    async fn typed_get_set_remove() {
        let storage = AgentStorage::new();
        assert_eq!(storage.get(COUNT).await, None);

        storage.set(COUNT, 3).await;
        storage.set(NAME, "ada".to_string()).await;
        assert_eq!(storage.get(COUNT).await, Some(3));
        assert_eq!(storage.remove(NAME).await.as_deref(), Some("ada"));
        assert_eq!(storage.get(NAME).await, None);

        storage.clear().await;
        assert_eq!(storage.get(COUNT).await, None);
    }

    #[tokio::test]
    async fn wrong_type_reads_as_absent() {
        let storage = AgentStorage::new();
        storage.set(COUNT, 1).await;
        let other: StorageKey<String> = StorageKey::new("count");
        assert_eq!(storage.get(other).await, None);
    }
}
