//! Thread-safe local mirror of a named resource set (spec.md §4.2). Two
//! variants — in-memory and cloud-listing — share one query surface via a
//! tagged enum rather than a class hierarchy, per the Design Note in
//! spec.md §9 ("model as a tagged variant... not as subclasses").

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use crate::error::Result;

type ReplenishFn<T> =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<Vec<(String, T)>>> + Send>> + Send + Sync>;

/// `add`/`delete`/`get`/`snapshot` are safe for concurrent readers and a
/// single writer: every method takes the lock it needs and releases it
/// before returning, so no caller can observe a torn update.
pub enum Snapshotter<T: Clone> {
    /// Authoritative locally; persists until process exit.
    InMemory(RwLock<HashMap<String, T>>),
    /// Authoritative in the cloud; `replenish` re-lists and repopulates.
    CloudListing {
        store: RwLock<HashMap<String, T>>,
        list: ReplenishFn<T>,
    },
}

impl<T: Clone> Snapshotter<T> {
    pub fn in_memory() -> Self {
        Snapshotter::InMemory(RwLock::new(HashMap::new()))
    }

    /// `list` performs the cloud listing call and filters to owned
    /// resources; `replenish` drives it.
    pub fn cloud_listing<F, Fut>(list: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<(String, T)>>> + Send + 'static,
    {
        Snapshotter::CloudListing {
            store: RwLock::new(HashMap::new()),
            list: Box::new(move || Box::pin(list())),
        }
    }

    fn store(&self) -> &RwLock<HashMap<String, T>> {
        match self {
            Snapshotter::InMemory(store) => store,
            Snapshotter::CloudListing { store, .. } => store,
        }
    }

    pub fn add(&self, name: impl Into<String>, obj: T) {
        self.store().write().unwrap().insert(name.into(), obj);
    }

    pub fn delete(&self, name: &str) {
        self.store().write().unwrap().remove(name);
    }

    pub fn get(&self, name: &str) -> Option<T> {
        self.store().read().unwrap().get(name).cloned()
    }

    /// A detached copy; iterating it never observes a concurrent writer.
    pub fn snapshot(&self) -> HashMap<String, T> {
        self.store().read().unwrap().clone()
    }

    /// No-op on the in-memory variant (there is no external source of
    /// truth to re-list from); re-lists and repopulates on the cloud-listing
    /// variant.
    pub async fn replenish(&self) -> Result<()> {
        if let Snapshotter::CloudListing { store, list } = self {
            let fresh = list().await?;
            let mut guard = store.write().unwrap();
            guard.clear();
            guard.extend(fresh);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_add_get_delete() {
        let snap: Snapshotter<u32> = Snapshotter::in_memory();
        snap.add("a", 1);
        assert_eq!(snap.get("a"), Some(1));
        snap.delete("a");
        assert_eq!(snap.get("a"), None);
    }

    #[test]
    fn snapshot_is_detached() {
        let snap: Snapshotter<u32> = Snapshotter::in_memory();
        snap.add("a", 1);
        let copy = snap.snapshot();
        snap.add("b", 2);
        assert_eq!(copy.len(), 1);
        assert_eq!(snap.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn cloud_listing_replenish_repopulates() {
        let snap: Snapshotter<u32> = Snapshotter::cloud_listing(|| async {
            Ok(vec![("x".to_string(), 42)])
        });
        assert_eq!(snap.get("x"), None);
        snap.replenish().await.unwrap();
        assert_eq!(snap.get("x"), Some(42));
    }

    #[tokio::test]
    async fn in_memory_replenish_is_a_no_op() {
        let snap: Snapshotter<u32> = Snapshotter::in_memory();
        snap.add("a", 1);
        snap.replenish().await.unwrap();
        assert_eq!(snap.get("a"), Some(1));
    }
}
