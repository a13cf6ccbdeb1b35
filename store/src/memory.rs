use crate::errors::StoreError;
use crate::row;
use crate::store::ClusterStore;
use async_trait::async_trait;
use model::ClusterSpec;
use model::filter::Predicate;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

/// Row store held in memory, ordered by name like the secondary index.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get_cluster(&self, name: &str) -> Result<Option<ClusterSpec>, StoreError> {
        self.rows.read().get(name).map(row::from_row).transpose()
    }

    async fn put_cluster(&self, spec: &ClusterSpec) -> Result<(), StoreError> {
        let row = row::to_row(spec)?;
        self.rows.write().insert(spec.name.clone(), row);
        Ok(())
    }

    async fn delete_cluster(&self, name: &str) -> Result<(), StoreError> {
        self.rows.write().remove(name);
        Ok(())
    }

    async fn query(&self, predicate: &Predicate) -> Result<Vec<ClusterSpec>, StoreError> {
        self.rows
            .read()
            .values()
            .filter(|r| predicate.evaluate(r))
            .map(row::from_row)
            .collect()
    }

    async fn status(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
