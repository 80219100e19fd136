//! Versioned document storage for saga projections.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use common::SagaInstanceId;
use tokio::sync::RwLock;

use crate::document::SagaProjection;
use crate::error::{ProjectionError, Result};

/// Which set of documents a projection lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectionCollection {
    /// Graphs of named sagas.
    Named,
    /// Chains built from reduced contexts.
    Reduced,
}

impl ProjectionCollection {
    /// Backing table name.
    pub fn table(&self) -> &'static str {
        match self {
            ProjectionCollection::Named => "saga_projections",
            ProjectionCollection::Reduced => "reduced_saga_projections",
        }
    }
}

impl fmt::Display for ProjectionCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// A stored value with its optimistic concurrency version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Storage for projection documents with compare-and-set writes.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Loads a document and its version.
    async fn load(
        &self,
        collection: ProjectionCollection,
        saga_instance_id: SagaInstanceId,
    ) -> Result<Option<Versioned<SagaProjection>>>;

    /// Saves a document if it is still at `expected_version`.
    ///
    /// `None` means the document must not exist yet. Returns the new
    /// version, or [`ProjectionError::Conflict`] when another writer won.
    async fn save(
        &self,
        collection: ProjectionCollection,
        projection: &SagaProjection,
        expected_version: Option<u64>,
    ) -> Result<u64>;

    /// All documents of a collection, ordered by saga instance id.
    async fn list(&self, collection: ProjectionCollection) -> Result<Vec<SagaProjection>>;

    /// Removes every document of a collection.
    async fn clear(&self, collection: ProjectionCollection) -> Result<()>;
}

/// In-memory projection store.
#[derive(Clone, Default)]
pub struct InMemoryProjectionStore {
    documents: Arc<RwLock<HashMap<(ProjectionCollection, SagaInstanceId), Versioned<SagaProjection>>>>,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents across both collections.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl ProjectionStore for InMemoryProjectionStore {
    async fn load(
        &self,
        collection: ProjectionCollection,
        saga_instance_id: SagaInstanceId,
    ) -> Result<Option<Versioned<SagaProjection>>> {
        Ok(self
            .documents
            .read()
            .await
            .get(&(collection, saga_instance_id))
            .cloned())
    }

    async fn save(
        &self,
        collection: ProjectionCollection,
        projection: &SagaProjection,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        let mut documents = self.documents.write().await;
        let key = (collection, projection.saga_instance_id);
        let current = documents.get(&key).map(|d| d.version);

        if current != expected_version {
            return Err(ProjectionError::Conflict {
                collection,
                saga_instance_id: projection.saga_instance_id,
            });
        }

        let version = current.map_or(1, |v| v + 1);
        documents.insert(
            key,
            Versioned {
                value: projection.clone(),
                version,
            },
        );
        Ok(version)
    }

    async fn list(&self, collection: ProjectionCollection) -> Result<Vec<SagaProjection>> {
        let documents = self.documents.read().await;
        let mut list: Vec<SagaProjection> = documents
            .iter()
            .filter(|((c, _), _)| *c == collection)
            .map(|(_, d)| d.value.clone())
            .collect();
        list.sort_by_key(|p| p.saga_instance_id);
        Ok(list)
    }

    async fn clear(&self, collection: ProjectionCollection) -> Result<()> {
        self.documents
            .write()
            .await
            .retain(|(c, _), _| *c != collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_checks_expected_version() {
        let store = InMemoryProjectionStore::new();
        let doc = SagaProjection::new(SagaInstanceId::new());

        assert_eq!(store.save(ProjectionCollection::Named, &doc, None).await.unwrap(), 1);
        assert!(
            store
                .save(ProjectionCollection::Named, &doc, None)
                .await
                .unwrap_err()
                .is_conflict()
        );
        assert_eq!(
            store.save(ProjectionCollection::Named, &doc, Some(1)).await.unwrap(),
            2
        );
        assert!(
            store
                .save(ProjectionCollection::Named, &doc, Some(1))
                .await
                .unwrap_err()
                .is_conflict()
        );
    }

    #[tokio::test]
    async fn collections_are_separate() {
        let store = InMemoryProjectionStore::new();
        let doc = SagaProjection::new(SagaInstanceId::new());

        store.save(ProjectionCollection::Reduced, &doc, None).await.unwrap();

        assert!(
            store
                .load(ProjectionCollection::Named, doc.saga_instance_id)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.list(ProjectionCollection::Reduced).await.unwrap(), vec![doc]);

        store.clear(ProjectionCollection::Reduced).await.unwrap();
        assert!(store.is_empty().await);
    }
}
