use std::{collections::BTreeMap, sync::Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    domain::repositories::entity_store::{
        Entity, EntityFilter, EntityId, EntityPatch, EntityStore, FindOptions, Record, SortOrder,
    },
    errors::StoreError,
};

/// Process-local `EntityStore`. Ids are assigned sequentially from 1, so id
/// order is creation order.
pub struct InMemoryStore<T: Entity> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    next_id: EntityId,
    records: BTreeMap<EntityId, Record<T>>,
}

impl<T: Entity> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                records: BTreeMap::new(),
            }),
        }
    }
}

impl<T: Entity> InMemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner<T>>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend(format!("{} store lock poisoned", T::KIND)))
    }
}

#[async_trait]
impl<T: Entity> EntityStore<T> for InMemoryStore<T> {
    async fn create(&self, data: T) -> Result<Record<T>, StoreError> {
        let mut inner = self.lock()?;
        if let Some(key) = data.unique_key() {
            if inner
                .records
                .values()
                .any(|r| r.data.unique_key().as_deref() == Some(key.as_str()))
            {
                return Err(StoreError::UniqueViolation { kind: T::KIND, key });
            }
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let now = Utc::now();
        let record = Record {
            id,
            created_at: now,
            updated_at: now,
            data,
        };
        inner.records.insert(id, record.clone());
        Ok(record)
    }

    async fn find(
        &self,
        filter: &T::Filter,
        options: FindOptions,
    ) -> Result<Vec<Record<T>>, StoreError> {
        let inner = self.lock()?;
        let matching = inner.records.values().filter(|r| filter.matches(r)).cloned();
        let mut found: Vec<Record<T>> = match options.sort {
            Some(SortOrder::NewestFirst) => matching.rev().collect(),
            Some(SortOrder::OldestFirst) | None => matching.collect(),
        };
        if let Some(limit) = options.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn find_by_id(&self, id: EntityId) -> Result<Option<Record<T>>, StoreError> {
        Ok(self.lock()?.records.get(&id).cloned())
    }

    async fn update(&self, id: EntityId, patch: T::Patch) -> Result<Record<T>, StoreError> {
        let mut inner = self.lock()?;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(StoreError::NotFound { kind: T::KIND, id })?;
        patch.apply(&mut record.data);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}
