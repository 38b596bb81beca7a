use std::ops::Deref;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

pub type EntityId = u64;

/// A stored entity together with the bookkeeping fields the store owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record<T> {
    pub id: EntityId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub data: T,
}

impl<T> Deref for Record<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

pub trait Entity: Clone + Send + Sync + 'static {
    /// Name used in logs and store errors.
    const KIND: &'static str;

    type Filter: EntityFilter<Self>;
    type Patch: EntityPatch<Self>;

    /// Value that must be unique across all stored records of this kind, if
    /// the entity has one.
    fn unique_key(&self) -> Option<String> {
        None
    }
}

pub trait EntityFilter<T>: Default + Send + Sync {
    fn matches(&self, record: &Record<T>) -> bool;
}

/// Partial update. Fields left as `None` are not touched.
pub trait EntityPatch<T>: Send + Sync {
    fn apply(self, entity: &mut T);
}

/// Predicate on a single field. `Any` matches everything, so filter structs
/// can derive `Default` and only set the fields they care about.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FieldFilter<V> {
    #[default]
    Any,
    Eq(V),
    Ne(V),
    In(Vec<V>),
    Lt(V),
}

impl<V: PartialEq + PartialOrd> FieldFilter<V> {
    pub fn matches(&self, value: &V) -> bool {
        match self {
            FieldFilter::Any => true,
            FieldFilter::Eq(expected) => value == expected,
            FieldFilter::Ne(excluded) => value != excluded,
            FieldFilter::In(allowed) => allowed.contains(value),
            FieldFilter::Lt(bound) => value < bound,
        }
    }
}

impl<V: PartialEq + PartialOrd> FieldFilter<Option<V>> {
    /// Shorthand for matching a nullable field against a concrete value.
    pub fn some(value: V) -> Self {
        FieldFilter::Eq(Some(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    OldestFirst,
    NewestFirst,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FindOptions {
    pub sort: Option<SortOrder>,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn newest_first() -> Self {
        Self {
            sort: Some(SortOrder::NewestFirst),
            limit: None,
        }
    }

    pub fn oldest_first() -> Self {
        Self {
            sort: Some(SortOrder::OldestFirst),
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Queryable record store for one entity kind.
///
/// No atomicity is guaranteed across calls. A single `update` is applied
/// atomically to its row, so increments expressed in a patch are never lost.
#[async_trait]
pub trait EntityStore<T: Entity>: Send + Sync {
    async fn create(&self, data: T) -> Result<Record<T>, StoreError>;

    async fn find(
        &self,
        filter: &T::Filter,
        options: FindOptions,
    ) -> Result<Vec<Record<T>>, StoreError>;

    async fn find_by_id(&self, id: EntityId) -> Result<Option<Record<T>>, StoreError>;

    async fn update(&self, id: EntityId, patch: T::Patch) -> Result<Record<T>, StoreError>;

    async fn find_first(
        &self,
        filter: &T::Filter,
        sort: SortOrder,
    ) -> Result<Option<Record<T>>, StoreError> {
        let options = FindOptions {
            sort: Some(sort),
            limit: Some(1),
        };
        Ok(self.find(filter, options).await?.into_iter().next())
    }
}
