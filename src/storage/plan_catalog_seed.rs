//! Loads a plan catalog from JSON.
//!
//! ```json
//! {
//!   "entitlements": [
//!     { "id": 1, "name": "Exports", "slug": "exports", "isMetered": true,
//!       "defaultLimit": 10, "resetPeriod": "month" }
//!   ],
//!   "plans": [
//!     { "id": 1, "name": "Free Plan", "order": 0,
//!       "features": [{ "id": 1, "name": "Basic editor", "order": 1 }],
//!       "entitlements": [{ "entitlementId": 1 }] },
//!     { "id": 2, "name": "Basic", "productId": "plan.basic.monthly", "order": 1,
//!       "inheritFrom": 1, "entitlements": [{ "entitlementId": 1, "limitOverride": 100 }] }
//!   ]
//! }
//! ```
//!
//! Ids in the file only link records within the file; stored records get
//! fresh ids. Feature ids are kept as given.

use std::{collections::HashMap, path::Path};

use serde::Deserialize;
use tracing::info;

use crate::{
    domain::{
        entities::{
            entitlement::Entitlement,
            plan::{Plan, PlanPatch},
        },
        repositories::entity_store::EntityId,
    },
    errors::IapSyncError,
};

use super::Storage;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    entitlements: Vec<SeedRecord<Entitlement>>,
    #[serde(default)]
    plans: Vec<SeedRecord<Plan>>,
}

#[derive(Debug, Deserialize)]
struct SeedRecord<T> {
    id: EntityId,
    #[serde(flatten)]
    data: T,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub plans: usize,
    pub entitlements: usize,
}

pub async fn seed_from_file(storage: &Storage, path: &Path) -> Result<SeedSummary, IapSyncError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        IapSyncError::Configuration(format!("cannot read plan catalog {}: {e}", path.display()))
    })?;
    let summary = seed_from_json(storage, &raw).await?;
    info!(
        path = %path.display(),
        plans = summary.plans,
        entitlements = summary.entitlements,
        "plan catalog seeded"
    );
    Ok(summary)
}

pub async fn seed_from_json(storage: &Storage, raw: &str) -> Result<SeedSummary, IapSyncError> {
    let file: CatalogFile = serde_json::from_str(raw)
        .map_err(|e| IapSyncError::Configuration(format!("invalid plan catalog: {e}")))?;

    let mut entitlement_ids = HashMap::new();
    for seed in file.entitlements {
        let record = storage.entitlements.create(seed.data).await?;
        entitlement_ids.insert(seed.id, record.id);
    }

    // Parents may appear after their children, so plans are created without
    // their inheritance edge first and linked afterwards.
    let mut plan_ids = HashMap::new();
    let mut parents = Vec::new();
    for seed in file.plans {
        let mut plan = seed.data;
        for link in &mut plan.entitlements {
            link.entitlement_id = *entitlement_ids.get(&link.entitlement_id).ok_or_else(|| {
                IapSyncError::Configuration(format!(
                    "plan '{}' links unknown entitlement {}",
                    plan.name, link.entitlement_id
                ))
            })?;
        }
        let parent = plan.inherit_from.take();
        let record = storage.plans.create(plan).await?;
        plan_ids.insert(seed.id, record.id);
        if let Some(parent) = parent {
            parents.push((record.id, parent));
        }
    }

    for (plan_id, file_parent_id) in parents {
        // A parent missing from the file stays a dangling reference; the
        // resolver treats it as no parent.
        let parent_id = plan_ids.get(&file_parent_id).copied().unwrap_or(file_parent_id);
        storage
            .plans
            .update(
                plan_id,
                PlanPatch {
                    inherit_from: Some(Some(parent_id)),
                    ..Default::default()
                },
            )
            .await?;
    }

    Ok(SeedSummary {
        plans: plan_ids.len(),
        entitlements: entitlement_ids.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        entities::{entitlement::EntitlementFilter, plan::PlanFilter},
        repositories::entity_store::{FindOptions, SortOrder},
    };

    #[tokio::test]
    async fn links_children_declared_before_parents() {
        let storage = Storage::in_memory();
        let summary = seed_from_json(
            &storage,
            r#"{
                "entitlements": [
                    { "id": 10, "name": "Exports", "slug": "exports", "isMetered": true,
                      "defaultLimit": 5, "resetPeriod": "month" }
                ],
                "plans": [
                    { "id": 20, "name": "Premium", "productId": "plan.premium.monthly",
                      "order": 2, "inheritFrom": 21,
                      "entitlements": [{ "entitlementId": 10, "limitOverride": 50 }] },
                    { "id": 21, "name": "Free Plan", "order": 0 }
                ]
            }"#,
        )
        .await
        .unwrap();
        assert_eq!(summary, SeedSummary { plans: 2, entitlements: 1 });

        let exports = storage
            .entitlements
            .find(&EntitlementFilter::default(), FindOptions::default())
            .await
            .unwrap();
        let premium = storage
            .plans
            .find_first(&PlanFilter::by_product_id("plan.premium.monthly"), SortOrder::OldestFirst)
            .await;
        let premium = premium.unwrap().unwrap();
        let free = storage
            .plans
            .find_first(&PlanFilter::by_name("Free Plan"), SortOrder::OldestFirst)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(premium.inherit_from, Some(free.id));
        assert_eq!(premium.entitlements[0].entitlement_id, exports[0].id);
        assert_eq!(premium.entitlements[0].limit_override, Some(50));
    }

    #[tokio::test]
    async fn unknown_entitlement_link_is_rejected() {
        let storage = Storage::in_memory();
        let err = seed_from_json(
            &storage,
            r#"{ "plans": [{ "id": 1, "name": "Basic", "entitlements": [{ "entitlementId": 9 }] }] }"#,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IapSyncError::Configuration(_)));
    }
}
