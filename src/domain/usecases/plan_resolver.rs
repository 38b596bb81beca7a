use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::warn;

use crate::{
    domain::{
        entities::{
            entitlement::{Entitlement, ResetPeriod},
            plan::{Feature, Plan},
        },
        repositories::entity_store::{EntityId, Record},
    },
    errors::IapSyncError,
};

/// An entitlement as granted by a plan, with the plan's limit applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEntitlement {
    pub name: String,
    pub slug: String,
    pub is_metered: bool,
    pub limit: Option<i64>,
    pub reset_period: Option<ResetPeriod>,
}

/// Effective features and entitlements of a plan after inheritance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPlan {
    features: BTreeMap<EntityId, Feature>,
    entitlements: BTreeMap<String, ResolvedEntitlement>,
}

impl ResolvedPlan {
    /// Features by display order, then id.
    pub fn features(&self) -> Vec<Feature> {
        let mut features: Vec<Feature> = self.features.values().cloned().collect();
        features.sort_by_key(|f| (f.order, f.id));
        features
    }

    /// Entitlements by slug.
    pub fn entitlements(&self) -> Vec<ResolvedEntitlement> {
        self.entitlements.values().cloned().collect()
    }

    pub fn entitlement(&self, slug: &str) -> Option<&ResolvedEntitlement> {
        self.entitlements.get(slug)
    }
}

/// Resolves plan inheritance over a snapshot of the catalog.
///
/// Each plan is resolved at most once per resolver; ancestors shared by
/// several plans are served from the cache.
pub struct PlanResolver {
    plans: HashMap<EntityId, Record<Plan>>,
    entitlements: HashMap<EntityId, Record<Entitlement>>,
    cache: HashMap<EntityId, ResolvedPlan>,
    visiting: HashSet<EntityId>,
}

impl PlanResolver {
    pub fn new(plans: Vec<Record<Plan>>, entitlements: Vec<Record<Entitlement>>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.id, p)).collect(),
            entitlements: entitlements.into_iter().map(|e| (e.id, e)).collect(),
            cache: HashMap::new(),
            visiting: HashSet::new(),
        }
    }

    pub fn plan(&self, plan_id: EntityId) -> Option<&Record<Plan>> {
        self.plans.get(&plan_id)
    }

    pub fn resolve(&mut self, plan_id: EntityId) -> Result<ResolvedPlan, IapSyncError> {
        if let Some(resolved) = self.cache.get(&plan_id) {
            return Ok(resolved.clone());
        }
        let plan = self
            .plans
            .get(&plan_id)
            .cloned()
            .ok_or_else(|| IapSyncError::Configuration(format!("plan {plan_id} does not exist")))?;
        if !self.visiting.insert(plan_id) {
            self.visiting.clear();
            return Err(IapSyncError::Configuration(format!(
                "plan {plan_id} inherits from itself"
            )));
        }

        let mut resolved = match plan.inherit_from {
            Some(parent_id) if self.plans.contains_key(&parent_id) => self.resolve(parent_id)?,
            Some(parent_id) => {
                warn!(plan_id, parent_id, "plan inherits from a missing plan; ignoring parent");
                ResolvedPlan::default()
            }
            None => ResolvedPlan::default(),
        };

        for feature in &plan.features {
            resolved.features.insert(feature.id, feature.clone());
        }
        for link in &plan.entitlements {
            let Some(entitlement) = self.entitlements.get(&link.entitlement_id) else {
                warn!(
                    plan_id,
                    entitlement_id = link.entitlement_id,
                    "plan links a missing entitlement; skipping"
                );
                continue;
            };
            resolved.entitlements.insert(
                entitlement.slug.clone(),
                ResolvedEntitlement {
                    name: entitlement.name.clone(),
                    slug: entitlement.slug.clone(),
                    is_metered: entitlement.is_metered,
                    limit: link.limit_override.or(entitlement.default_limit),
                    reset_period: entitlement.reset_period,
                },
            );
        }

        self.visiting.remove(&plan_id);
        self.cache.insert(plan_id, resolved.clone());
        Ok(resolved)
    }
}
