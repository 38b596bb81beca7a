use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::repositories::entity_store::{
    Entity, EntityFilter, EntityId, EntityPatch, FieldFilter, Record,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanRole {
    Free,
    Basic,
    Premium,
    Pro,
}

/// A purchasable tier.
///
/// A plan may inherit the features and entitlements of a single parent via
/// `inherit_from`; its own entries override the parent's on key collision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub name: String,
    /// App Store product identifier. `None` for tiers that are never sold.
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub inherit_from: Option<EntityId>,
    #[serde(default)]
    pub role: Option<PlanRole>,
    #[serde(default)]
    pub sale_product_id: Option<String>,
    #[serde(default)]
    pub sale_start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sale_end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub entitlements: Vec<PlanEntitlementLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub order: i32,
}

/// Attaches an entitlement to a plan, optionally overriding its default limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntitlementLink {
    pub entitlement_id: EntityId,
    #[serde(default)]
    pub limit_override: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanFilter {
    pub id: FieldFilter<EntityId>,
    pub name: FieldFilter<String>,
    pub product_id: FieldFilter<Option<String>>,
}

impl PlanFilter {
    pub fn by_product_id(product_id: &str) -> Self {
        Self {
            product_id: FieldFilter::some(product_id.to_owned()),
            ..Default::default()
        }
    }

    pub fn by_name(name: &str) -> Self {
        Self {
            name: FieldFilter::Eq(name.to_owned()),
            ..Default::default()
        }
    }
}

impl EntityFilter<Plan> for PlanFilter {
    fn matches(&self, record: &Record<Plan>) -> bool {
        self.id.matches(&record.id)
            && self.name.matches(&record.name)
            && self.product_id.matches(&record.product_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanPatch {
    pub name: Option<String>,
    pub product_id: Option<Option<String>>,
    pub order: Option<i32>,
    pub inherit_from: Option<Option<EntityId>>,
    pub features: Option<Vec<Feature>>,
    pub entitlements: Option<Vec<PlanEntitlementLink>>,
}

impl EntityPatch<Plan> for PlanPatch {
    fn apply(self, plan: &mut Plan) {
        if let Some(v) = self.name {
            plan.name = v;
        }
        if let Some(v) = self.product_id {
            plan.product_id = v;
        }
        if let Some(v) = self.order {
            plan.order = v;
        }
        if let Some(v) = self.inherit_from {
            plan.inherit_from = v;
        }
        if let Some(v) = self.features {
            plan.features = v;
        }
        if let Some(v) = self.entitlements {
            plan.entitlements = v;
        }
    }
}

impl Entity for Plan {
    const KIND: &'static str = "plan";
    type Filter = PlanFilter;
    type Patch = PlanPatch;
}
