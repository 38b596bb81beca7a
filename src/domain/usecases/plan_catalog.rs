use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    domain::{
        entities::{
            entitlement::{Entitlement, EntitlementFilter},
            plan::{Feature, Plan, PlanFilter, PlanRole},
        },
        repositories::entity_store::{EntityId, EntityStore, FindOptions, Record, SortOrder},
    },
    errors::IapSyncError,
};

use super::plan_resolver::{PlanResolver, ResolvedEntitlement, ResolvedPlan};

/// A plan as presented to clients, with inheritance applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDetails {
    pub id: EntityId,
    pub name: String,
    pub product_id: Option<String>,
    pub order: i32,
    pub role: Option<PlanRole>,
    pub sale_product_id: Option<String>,
    pub sale_start_date: Option<DateTime<Utc>>,
    pub sale_end_date: Option<DateTime<Utc>>,
    pub features: Vec<Feature>,
    pub entitlements: Vec<ResolvedEntitlement>,
}

impl PlanDetails {
    fn new(plan: &Record<Plan>, resolved: ResolvedPlan) -> Self {
        Self {
            id: plan.id,
            name: plan.name.clone(),
            product_id: plan.product_id.clone(),
            order: plan.order,
            role: plan.role,
            sale_product_id: plan.sale_product_id.clone(),
            sale_start_date: plan.sale_start_date,
            sale_end_date: plan.sale_end_date,
            features: resolved.features(),
            entitlements: resolved.entitlements(),
        }
    }
}

#[derive(Clone)]
pub struct PlanCatalog {
    plans: Arc<dyn EntityStore<Plan>>,
    entitlements: Arc<dyn EntityStore<Entitlement>>,
    free_plan_name: String,
}

impl PlanCatalog {
    pub fn new(
        plans: Arc<dyn EntityStore<Plan>>,
        entitlements: Arc<dyn EntityStore<Entitlement>>,
        free_plan_name: impl Into<String>,
    ) -> Self {
        Self {
            plans,
            entitlements,
            free_plan_name: free_plan_name.into(),
        }
    }

    pub async fn find_by_id(&self, plan_id: EntityId) -> Result<Option<Record<Plan>>, IapSyncError> {
        Ok(self.plans.find_by_id(plan_id).await?)
    }

    pub async fn find_by_product_id(
        &self,
        product_id: &str,
    ) -> Result<Option<Record<Plan>>, IapSyncError> {
        Ok(self
            .plans
            .find_first(&PlanFilter::by_product_id(product_id), SortOrder::OldestFirst)
            .await?)
    }

    pub async fn find_free_plan(&self) -> Result<Option<Record<Plan>>, IapSyncError> {
        Ok(self
            .plans
            .find_first(&PlanFilter::by_name(&self.free_plan_name), SortOrder::OldestFirst)
            .await?)
    }

    pub fn is_free_plan(&self, plan: &Plan) -> bool {
        plan.name == self.free_plan_name
    }

    /// Every plan by display order. One cyclic inheritance chain fails the
    /// whole listing.
    pub async fn all_plans_with_details(&self) -> Result<Vec<PlanDetails>, IapSyncError> {
        let mut resolver = self.resolver().await?;
        let mut plans = self
            .plans
            .find(&PlanFilter::default(), FindOptions::default())
            .await?;
        plans.sort_by_key(|p| (p.order, p.id));
        plans
            .iter()
            .map(|plan| Ok(PlanDetails::new(plan, resolver.resolve(plan.id)?)))
            .collect()
    }

    pub async fn plan_with_details(
        &self,
        plan_id: EntityId,
    ) -> Result<Option<PlanDetails>, IapSyncError> {
        let mut resolver = self.resolver().await?;
        let Some(plan) = resolver.plan(plan_id).cloned() else {
            return Ok(None);
        };
        let resolved = resolver.resolve(plan_id)?;
        Ok(Some(PlanDetails::new(&plan, resolved)))
    }

    async fn resolver(&self) -> Result<PlanResolver, IapSyncError> {
        let plans = self
            .plans
            .find(&PlanFilter::default(), FindOptions::default())
            .await?;
        let entitlements = self
            .entitlements
            .find(&EntitlementFilter::default(), FindOptions::default())
            .await?;
        Ok(PlanResolver::new(plans, entitlements))
    }
}
