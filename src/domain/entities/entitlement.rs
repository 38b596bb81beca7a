use serde::{Deserialize, Serialize};

use crate::domain::repositories::entity_store::{
    Entity, EntityFilter, EntityId, EntityPatch, FieldFilter, Record,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetPeriod {
    Minute,
    Hour,
    Day,
    Week,
    #[serde(rename = "two weeks")]
    TwoWeeks,
    Month,
    Year,
    Lifetime,
}

/// A named capability, possibly metered, keyed by slug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub is_metered: bool,
    #[serde(default)]
    pub default_limit: Option<i64>,
    #[serde(default)]
    pub reset_period: Option<ResetPeriod>,
}

#[derive(Debug, Clone, Default)]
pub struct EntitlementFilter {
    pub id: FieldFilter<EntityId>,
    pub slug: FieldFilter<String>,
}

impl EntityFilter<Entitlement> for EntitlementFilter {
    fn matches(&self, record: &Record<Entitlement>) -> bool {
        self.id.matches(&record.id) && self.slug.matches(&record.slug)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntitlementPatch {
    pub name: Option<String>,
    pub is_metered: Option<bool>,
    pub default_limit: Option<Option<i64>>,
    pub reset_period: Option<Option<ResetPeriod>>,
}

impl EntityPatch<Entitlement> for EntitlementPatch {
    fn apply(self, e: &mut Entitlement) {
        if let Some(v) = self.name {
            e.name = v;
        }
        if let Some(v) = self.is_metered {
            e.is_metered = v;
        }
        if let Some(v) = self.default_limit {
            e.default_limit = v;
        }
        if let Some(v) = self.reset_period {
            e.reset_period = v;
        }
    }
}

impl Entity for Entitlement {
    const KIND: &'static str = "entitlement";
    type Filter = EntitlementFilter;
    type Patch = EntitlementPatch;

    fn unique_key(&self) -> Option<String> {
        Some(self.slug.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_period_wire_names() {
        assert_eq!(
            serde_json::from_str::<ResetPeriod>("\"two weeks\"").unwrap(),
            ResetPeriod::TwoWeeks
        );
        assert_eq!(
            serde_json::to_string(&ResetPeriod::Lifetime).unwrap(),
            "\"lifetime\""
        );
    }
}
