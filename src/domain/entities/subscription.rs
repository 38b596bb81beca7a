use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::repositories::entity_store::{
    Entity, EntityFilter, EntityId, EntityPatch, FieldFilter, Record,
};

/// Identifier of a user of the host application. Purchases carry it as the
/// `appAccountToken` the client attached at purchase time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(UserId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionStatus {
    Active,
    GracePeriod,
    BillingIssue,
    Canceled,
    Expired,
    Revoked,
}

impl SubscriptionStatus {
    /// Statuses from which re-enabling auto-renew brings the subscription
    /// back to `Active`.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Canceled
                | SubscriptionStatus::BillingIssue
                | SubscriptionStatus::GracePeriod
        )
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, SubscriptionStatus::Expired | SubscriptionStatus::Revoked)
    }
}

/// One user's billing relationship to a plan.
///
/// `original_transaction_id` is the correlation key between App Store
/// notifications and local records; notifications never carry the local id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub user_id: UserId,
    pub plan_id: Option<EntityId>,
    pub status: SubscriptionStatus,
    /// `None` means the subscription does not expire (free tier).
    pub expires_date: Option<DateTime<Utc>>,
    pub original_transaction_id: Option<String>,
    pub latest_transaction_id: Option<String>,
    pub start_date: DateTime<Utc>,
    pub revocation_date: Option<DateTime<Utc>>,
    pub revocation_reason: Option<String>,
}

impl Subscription {
    pub fn active(
        user_id: UserId,
        plan_id: EntityId,
        expires_date: Option<DateTime<Utc>>,
        start_date: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            plan_id: Some(plan_id),
            status: SubscriptionStatus::Active,
            expires_date,
            original_transaction_id: None,
            latest_transaction_id: None,
            start_date,
            revocation_date: None,
            revocation_reason: None,
        }
    }

    pub fn with_transactions(
        mut self,
        original_transaction_id: impl Into<String>,
        latest_transaction_id: Option<String>,
    ) -> Self {
        self.original_transaction_id = Some(original_transaction_id.into());
        self.latest_transaction_id = latest_transaction_id;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub id: FieldFilter<EntityId>,
    pub user_id: FieldFilter<UserId>,
    pub plan_id: FieldFilter<Option<EntityId>>,
    pub status: FieldFilter<SubscriptionStatus>,
    pub original_transaction_id: FieldFilter<Option<String>>,
}

impl SubscriptionFilter {
    pub fn active_for_user(user_id: UserId) -> Self {
        Self {
            user_id: FieldFilter::Eq(user_id),
            status: FieldFilter::Eq(SubscriptionStatus::Active),
            ..Default::default()
        }
    }

    pub fn by_original_transaction_id(original_transaction_id: &str) -> Self {
        Self {
            original_transaction_id: FieldFilter::some(original_transaction_id.to_owned()),
            ..Default::default()
        }
    }
}

impl EntityFilter<Subscription> for SubscriptionFilter {
    fn matches(&self, record: &Record<Subscription>) -> bool {
        self.id.matches(&record.id)
            && self.user_id.matches(&record.user_id)
            && self.plan_id.matches(&record.plan_id)
            && self.status.matches(&record.status)
            && self
                .original_transaction_id
                .matches(&record.original_transaction_id)
    }
}

/// Nullable fields use `Option<Option<_>>`: the outer `None` leaves the field
/// untouched, `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub plan_id: Option<Option<EntityId>>,
    pub status: Option<SubscriptionStatus>,
    pub expires_date: Option<Option<DateTime<Utc>>>,
    pub original_transaction_id: Option<Option<String>>,
    pub latest_transaction_id: Option<Option<String>>,
    pub revocation_date: Option<Option<DateTime<Utc>>>,
    pub revocation_reason: Option<Option<String>>,
}

impl SubscriptionPatch {
    pub fn status(status: SubscriptionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

impl EntityPatch<Subscription> for SubscriptionPatch {
    fn apply(self, s: &mut Subscription) {
        if let Some(v) = self.plan_id {
            s.plan_id = v;
        }
        if let Some(v) = self.status {
            s.status = v;
        }
        if let Some(v) = self.expires_date {
            s.expires_date = v;
        }
        if let Some(v) = self.original_transaction_id {
            s.original_transaction_id = v;
        }
        if let Some(v) = self.latest_transaction_id {
            s.latest_transaction_id = v;
        }
        if let Some(v) = self.revocation_date {
            s.revocation_date = v;
        }
        if let Some(v) = self.revocation_reason {
            s.revocation_reason = v;
        }
    }
}

impl Entity for Subscription {
    const KIND: &'static str = "subscription";
    type Filter = SubscriptionFilter;
    type Patch = SubscriptionPatch;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_parses_padded_numeric_strings() {
        assert_eq!(" 42 ".parse::<UserId>().unwrap(), UserId(42));
        assert!("a9f1c3e2-uuid".parse::<UserId>().is_err());
    }

    #[test]
    fn status_uses_kebab_case_on_the_wire() {
        assert_eq!(
            serde_json::to_value(SubscriptionStatus::BillingIssue).unwrap(),
            serde_json::json!("billing-issue")
        );
        assert_eq!(
            serde_json::from_value::<SubscriptionStatus>(serde_json::json!("grace-period"))
                .unwrap(),
            SubscriptionStatus::GracePeriod
        );
    }

    #[test]
    fn patch_distinguishes_untouched_from_cleared() {
        let now = Utc::now();
        let mut s = Subscription::active(UserId(1), 3, Some(now), now)
            .with_transactions("otid", Some("tid".into()));
        SubscriptionPatch {
            expires_date: Some(None),
            ..SubscriptionPatch::status(SubscriptionStatus::Canceled)
        }
        .apply(&mut s);
        assert_eq!(s.status, SubscriptionStatus::Canceled);
        assert_eq!(s.expires_date, None);
        assert_eq!(s.plan_id, Some(3));
        assert_eq!(s.latest_transaction_id.as_deref(), Some("tid"));
    }
}
