use chrono::{DateTime, Utc};
use serde::Serialize;

use super::subscription::UserId;

/// Verified transaction, as signed by the App Store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStoreTransaction {
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub product_id: String,
    pub bundle_id: String,
    /// Correlation token set by the client at purchase time. Carries the local
    /// user id.
    pub app_account_token: Option<String>,
    pub purchase_date: DateTime<Utc>,
    pub expires_date: Option<DateTime<Utc>>,
    pub revocation_date: Option<DateTime<Utc>>,
    pub revocation_reason: Option<RevocationReason>,
    pub offer_type: Option<OfferType>,
    pub offer_identifier: Option<String>,
}

impl AppStoreTransaction {
    /// The local user the transaction was bound to, if the token names one.
    pub fn user_id(&self) -> Option<UserId> {
        self.app_account_token.as_deref()?.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RevocationReason {
    /// Refunded for other reasons, for example an accidental purchase.
    Other,
    /// Refunded due to an actual or perceived issue within the app.
    AppIssue,
    Unrecognized(i64),
}

impl RevocationReason {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => RevocationReason::Other,
            1 => RevocationReason::AppIssue,
            other => RevocationReason::Unrecognized(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            RevocationReason::Other => 0,
            RevocationReason::AppIssue => 1,
            RevocationReason::Unrecognized(code) => *code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OfferType {
    Introductory,
    Promotional,
    #[serde(rename = "Offer Code")]
    OfferCode,
    #[serde(rename = "Win-Back")]
    WinBack,
}

impl OfferType {
    pub fn label(&self) -> &'static str {
        match self {
            OfferType::Introductory => "Introductory",
            OfferType::Promotional => "Promotional",
            OfferType::OfferCode => "Offer Code",
            OfferType::WinBack => "Win-Back",
        }
    }
}

/// Verified renewal info of an auto-renewable subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalInfo {
    pub product_id: String,
    /// Product the subscription renews into at the next billing date.
    pub auto_renew_product_id: Option<String>,
    pub auto_renew_enabled: bool,
    pub original_transaction_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction(token: Option<&str>) -> AppStoreTransaction {
        AppStoreTransaction {
            transaction_id: "T1".into(),
            original_transaction_id: "T1".into(),
            product_id: "plan.basic.monthly".into(),
            bundle_id: "com.example.app".into(),
            app_account_token: token.map(str::to_owned),
            purchase_date: Utc::now(),
            expires_date: None,
            revocation_date: None,
            revocation_reason: None,
            offer_type: None,
            offer_identifier: None,
        }
    }

    #[test]
    fn user_id_comes_from_numeric_token() {
        assert_eq!(transaction(Some("42")).user_id(), Some(UserId(42)));
        assert_eq!(transaction(None).user_id(), None);
        assert_eq!(transaction(Some("")).user_id(), None);
        assert_eq!(
            transaction(Some("7d4e2b1a-0000-4000-8000-000000000000")).user_id(),
            None
        );
    }
}
