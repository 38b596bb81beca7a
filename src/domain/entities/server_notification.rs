use chrono::{DateTime, Utc};

/// What a notification asks of the local subscription state.
///
/// Types that need no state transition map to `Unhandled`, carrying the raw
/// type for the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// New purchase, or resubscription after a lapse.
    Subscribed,
    DidRenew,
    /// The customer picked a different product for the next renewal.
    DidChangeRenewalPref,
    /// Auto-renew toggled. `None` when the subtype was not recognized.
    DidChangeRenewalStatus { auto_renew: Option<bool> },
    DidFailToRenew { grace_period: bool },
    Expired,
    Refund,
    Revoke,
    OfferRedeemed,
    PriceIncrease { accepted: bool },
    /// Connectivity check requested from App Store Connect.
    Test,
    Unhandled(String),
}

/// A verified App Store Server Notification (V2).
#[derive(Debug, Clone)]
pub struct ServerNotification {
    pub notification_uuid: String,
    pub kind: NotificationKind,
    pub notification_type: String,
    pub subtype: Option<String>,
    pub signed_date: DateTime<Utc>,
    /// Still-signed nested payloads. They are verified separately.
    pub signed_transaction_info: Option<String>,
    pub signed_renewal_info: Option<String>,
}
