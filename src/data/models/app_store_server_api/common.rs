#![allow(dead_code)]

use serde::Deserialize;
use serde_repr::Deserialize_repr;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) enum Environment {
    /// Indicates that the data applies to testing in the sandbox environment.
    Sandbox,
    /// Indicates that the data applies to the production environment.
    Production,
    /// Indicates that the data applies to testing in Xcode.
    Xcode,
    /// Indicates that the data applies to local testing in StoreKit Testing.
    LocalTesting,

    #[serde(untagged)]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize_repr)]
#[repr(u8)]
pub(crate) enum OfferType {
    /// An introductory offer.
    Introductory = 1,
    /// A promotional offer.
    Promotional = 2,
    /// An offer with a subscription offer code.
    OfferCode = 3,
    /// A win-back offer.
    WinBack = 4,
}
