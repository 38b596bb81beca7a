use std::collections::HashSet;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use openssl::{
    stack::Stack,
    x509::{store::X509StoreBuilder, store::X509Store, X509StoreContext, X509},
};
use serde::de::DeserializeOwned;

use crate::errors::{ConfigError, IapSyncError};

/// Verifies JWS compact tokens signed by the App Store.
///
/// The signing certificate travels in the token's `x5c` header together with
/// its intermediates. A token is accepted only if that chain leads to the
/// trusted root and the ES256 signature validates against the leaf key.
/// Business checks (bundle id, freshness) are left to the caller.
pub(crate) struct SignedDataVerifier {
    trust_store: X509Store,
}

impl SignedDataVerifier {
    /// `root_certificate` may be DER (as Apple distributes it) or PEM.
    pub(crate) fn new(root_certificate: &[u8]) -> Result<Self, ConfigError> {
        let root = X509::from_der(root_certificate)
            .or_else(|_| X509::from_pem(root_certificate))
            .map_err(|e| ConfigError::RootCertificate(format!("unreadable certificate: {e}")))?;
        let mut builder =
            X509StoreBuilder::new().map_err(|e| ConfigError::RootCertificate(e.to_string()))?;
        builder
            .add_cert(root)
            .map_err(|e| ConfigError::RootCertificate(e.to_string()))?;
        Ok(Self {
            trust_store: builder.build(),
        })
    }

    pub(crate) fn verify_and_decode<T: DeserializeOwned>(
        &self,
        token: &str,
    ) -> Result<T, IapSyncError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| verification_error("malformed JWS header", e))?;
        if header.alg != Algorithm::ES256 {
            return Err(IapSyncError::Verification(format!(
                "unexpected signing algorithm {:?}",
                header.alg
            )));
        }

        let chain = header
            .x5c
            .filter(|c| !c.is_empty())
            .ok_or_else(|| IapSyncError::Verification("JWS header has no x5c chain".into()))?
            .iter()
            .map(|encoded| {
                let der = STANDARD
                    .decode(encoded)
                    .map_err(|e| verification_error("x5c entry is not base64", e))?;
                X509::from_der(&der).map_err(|e| verification_error("x5c entry is not X.509", e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (leaf, intermediates) = chain
            .split_first()
            .ok_or_else(|| IapSyncError::Verification("JWS header has no x5c chain".into()))?;
        self.verify_chain(leaf, intermediates)?;

        let public_key_pem = leaf
            .public_key()
            .and_then(|key| key.public_key_to_pem())
            .map_err(|e| verification_error("leaf certificate has no usable key", e))?;
        let key = DecodingKey::from_ec_pem(&public_key_pem)
            .map_err(|e| verification_error("leaf certificate key is not EC", e))?;

        // Signed App Store payloads carry no exp/aud claims.
        let mut validation = Validation::new(Algorithm::ES256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        jsonwebtoken::decode::<T>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| verification_error("signature check failed", e))
    }

    fn verify_chain(&self, leaf: &X509, intermediates: &[X509]) -> Result<(), IapSyncError> {
        let mut untrusted =
            Stack::new().map_err(|e| verification_error("certificate stack", e))?;
        for cert in intermediates {
            untrusted
                .push(cert.clone())
                .map_err(|e| verification_error("certificate stack", e))?;
        }

        let mut context =
            X509StoreContext::new().map_err(|e| verification_error("certificate context", e))?;
        let outcome = context
            .init(&self.trust_store, leaf, &untrusted, |c| {
                let trusted = c.verify_cert()?;
                Ok(trusted.then_some(()).ok_or_else(|| c.error().error_string().to_string()))
            })
            .map_err(|e| verification_error("certificate chain", e))?;
        outcome.map_err(|reason| {
            IapSyncError::Verification(format!("certificate chain not trusted: {reason}"))
        })
    }
}

fn verification_error(what: &str, e: impl std::fmt::Display) -> IapSyncError {
    IapSyncError::Verification(format!("{what}: {e}"))
}
