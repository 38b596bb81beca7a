//! Runtime configuration, read once at startup and passed to constructors.

use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::errors::ConfigError;

const PRODUCTION_API_BASE_URL: &str = "https://api.storekit.itunes.apple.com";
const SANDBOX_API_BASE_URL: &str = "https://api.storekit-sandbox.itunes.apple.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppleEnvironment {
    Sandbox,
    Production,
}

impl AppleEnvironment {
    pub fn api_base_url(&self) -> &'static str {
        match self {
            AppleEnvironment::Sandbox => SANDBOX_API_BASE_URL,
            AppleEnvironment::Production => PRODUCTION_API_BASE_URL,
        }
    }
}

impl FromStr for AppleEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(AppleEnvironment::Sandbox),
            "production" => Ok(AppleEnvironment::Production),
            other => Err(format!("expected 'sandbox' or 'production', got '{other}'")),
        }
    }
}

/// App Store Server API key, as issued in App Store Connect.
#[derive(Clone)]
pub struct AppStoreApiCredentials {
    pub issuer_id: String,
    pub key_id: String,
    /// PKCS#8 PEM of the ES256 signing key.
    pub private_key: String,
}

impl std::fmt::Debug for AppStoreApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppStoreApiCredentials")
            .field("issuer_id", &self.issuer_id)
            .field("key_id", &self.key_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationSettings {
    /// Attempts after which a receipt still unknown upstream is given up on.
    pub max_attempts: u32,
    pub batch_size: usize,
    pub interval: Duration,
    /// Re-verify the stored receipt locally instead of calling the API.
    pub mock_upstream: bool,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            max_attempts: 72,
            batch_size: 50,
            interval: Duration::from_secs(3600),
            mock_upstream: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IapSyncConfig {
    pub environment: AppleEnvironment,
    /// Bundle id every signed payload must carry.
    pub bundle_id: String,
    /// `None` only in mock mode.
    pub api_credentials: Option<AppStoreApiCredentials>,
    pub api_base_url: String,
    pub root_certificate_path: PathBuf,
    pub free_plan_name: String,
    pub reconciliation: ReconciliationSettings,
    pub server_port: u16,
    pub plan_catalog_path: Option<PathBuf>,
}

impl IapSyncConfig {
    /// Load configuration from a `.env` file (if present) and the process
    /// environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match var("APPLE_ENVIRONMENT") {
            Some(v) => v.parse().map_err(|reason| ConfigError::Invalid {
                key: "APPLE_ENVIRONMENT",
                reason,
            })?,
            None => AppleEnvironment::Sandbox,
        };

        let bundle_id = var("APPLE_BUNDLE_ID").ok_or(ConfigError::Missing("APPLE_BUNDLE_ID"))?;

        let mock_upstream = match var("APPLE_CONNECT_MOCK") {
            Some(v) => parse_bool("APPLE_CONNECT_MOCK", &v)?,
            None => false,
        };

        let api_credentials = match (
            var("APPLE_ISSUER_ID"),
            var("APPLE_KEY_ID"),
            var("APPLE_PRIVATE_KEY"),
        ) {
            (Some(issuer_id), Some(key_id), Some(private_key)) => Some(AppStoreApiCredentials {
                issuer_id,
                key_id,
                // Keys pasted into a single env line usually carry literal "\n".
                private_key: private_key.replace("\\n", "\n"),
            }),
            _ if mock_upstream => None,
            (None, _, _) => return Err(ConfigError::Missing("APPLE_ISSUER_ID")),
            (_, None, _) => return Err(ConfigError::Missing("APPLE_KEY_ID")),
            (_, _, None) => return Err(ConfigError::Missing("APPLE_PRIVATE_KEY")),
        };

        let api_base_url = var("APPLE_API_BASE_URL")
            .unwrap_or_else(|| environment.api_base_url().to_string())
            .trim_end_matches('/')
            .to_string();

        let root_certificate_path = var("APPLE_ROOT_CA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("certs/AppleRootCA-G3.cer"));

        let free_plan_name = var("FREE_PLAN_NAME").unwrap_or_else(|| "Free Plan".to_string());

        let defaults = ReconciliationSettings::default();
        let reconciliation = ReconciliationSettings {
            max_attempts: parse_or("RECEIPT_RECONCILIATION_MAX_ATTEMPTS", var, defaults.max_attempts)?,
            batch_size: parse_or("RECEIPT_RECONCILIATION_BATCH_SIZE", var, defaults.batch_size)?,
            interval: Duration::from_secs(parse_or(
                "RECEIPT_RECONCILIATION_INTERVAL_SECS",
                var,
                defaults.interval.as_secs(),
            )?),
            mock_upstream,
        };
        if reconciliation.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "RECEIPT_RECONCILIATION_MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }
        if reconciliation.interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "RECEIPT_RECONCILIATION_INTERVAL_SECS",
                reason: "must be at least 1".to_string(),
            });
        }

        let server_port = parse_or("SERVER_PORT", var, 1337u16)?;
        let plan_catalog_path = var("PLAN_CATALOG_PATH").map(PathBuf::from);

        Ok(Self {
            environment,
            bundle_id,
            api_credentials,
            api_base_url,
            root_certificate_path,
            free_plan_name,
            reconciliation,
            server_port,
            plan_catalog_path,
        })
    }

    /// Read the trusted root certificate. The server must not start without it.
    pub fn load_root_certificate(&self) -> Result<Vec<u8>, ConfigError> {
        std::fs::read(&self.root_certificate_path).map_err(|e| {
            ConfigError::RootCertificate(format!(
                "{}: {}",
                self.root_certificate_path.display(),
                e
            ))
        })
    }
}

fn parse_or<T: FromStr>(
    key: &'static str,
    var: impl Fn(&str) -> Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}
