//! IP geolocation with ordered provider fallback.
//!
//! [`IpLocator`] walks an ordered list of [`IpProvider`] strategies. The first
//! provider that returns a normalized [`IpRecord`] wins; failures are logged
//! and the next provider is tried, with no retry within a provider. When every
//! provider fails the last reason is surfaced together with a hint about
//! network or content blocking.
//!
//! Two providers ship with the crate:
//! - [`PrimaryProvider`] - ipapi.co-compatible (`/{address}/json/`)
//! - [`SecondaryProvider`] - ipwho.is-compatible (`/{address}`)

use futures::future::BoxFuture;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{LocateError, ProviderError};
use crate::GpsPoint;

pub mod primary;
pub mod secondary;

#[cfg(feature = "http")]
pub use primary::PrimaryProvider;
#[cfg(feature = "http")]
pub use secondary::SecondaryProvider;

/// Default for a missing organization/ISP name.
pub const UNKNOWN_ISP: &str = "Unknown ISP";
/// Default for a missing autonomous system number.
pub const NOT_AVAILABLE: &str = "N/A";
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_CURRENCY: &str = "USD";

/// Normalized IP geolocation result.
///
/// Text fields are best-effort; providers that omit a field get the documented
/// default instead of an absent value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct IpRecord {
    pub ip: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub country_code: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Organization or ISP name, `"Unknown ISP"` when absent
    pub org: String,
    /// Autonomous system number as text, `"N/A"` when absent
    pub asn: String,
    /// IANA timezone identifier, `"UTC"` when absent
    pub timezone: String,
    /// ISO 4217 currency code, `"USD"` when absent
    pub currency: String,
    pub calling_code: String,
    pub languages: String,
}

impl IpRecord {
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// A single IP geolocation strategy.
///
/// Each provider performs its own network call and either returns a
/// normalized record or fails with a reason.
pub trait IpProvider: Send + Sync {
    /// Short name used in logs and failure reasons.
    fn name(&self) -> &str;

    /// Look up `address`, or the caller's own address when `None`.
    fn lookup<'a>(&'a self, address: Option<&'a str>) -> BoxFuture<'a, Result<IpRecord, ProviderError>>;
}

/// Resolves IP locations through an ordered provider list.
pub struct IpLocator {
    providers: Vec<Box<dyn IpProvider>>,
}

impl IpLocator {
    pub fn new(providers: Vec<Box<dyn IpProvider>>) -> Self {
        Self { providers }
    }

    /// Locator with the primary and secondary HTTP providers from `config`,
    /// sharing one HTTP client.
    #[cfg(feature = "http")]
    pub fn from_config(config: &crate::SessionConfig) -> Result<Self, ProviderError> {
        let client = http::build_client(config.http_timeout_secs)?;
        let primary: Box<dyn IpProvider> =
            Box::new(PrimaryProvider::new(client.clone(), &config.primary_base_url));
        let secondary: Box<dyn IpProvider> =
            Box::new(SecondaryProvider::new(client, &config.secondary_base_url));
        Ok(Self::new(vec![primary, secondary]))
    }

    /// Append a provider after the existing ones.
    pub fn push(&mut self, provider: Box<dyn IpProvider>) {
        self.providers.push(provider);
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Resolve `address` (or the caller's own address) to an [`IpRecord`].
    pub async fn resolve(&self, address: Option<&str>) -> Result<IpRecord, LocateError> {
        let mut last_reason = String::from("no providers configured");

        for provider in &self.providers {
            debug!("[IpLocator] Trying {} for {:?}", provider.name(), address);
            match provider.lookup(address).await {
                Ok(record) => {
                    info!(
                        "[IpLocator] {} resolved {} to {}, {} ({:.4}, {:.4})",
                        provider.name(), record.ip, record.city, record.country,
                        record.latitude, record.longitude
                    );
                    return Ok(record);
                }
                Err(e) => {
                    warn!("[IpLocator] {} failed: {}", provider.name(), e);
                    last_reason = format!("{}: {}", provider.name(), e);
                }
            }
        }

        Err(LocateError::AllProvidersFailed { last_reason })
    }
}

// ============================================================================
// Shared response fragments
// ============================================================================

/// Providers report the timezone either as a bare identifier or as `{id}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum TimezoneField {
    Name(String),
    Object { id: Option<String> },
}

impl TimezoneField {
    fn into_id(self) -> Option<String> {
        match self {
            Self::Name(name) => Some(name),
            Self::Object { id } => id,
        }
    }
}

/// Providers report the currency either as a bare code or as `{code}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CurrencyField {
    Code(String),
    Object { code: Option<String> },
}

impl CurrencyField {
    fn into_code(self) -> Option<String> {
        match self {
            Self::Code(code) => Some(code),
            Self::Object { code } => code,
        }
    }
}

/// ASNs arrive as `"AS15169"` from some providers and as `15169` from others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum TextOrNumber {
    Text(String),
    Number(serde_json::Number),
}

impl TextOrNumber {
    fn into_text(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

pub(crate) fn timezone_or_default(field: Option<TimezoneField>) -> String {
    non_empty(field.and_then(TimezoneField::into_id)).unwrap_or_else(|| DEFAULT_TIMEZONE.to_string())
}

pub(crate) fn currency_or_default(field: Option<CurrencyField>) -> String {
    non_empty(field.and_then(CurrencyField::into_code)).unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
}

pub(crate) fn asn_or_default(field: Option<TextOrNumber>) -> String {
    non_empty(field.map(TextOrNumber::into_text)).unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// International dialling prefix in `+<digits>` form, empty when absent.
pub(crate) fn calling_code_or_empty(value: Option<String>) -> String {
    match non_empty(value) {
        Some(code) => {
            let code = code.trim();
            if code.starts_with('+') {
                code.to_string()
            } else {
                format!("+{}", code)
            }
        }
        None => String::new(),
    }
}

/// `None` for missing or blank strings.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Coordinates are the one field a record cannot default.
pub(crate) fn require_point(latitude: Option<f64>, longitude: Option<f64>) -> Result<GpsPoint, ProviderError> {
    match (latitude, longitude) {
        (Some(lat), Some(lng)) => {
            let point = GpsPoint::new(lat, lng);
            if point.is_valid() {
                Ok(point)
            } else {
                Err(ProviderError::Decode(format!("coordinates out of range ({}, {})", lat, lng)))
            }
        }
        _ => Err(ProviderError::Decode("response has no coordinates".to_string())),
    }
}

// ============================================================================
// HTTP plumbing
// ============================================================================

#[cfg(feature = "http")]
pub(crate) mod http {
    use log::debug;
    use reqwest::Client;
    use std::time::{Duration, Instant};

    use crate::error::ProviderError;

    pub(crate) fn build_client(timeout_secs: u64) -> Result<Client, ProviderError> {
        Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))
    }

    /// GET `url` and return the body of a successful response.
    pub(crate) async fn get_body(client: &Client, url: &str) -> Result<Vec<u8>, ProviderError> {
        let start = Instant::now();
        let resp = client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ProviderError::Network(format!("body download error: {}", e)))?;

        debug!("[IpLocator] GET {} -> {} ({} bytes) in {:?}", url, status, bytes.len(), start.elapsed());
        Ok(bytes.to_vec())
    }
}
