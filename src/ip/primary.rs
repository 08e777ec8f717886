//! Primary provider: ipapi.co-compatible JSON API.
//!
//! `GET {base}/json/` for the caller's own address, `GET {base}/{address}/json/`
//! for an explicit one. A body with `"error": true` and a `reason` is a logical
//! failure even though the HTTP status is 200.

use serde::Deserialize;

use super::{
    asn_or_default, calling_code_or_empty, currency_or_default, non_empty, require_point,
    timezone_or_default, CurrencyField, IpRecord, TextOrNumber, TimezoneField, UNKNOWN_ISP,
};
use crate::error::ProviderError;

#[derive(Debug, Deserialize)]
struct PrimaryResponse {
    #[serde(default)]
    error: bool,
    reason: Option<String>,
    ip: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country_name: Option<String>,
    country_code: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    org: Option<String>,
    asn: Option<TextOrNumber>,
    timezone: Option<TimezoneField>,
    currency: Option<CurrencyField>,
    country_calling_code: Option<String>,
    languages: Option<String>,
}

/// Normalize a primary-provider response body into an [`IpRecord`].
pub fn normalize(body: &[u8]) -> Result<IpRecord, ProviderError> {
    let data: PrimaryResponse =
        serde_json::from_slice(body).map_err(|e| ProviderError::Decode(e.to_string()))?;

    if data.error {
        let reason = non_empty(data.reason).unwrap_or_else(|| "unknown error".to_string());
        return Err(ProviderError::Rejected(reason));
    }

    let point = require_point(data.latitude, data.longitude)?;

    Ok(IpRecord {
        ip: data.ip.unwrap_or_default(),
        city: data.city.unwrap_or_default(),
        region: data.region.unwrap_or_default(),
        country: data.country_name.unwrap_or_default(),
        country_code: data.country_code.unwrap_or_default(),
        latitude: point.latitude,
        longitude: point.longitude,
        org: non_empty(data.org).unwrap_or_else(|| UNKNOWN_ISP.to_string()),
        asn: asn_or_default(data.asn),
        timezone: timezone_or_default(data.timezone),
        currency: currency_or_default(data.currency),
        calling_code: calling_code_or_empty(data.country_calling_code),
        languages: data.languages.unwrap_or_default(),
    })
}

/// Request URL for `address`, or the caller's own address when `None`.
pub fn lookup_url(base_url: &str, address: Option<&str>) -> String {
    let base = base_url.trim_end_matches('/');
    match address.map(str::trim).filter(|a| !a.is_empty()) {
        Some(addr) => format!("{}/{}/json/", base, addr),
        None => format!("{}/json/", base),
    }
}

#[cfg(feature = "http")]
pub use self::client::PrimaryProvider;

#[cfg(feature = "http")]
mod client {
    use futures::future::BoxFuture;
    use reqwest::Client;

    use super::{lookup_url, normalize};
    use crate::error::ProviderError;
    use crate::ip::{http, IpProvider, IpRecord};

    /// ipapi.co-compatible provider.
    pub struct PrimaryProvider {
        client: Client,
        base_url: String,
    }

    impl PrimaryProvider {
        pub fn new(client: Client, base_url: &str) -> Self {
            Self {
                client,
                base_url: base_url.to_string(),
            }
        }
    }

    impl IpProvider for PrimaryProvider {
        fn name(&self) -> &str {
            "ipapi.co"
        }

        fn lookup<'a>(&'a self, address: Option<&'a str>) -> BoxFuture<'a, Result<IpRecord, ProviderError>> {
            Box::pin(async move {
                let url = lookup_url(&self.base_url, address);
                let body = http::get_body(&self.client, &url).await?;
                normalize(&body)
            })
        }
    }
}
