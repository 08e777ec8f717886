//! Secondary provider: ipwho.is-compatible JSON API.
//!
//! `GET {base}/` for the caller's own address, `GET {base}/{address}` for an
//! explicit one. `"success": false` with a `message` is a logical failure.

use serde::Deserialize;

use super::{
    asn_or_default, calling_code_or_empty, currency_or_default, non_empty, require_point,
    timezone_or_default, CurrencyField, IpRecord, TextOrNumber, TimezoneField, UNKNOWN_ISP,
};
use crate::error::ProviderError;

#[derive(Debug, Deserialize)]
struct SecondaryResponse {
    success: Option<bool>,
    message: Option<String>,
    ip: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    connection: Option<Connection>,
    timezone: Option<TimezoneField>,
    currency: Option<CurrencyField>,
    calling_code: Option<String>,
    languages: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Connection {
    org: Option<String>,
    isp: Option<String>,
    asn: Option<TextOrNumber>,
}

/// Normalize a secondary-provider response body into an [`IpRecord`].
///
/// `org` prefers `connection.org`, then `connection.isp`, then `"Unknown ISP"`.
pub fn normalize(body: &[u8]) -> Result<IpRecord, ProviderError> {
    let data: SecondaryResponse =
        serde_json::from_slice(body).map_err(|e| ProviderError::Decode(e.to_string()))?;

    if data.success == Some(false) {
        let reason = non_empty(data.message).unwrap_or_else(|| "unknown error".to_string());
        return Err(ProviderError::Rejected(reason));
    }

    let point = require_point(data.latitude, data.longitude)?;

    let (org, isp, asn) = match data.connection {
        Some(c) => (c.org, c.isp, c.asn),
        None => (None, None, None),
    };

    Ok(IpRecord {
        ip: data.ip.unwrap_or_default(),
        city: data.city.unwrap_or_default(),
        region: data.region.unwrap_or_default(),
        country: data.country.unwrap_or_default(),
        country_code: data.country_code.unwrap_or_default(),
        latitude: point.latitude,
        longitude: point.longitude,
        org: non_empty(org)
            .or_else(|| non_empty(isp))
            .unwrap_or_else(|| UNKNOWN_ISP.to_string()),
        asn: asn_or_default(asn),
        timezone: timezone_or_default(data.timezone),
        currency: currency_or_default(data.currency),
        calling_code: calling_code_or_empty(data.calling_code),
        languages: data.languages.unwrap_or_default(),
    })
}

/// Request URL for `address`, or the caller's own address when `None`.
pub fn lookup_url(base_url: &str, address: Option<&str>) -> String {
    let base = base_url.trim_end_matches('/');
    match address.map(str::trim).filter(|a| !a.is_empty()) {
        Some(addr) => format!("{}/{}", base, addr),
        None => format!("{}/", base),
    }
}

#[cfg(feature = "http")]
pub use self::client::SecondaryProvider;

#[cfg(feature = "http")]
mod client {
    use futures::future::BoxFuture;
    use reqwest::Client;

    use super::{lookup_url, normalize};
    use crate::error::ProviderError;
    use crate::ip::{http, IpProvider, IpRecord};

    /// ipwho.is-compatible provider.
    pub struct SecondaryProvider {
        client: Client,
        base_url: String,
    }

    impl SecondaryProvider {
        pub fn new(client: Client, base_url: &str) -> Self {
            Self {
                client,
                base_url: base_url.to_string(),
            }
        }
    }

    impl IpProvider for SecondaryProvider {
        fn name(&self) -> &str {
            "ipwho.is"
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
