use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use shopguard_common::{GeoProviderConfig, GeoResponseFormat};
use tracing::debug;

use crate::GeoProvider;

/// Country lookups against a public HTTP geolocation endpoint.
///
/// The URL template's `{ip}` placeholder is replaced with the client address.
/// The response is either the bare country code or a JSON object holding it
/// in a configured field.
pub struct HttpGeoProvider {
    name: String,
    url: String,
    format: GeoResponseFormat,
    field: Option<String>,
    client: reqwest::Client,
}

impl HttpGeoProvider {
    pub fn new(config: &GeoProviderConfig, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("shopguard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            format: config.format,
            field: config.field.clone(),
            client,
        })
    }

    fn url_for(&self, ip: IpAddr) -> String {
        self.url.replace("{ip}", &ip.to_string())
    }
}

#[async_trait]
impl GeoProvider for HttpGeoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, ip: IpAddr) -> anyhow::Result<Option<String>> {
        let url = self.url_for(ip);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body = response.text().await?;
        debug!(provider = %self.name, ip = %ip, "geo provider responded");
        extract_country(self.format, self.field.as_deref(), &body)
    }
}

/// Pull the country code out of a provider response body.
pub(crate) fn extract_country(
    format: GeoResponseFormat,
    field: Option<&str>,
    body: &str,
) -> anyhow::Result<Option<String>> {
    match format {
        GeoResponseFormat::Text => {
            let trimmed = body.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        GeoResponseFormat::Json => {
            let field = field.ok_or_else(|| anyhow::anyhow!("json provider without a field"))?;
            let value: serde_json::Value = serde_json::from_str(body)?;
            Ok(value
                .get(field)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string()))
        }
    }
}
