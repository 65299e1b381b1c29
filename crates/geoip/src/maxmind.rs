use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::GeoProvider;

/// Minimal struct for deserializing the country ISO code from MaxMind DB.
#[derive(serde::Deserialize)]
struct CountryRecord {
    country: Option<CountryInfo>,
}

#[derive(serde::Deserialize)]
struct CountryInfo {
    iso_code: Option<String>,
}

/// Country lookups against a local MaxMind `.mmdb` database.
pub struct MaxMindProvider {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindProvider {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path).map_err(|e| {
            anyhow::anyhow!("failed to open GeoIP database {}: {}", path.display(), e)
        })?;
        info!(path = %path.display(), "loaded GeoIP database");
        Ok(Self { reader })
    }

    fn lookup_country(&self, addr: IpAddr) -> Option<String> {
        match self.reader.lookup::<CountryRecord>(addr) {
            Ok(record) => record.country.and_then(|c| c.iso_code),
            Err(e) => {
                debug!(addr = %addr, error = %e, "GeoIP database lookup failed");
                None
            }
        }
    }
}

#[async_trait]
impl GeoProvider for MaxMindProvider {
    fn name(&self) -> &str {
        "maxmind"
    }

    async fn lookup(&self, ip: IpAddr) -> anyhow::Result<Option<String>> {
        Ok(self.lookup_country(ip))
    }
}
