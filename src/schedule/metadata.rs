//! Open-data portal catalog client.
//!
//! Resolves a dataset reference to its catalog record, in particular the
//! archive download URL and last-modified stamp that drive new-version
//! detection. The portal emits zoneless timestamps; they are interpreted
//! in the agency timezone.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::{debug, info};

const CATALOG_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("catalog returned HTTP {0}")]
    Remote(reqwest::StatusCode),
    #[error("malformed catalog response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("catalog response carries no result")]
    MissingResult,
    #[error("catalog reported success=false for resource {0}")]
    NotSuccess(String),
    #[error("unparseable last_modified timestamp {0:?}")]
    Timestamp(String),
}

/// Catalog record for one dataset resource.
#[derive(Debug, Clone)]
pub struct DatasetMetadata {
    pub resource_id: String,
    pub name: String,
    pub last_modified: DateTime<Utc>,
    pub url: String,
    pub format: String,
}

#[derive(Debug, Deserialize)]
struct CatalogEnvelope {
    success: bool,
    result: Option<RawMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    id: String,
    name: String,
    last_modified: String,
    url: String,
    #[serde(default)]
    format: String,
    #[serde(default)]
    package_id: String,
    #[serde(default)]
    datastore_active: bool,
}

pub struct MetadataFetcher {
    client: reqwest::Client,
    catalog_base: String,
    timezone: Tz,
}

impl MetadataFetcher {
    pub fn new(client: reqwest::Client, catalog_base: String, timezone: Tz) -> Self {
        Self {
            client,
            catalog_base,
            timezone,
        }
    }

    /// Look up the catalog record for `dataset_ref`. The resource id is
    /// the trailing path segment of the reference.
    pub async fn fetch(&self, dataset_ref: &str) -> Result<DatasetMetadata, MetadataError> {
        let resource_id = trailing_segment(dataset_ref);
        let url = format!("{}?id={}", self.catalog_base, resource_id);

        debug!(url = %url, resource_id, "Fetching dataset metadata");

        let response = self
            .client
            .get(&url)
            .timeout(CATALOG_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MetadataError::Remote(response.status()));
        }

        let body = response.text().await?;
        let envelope: CatalogEnvelope = serde_json::from_str(&body)?;

        if !envelope.success {
            return Err(MetadataError::NotSuccess(resource_id.to_string()));
        }
        let raw = envelope.result.ok_or(MetadataError::MissingResult)?;

        let last_modified = parse_portal_timestamp(&raw.last_modified, self.timezone)
            .ok_or_else(|| MetadataError::Timestamp(raw.last_modified.clone()))?;

        info!(
            resource_id = %raw.id,
            name = %raw.name,
            last_modified = %last_modified,
            format = %raw.format,
            package_id = %raw.package_id,
            datastore_active = raw.datastore_active,
            "Fetched dataset metadata"
        );

        Ok(DatasetMetadata {
            resource_id: raw.id,
            name: raw.name,
            last_modified,
            url: raw.url,
            format: raw.format,
        })
    }
}

fn trailing_segment(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

/// Parse a portal timestamp. Values with an explicit offset are taken as
/// written; zoneless values are anchored in the agency timezone before
/// conversion to UTC.
pub fn parse_portal_timestamp(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Some(with_offset.with_timezone(&Utc));
    }

    // Portal format, with or without fractional seconds.
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Australia::Melbourne;

    #[test]
    fn zoneless_timestamp_is_anchored_in_agency_zone() {
        // July in Melbourne is AEST (UTC+10).
        let parsed = parse_portal_timestamp("2026-07-15T03:10:00.123456", Melbourne).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-07-14T17:10:00.123456+00:00");
    }

    #[test]
    fn zoneless_timestamp_without_fraction_parses() {
        // January in Melbourne is AEDT (UTC+11).
        let parsed = parse_portal_timestamp("2026-01-10T12:00:00", Melbourne).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-01-10T01:00:00+00:00");
    }

    #[test]
    fn explicit_offset_wins_over_agency_zone() {
        let parsed = parse_portal_timestamp("2026-07-15T03:10:00+00:00", Melbourne).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-07-15T03:10:00+00:00");
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        assert!(parse_portal_timestamp("yesterday-ish", Melbourne).is_none());
        assert!(parse_portal_timestamp("", Melbourne).is_none());
    }

    #[test]
    fn resource_id_is_the_trailing_segment() {
        assert_eq!(
            trailing_segment("https://portal.example/dataset/gtfs/resource/abc-123"),
            "abc-123"
        );
        assert_eq!(trailing_segment("abc-123"), "abc-123");
    }

    #[test]
    fn envelope_decodes_portal_shape() {
        let body = r#"{
            "help": "https://portal.example/api/3/action/help_show?name=resource_show",
            "success": true,
            "result": {
                "id": "abc-123",
                "name": "GTFS Schedule",
                "last_modified": "2026-07-15T03:10:00.123456",
                "url": "https://portal.example/download/gtfs.zip",
                "format": "ZIP",
                "package_id": "pkg-9",
                "datastore_active": false
            }
        }"#;
        let envelope: CatalogEnvelope = serde_json::from_str(body).unwrap();
        assert!(envelope.success);
        let raw = envelope.result.unwrap();
        assert_eq!(raw.id, "abc-123");
        assert_eq!(raw.format, "ZIP");
    }

    #[test]
    fn envelope_tolerates_missing_result_when_unsuccessful() {
        let body = r#"{"success": false}"#;
        let envelope: CatalogEnvelope = serde_json::from_str(body).unwrap();
        assert!(!envelope.success);
        assert!(envelope.result.is_none());
    }
}
