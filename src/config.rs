//! Environment-variable configuration.
//!
//! The daemon is configured entirely through environment variables; every
//! knob except the database connection string and the static schedule URL
//! has a default matching the Victorian data platform.

use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub schedule: ScheduleConfig,
    pub realtime: RealtimeConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

/// Static schedule pipeline settings.
///
/// `dataset_ref` is the portal reference whose trailing path segment is
/// the catalog resource id; `catalog_base` is the catalog lookup endpoint
/// it is resolved against.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub dataset_ref: String,
    pub catalog_base: String,
    pub check_interval: Duration,
    pub download_dir: String,
    /// Source id used when an archive is flat rather than nested per source.
    pub default_source_id: i32,
    /// IANA timezone of the transit agency. Anchors zoneless portal
    /// timestamps and schedule wall-clock times.
    pub timezone: String,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub api_key: String,
    pub poll_interval: Duration,
    pub rate_limit_per_min: u32,
    pub cache_expiration: Duration,
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    pub feed_type: FeedType,
    /// Must match a `source_name` in `gtfs.transport_sources`.
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedType {
    VehiclePositions,
    TripUpdates,
    ServiceAlerts,
}

impl FeedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedType::VehiclePositions => "vehicle_positions",
            FeedType::TripUpdates => "trip_updates",
            FeedType::ServiceAlerts => "service_alerts",
        }
    }
}

impl std::fmt::Display for FeedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Realtime rows older than this are evicted. Zero keeps nothing
    /// between cleanup ticks.
    pub realtime_window: Duration,
    pub realtime_interval: Duration,
    pub schedule_interval: Duration,
    /// Inactive schedule versions preserved as rollback candidates.
    pub keep_inactive_versions: i64,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingVar(&'static str),
    #[error("invalid value {value:?} for {var}")]
    InvalidVar { var: &'static str, value: String },
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup. Split out of
    /// [`Config::from_env`] so tests do not have to mutate the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let connection_string = ["DATABASE_URL", "POSTGRES_URL", "POSTGRESQL_URL"]
            .iter()
            .find_map(|key| lookup(key).filter(|v| !v.is_empty()))
            .ok_or(ConfigError::MissingVar("DATABASE_URL"))?;

        let dataset_ref = lookup("GTFS_STATIC_URL")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingVar("GTFS_STATIC_URL"))?;

        Ok(Self {
            database: DatabaseConfig {
                connection_string,
                max_connections: int_var(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            },
            schedule: ScheduleConfig {
                dataset_ref,
                catalog_base: string_var(
                    &lookup,
                    "GTFS_STATIC_CATALOG_BASE",
                    "https://discover.data.vic.gov.au/api/3/action/resource_show",
                ),
                check_interval: secs_var(&lookup, "GTFS_STATIC_CHECK_INTERVAL_SECS", 30 * 60)?,
                download_dir: string_var(&lookup, "GTFS_STATIC_DOWNLOAD_DIR", "/tmp/gtfs-static"),
                default_source_id: int_var(&lookup, "GTFS_STATIC_DEFAULT_SOURCE_ID", 2)?,
                timezone: string_var(&lookup, "AGENCY_TIMEZONE", "Australia/Melbourne"),
            },
            realtime: RealtimeConfig {
                api_key: lookup("GTFS_RT_API_KEY").unwrap_or_default(),
                poll_interval: secs_var(&lookup, "GTFS_RT_POLL_INTERVAL_SECS", 30)?,
                rate_limit_per_min: int_var(&lookup, "GTFS_RT_RATE_LIMIT_PER_MIN", 25)?,
                cache_expiration: secs_var(&lookup, "GTFS_RT_CACHE_EXPIRATION_SECS", 30)?,
                endpoints: default_endpoints(),
            },
            retention: RetentionConfig {
                realtime_window: secs_var(&lookup, "RETENTION_WINDOW_SECS", 15 * 60)?,
                realtime_interval: secs_var(&lookup, "RETENTION_REALTIME_INTERVAL_SECS", 5 * 60)?,
                schedule_interval: secs_var(
                    &lookup,
                    "RETENTION_SCHEDULE_INTERVAL_SECS",
                    24 * 60 * 60,
                )?,
                keep_inactive_versions: int_var(&lookup, "KEEP_INACTIVE_VERSIONS", 1)?,
            },
            logging: LoggingConfig {
                level: string_var(&lookup, "LOG_LEVEL", "info"),
                file_path: lookup("LOG_FILE").filter(|v| !v.is_empty()),
            },
        })
    }
}

impl ScheduleConfig {
    /// Parse the configured timezone, falling back to Melbourne.
    pub fn parsed_timezone(&self) -> chrono_tz::Tz {
        self.timezone.parse::<chrono_tz::Tz>().unwrap_or_else(|_| {
            warn!(timezone = %self.timezone, "Invalid IANA timezone, falling back to Australia/Melbourne");
            chrono_tz::Australia::Melbourne
        })
    }
}

impl RealtimeConfig {
    /// The realtime pipeline only runs when an API key is configured.
    pub fn enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidVar {
                var: "GTFS_RT_POLL_INTERVAL_SECS",
                value: "0".into(),
            });
        }
        if self.rate_limit_per_min == 0 {
            return Err(ConfigError::InvalidVar {
                var: "GTFS_RT_RATE_LIMIT_PER_MIN",
                value: "0".into(),
            });
        }
        Ok(())
    }
}

fn string_var(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: &str) -> String {
    lookup(var)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn int_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidVar { var, value: raw }),
        None => Ok(default),
    }
}

fn secs_var(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default_secs: u64,
) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(int_var(lookup, var, default_secs)?))
}

/// The feed endpoints of the Victorian data-exchange platform.
fn default_endpoints() -> Vec<EndpointConfig> {
    const BASE: &str = "https://data-exchange-api.vicroads.vic.gov.au/opendata";
    let endpoint = |name: &str, path: String, feed_type, source: &str| EndpointConfig {
        name: name.to_string(),
        url: format!("{BASE}/{path}"),
        feed_type,
        source: source.to_string(),
    };

    vec![
        endpoint(
            "metrobus_trip_updates",
            "v1/gtfsr/metrobus-tripupdates".into(),
            FeedType::TripUpdates,
            "Metropolitan Bus",
        ),
        endpoint(
            "metrotrain_service_alerts",
            "v1/gtfsr/metrotrain-servicealerts".into(),
            FeedType::ServiceAlerts,
            "Metropolitan Train",
        ),
        endpoint(
            "metrotrain_trip_updates",
            "v1/gtfsr/metrotrain-tripupdates".into(),
            FeedType::TripUpdates,
            "Metropolitan Train",
        ),
        endpoint(
            "metrotrain_vehicle_positions",
            "v1/gtfsr/metrotrain-vehicleposition-updates".into(),
            FeedType::VehiclePositions,
            "Metropolitan Train",
        ),
        endpoint(
            "tram_service_alerts",
            "gtfsr/v1/tram/servicealert".into(),
            FeedType::ServiceAlerts,
            "Metropolitan Tram",
        ),
        endpoint(
            "tram_trip_updates",
            "gtfsr/v1/tram/tripupdates".into(),
            FeedType::TripUpdates,
            "Metropolitan Tram",
        ),
        endpoint(
            "tram_vehicle_positions",
            "gtfsr/v1/tram/vehicleposition".into(),
            FeedType::VehiclePositions,
            "Metropolitan Tram",
        ),
    ]
}
