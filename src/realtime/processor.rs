//! Realtime feed processor.
//!
//! Drains the consumer fan-in one message at a time; every message is
//! written in its own transaction so a failure drops it wholesale and
//! the next poll re-fetches. Vehicle positions, trip updates and alerts
//! go through the shared bulk inserter; trip-update and alert children
//! need the store-assigned surrogate keys, which are recovered with a
//! requery on the header id before the child rows are written.
//!
//! Downstream notification fan-out is handled by database triggers; the
//! processor only writes rows.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use gtfs_realtime::{trip_update::StopTimeUpdate, FeedEntity, FeedHeader};
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{EndpointConfig, FeedType};
use crate::schedule::parser::parse_clock_seconds;
use crate::store::bulk::{BulkInserter, SqlValue};

use super::consumer::FeedResult;

/// How long the processor keeps writing queued messages after shutdown
/// is requested.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

const VEHICLE_POSITION_COLUMNS: &[&str] = &[
    "feed_message_id",
    "entity_id",
    "is_deleted",
    "trip_id",
    "route_id",
    "start_time",
    "start_date",
    "schedule_relationship",
    "vehicle_id",
    "vehicle_label",
    "license_plate",
    "latitude",
    "longitude",
    "bearing",
    "current_status",
    "stop_id",
    "vehicle_timestamp",
];

const TRIP_UPDATE_COLUMNS: &[&str] = &[
    "feed_message_id",
    "entity_id",
    "is_deleted",
    "trip_id",
    "route_id",
    "direction_id",
    "start_time",
    "start_date",
    "schedule_relationship",
    "vehicle_id",
    "vehicle_label",
    "update_timestamp",
    "delay",
];

const STOP_TIME_UPDATE_COLUMNS: &[&str] = &[
    "trip_update_id",
    "stop_sequence",
    "stop_id",
    "arrival_delay",
    "arrival_time",
    "arrival_uncertainty",
    "departure_delay",
    "departure_time",
    "departure_uncertainty",
    "schedule_relationship",
];

const ALERT_COLUMNS: &[&str] = &[
    "feed_message_id",
    "entity_id",
    "is_deleted",
    "cause",
    "effect",
    "severity",
];

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("endpoint names unknown source {0:?}")]
    UnknownSource(String),
    #[error("no active schedule version to tag realtime data with")]
    NoActiveVersion,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct RealtimeProcessor {
    pool: PgPool,
    /// source_name -> source_id, scanned once at start.
    sources: HashMap<String, i32>,
    /// Resolved on first use and kept for the process lifetime; a
    /// mid-flight activation is picked up on restart. See DESIGN.md.
    active_version: Option<i64>,
}

impl RealtimeProcessor {
    pub async fn new(pool: PgPool) -> Result<Self, ProcessError> {
        let rows: Vec<(i32, String)> =
            sqlx::query_as("SELECT source_id, source_name FROM gtfs.transport_sources ORDER BY source_id")
                .fetch_all(&pool)
                .await?;
        let sources: HashMap<String, i32> =
            rows.into_iter().map(|(id, name)| (name, id)).collect();

        info!(count = sources.len(), "Initialized source mappings");
        Ok(Self {
            pool,
            sources,
            active_version: None,
        })
    }

    /// Drain the fan-in channel until cancellation, then finish whatever
    /// is already queued within a bounded deadline.
    pub async fn run(mut self, mut results_rx: mpsc::Receiver<FeedResult>, cancel: CancellationToken) {
        info!("Starting realtime processor");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = results_rx.recv() => match maybe {
                    Some(result) => self.handle(result).await,
                    None => {
                        info!("Feed channel closed");
                        return;
                    }
                }
            }
        }

        let deadline = Instant::now() + SHUTDOWN_DRAIN;
        while let Ok(result) = results_rx.try_recv() {
            if Instant::now() >= deadline {
                warn!("Shutdown drain deadline reached, dropping queued feed results");
                break;
            }
            self.handle(result).await;
        }
        info!("Realtime processor stopped");
    }

    async fn handle(&mut self, result: FeedResult) {
        if let Some(error) = &result.error {
            error!(endpoint = %result.endpoint.name, error = %error, "Feed fetch error");
            return;
        }
        let Some(message) = result.message else {
            warn!(endpoint = %result.endpoint.name, "Feed result carries no message");
            return;
        };

        let started = Instant::now();
        match self.process_message(&result.endpoint, &message).await {
            Ok(feed_message_id) => info!(
                endpoint = %result.endpoint.name,
                feed_message_id,
                entities = message.entity.len(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Processed feed message"
            ),
            Err(e) => error!(
                endpoint = %result.endpoint.name,
                error = %e,
                "Failed to process feed message"
            ),
        }
    }

    async fn process_message(
        &mut self,
        endpoint: &EndpointConfig,
        message: &gtfs_realtime::FeedMessage,
    ) -> Result<i64, ProcessError> {
        let source_id = *self
            .sources
            .get(&endpoint.source)
            .ok_or_else(|| ProcessError::UnknownSource(endpoint.source.clone()))?;
        let version_id = self.active_version_id().await?;

        let received_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        let feed_message_id = insert_feed_message(
            &mut tx,
            &message.header,
            source_id,
            version_id,
            endpoint.feed_type,
            received_at,
        )
        .await?;

        match endpoint.feed_type {
            FeedType::VehiclePositions => {
                insert_vehicle_positions(&mut tx, feed_message_id, &message.entity, received_at)
                    .await?
            }
            FeedType::TripUpdates => {
                insert_trip_updates(&mut tx, feed_message_id, &message.entity).await?
            }
            FeedType::ServiceAlerts => {
                insert_service_alerts(&mut tx, feed_message_id, &message.entity).await?
            }
        }

        tx.commit().await?;
        Ok(feed_message_id)
    }

    async fn active_version_id(&mut self) -> Result<i64, ProcessError> {
        if let Some(version_id) = self.active_version {
            return Ok(version_id);
        }
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT version_id FROM gtfs.versions WHERE is_active LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        let version_id = row.ok_or(ProcessError::NoActiveVersion)?.0;
        self.active_version = Some(version_id);
        info!(version_id, "Bound realtime inserts to active schedule version");
        Ok(version_id)
    }
}

async fn insert_feed_message(
    tx: &mut Transaction<'_, Postgres>,
    header: &FeedHeader,
    source_id: i32,
    version_id: i64,
    feed_type: FeedType,
    received_at: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let feed_timestamp = header
        .timestamp
        .and_then(epoch_timestamp)
        .unwrap_or(received_at);

    let (feed_message_id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO gtfs_rt.feed_messages (
            feed_timestamp, gtfs_realtime_version, feed_version_string,
            incrementality, received_at, source_id, version_id, feed_type
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING feed_message_id
        "#,
    )
    .bind(feed_timestamp)
    .bind(&header.gtfs_realtime_version)
    .bind(header.feed_version.as_deref().filter(|v| !v.is_empty()))
    .bind(incrementality_code(header))
    .bind(received_at)
    .bind(source_id)
    .bind(version_id)
    .bind(feed_type.as_str())
    .fetch_one(&mut **tx)
    .await?;

    Ok(feed_message_id)
}

async fn insert_vehicle_positions(
    tx: &mut Transaction<'_, Postgres>,
    feed_message_id: i64,
    entities: &[FeedEntity],
    received_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let mut inserter = BulkInserter::new("gtfs_rt.vehicle_positions", VEHICLE_POSITION_COLUMNS);
    let mut skipped = 0usize;

    for entity in entities {
        match vehicle_position_row(feed_message_id, entity, received_at) {
            Some(row) => {
                if let Some(batch) = inserter.push(row) {
                    batch.execute(tx).await?;
                }
            }
            None => skipped += 1,
        }
    }
    if let Some(batch) = inserter.drain() {
        batch.execute(tx).await?;
    }

    debug!(
        count = inserter.total_rows(),
        skipped, "Bulk inserted vehicle positions"
    );
    Ok(())
}

async fn insert_trip_updates(
    tx: &mut Transaction<'_, Postgres>,
    feed_message_id: i64,
    entities: &[FeedEntity],
) -> Result<(), sqlx::Error> {
    let mut inserter = BulkInserter::new("gtfs_rt.trip_updates", TRIP_UPDATE_COLUMNS);
    for entity in entities {
        if let Some(row) = trip_update_row(feed_message_id, entity) {
            if let Some(batch) = inserter.push(row) {
                batch.execute(tx).await?;
            }
        }
    }
    if let Some(batch) = inserter.drain() {
        batch.execute(tx).await?;
    }

    // The store assigns trip_update_id; requery to attach children.
    let mapping: HashMap<String, i64> = sqlx::query_as::<_, (String, i64)>(
        "SELECT entity_id, trip_update_id FROM gtfs_rt.trip_updates WHERE feed_message_id = $1",
    )
    .bind(feed_message_id)
    .fetch_all(&mut **tx)
    .await?
    .into_iter()
    .collect();

    let mut stu_inserter =
        BulkInserter::new("gtfs_rt.stop_time_updates", STOP_TIME_UPDATE_COLUMNS);
    for entity in entities {
        let Some(trip_update) = entity.trip_update.as_ref() else {
            continue;
        };
        let Some(&trip_update_id) = mapping.get(&entity.id) else {
            continue;
        };
        for stop_time_update in &trip_update.stop_time_update {
            if let Some(batch) = stu_inserter.push(stop_time_update_row(trip_update_id, stop_time_update)) {
                batch.execute(tx).await?;
            }
        }
    }
    if let Some(batch) = stu_inserter.drain() {
        batch.execute(tx).await?;
    }

    debug!(
        trips = inserter.total_rows(),
        stop_time_updates = stu_inserter.total_rows(),
        "Bulk inserted trip updates"
    );
    Ok(())
}

async fn insert_service_alerts(
    tx: &mut Transaction<'_, Postgres>,
    feed_message_id: i64,
    entities: &[FeedEntity],
) -> Result<(), sqlx::Error> {
    let mut inserter = BulkInserter::new("gtfs_rt.alerts", ALERT_COLUMNS);
    for entity in entities {
        if let Some(row) = alert_row(feed_message_id, entity) {
            if let Some(batch) = inserter.push(row) {
                batch.execute(tx).await?;
            }
        }
    }
    if let Some(batch) = inserter.drain() {
        batch.execute(tx).await?;
    }

    let mapping: HashMap<String, i64> = sqlx::query_as::<_, (String, i64)>(
        "SELECT entity_id, alert_id FROM gtfs_rt.alerts WHERE feed_message_id = $1",
    )
    .bind(feed_message_id)
    .fetch_all(&mut **tx)
    .await?
    .into_iter()
    .collect();

    // Child rows are few per alert; plain inserts inside the same
    // transaction are enough.
    for entity in entities {
        let Some(alert) = entity.alert.as_ref() else {
            continue;
        };
        let Some(&alert_id) = mapping.get(&entity.id) else {
            continue;
        };

        for period in &alert.active_period {
            sqlx::query(
                "INSERT INTO gtfs_rt.alert_active_periods (alert_id, start_time, end_time) VALUES ($1, $2, $3)",
            )
            .bind(alert_id)
            .bind(period.start.map(|s| s as i64))
            .bind(period.end.map(|e| e as i64))
            .execute(&mut **tx)
            .await?;
        }

        for informed in &alert.informed_entity {
            let trip = informed.trip.as_ref();
            sqlx::query(
                r#"
                INSERT INTO gtfs_rt.alert_informed_entities (
                    alert_id, agency_id, route_id, direction_id, trip_id,
                    trip_route_id, trip_start_time, trip_start_date, stop_id
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(alert_id)
            .bind(informed.agency_id.as_deref())
            .bind(informed.route_id.as_deref())
            .bind(informed.direction_id.map(|d| d as i32))
            .bind(trip.and_then(|t| t.trip_id.as_deref()))
            .bind(trip.and_then(|t| t.route_id.as_deref()))
            .bind(trip.and_then(|t| start_time_seconds(t.start_time.as_deref())))
            .bind(trip.and_then(|t| t.start_date.as_deref()))
            .bind(informed.stop_id.as_deref())
            .execute(&mut **tx)
            .await?;
        }

        let translated_fields = [
            ("url", alert.url.as_ref()),
            ("header_text", alert.header_text.as_ref()),
            ("description_text", alert.description_text.as_ref()),
        ];
        for (field_type, translated) in translated_fields {
            let Some(translated) = translated else {
                continue;
            };
            for translation in &translated.translation {
                sqlx::query(
                    "INSERT INTO gtfs_rt.alert_translations (alert_id, field_type, language, text) VALUES ($1, $2, $3, $4)",
                )
                .bind(alert_id)
                .bind(field_type)
                .bind(translation.language.as_deref().unwrap_or(""))
                .bind(&translation.text)
                .execute(&mut **tx)
                .await?;
            }
        }
    }

    debug!(count = inserter.total_rows(), "Bulk inserted service alerts");
    Ok(())
}

/// One vehicle-position row, or `None` when the entity carries no
/// position (such entities are skipped; the rest of the message still
/// inserts).
fn vehicle_position_row(
    feed_message_id: i64,
    entity: &FeedEntity,
    fallback_timestamp: DateTime<Utc>,
) -> Option<Vec<SqlValue>> {
    let vehicle = entity.vehicle.as_ref()?;
    let position = vehicle.position.as_ref()?;
    let trip = vehicle.trip.as_ref();
    let descriptor = vehicle.vehicle.as_ref();

    Some(vec![
        SqlValue::BigInt(feed_message_id),
        SqlValue::Text(entity.id.clone()),
        SqlValue::NullableBool(entity.is_deleted),
        SqlValue::NullableText(trip.and_then(|t| t.trip_id.clone())),
        SqlValue::NullableText(trip.and_then(|t| t.route_id.clone())),
        SqlValue::NullableInt(trip.and_then(|t| start_time_seconds(t.start_time.as_deref()))),
        SqlValue::NullableText(trip.and_then(|t| t.start_date.clone())),
        SqlValue::NullableInt(trip.and_then(|t| t.schedule_relationship)),
        SqlValue::NullableText(descriptor.and_then(|v| v.id.clone())),
        SqlValue::NullableText(descriptor.and_then(|v| v.label.clone())),
        SqlValue::NullableText(descriptor.and_then(|v| v.license_plate.clone())),
        SqlValue::Double(f64::from(position.latitude)),
        SqlValue::Double(f64::from(position.longitude)),
        SqlValue::NullableDouble(position.bearing.map(f64::from)),
        SqlValue::NullableInt(vehicle.current_status),
        SqlValue::NullableText(vehicle.stop_id.clone()),
        SqlValue::Timestamp(
            vehicle
                .timestamp
                .and_then(epoch_timestamp)
                .unwrap_or(fallback_timestamp),
        ),
    ])
}

/// One trip-update row; entities without a trip id cannot be related to
/// the schedule and are dropped.
fn trip_update_row(feed_message_id: i64, entity: &FeedEntity) -> Option<Vec<SqlValue>> {
    let trip_update = entity.trip_update.as_ref()?;
    let trip = &trip_update.trip;
    let trip_id = trip.trip_id.clone()?;
    let vehicle = trip_update.vehicle.as_ref();

    Some(vec![
        SqlValue::BigInt(feed_message_id),
        SqlValue::Text(entity.id.clone()),
        SqlValue::NullableBool(entity.is_deleted),
        SqlValue::Text(trip_id),
        SqlValue::NullableText(trip.route_id.clone()),
        SqlValue::NullableInt(trip.direction_id.map(|d| d as i32)),
        SqlValue::NullableInt(start_time_seconds(trip.start_time.as_deref())),
        SqlValue::NullableText(trip.start_date.clone()),
        SqlValue::NullableInt(trip.schedule_relationship),
        SqlValue::NullableText(vehicle.and_then(|v| v.id.clone())),
        SqlValue::NullableText(vehicle.and_then(|v| v.label.clone())),
        SqlValue::NullableTimestamp(trip_update.timestamp.and_then(epoch_timestamp)),
        SqlValue::NullableInt(trip_update.delay),
    ])
}

fn stop_time_update_row(trip_update_id: i64, update: &StopTimeUpdate) -> Vec<SqlValue> {
    let arrival = update.arrival.as_ref();
    let departure = update.departure.as_ref();
    vec![
        SqlValue::BigInt(trip_update_id),
        SqlValue::NullableInt(update.stop_sequence.map(|s| s as i32)),
        SqlValue::NullableText(update.stop_id.clone()),
        SqlValue::NullableInt(arrival.and_then(|e| e.delay)),
        SqlValue::NullableBigInt(arrival.and_then(|e| e.time)),
        SqlValue::NullableInt(arrival.and_then(|e| e.uncertainty)),
        SqlValue::NullableInt(departure.and_then(|e| e.delay)),
        SqlValue::NullableBigInt(departure.and_then(|e| e.time)),
        SqlValue::NullableInt(departure.and_then(|e| e.uncertainty)),
        SqlValue::NullableInt(update.schedule_relationship),
    ]
}

fn alert_row(feed_message_id: i64, entity: &FeedEntity) -> Option<Vec<SqlValue>> {
    let alert = entity.alert.as_ref()?;
    Some(vec![
        SqlValue::BigInt(feed_message_id),
        SqlValue::Text(entity.id.clone()),
        SqlValue::NullableBool(entity.is_deleted),
        SqlValue::NullableInt(alert.cause),
        SqlValue::NullableInt(alert.effect),
        SqlValue::NullableInt(alert.severity_level),
    ])
}

/// `HH:MM:SS` trip start time (may exceed 24:00:00) to seconds from
/// service-day start; empty or absent becomes NULL, malformed values are
/// logged and become NULL.
fn start_time_seconds(raw: Option<&str>) -> Option<i32> {
    let raw = raw.filter(|s| !s.is_empty())?;
    match parse_clock_seconds(raw) {
        Some(seconds) => Some(seconds),
        None => {
            warn!(value = raw, "Unparseable trip start time, storing NULL");
            None
        }
    }
}

fn epoch_timestamp(secs: u64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs as i64, 0)
}

fn incrementality_code(header: &FeedHeader) -> i16 {
    use gtfs_realtime::feed_header::Incrementality;
    if header.incrementality == Some(Incrementality::Differential as i32) {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gtfs_realtime::{
        trip_update::StopTimeEvent, Alert, Position, TranslatedString, TripDescriptor, TripUpdate,
        VehicleDescriptor, VehiclePosition,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 15, 3, 0, 0).unwrap()
    }

    fn vehicle_entity(position: Option<Position>) -> FeedEntity {
        FeedEntity {
            id: "veh-1".to_string(),
            is_deleted: Some(false),
            vehicle: Some(VehiclePosition {
                trip: Some(TripDescriptor {
                    trip_id: Some("T1".to_string()),
                    route_id: Some("R1".to_string()),
                    start_time: Some("25:30:00".to_string()),
                    start_date: Some("20260715".to_string()),
                    ..Default::default()
                }),
                vehicle: Some(VehicleDescriptor {
                    id: Some("1021".to_string()),
                    label: Some("Comeng 1021".to_string()),
                    ..Default::default()
                }),
                position,
                current_status: Some(2),
                stop_id: Some("1000".to_string()),
                timestamp: Some(1_773_700_000),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn vehicle_entity_without_position_is_skipped() {
        assert!(vehicle_position_row(1, &vehicle_entity(None), now()).is_none());
    }

    #[test]
    fn vehicle_row_carries_all_seventeen_columns() {
        let entity = vehicle_entity(Some(Position {
            latitude: -37.8183,
            longitude: 144.9671,
            bearing: Some(270.0),
            ..Default::default()
        }));
        let row = vehicle_position_row(9, &entity, now()).unwrap();
        assert_eq!(row.len(), VEHICLE_POSITION_COLUMNS.len());
        assert_eq!(row[0], SqlValue::BigInt(9));
        assert_eq!(row[1], SqlValue::Text("veh-1".to_string()));
        // 25:30:00 start time survives as seconds, not clamped.
        assert_eq!(row[5], SqlValue::NullableInt(Some(91_800)));
        assert_eq!(row[11], SqlValue::Double(f64::from(-37.8183f32)));
        assert_eq!(row[12], SqlValue::Double(f64::from(144.9671f32)));
        assert_eq!(row[14], SqlValue::NullableInt(Some(2)));
        assert_eq!(
            row[16],
            SqlValue::Timestamp(epoch_timestamp(1_773_700_000).unwrap())
        );
    }

    #[test]
    fn trip_update_without_trip_id_is_dropped() {
        let entity = FeedEntity {
            id: "tu-1".to_string(),
            trip_update: Some(TripUpdate {
                trip: TripDescriptor::default(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(trip_update_row(1, &entity).is_none());
    }

    #[test]
    fn trip_update_row_maps_descriptor_fields() {
        let entity = FeedEntity {
            id: "tu-1".to_string(),
            is_deleted: None,
            trip_update: Some(TripUpdate {
                trip: TripDescriptor {
                    trip_id: Some("T1".to_string()),
                    route_id: Some("R1".to_string()),
                    direction_id: Some(1),
                    start_time: Some("08:00:00".to_string()),
                    start_date: Some("20260715".to_string()),
                    schedule_relationship: Some(0),
                    ..Default::default()
                },
                timestamp: Some(1_773_700_000),
                delay: Some(120),
                ..Default::default()
            }),
            ..Default::default()
        };
        let row = trip_update_row(3, &entity).unwrap();
        assert_eq!(row.len(), TRIP_UPDATE_COLUMNS.len());
        assert_eq!(row[3], SqlValue::Text("T1".to_string()));
        assert_eq!(row[5], SqlValue::NullableInt(Some(1)));
        assert_eq!(row[6], SqlValue::NullableInt(Some(28_800)));
        assert_eq!(row[12], SqlValue::NullableInt(Some(120)));
    }

    #[test]
    fn stop_time_update_row_splits_arrival_and_departure() {
        let update = StopTimeUpdate {
            stop_sequence: Some(4),
            stop_id: Some("1000".to_string()),
            arrival: Some(StopTimeEvent {
                delay: Some(60),
                time: Some(1_773_700_060),
                uncertainty: Some(30),
                ..Default::default()
            }),
            departure: None,
            schedule_relationship: Some(0),
            ..Default::default()
        };
        let row = stop_time_update_row(11, &update);
        assert_eq!(row.len(), STOP_TIME_UPDATE_COLUMNS.len());
        assert_eq!(row[0], SqlValue::BigInt(11));
        assert_eq!(row[1], SqlValue::NullableInt(Some(4)));
        assert_eq!(row[3], SqlValue::NullableInt(Some(60)));
        assert_eq!(row[4], SqlValue::NullableBigInt(Some(1_773_700_060)));
        assert_eq!(row[5], SqlValue::NullableInt(Some(30)));
        // No departure event: all three departure columns are NULL.
        assert_eq!(row[6], SqlValue::NullableInt(None));
        assert_eq!(row[7], SqlValue::NullableBigInt(None));
        assert_eq!(row[8], SqlValue::NullableInt(None));
    }

    #[test]
    fn alert_row_maps_severity() {
        let entity = FeedEntity {
            id: "al-1".to_string(),
            alert: Some(Alert {
                cause: Some(3),
                effect: Some(6),
                severity_level: Some(2),
                url: Some(TranslatedString::default()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let row = alert_row(5, &entity).unwrap();
        assert_eq!(row.len(), ALERT_COLUMNS.len());
        assert_eq!(row[3], SqlValue::NullableInt(Some(3)));
        assert_eq!(row[4], SqlValue::NullableInt(Some(6)));
        assert_eq!(row[5], SqlValue::NullableInt(Some(2)));
    }

    #[test]
    fn non_alert_entity_is_not_an_alert_row() {
        let entity = FeedEntity {
            id: "veh-1".to_string(),
            ..Default::default()
        };
        assert!(alert_row(5, &entity).is_none());
    }

    #[test]
    fn start_time_handles_empty_and_malformed() {
        assert_eq!(start_time_seconds(Some("08:00:00")), Some(28_800));
        assert_eq!(start_time_seconds(Some("25:30:00")), Some(91_800));
        assert_eq!(start_time_seconds(Some("")), None);
        assert_eq!(start_time_seconds(Some("soon")), None);
        assert_eq!(start_time_seconds(None), None);
    }

    #[test]
    fn incrementality_defaults_to_full_dataset() {
        let mut header = FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            ..Default::default()
        };
        assert_eq!(incrementality_code(&header), 0);
        header.incrementality =
            Some(gtfs_realtime::feed_header::Incrementality::Differential as i32);
        assert_eq!(incrementality_code(&header), 1);
        header.incrementality =
            Some(gtfs_realtime::feed_header::Incrementality::FullDataset as i32);
        assert_eq!(incrementality_code(&header), 0);
    }
}
