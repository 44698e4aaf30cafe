//! Schedule import: archive → bulk inserts under one transaction.
//!
//! The parser runs on a blocking thread and feeds an [`ImportSink`] whose
//! bulk inserters hand full batches over a small bounded channel to the
//! async side, which executes them against a single transaction. The
//! transaction commits only after the parser has returned and every
//! inserter has drained; any failure rolls the whole archive back and
//! the version stays inactive.

use std::path::Path;

use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::store::bulk::{BulkInserter, InsertBatch, SqlValue};

use super::model::{
    AgencyRecord, CalendarDateRecord, CalendarRecord, LevelRecord, PathwayRecord, RouteRecord,
    ShapeRecord, StopRecord, StopTimeRecord, TransferRecord, TripRecord,
};
use super::parser::{parse_clock_seconds, ArchiveParser, ParseError, ScheduleSink};

/// Batches in flight between the parsing thread and the DB writer.
const BATCH_CHANNEL_CAPACITY: usize = 4;

const AGENCY_COLUMNS: &[&str] = &[
    "agency_id",
    "source_id",
    "version_id",
    "agency_name",
    "agency_url",
    "agency_timezone",
    "agency_lang",
    "agency_fare_url",
];

const LEVEL_COLUMNS: &[&str] = &[
    "level_id",
    "source_id",
    "version_id",
    "level_index",
    "level_name",
];

const STOP_COLUMNS: &[&str] = &[
    "stop_id",
    "source_id",
    "version_id",
    "stop_name",
    "stop_lat",
    "stop_lon",
    "location_type",
    "parent_station",
    "wheelchair_boarding",
    "level_id",
];

const ROUTE_COLUMNS: &[&str] = &[
    "route_id",
    "source_id",
    "version_id",
    "agency_id",
    "route_short_name",
    "route_long_name",
    "route_type",
    "route_color",
    "route_text_color",
];

const CALENDAR_COLUMNS: &[&str] = &[
    "service_id",
    "source_id",
    "version_id",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
    "start_date",
    "end_date",
];

const CALENDAR_DATE_COLUMNS: &[&str] = &[
    "service_id",
    "source_id",
    "version_id",
    "date",
    "exception_type",
];

const SHAPE_COLUMNS: &[&str] = &[
    "shape_id",
    "source_id",
    "version_id",
    "shape_pt_lat",
    "shape_pt_lon",
    "shape_pt_sequence",
    "shape_dist_traveled",
];

const TRIP_COLUMNS: &[&str] = &[
    "trip_id",
    "source_id",
    "version_id",
    "route_id",
    "service_id",
    "shape_id",
    "trip_headsign",
    "direction_id",
    "block_id",
    "wheelchair_accessible",
];

const STOP_TIME_COLUMNS: &[&str] = &[
    "trip_id",
    "source_id",
    "version_id",
    "stop_id",
    "stop_sequence",
    "arrival_time",
    "departure_time",
    "stop_headsign",
    "pickup_type",
    "drop_off_type",
    "shape_dist_traveled",
];

const PATHWAY_COLUMNS: &[&str] = &[
    "pathway_id",
    "source_id",
    "version_id",
    "from_stop_id",
    "to_stop_id",
    "pathway_mode",
    "is_bidirectional",
    "traversal_time",
];

const TRANSFER_COLUMNS: &[&str] = &[
    "from_stop_id",
    "to_stop_id",
    "source_id",
    "version_id",
    "from_route_id",
    "to_route_id",
    "from_trip_id",
    "to_trip_id",
    "transfer_type",
    "min_transfer_time",
];

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("parser task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug)]
pub struct ImportSummary {
    /// Source ids encountered in the archive, in import order.
    pub sources: Vec<i32>,
    pub rows_by_table: Vec<(&'static str, u64)>,
}

impl ImportSummary {
    pub fn total_rows(&self) -> u64 {
        self.rows_by_table.iter().map(|(_, n)| n).sum()
    }
}

pub struct Importer {
    pool: PgPool,
    default_source_id: i32,
}

impl Importer {
    pub fn new(pool: PgPool, default_source_id: i32) -> Self {
        Self {
            pool,
            default_source_id,
        }
    }

    /// Import every source in `zip_path` under `version_id`, inside one
    /// transaction. `scratch_dir` must exist; it receives extracted inner
    /// archives.
    pub async fn import(
        &self,
        zip_path: &Path,
        scratch_dir: &Path,
        version_id: i64,
    ) -> Result<ImportSummary, ImportError> {
        let mut tx = self.pool.begin().await?;

        let (batch_tx, mut batch_rx) = mpsc::channel::<InsertBatch>(BATCH_CHANNEL_CAPACITY);
        let zip_path = zip_path.to_path_buf();
        let scratch_dir = scratch_dir.to_path_buf();
        let default_source_id = self.default_source_id;

        let parse_task = tokio::task::spawn_blocking(move || -> Result<ImportSummary, ParseError> {
            let parser = ArchiveParser::new(default_source_id);
            let mut sink = ImportSink::new(version_id, batch_tx);
            parser.parse(&zip_path, &scratch_dir, &mut sink)?;
            Ok(sink.into_summary())
        });

        let mut insert_error: Option<sqlx::Error> = None;
        while let Some(batch) = batch_rx.recv().await {
            if insert_error.is_some() {
                continue;
            }
            let table = batch.table();
            let rows = batch.len();
            match batch.execute(&mut tx).await {
                Ok(inserted) => debug!(table, rows, inserted, "Executed bulk insert"),
                Err(e) => {
                    // Closing the channel makes the parsing thread's next
                    // send fail, which aborts the walk.
                    batch_rx.close();
                    insert_error = Some(e);
                }
            }
        }

        let parse_outcome = parse_task.await?;
        if let Some(e) = insert_error {
            return Err(ImportError::Database(e));
        }
        let summary = parse_outcome?;

        tx.commit().await?;

        info!(
            version_id,
            sources = ?summary.sources,
            total_rows = summary.total_rows(),
            "Import committed"
        );
        Ok(summary)
    }
}

struct Inserters {
    agency: BulkInserter,
    levels: BulkInserter,
    stops: BulkInserter,
    routes: BulkInserter,
    calendar: BulkInserter,
    calendar_dates: BulkInserter,
    shapes: BulkInserter,
    trips: BulkInserter,
    stop_times: BulkInserter,
    pathways: BulkInserter,
    transfers: BulkInserter,
}

impl Inserters {
    fn new() -> Self {
        Self {
            agency: BulkInserter::new("gtfs.agency", AGENCY_COLUMNS),
            levels: BulkInserter::new("gtfs.levels", LEVEL_COLUMNS),
            stops: BulkInserter::new("gtfs.stops", STOP_COLUMNS),
            routes: BulkInserter::new("gtfs.routes", ROUTE_COLUMNS),
            calendar: BulkInserter::new("gtfs.calendar", CALENDAR_COLUMNS),
            calendar_dates: BulkInserter::new("gtfs.calendar_dates", CALENDAR_DATE_COLUMNS),
            shapes: BulkInserter::new("gtfs.shapes", SHAPE_COLUMNS),
            trips: BulkInserter::new("gtfs.trips", TRIP_COLUMNS),
            stop_times: BulkInserter::new("gtfs.stop_times", STOP_TIME_COLUMNS),
            pathways: BulkInserter::new("gtfs.pathways", PATHWAY_COLUMNS),
            transfers: BulkInserter::new("gtfs.transfers", TRANSFER_COLUMNS),
        }
    }

    /// Referential order for the final drain of a source.
    fn all(&mut self) -> [&mut BulkInserter; 11] {
        [
            &mut self.agency,
            &mut self.levels,
            &mut self.stops,
            &mut self.routes,
            &mut self.calendar,
            &mut self.calendar_dates,
            &mut self.shapes,
            &mut self.trips,
            &mut self.stop_times,
            &mut self.pathways,
            &mut self.transfers,
        ]
    }
}

/// [`ScheduleSink`] implementation that turns records into store rows
/// tagged `(source_id, version_id)` and ships full batches to the writer.
struct ImportSink {
    version_id: i64,
    source_id: i32,
    sources: Vec<i32>,
    inserters: Inserters,
    batch_tx: mpsc::Sender<InsertBatch>,
}

impl ImportSink {
    fn new(version_id: i64, batch_tx: mpsc::Sender<InsertBatch>) -> Self {
        Self {
            version_id,
            source_id: 0,
            sources: Vec::new(),
            inserters: Inserters::new(),
            batch_tx,
        }
    }

    fn forward(
        full_batch: Option<InsertBatch>,
        batch_tx: &mpsc::Sender<InsertBatch>,
    ) -> Result<(), ParseError> {
        if let Some(batch) = full_batch {
            batch_tx
                .blocking_send(batch)
                .map_err(|_| ParseError::Aborted("store writer closed".into()))?;
        }
        Ok(())
    }

    fn key(&self) -> [SqlValue; 2] {
        [SqlValue::Int(self.source_id), SqlValue::BigInt(self.version_id)]
    }

    fn into_summary(self) -> ImportSummary {
        let mut inserters = self.inserters;
        let rows_by_table = inserters
            .all()
            .map(|inserter| (inserter.table(), inserter.total_rows()))
            .to_vec();
        ImportSummary {
            sources: self.sources,
            rows_by_table,
        }
    }
}

impl ScheduleSink for ImportSink {
    fn begin_source(&mut self, source_id: i32) -> Result<(), ParseError> {
        self.source_id = source_id;
        self.sources.push(source_id);
        info!(source_id, version_id = self.version_id, "Importing source");
        Ok(())
    }

    fn on_agency(&mut self, record: AgencyRecord) -> Result<(), ParseError> {
        let [source, version] = self.key();
        let batch = self.inserters.agency.push(vec![
            SqlValue::Text(record.agency_id),
            source,
            version,
            SqlValue::Text(record.agency_name),
            opt_text(record.agency_url),
            SqlValue::Text(record.agency_timezone),
            opt_text(record.agency_lang),
            opt_text(record.agency_fare_url),
        ]);
        Self::forward(batch, &self.batch_tx)
    }

    fn on_level(&mut self, record: LevelRecord) -> Result<(), ParseError> {
        let [source, version] = self.key();
        let batch = self.inserters.levels.push(vec![
            SqlValue::Text(record.level_id),
            source,
            version,
            opt_nonzero_double(record.level_index),
            opt_text(record.level_name),
        ]);
        Self::forward(batch, &self.batch_tx)
    }

    fn on_stop(&mut self, record: StopRecord) -> Result<(), ParseError> {
        let [source, version] = self.key();
        let batch = self.inserters.stops.push(vec![
            SqlValue::Text(record.stop_id),
            source,
            version,
            SqlValue::Text(record.stop_name),
            opt_nonzero_double(record.stop_lat),
            opt_nonzero_double(record.stop_lon),
            SqlValue::Int(record.location_type),
            opt_text(record.parent_station),
            SqlValue::Int(record.wheelchair_boarding),
            opt_text(record.level_id),
        ]);
        Self::forward(batch, &self.batch_tx)
    }

    fn on_route(&mut self, record: RouteRecord) -> Result<(), ParseError> {
        let [source, version] = self.key();
        let batch = self.inserters.routes.push(vec![
            SqlValue::Text(record.route_id),
            source,
            version,
            opt_text(record.agency_id),
            opt_text(record.route_short_name),
            opt_text(record.route_long_name),
            SqlValue::Int(record.route_type),
            opt_text(record.route_color),
            opt_text(record.route_text_color),
        ]);
        Self::forward(batch, &self.batch_tx)
    }

    fn on_calendar(&mut self, record: CalendarRecord) -> Result<(), ParseError> {
        let [source, version] = self.key();
        let mut row = vec![SqlValue::Text(record.service_id), source, version];
        row.extend(
            record
                .weekdays
                .iter()
                .map(|&active| SqlValue::Int(i32::from(active))),
        );
        row.push(SqlValue::Date(record.start_date));
        row.push(SqlValue::Date(record.end_date));
        let batch = self.inserters.calendar.push(row);
        Self::forward(batch, &self.batch_tx)
    }

    fn on_calendar_date(&mut self, record: CalendarDateRecord) -> Result<(), ParseError> {
        let [source, version] = self.key();
        let batch = self.inserters.calendar_dates.push(vec![
            SqlValue::Text(record.service_id),
            source,
            version,
            SqlValue::Date(record.date),
            SqlValue::Int(record.exception_type),
        ]);
        Self::forward(batch, &self.batch_tx)
    }

    fn on_shape(&mut self, record: ShapeRecord) -> Result<(), ParseError> {
        let [source, version] = self.key();
        let batch = self.inserters.shapes.push(vec![
            SqlValue::Text(record.shape_id),
            source,
            version,
            SqlValue::Double(record.shape_pt_lat),
            SqlValue::Double(record.shape_pt_lon),
            SqlValue::Int(record.shape_pt_sequence),
            opt_nonzero_double(record.shape_dist_traveled),
        ]);
        Self::forward(batch, &self.batch_tx)
    }

    fn on_trip(&mut self, record: TripRecord) -> Result<(), ParseError> {
        let [source, version] = self.key();
        let batch = self.inserters.trips.push(vec![
            SqlValue::Text(record.trip_id),
            source,
            version,
            SqlValue::Text(record.route_id),
            SqlValue::Text(record.service_id),
            opt_text(record.shape_id),
            opt_text(record.trip_headsign),
            SqlValue::Int(record.direction_id),
            opt_text(record.block_id),
            SqlValue::Int(record.wheelchair_accessible),
        ]);
        Self::forward(batch, &self.batch_tx)
    }

    fn on_stop_time(&mut self, record: StopTimeRecord) -> Result<(), ParseError> {
        let [source, version] = self.key();
        let arrival = clock_or_null(&record.arrival_time);
        let departure = clock_or_null(&record.departure_time);
        let batch = self.inserters.stop_times.push(vec![
            SqlValue::Text(record.trip_id),
            source,
            version,
            SqlValue::Text(record.stop_id),
            SqlValue::Int(record.stop_sequence),
            SqlValue::NullableInt(arrival),
            SqlValue::NullableInt(departure),
            opt_text(record.stop_headsign),
            SqlValue::Int(record.pickup_type),
            SqlValue::Int(record.drop_off_type),
            opt_nonzero_double(record.shape_dist_traveled),
        ]);
        Self::forward(batch, &self.batch_tx)
    }

    fn on_pathway(&mut self, record: PathwayRecord) -> Result<(), ParseError> {
        let [source, version] = self.key();
        let batch = self.inserters.pathways.push(vec![
            SqlValue::Text(record.pathway_id),
            source,
            version,
            SqlValue::Text(record.from_stop_id),
            SqlValue::Text(record.to_stop_id),
            SqlValue::Int(record.pathway_mode),
            SqlValue::Int(record.is_bidirectional),
            opt_nonzero_int(record.traversal_time),
        ]);
        Self::forward(batch, &self.batch_tx)
    }

    fn on_transfer(&mut self, record: TransferRecord) -> Result<(), ParseError> {
        let [source, version] = self.key();
        let batch = self.inserters.transfers.push(vec![
            SqlValue::Text(record.from_stop_id),
            SqlValue::Text(record.to_stop_id),
            source,
            version,
            opt_text(record.from_route_id),
            opt_text(record.to_route_id),
            // Part of the primary key; empty stands in for "any trip".
            SqlValue::Text(record.from_trip_id),
            SqlValue::Text(record.to_trip_id),
            SqlValue::Int(record.transfer_type),
            opt_nonzero_int(record.min_transfer_time),
        ]);
        Self::forward(batch, &self.batch_tx)
    }

    fn end_source(&mut self) -> Result<(), ParseError> {
        for inserter in self.inserters.all() {
            if let Some(batch) = inserter.drain() {
                self.batch_tx
                    .blocking_send(batch)
                    .map_err(|_| ParseError::Aborted("store writer closed".into()))?;
            }
        }
        Ok(())
    }
}

fn opt_text(value: String) -> SqlValue {
    SqlValue::NullableText(if value.is_empty() { None } else { Some(value) })
}

fn opt_nonzero_double(value: f64) -> SqlValue {
    SqlValue::NullableDouble(if value == 0.0 { None } else { Some(value) })
}

fn opt_nonzero_int(value: i32) -> SqlValue {
    SqlValue::NullableInt(if value == 0 { None } else { Some(value) })
}

/// Convert a raw stop-time clock to seconds from service-day start.
/// Empty means the feed omitted the value; malformed values are logged
/// and stored as NULL rather than aborting the import.
fn clock_or_null(raw: &str) -> Option<i32> {
    if raw.is_empty() {
        return None;
    }
    match parse_clock_seconds(raw) {
        Some(seconds) => Some(seconds),
        None => {
            warn!(value = raw, "Unparseable stop time, storing NULL");
            None
        }
    }
}
