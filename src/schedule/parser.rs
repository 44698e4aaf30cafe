//! Streaming parser for GTFS schedule archives.
//!
//! Two archive shapes are understood: a flat ZIP holding the schedule
//! CSV files at its root, and the statewide nested form whose entries
//! are `<source_id>/google_transit.zip`. Nested inner archives are
//! copied to a scratch file first because ZIP entry readers are not
//! seekable. Parsing streams record by record; whole files are never
//! held in memory.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;
use tracing::{debug, info, warn};

use super::model::{
    AgencyRecord, CalendarDateRecord, CalendarRecord, LevelRecord, PathwayRecord, RouteRecord,
    ShapeRecord, StopRecord, StopTimeRecord, TransferRecord, TripRecord,
};

/// Fixed parse order satisfying referential ordering of the bulk inserts.
const PARSE_ORDER: &[&str] = &[
    "agency.txt",
    "levels.txt",
    "stops.txt",
    "routes.txt",
    "calendar.txt",
    "calendar_dates.txt",
    "shapes.txt",
    "trips.txt",
    "stop_times.txt",
    "pathways.txt",
    "transfers.txt",
];

/// Cap on the total decompressed size of one archive (2 GB).
const MAX_DECOMPRESSED_SIZE: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("archive decompresses to {0} bytes, over the limit")]
    OversizedArchive(u64),
    #[error("import aborted: {0}")]
    Aborted(String),
}

/// Receiver for parsed schedule records. The parser drives; the importer
/// provides an implementation that feeds bulk inserters. Any error
/// terminates the walk.
pub trait ScheduleSink {
    /// Called once per source before its records, with the source id the
    /// following records belong to.
    fn begin_source(&mut self, source_id: i32) -> Result<(), ParseError>;
    fn on_agency(&mut self, record: AgencyRecord) -> Result<(), ParseError>;
    fn on_level(&mut self, record: LevelRecord) -> Result<(), ParseError>;
    fn on_stop(&mut self, record: StopRecord) -> Result<(), ParseError>;
    fn on_route(&mut self, record: RouteRecord) -> Result<(), ParseError>;
    fn on_calendar(&mut self, record: CalendarRecord) -> Result<(), ParseError>;
    fn on_calendar_date(&mut self, record: CalendarDateRecord) -> Result<(), ParseError>;
    fn on_shape(&mut self, record: ShapeRecord) -> Result<(), ParseError>;
    fn on_trip(&mut self, record: TripRecord) -> Result<(), ParseError>;
    fn on_stop_time(&mut self, record: StopTimeRecord) -> Result<(), ParseError>;
    fn on_pathway(&mut self, record: PathwayRecord) -> Result<(), ParseError>;
    fn on_transfer(&mut self, record: TransferRecord) -> Result<(), ParseError>;
    /// Called after the last record of a source.
    fn end_source(&mut self) -> Result<(), ParseError>;
}

pub struct ArchiveParser {
    /// Source id reported for flat archives, which carry no source prefix.
    default_source_id: i32,
}

impl ArchiveParser {
    pub fn new(default_source_id: i32) -> Self {
        Self { default_source_id }
    }

    /// Walk `zip_path` and feed every recognized record to `sink`.
    /// `scratch_dir` must exist and is used for extracted inner archives.
    pub fn parse(
        &self,
        zip_path: &Path,
        scratch_dir: &Path,
        sink: &mut impl ScheduleSink,
    ) -> Result<(), ParseError> {
        let file = File::open(zip_path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        info!(path = %zip_path.display(), entries = archive.len(), "Parsing schedule archive");

        let mut nested: Vec<(i32, String)> = archive
            .file_names()
            .filter_map(|name| nested_source_id(name).map(|id| (id, name.to_string())))
            .collect();
        nested.sort_by_key(|(id, _)| *id);

        if nested.is_empty() {
            sink.begin_source(self.default_source_id)?;
            parse_flat(&mut archive, sink)?;
            sink.end_source()?;
            return Ok(());
        }

        for (source_id, entry_name) in nested {
            info!(source_id, entry = %entry_name, "Found nested source archive");

            let scratch_path = scratch_dir.join(format!("source_{source_id}.zip"));
            {
                let mut entry = archive.by_name(&entry_name)?;
                let mut scratch = File::create(&scratch_path)?;
                std::io::copy(&mut entry, &mut scratch)?;
            }

            let mut inner = zip::ZipArchive::new(File::open(&scratch_path)?)?;
            sink.begin_source(source_id)?;
            parse_flat(&mut inner, sink)?;
            sink.end_source()?;
        }

        Ok(())
    }
}

/// Parse a flat archive's CSV files in referential order. Files absent
/// from the archive are skipped.
fn parse_flat<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    sink: &mut impl ScheduleSink,
) -> Result<(), ParseError> {
    // ZIP bomb guard: reject archives whose entries expand past the cap.
    let mut total_uncompressed: u64 = 0;
    for index in 0..archive.len() {
        if let Ok(entry) = archive.by_index(index) {
            total_uncompressed += entry.size();
        }
    }
    if total_uncompressed > MAX_DECOMPRESSED_SIZE {
        return Err(ParseError::OversizedArchive(total_uncompressed));
    }

    for file_name in PARSE_ORDER {
        match archive.by_name(file_name) {
            Ok(entry) => parse_file(file_name, entry, sink)?,
            Err(zip::result::ZipError::FileNotFound) => {
                debug!(file = file_name, "File not present in archive");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn parse_file(
    file_name: &str,
    reader: impl Read,
    sink: &mut impl ScheduleSink,
) -> Result<(), ParseError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let fields = FieldMap::from_headers(csv_reader.headers()?);

    let mut count: u64 = 0;
    let mut skipped: u64 = 0;
    for result in csv_reader.records() {
        let record = result?;
        match file_name {
            "agency.txt" => sink.on_agency(agency_record(&record, &fields))?,
            "levels.txt" => sink.on_level(level_record(&record, &fields))?,
            "stops.txt" => sink.on_stop(stop_record(&record, &fields))?,
            "routes.txt" => sink.on_route(route_record(&record, &fields))?,
            "calendar.txt" => match calendar_record(&record, &fields) {
                Some(calendar) => sink.on_calendar(calendar)?,
                None => {
                    warn!(file = file_name, "Skipping calendar record with unparseable dates");
                    skipped += 1;
                    continue;
                }
            },
            "calendar_dates.txt" => match calendar_date_record(&record, &fields) {
                Some(calendar_date) => sink.on_calendar_date(calendar_date)?,
                None => {
                    warn!(file = file_name, "Skipping calendar_dates record with unparseable date");
                    skipped += 1;
                    continue;
                }
            },
            "shapes.txt" => sink.on_shape(shape_record(&record, &fields))?,
            "trips.txt" => sink.on_trip(trip_record(&record, &fields))?,
            "stop_times.txt" => sink.on_stop_time(stop_time_record(&record, &fields))?,
            "pathways.txt" => sink.on_pathway(pathway_record(&record, &fields))?,
            "transfers.txt" => sink.on_transfer(transfer_record(&record, &fields))?,
            _ => {}
        }
        count += 1;
        if count % 10_000 == 0 {
            debug!(file = file_name, records = count, "Parse progress");
        }
    }

    info!(file = file_name, records = count, skipped, "Parsed file");
    Ok(())
}

/// Source id of a `<digits>/google_transit.zip` entry, if the name
/// matches that shape.
fn nested_source_id(entry_name: &str) -> Option<i32> {
    let (prefix, rest) = entry_name.split_once('/')?;
    if rest != "google_transit.zip"
        || prefix.is_empty()
        || !prefix.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    prefix.parse().ok()
}

/// Case-sensitive header-name to column-index map.
struct FieldMap(HashMap<String, usize>);

impl FieldMap {
    fn from_headers(headers: &StringRecord) -> Self {
        Self(
            headers
                .iter()
                .enumerate()
                .map(|(idx, name)| (name.to_string(), idx))
                .collect(),
        )
    }

    fn text(&self, record: &StringRecord, field: &str) -> String {
        self.0
            .get(field)
            .and_then(|&idx| record.get(idx))
            .unwrap_or("")
            .to_string()
    }

    fn int(&self, record: &StringRecord, field: &str) -> i32 {
        self.0
            .get(field)
            .and_then(|&idx| record.get(idx))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    fn float(&self, record: &StringRecord, field: &str) -> f64 {
        self.0
            .get(field)
            .and_then(|&idx| record.get(idx))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0)
    }

    fn date(&self, record: &StringRecord, field: &str) -> Option<NaiveDate> {
        self.0
            .get(field)
            .and_then(|&idx| record.get(idx))
            .and_then(parse_gtfs_date)
    }

    fn flag(&self, record: &StringRecord, field: &str) -> bool {
        self.int(record, field) == 1
    }
}

/// Parse a `HH:MM:SS` clock to seconds from service-day start. Hours may
/// exceed 24 for trips running past midnight; the value is not clamped.
pub fn parse_clock_seconds(s: &str) -> Option<i32> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: i32 = parts[0].parse().ok()?;
    let minutes: i32 = parts[1].parse().ok()?;
    let seconds: i32 = parts[2].parse().ok()?;
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Parse a `YYYYMMDD` schedule date.
pub fn parse_gtfs_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 8 {
        return None;
    }
    let year: i32 = s.get(0..4)?.parse().ok()?;
    let month: u32 = s.get(4..6)?.parse().ok()?;
    let day: u32 = s.get(6..8)?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn agency_record(record: &StringRecord, fields: &FieldMap) -> AgencyRecord {
    AgencyRecord {
        agency_id: fields.text(record, "agency_id"),
        agency_name: fields.text(record, "agency_name"),
        agency_url: fields.text(record, "agency_url"),
        agency_timezone: fields.text(record, "agency_timezone"),
        agency_lang: fields.text(record, "agency_lang"),
        agency_fare_url: fields.text(record, "agency_fare_url"),
    }
}

fn level_record(record: &StringRecord, fields: &FieldMap) -> LevelRecord {
    LevelRecord {
        level_id: fields.text(record, "level_id"),
        level_index: fields.float(record, "level_index"),
        level_name: fields.text(record, "level_name"),
    }
}

fn stop_record(record: &StringRecord, fields: &FieldMap) -> StopRecord {
    StopRecord {
        stop_id: fields.text(record, "stop_id"),
        stop_name: fields.text(record, "stop_name"),
        stop_lat: fields.float(record, "stop_lat"),
        stop_lon: fields.float(record, "stop_lon"),
        location_type: fields.int(record, "location_type"),
        parent_station: fields.text(record, "parent_station"),
        wheelchair_boarding: fields.int(record, "wheelchair_boarding"),
        level_id: fields.text(record, "level_id"),
    }
}

fn route_record(record: &StringRecord, fields: &FieldMap) -> RouteRecord {
    RouteRecord {
        route_id: fields.text(record, "route_id"),
        agency_id: fields.text(record, "agency_id"),
        route_short_name: fields.text(record, "route_short_name"),
        route_long_name: fields.text(record, "route_long_name"),
        route_type: fields.int(record, "route_type"),
        route_color: fields.text(record, "route_color"),
        route_text_color: fields.text(record, "route_text_color"),
    }
}

fn calendar_record(record: &StringRecord, fields: &FieldMap) -> Option<CalendarRecord> {
    let start_date = fields.date(record, "start_date")?;
    let end_date = fields.date(record, "end_date")?;
    Some(CalendarRecord {
        service_id: fields.text(record, "service_id"),
        weekdays: [
            fields.flag(record, "monday"),
            fields.flag(record, "tuesday"),
            fields.flag(record, "wednesday"),
            fields.flag(record, "thursday"),
            fields.flag(record, "friday"),
            fields.flag(record, "saturday"),
            fields.flag(record, "sunday"),
        ],
        start_date,
        end_date,
    })
}

fn calendar_date_record(record: &StringRecord, fields: &FieldMap) -> Option<CalendarDateRecord> {
    let date = fields.date(record, "date")?;
    Some(CalendarDateRecord {
        service_id: fields.text(record, "service_id"),
        date,
        exception_type: fields.int(record, "exception_type"),
    })
}

fn shape_record(record: &StringRecord, fields: &FieldMap) -> ShapeRecord {
    ShapeRecord {
        shape_id: fields.text(record, "shape_id"),
        shape_pt_lat: fields.float(record, "shape_pt_lat"),
        shape_pt_lon: fields.float(record, "shape_pt_lon"),
        shape_pt_sequence: fields.int(record, "shape_pt_sequence"),
        shape_dist_traveled: fields.float(record, "shape_dist_traveled"),
    }
}

fn trip_record(record: &StringRecord, fields: &FieldMap) -> TripRecord {
    TripRecord {
        trip_id: fields.text(record, "trip_id"),
        route_id: fields.text(record, "route_id"),
        service_id: fields.text(record, "service_id"),
        shape_id: fields.text(record, "shape_id"),
        trip_headsign: fields.text(record, "trip_headsign"),
        direction_id: fields.int(record, "direction_id"),
        block_id: fields.text(record, "block_id"),
        wheelchair_accessible: fields.int(record, "wheelchair_accessible"),
    }
}

fn stop_time_record(record: &StringRecord, fields: &FieldMap) -> StopTimeRecord {
    StopTimeRecord {
        trip_id: fields.text(record, "trip_id"),
        stop_id: fields.text(record, "stop_id"),
        stop_sequence: fields.int(record, "stop_sequence"),
        arrival_time: fields.text(record, "arrival_time"),
        departure_time: fields.text(record, "departure_time"),
        stop_headsign: fields.text(record, "stop_headsign"),
        pickup_type: fields.int(record, "pickup_type"),
        drop_off_type: fields.int(record, "drop_off_type"),
        shape_dist_traveled: fields.float(record, "shape_dist_traveled"),
    }
}

fn pathway_record(record: &StringRecord, fields: &FieldMap) -> PathwayRecord {
    PathwayRecord {
        pathway_id: fields.text(record, "pathway_id"),
        from_stop_id: fields.text(record, "from_stop_id"),
        to_stop_id: fields.text(record, "to_stop_id"),
        pathway_mode: fields.int(record, "pathway_mode"),
        is_bidirectional: fields.int(record, "is_bidirectional"),
        traversal_time: fields.int(record, "traversal_time"),
    }
}

fn transfer_record(record: &StringRecord, fields: &FieldMap) -> TransferRecord {
    TransferRecord {
        from_stop_id: fields.text(record, "from_stop_id"),
        to_stop_id: fields.text(record, "to_stop_id"),
        from_route_id: fields.text(record, "from_route_id"),
        to_route_id: fields.text(record, "to_route_id"),
        from_trip_id: fields.text(record, "from_trip_id"),
        to_trip_id: fields.text(record, "to_trip_id"),
        transfer_type: fields.int(record, "transfer_type"),
        min_transfer_time: fields.int(record, "min_transfer_time"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[derive(Default)]
    struct CollectSink {
        sources: Vec<i32>,
        ended_sources: usize,
        agencies: Vec<AgencyRecord>,
        levels: Vec<LevelRecord>,
        stops: Vec<StopRecord>,
        routes: Vec<RouteRecord>,
        calendars: Vec<CalendarRecord>,
        calendar_dates: Vec<CalendarDateRecord>,
        shapes: Vec<ShapeRecord>,
        trips: Vec<TripRecord>,
        stop_times: Vec<StopTimeRecord>,
        pathways: Vec<PathwayRecord>,
        transfers: Vec<TransferRecord>,
    }

    impl ScheduleSink for CollectSink {
        fn begin_source(&mut self, source_id: i32) -> Result<(), ParseError> {
            self.sources.push(source_id);
            Ok(())
        }
        fn on_agency(&mut self, r: AgencyRecord) -> Result<(), ParseError> {
            self.agencies.push(r);
            Ok(())
        }
        fn on_level(&mut self, r: LevelRecord) -> Result<(), ParseError> {
            self.levels.push(r);
            Ok(())
        }
        fn on_stop(&mut self, r: StopRecord) -> Result<(), ParseError> {
            self.stops.push(r);
            Ok(())
        }
        fn on_route(&mut self, r: RouteRecord) -> Result<(), ParseError> {
            self.routes.push(r);
            Ok(())
        }
        fn on_calendar(&mut self, r: CalendarRecord) -> Result<(), ParseError> {
            self.calendars.push(r);
            Ok(())
        }
        fn on_calendar_date(&mut self, r: CalendarDateRecord) -> Result<(), ParseError> {
            self.calendar_dates.push(r);
            Ok(())
        }
        fn on_shape(&mut self, r: ShapeRecord) -> Result<(), ParseError> {
            self.shapes.push(r);
            Ok(())
        }
        fn on_trip(&mut self, r: TripRecord) -> Result<(), ParseError> {
            self.trips.push(r);
            Ok(())
        }
        fn on_stop_time(&mut self, r: StopTimeRecord) -> Result<(), ParseError> {
            self.stop_times.push(r);
            Ok(())
        }
        fn on_pathway(&mut self, r: PathwayRecord) -> Result<(), ParseError> {
            self.pathways.push(r);
            Ok(())
        }
        fn on_transfer(&mut self, r: TransferRecord) -> Result<(), ParseError> {
            self.transfers.push(r);
            Ok(())
        }
        fn end_source(&mut self) -> Result<(), ParseError> {
            self.ended_sources += 1;
            Ok(())
        }
    }

    /// Sink that refuses every stop to exercise early termination.
    struct RejectingSink(CollectSink);

    impl ScheduleSink for RejectingSink {
        fn begin_source(&mut self, source_id: i32) -> Result<(), ParseError> {
            self.0.begin_source(source_id)
        }
        fn on_agency(&mut self, r: AgencyRecord) -> Result<(), ParseError> {
            self.0.on_agency(r)
        }
        fn on_level(&mut self, r: LevelRecord) -> Result<(), ParseError> {
            self.0.on_level(r)
        }
        fn on_stop(&mut self, _: StopRecord) -> Result<(), ParseError> {
            Err(ParseError::Aborted("sink closed".into()))
        }
        fn on_route(&mut self, r: RouteRecord) -> Result<(), ParseError> {
            self.0.on_route(r)
        }
        fn on_calendar(&mut self, r: CalendarRecord) -> Result<(), ParseError> {
            self.0.on_calendar(r)
        }
        fn on_calendar_date(&mut self, r: CalendarDateRecord) -> Result<(), ParseError> {
            self.0.on_calendar_date(r)
        }
        fn on_shape(&mut self, r: ShapeRecord) -> Result<(), ParseError> {
            self.0.on_shape(r)
        }
        fn on_trip(&mut self, r: TripRecord) -> Result<(), ParseError> {
            self.0.on_trip(r)
        }
        fn on_stop_time(&mut self, r: StopTimeRecord) -> Result<(), ParseError> {
            self.0.on_stop_time(r)
        }
        fn on_pathway(&mut self, r: PathwayRecord) -> Result<(), ParseError> {
            self.0.on_pathway(r)
        }
        fn on_transfer(&mut self, r: TransferRecord) -> Result<(), ParseError> {
            self.0.on_transfer(r)
        }
        fn end_source(&mut self) -> Result<(), ParseError> {
            self.0.end_source()
        }
    }

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, content) in files {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn scratch_area(label: &str) -> (PathBuf, PathBuf) {
        let base = std::env::temp_dir().join(format!(
            "transit-ingest-parser-{}-{label}",
            std::process::id()
        ));
        let scratch = base.join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        (base, scratch)
    }

    fn write_archive(base: &Path, bytes: &[u8]) -> PathBuf {
        let path = base.join("archive.zip");
        std::fs::write(&path, bytes).unwrap();
        path
    }

    const FLAT_FILES: &[(&str, &[u8])] = &[
        (
            "agency.txt",
            b"agency_id,agency_name,agency_url,agency_timezone\n\
              PTV,Public Transport Victoria,https://ptv.example,Australia/Melbourne\n",
        ),
        (
            "stops.txt",
            b"stop_id,stop_name,stop_lat,stop_lon,location_type,parent_station\n\
              1000,Flinders Street,-37.8183,144.9671,1,\n\
              1001, Platform 1 ,-37.8184,not-a-number,0,1000\n",
        ),
        (
            "routes.txt",
            b"route_id,agency_id,route_short_name,route_long_name,route_type\n\
              R1,PTV,1,Sample Line,0\n",
        ),
        (
            "calendar.txt",
            b"service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
              WD,1,1,1,1,1,0,0,20260101,20261231\n\
              BAD,1,1,1,1,1,0,0,2026-01-01,20261231\n",
        ),
        (
            "calendar_dates.txt",
            b"service_id,date,exception_type\n\
              WD,20261225,2\n\
              WD,garbage,1\n",
        ),
        (
            "trips.txt",
            b"trip_id,route_id,service_id,trip_headsign,direction_id\n\
              T1,R1,WD,City Loop,0\n",
        ),
        (
            "stop_times.txt",
            b"trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
              T1,08:00:00,08:00:30,1000,1\n\
              T1,25:30:00,,1001,2\n",
        ),
    ];

    #[test]
    fn flat_archive_reports_default_source() {
        let (base, scratch) = scratch_area("flat");
        let archive = write_archive(&base, &zip_bytes(FLAT_FILES));

        let mut sink = CollectSink::default();
        ArchiveParser::new(2)
            .parse(&archive, &scratch, &mut sink)
            .unwrap();

        assert_eq!(sink.sources, vec![2]);
        assert_eq!(sink.ended_sources, 1);
        assert_eq!(sink.agencies.len(), 1);
        assert_eq!(sink.agencies[0].agency_timezone, "Australia/Melbourne");
        assert_eq!(sink.stops.len(), 2);
        assert_eq!(sink.routes.len(), 1);
        assert_eq!(sink.trips.len(), 1);
        assert_eq!(sink.stop_times.len(), 2);
    }

    #[test]
    fn fields_are_trimmed_and_bad_numerics_default_to_zero() {
        let (base, scratch) = scratch_area("defaults");
        let archive = write_archive(&base, &zip_bytes(FLAT_FILES));

        let mut sink = CollectSink::default();
        ArchiveParser::new(2)
            .parse(&archive, &scratch, &mut sink)
            .unwrap();

        let platform = &sink.stops[1];
        assert_eq!(platform.stop_name, "Platform 1");
        assert_eq!(platform.stop_lon, 0.0);
        assert_eq!(platform.parent_station, "1000");
        // Header has no wheelchair_boarding column at all.
        assert_eq!(platform.wheelchair_boarding, 0);
    }

    #[test]
    fn stop_time_clocks_are_kept_verbatim() {
        let (base, scratch) = scratch_area("clocks");
        let archive = write_archive(&base, &zip_bytes(FLAT_FILES));

        let mut sink = CollectSink::default();
        ArchiveParser::new(2)
            .parse(&archive, &scratch, &mut sink)
            .unwrap();

        assert_eq!(sink.stop_times[1].arrival_time, "25:30:00");
        assert_eq!(sink.stop_times[1].departure_time, "");
    }

    #[test]
    fn bad_calendar_rows_are_skipped_without_aborting() {
        let (base, scratch) = scratch_area("calendar");
        let archive = write_archive(&base, &zip_bytes(FLAT_FILES));

        let mut sink = CollectSink::default();
        ArchiveParser::new(2)
            .parse(&archive, &scratch, &mut sink)
            .unwrap();

        assert_eq!(sink.calendars.len(), 1);
        assert_eq!(sink.calendars[0].service_id, "WD");
        assert_eq!(
            sink.calendars[0].weekdays,
            [true, true, true, true, true, false, false]
        );
        assert_eq!(sink.calendar_dates.len(), 1);
        assert_eq!(sink.calendar_dates[0].exception_type, 2);
    }

    #[test]
    fn nested_archive_walks_every_numbered_source() {
        let inner_a = zip_bytes(&[(
            "agency.txt",
            b"agency_id,agency_name,agency_timezone\nA,Trains,Australia/Melbourne\n",
        )]);
        let inner_b = zip_bytes(&[(
            "agency.txt",
            b"agency_id,agency_name,agency_timezone\nB,Buses,Australia/Melbourne\n",
        )]);
        let outer = zip_bytes(&[
            ("2/google_transit.zip", inner_a.as_slice()),
            ("4/google_transit.zip", inner_b.as_slice()),
            ("readme.txt", b"not a schedule"),
            ("5/other.zip", b"wrong inner name"),
        ]);

        let (base, scratch) = scratch_area("nested");
        let archive = write_archive(&base, &outer);

        let mut sink = CollectSink::default();
        ArchiveParser::new(99)
            .parse(&archive, &scratch, &mut sink)
            .unwrap();

        assert_eq!(sink.sources, vec![2, 4]);
        assert_eq!(sink.ended_sources, 2);
        assert_eq!(sink.agencies.len(), 2);
        assert_eq!(sink.agencies[0].agency_id, "A");
        assert_eq!(sink.agencies[1].agency_id, "B");
    }

    #[test]
    fn empty_archive_yields_a_source_and_no_records() {
        let (base, scratch) = scratch_area("empty");
        let archive = write_archive(&base, &zip_bytes(&[("readme.txt", b"nothing here")]));

        let mut sink = CollectSink::default();
        ArchiveParser::new(3)
            .parse(&archive, &scratch, &mut sink)
            .unwrap();

        assert_eq!(sink.sources, vec![3]);
        assert!(sink.agencies.is_empty());
        assert!(sink.stop_times.is_empty());
    }

    #[test]
    fn sink_error_stops_the_walk() {
        let (base, scratch) = scratch_area("abort");
        let archive = write_archive(&base, &zip_bytes(FLAT_FILES));

        let mut sink = RejectingSink(CollectSink::default());
        let err = ArchiveParser::new(2)
            .parse(&archive, &scratch, &mut sink)
            .unwrap_err();
        assert!(matches!(err, ParseError::Aborted(_)));
        // Nothing after stops.txt was delivered.
        assert!(sink.0.routes.is_empty());
        assert!(sink.0.trips.is_empty());
    }

    #[test]
    fn nested_source_id_accepts_only_digit_prefixes() {
        assert_eq!(nested_source_id("2/google_transit.zip"), Some(2));
        assert_eq!(nested_source_id("10/google_transit.zip"), Some(10));
        assert_eq!(nested_source_id("google_transit.zip"), None);
        assert_eq!(nested_source_id("x/google_transit.zip"), None);
        assert_eq!(nested_source_id("2/other.zip"), None);
        assert_eq!(nested_source_id("2/3/google_transit.zip"), None);
        assert_eq!(nested_source_id("/google_transit.zip"), None);
    }

    #[test]
    fn clock_seconds_handles_hours_past_midnight() {
        assert_eq!(parse_clock_seconds("08:30:00"), Some(30600));
        assert_eq!(parse_clock_seconds("00:00:00"), Some(0));
        assert_eq!(parse_clock_seconds("24:00:00"), Some(86400));
        assert_eq!(parse_clock_seconds("25:30:00"), Some(91800));
        assert_eq!(parse_clock_seconds("48:00:00"), Some(172800));
        // Single-digit hours still parse.
        assert_eq!(parse_clock_seconds("8:30:00"), Some(30600));
        assert_eq!(parse_clock_seconds("08:30"), None);
        assert_eq!(parse_clock_seconds("08:30:00:00"), None);
        assert_eq!(parse_clock_seconds(""), None);
        assert_eq!(parse_clock_seconds("invalid"), None);
    }

    #[test]
    fn gtfs_date_parsing() {
        assert_eq!(
            parse_gtfs_date("20260201"),
            Some(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap())
        );
        assert_eq!(parse_gtfs_date("20260229"), None); // not a leap year
        assert_eq!(parse_gtfs_date("2026-01-01"), None);
        assert_eq!(parse_gtfs_date(""), None);
        assert_eq!(parse_gtfs_date("20261301"), None);
    }
}
