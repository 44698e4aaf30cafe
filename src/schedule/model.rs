//! Typed records for the schedule CSV tables.
//!
//! Field defaults mirror the feed's conventions: missing text is empty,
//! missing numerics are zero. Stop-time clocks stay as the raw `HH:MM:SS`
//! strings at parse time because they may exceed `24:00:00`; conversion
//! to seconds happens at insert time.

use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq)]
pub struct AgencyRecord {
    pub agency_id: String,
    pub agency_name: String,
    pub agency_url: String,
    pub agency_timezone: String,
    pub agency_lang: String,
    pub agency_fare_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopRecord {
    pub stop_id: String,
    pub stop_name: String,
    pub stop_lat: f64,
    pub stop_lon: f64,
    pub location_type: i32,
    pub parent_station: String,
    pub wheelchair_boarding: i32,
    pub level_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteRecord {
    pub route_id: String,
    pub agency_id: String,
    pub route_short_name: String,
    pub route_long_name: String,
    pub route_type: i32,
    pub route_color: String,
    pub route_text_color: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarRecord {
    pub service_id: String,
    pub weekdays: [bool; 7],
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarDateRecord {
    pub service_id: String,
    pub date: NaiveDate,
    /// 1 = service added, 2 = service removed.
    pub exception_type: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TripRecord {
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
    pub shape_id: String,
    pub trip_headsign: String,
    pub direction_id: i32,
    pub block_id: String,
    pub wheelchair_accessible: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopTimeRecord {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: i32,
    /// Raw `HH:MM:SS`, hours may exceed 24.
    pub arrival_time: String,
    pub departure_time: String,
    pub stop_headsign: String,
    pub pickup_type: i32,
    pub drop_off_type: i32,
    pub shape_dist_traveled: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeRecord {
    pub shape_id: String,
    pub shape_pt_lat: f64,
    pub shape_pt_lon: f64,
    pub shape_pt_sequence: i32,
    pub shape_dist_traveled: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LevelRecord {
    pub level_id: String,
    pub level_index: f64,
    pub level_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathwayRecord {
    pub pathway_id: String,
    pub from_stop_id: String,
    pub to_stop_id: String,
    pub pathway_mode: i32,
    pub is_bidirectional: i32,
    pub traversal_time: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub from_stop_id: String,
    pub to_stop_id: String,
    pub from_route_id: String,
    pub to_route_id: String,
    pub from_trip_id: String,
    pub to_trip_id: String,
    pub transfer_type: i32,
    pub min_transfer_time: i32,
}
