//! Ingestion daemon for Victorian public-transport data.
//!
//! Two pipelines feed a Postgres store: a static pipeline that polls the
//! open-data portal for new GTFS schedule archives and imports them as
//! versioned snapshots with blue/green activation, and a realtime pipeline
//! that polls GTFS-realtime protobuf feeds and bulk-inserts the decoded
//! entities against the active snapshot. A maintenance scheduler ages out
//! realtime rows and garbage-collects inactive snapshots.

pub mod config;
pub mod maintenance;
pub mod realtime;
pub mod schedule;
pub mod store;

/// Reader/writer lock serializing schedule imports against maintenance.
/// The static scheduler holds the write side for the duration of an
/// import; retention tasks take the read side and skip their cycle when
/// an import is in flight.
pub type ImportLock = std::sync::Arc<tokio::sync::RwLock<()>>;
