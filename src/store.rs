//! SQLite telemetry store with Diesel ORM
//!
//! Owns the append-only `samples` table. Every LeafSpy update becomes one
//! row; trips are never stored, they are grouped out of the rows on read.

use crate::schema::samples;
use chrono::{NaiveDateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Kilometres per mile, as used for the odometer conversion
pub const KM_PER_MILE: f64 = 1.609;

/// Raw request fields keyed by their LeafSpy wire name
pub type SampleParams = HashMap<String, String>;

/// Wire names of every field an update must carry
pub const WIRE_FIELDS: [&str; 21] = [
    "DevBat", "Gids", "Lat", "Long", "Elv", "Seq", "Trip", "Odo", "SOC", "AHr", "BatTemp", "Amb",
    "Wpr", "PlugState", "ChgrMode", "ChrgPwr", "VIN", "PwrSw", "Tunits", "RPM", "SOH",
];

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable sample, already coerced from the wire strings
#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = samples)]
pub struct NewSample {
    pub timestamp: NaiveDateTime,
    pub dev_battery: i16,
    pub gids: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: i32,
    pub sequence: i32,
    pub trip_id: i32,
    pub odometer_km: f64,
    pub state_of_charge: f64,
    pub amp_hours: f64,
    pub battery_temp: f64,
    pub ambient_temp: f64,
    pub wiper_state: i16,
    pub plug_state: i16,
    pub charge_mode: i16,
    pub charge_power: i32,
    pub vin: String,
    pub power_switch: i16,
    pub temperature_units: String,
    pub rpm: i32,
    pub state_of_health: f64,
}

/// Queryable row, exactly what the table holds
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = samples)]
struct SampleRow {
    id: i32,
    timestamp: NaiveDateTime,
    dev_battery: i16,
    gids: i32,
    latitude: f64,
    longitude: f64,
    elevation: i32,
    sequence: i32,
    trip_id: i32,
    odometer_km: f64,
    state_of_charge: f64,
    amp_hours: f64,
    battery_temp: f64,
    ambient_temp: f64,
    wiper_state: i16,
    plug_state: i16,
    charge_mode: i16,
    charge_power: i32,
    vin: String,
    power_switch: i16,
    temperature_units: String,
    rpm: i32,
    state_of_health: f64,
}

/// A materialized telemetry sample, with the derived odometer in miles
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub id: i32,
    pub timestamp: NaiveDateTime,
    pub dev_battery: i16,
    pub gids: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: i32,
    pub sequence: i32,
    pub trip_id: i32,
    pub odometer_km: f64,
    pub odometer_mi: f64,
    pub state_of_charge: f64,
    pub amp_hours: f64,
    pub battery_temp: f64,
    pub ambient_temp: f64,
    pub wiper_state: i16,
    pub plug_state: i16,
    pub charge_mode: i16,
    pub charge_power: i32,
    pub vin: String,
    pub power_switch: i16,
    pub temperature_units: String,
    pub rpm: i32,
    pub state_of_health: f64,
}

impl From<SampleRow> for Sample {
    fn from(row: SampleRow) -> Self {
        Self {
            id: row.id,
            timestamp: row.timestamp,
            dev_battery: row.dev_battery,
            gids: row.gids,
            latitude: row.latitude,
            longitude: row.longitude,
            elevation: row.elevation,
            sequence: row.sequence,
            trip_id: row.trip_id,
            odometer_km: row.odometer_km,
            odometer_mi: row.odometer_km / KM_PER_MILE,
            state_of_charge: row.state_of_charge,
            amp_hours: row.amp_hours,
            battery_temp: row.battery_temp,
            ambient_temp: row.ambient_temp,
            wiper_state: row.wiper_state,
            plug_state: row.plug_state,
            charge_mode: row.charge_mode,
            charge_power: row.charge_power,
            vin: row.vin,
            power_switch: row.power_switch,
            temperature_units: row.temperature_units,
            rpm: row.rpm,
            state_of_health: row.state_of_health,
        }
    }
}

/// One entry of the trip index
#[derive(QueryableByName, Debug, Clone, PartialEq, Serialize)]
pub struct Trip {
    #[diesel(sql_type = diesel::sql_types::Integer)]
    pub trip_id: i32,
    #[diesel(sql_type = diesel::sql_types::Timestamp)]
    pub first_timestamp: NaiveDateTime,
}

/// Start, end and duration of an ordered trip
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripSummary {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration_secs: i64,
}

impl TripSummary {
    /// Summarize samples already sorted ascending by time. `None` for an empty trip.
    pub fn from_samples(samples: &[Sample]) -> Option<Self> {
        let first = samples.first()?;
        let last = samples.last()?;
        Some(Self {
            start: first.timestamp,
            end: last.timestamp,
            duration_secs: (last.timestamp - first.timestamp).num_seconds(),
        })
    }
}

/// Sort direction for the trip index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TripOrder {
    Asc,
    #[default]
    Desc,
}

impl TripOrder {
    /// `asc` selects ascending; anything else, including nothing, is descending
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("asc") => TripOrder::Asc,
            _ => TripOrder::Desc,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            TripOrder::Asc => TripOrder::Desc,
            TripOrder::Desc => TripOrder::Asc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TripOrder::Asc => "asc",
            TripOrder::Desc => "desc",
        }
    }

    fn sql(self) -> &'static str {
        match self {
            TripOrder::Asc => "ASC",
            TripOrder::Desc => "DESC",
        }
    }
}

// ============================================================================
// Field coercion
// ============================================================================

fn raw_field<'a>(params: &'a SampleParams, name: &'static str) -> Result<&'a str> {
    params
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or(StoreError::Validation {
            field: name,
            reason: "missing".to_string(),
        })
}

fn parse_field<T>(params: &SampleParams, name: &'static str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = raw_field(params, name)?;
    raw.parse::<T>().map_err(|e| StoreError::Validation {
        field: name,
        reason: format!("{:?}: {}", raw, e),
    })
}

fn parse_float(params: &SampleParams, name: &'static str) -> Result<f64> {
    let value: f64 = parse_field(params, name)?;
    if !value.is_finite() {
        return Err(StoreError::Validation {
            field: name,
            reason: format!("{} is not a finite number", value),
        });
    }
    Ok(value)
}

fn parse_temperature_units(params: &SampleParams) -> Result<String> {
    let raw = raw_field(params, "Tunits")?;
    match raw.to_ascii_uppercase().as_str() {
        unit @ ("F" | "C") => Ok(unit.to_string()),
        _ => Err(StoreError::Validation {
            field: "Tunits",
            reason: format!("{:?}: expected F or C", raw),
        }),
    }
}

/// Wire fields absent or blank in `params`, in wire order
pub fn missing_fields(params: &SampleParams) -> Vec<&'static str> {
    WIRE_FIELDS
        .iter()
        .copied()
        .filter(|name| raw_field(params, name).is_err())
        .collect()
}

impl NewSample {
    /// Coerce raw wire fields into a sample stamped with `timestamp`.
    /// Fails on the first missing or malformed field.
    pub fn from_params(params: &SampleParams, timestamp: NaiveDateTime) -> Result<Self> {
        let missing = missing_fields(params);
        if let Some(&field) = missing.first() {
            return Err(StoreError::Validation {
                field,
                reason: format!("missing ({} of {} fields absent)", missing.len(), WIRE_FIELDS.len()),
            });
        }

        Ok(Self {
            timestamp,
            dev_battery: parse_field(params, "DevBat")?,
            gids: parse_field(params, "Gids")?,
            latitude: parse_float(params, "Lat")?,
            longitude: parse_float(params, "Long")?,
            elevation: parse_field(params, "Elv")?,
            sequence: parse_field(params, "Seq")?,
            trip_id: parse_field(params, "Trip")?,
            odometer_km: parse_float(params, "Odo")?,
            state_of_charge: parse_float(params, "SOC")?,
            amp_hours: parse_float(params, "AHr")?,
            battery_temp: parse_float(params, "BatTemp")?,
            ambient_temp: parse_float(params, "Amb")?,
            wiper_state: parse_field(params, "Wpr")?,
            plug_state: parse_field(params, "PlugState")?,
            charge_mode: parse_field(params, "ChgrMode")?,
            charge_power: parse_field(params, "ChrgPwr")?,
            vin: raw_field(params, "VIN")?.to_string(),
            power_switch: parse_field(params, "PwrSw")?,
            temperature_units: parse_temperature_units(params)?,
            rpm: parse_field(params, "RPM")?,
            state_of_health: parse_float(params, "SOH")?,
        })
    }
}

// ============================================================================
// Store
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid field {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("connection error: {0}")]
    Connection(String),
    #[error("query error: {0}")]
    Query(#[from] diesel::result::Error),
}

/// Coarse classification callers use to decide what to report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unavailable,
    Validation,
    Unknown,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Validation { .. } => ErrorKind::Validation,
            StoreError::Connection(_) => ErrorKind::Unavailable,
            StoreError::Query(diesel::result::Error::DatabaseError(..)) => ErrorKind::Unavailable,
            StoreError::Query(_) => ErrorKind::Unknown,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Applied to every pooled connection before use
#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Telemetry store backed by a SQLite connection pool
#[derive(Clone)]
pub struct TelemetryStore {
    pool: DbPool,
}

impl TelemetryStore {
    /// Open (creating if needed) the database at `path` with the default pool size
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_pool_size(path, 5)
    }

    pub fn open_with_pool_size<P: AsRef<Path>>(path: P, pool_size: u32) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Connection(e.to_string()))?;
            }
        }

        let manager = ConnectionManager::<SqliteConnection>::new(path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_customizer(Box::new(SqlitePragmas))
            .build(manager)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.init_schema()?;
        debug!(path = %path.display(), pool_size, "telemetry store opened");
        Ok(store)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| StoreError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                timestamp TIMESTAMP NOT NULL,
                dev_battery SMALLINT NOT NULL,
                gids INTEGER NOT NULL,
                latitude DOUBLE NOT NULL,
                longitude DOUBLE NOT NULL,
                elevation INTEGER NOT NULL,
                sequence INTEGER NOT NULL,
                trip_id INTEGER NOT NULL,
                odometer_km DOUBLE NOT NULL,
                state_of_charge DOUBLE NOT NULL,
                amp_hours DOUBLE NOT NULL,
                battery_temp DOUBLE NOT NULL,
                ambient_temp DOUBLE NOT NULL,
                wiper_state SMALLINT NOT NULL,
                plug_state SMALLINT NOT NULL,
                charge_mode SMALLINT NOT NULL,
                charge_power INTEGER NOT NULL,
                vin TEXT NOT NULL,
                power_switch SMALLINT NOT NULL,
                temperature_units TEXT NOT NULL,
                rpm INTEGER NOT NULL,
                state_of_health DOUBLE NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON samples(timestamp)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_samples_trip ON samples(trip_id, timestamp)").execute(&mut conn)?;

        Ok(())
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Validate and insert one update, stamped with the current time
    pub fn insert_sample(&self, params: &SampleParams) -> Result<i32> {
        self.insert_sample_at(params, Utc::now().naive_utc())
    }

    /// Validate and insert one update with an explicit timestamp
    pub fn insert_sample_at(&self, params: &SampleParams, timestamp: NaiveDateTime) -> Result<i32> {
        // Coercion happens before a connection is taken, so a bad field never reaches the table
        let sample = NewSample::from_params(params, timestamp)?;
        self.insert(&sample)
    }

    /// Only reachable through `insert_sample_at`, after coercion
    fn insert(&self, sample: &NewSample) -> Result<i32> {
        let mut conn = self.get_conn()?;

        diesel::insert_into(samples::table)
            .values(sample)
            .execute(&mut conn)?;

        let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
            .first(&mut conn)?;

        Ok(id)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Most recent sample, or `None` if nothing has been stored yet
    pub fn latest_sample(&self) -> Result<Option<Sample>> {
        let mut conn = self.get_conn()?;
        let row = samples::table
            .order((samples::timestamp.desc(), samples::id.desc()))
            .select(SampleRow::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(row.map(Sample::from))
    }

    /// All samples of one trip, oldest first
    pub fn samples_by_trip(&self, trip_id: i32) -> Result<Vec<Sample>> {
        let mut conn = self.get_conn()?;
        let rows = samples::table
            .filter(samples::trip_id.eq(trip_id))
            .order((samples::timestamp.asc(), samples::id.asc()))
            .select(SampleRow::as_select())
            .load(&mut conn)?;
        Ok(rows.into_iter().map(Sample::from).collect())
    }

    /// Trip index: one entry per trip id with its earliest timestamp
    pub fn list_trips(&self, order: TripOrder) -> Result<Vec<Trip>> {
        let mut conn = self.get_conn()?;
        let query = format!(
            "SELECT trip_id, MIN(timestamp) AS first_timestamp FROM samples \
             GROUP BY trip_id ORDER BY first_timestamp {dir}, trip_id {dir}",
            dir = order.sql()
        );
        let trips = diesel::sql_query(query).load::<Trip>(&mut conn)?;
        Ok(trips)
    }

    pub fn count_samples(&self) -> Result<i64> {
        let mut conn = self.get_conn()?;
        let count = samples::table.count().get_result(&mut conn)?;
        Ok(count)
    }
}
