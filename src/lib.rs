//! leafspy-relay - telemetry ingestion for the LeafSpy EV diagnostics app
//!
//! Stores every update the car sends, relays it to leaf-status.com, and
//! renders status and trip pages from the stored samples.
//!
//! # Wire fields
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `Gids`, `SOC`, `AHr`, `SOH` | battery charge and health |
//! | `Lat`, `Long`, `Elv` | position |
//! | `Trip`, `Seq` | trip grouping and sequence |
//! | `Odo` | odometer in km (miles derived on read) |
//!
//! # Quick Start
//!
//! ```no_run
//! use leafspy_relay::{TelemetryStore, TripOrder};
//!
//! let store = TelemetryStore::open("leafspy.db").unwrap();
//!
//! if let Some(sample) = store.latest_sample().unwrap() {
//!     println!("SOC {:.1}% at {}", sample.state_of_charge, sample.timestamp);
//! }
//!
//! for trip in store.list_trips(TripOrder::Desc).unwrap() {
//!     println!("trip {} started {}", trip.trip_id, trip.first_timestamp);
//! }
//! ```

pub mod config;
pub mod logging;
pub mod pages;
pub mod relay;
pub mod schema;
pub mod serve;
pub mod store;

pub use config::Config;
pub use relay::{Credentials, Relay, RelayError};
pub use serve::{AppState, STATUS_FAILED, STATUS_OK};
pub use store::{
    ErrorKind, NewSample, Sample, SampleParams, StoreError, TelemetryStore, Trip, TripOrder, TripSummary,
    missing_fields, KM_PER_MILE, WIRE_FIELDS,
};

