//! Integration tests for the leafspy-relay CLI
//!
//! These tests run the built binary against a temporary database.
//! They verify that commands work end-to-end without mocking.

use chrono::NaiveDate;
use leafspy_relay::{SampleParams, TelemetryStore};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Helper to run leafspy-relay with a specific database and no config file
fn run_leafspy(args: &[&str], dir: &Path, db_path: &PathBuf) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_leafspy-relay"))
        .args(args)
        .arg("--db")
        .arg(db_path)
        .arg("--config")
        .arg(dir.join("absent.toml"))
        .current_dir(dir)
        .env_remove("LEAFSPY_DB_PATH")
        .env_remove("LEAFSTATUS_USER")
        .env_remove("LEAFSTATUS_PASS")
        .output()
        .expect("Failed to execute leafspy-relay")
}

/// Helper to get stdout as string
fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Helper to get stderr as string
fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn params(trip: i32, odo: &str) -> SampleParams {
    let trip = trip.to_string();
    [
        ("DevBat", "12"), ("Gids", "180"), ("Lat", "52.37"), ("Long", "4.89"), ("Elv", "2"),
        ("Seq", "1"), ("Trip", trip.as_str()), ("Odo", odo), ("SOC", "64.0"), ("AHr", "48.1"),
        ("BatTemp", "21.5"), ("Amb", "12.0"), ("Wpr", "0"), ("PlugState", "0"), ("ChgrMode", "0"),
        ("ChrgPwr", "0"), ("VIN", "SJNFAAZE1U0000001"), ("PwrSw", "1"), ("Tunits", "F"),
        ("RPM", "0"), ("SOH", "91.2"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

// =============================================================================
// Basic Command Tests
// =============================================================================

#[test]
fn test_help_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_leafspy-relay"))
        .arg("--help")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("leafspy-relay"));
    assert!(out.contains("serve"));
    assert!(out.contains("trips"));
}

#[test]
fn test_version_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_leafspy-relay"))
        .arg("--version")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    assert!(stdout(&output).contains("leafspy-relay"));
}

// =============================================================================
// Query Commands
// =============================================================================

#[test]
fn test_latest_on_empty_database() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");

    let output = run_leafspy(&["latest"], temp_dir.path(), &db_path);
    assert!(output.status.success(), "latest failed: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "null");

    let output = run_leafspy(&["trips"], temp_dir.path(), &db_path);
    assert!(output.status.success(), "trips failed: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "[]");
}

#[test]
fn test_latest_reports_derived_miles() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    {
        let store = TelemetryStore::open(&db_path).unwrap();
        store.insert_sample(&params(5, "16090")).unwrap();
    }

    let output = run_leafspy(&["latest"], temp_dir.path(), &db_path);
    assert!(output.status.success(), "latest failed: {}", stderr(&output));

    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["trip_id"], 5);
    assert_eq!(json["temperature_units"], "F");
    let miles = json["odometer_mi"].as_f64().unwrap();
    assert!((miles - 10000.0).abs() < 1e-6);
}

#[test]
fn test_trips_and_trip_commands() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let day = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
    {
        let store = TelemetryStore::open(&db_path).unwrap();
        store.insert_sample_at(&params(1, "10"), day.and_hms_opt(7, 0, 0).unwrap()).unwrap();
        store.insert_sample_at(&params(2, "20"), day.and_hms_opt(9, 0, 0).unwrap()).unwrap();
        store.insert_sample_at(&params(1, "15"), day.and_hms_opt(7, 30, 0).unwrap()).unwrap();
    }

    let output = run_leafspy(&["trips", "--order", "asc"], temp_dir.path(), &db_path);
    assert!(output.status.success(), "trips failed: {}", stderr(&output));
    let trips: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let ids: Vec<i64> = trips.as_array().unwrap().iter().map(|t| t["trip_id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 2]);

    let output = run_leafspy(&["trips"], temp_dir.path(), &db_path);
    let trips: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(trips[0]["trip_id"], 2);

    let output = run_leafspy(&["trip", "1"], temp_dir.path(), &db_path);
    assert!(output.status.success(), "trip failed: {}", stderr(&output));
    let samples: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let odos: Vec<f64> = samples.as_array().unwrap().iter().map(|s| s["odometer_km"].as_f64().unwrap()).collect();
    assert_eq!(odos, vec![10.0, 15.0]);
}

#[test]
fn test_malformed_config_fails() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("leafspy.toml");
    std::fs::write(&config_path, "[database\npath = ").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_leafspy-relay"))
        .args(["latest", "--config"])
        .arg(&config_path)
        .current_dir(temp_dir.path())
        .output()
        .expect("Failed to execute");

    assert!(!output.status.success());
    assert!(stderr(&output).contains("failed to parse"));
}
