// LeafSpy schema - telemetry sample table for Diesel ORM

diesel::table! {
    samples (id) {
        id -> Integer,
        timestamp -> Timestamp,
        dev_battery -> SmallInt,
        gids -> Integer,
        latitude -> Double,
        longitude -> Double,
        elevation -> Integer,
        sequence -> Integer,
        trip_id -> Integer,
        odometer_km -> Double,       // odometer_mi is derived on read
        state_of_charge -> Double,
        amp_hours -> Double,
        battery_temp -> Double,
        ambient_temp -> Double,
        wiper_state -> SmallInt,
        plug_state -> SmallInt,
        charge_mode -> SmallInt,
        charge_power -> Integer,
        vin -> Text,
        power_switch -> SmallInt,
        temperature_units -> Text,   // "F" or "C"
        rpm -> Integer,
        state_of_health -> Double,
    }
}
