//! HTML pages for the status, trip index and single-trip views

use crate::store::{Sample, Trip, TripOrder, TripSummary};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt::Write;

const STYLE: &str = r#"
    :root { --bg: #f5f5f7; --card: #ffffff; --border: #d2d2d7; --text: #1d1d1f; --dim: #86868b; --accent: #007aff; }
    * { box-sizing: border-box; margin: 0; padding: 0; }
    body { font-family: -apple-system, BlinkMacSystemFont, 'Helvetica Neue', Helvetica, Arial, sans-serif; background: var(--bg); color: var(--text); line-height: 1.5; }
    .container { max-width: 1100px; margin: 0 auto; padding: 2rem; }
    nav { display: flex; gap: 1.5rem; margin-bottom: 2rem; padding-bottom: 1rem; border-bottom: 1px solid var(--border); }
    nav a, a { color: var(--accent); text-decoration: none; }
    .logo { font-weight: 700; font-size: 1.25rem; }
    .card { background: var(--card); border-radius: 12px; padding: 1.5rem; margin-bottom: 1.5rem; box-shadow: 0 2px 8px rgba(0,0,0,0.08); }
    table { width: 100%; border-collapse: collapse; font-size: 0.9rem; }
    th, td { text-align: left; padding: 0.4rem 0.6rem; border-bottom: 1px solid var(--border); }
    th { color: var(--dim); font-weight: 500; }
    .dim { color: var(--dim); }
    #map { height: 420px; border-radius: 12px; }
"#;

/// Escape text for HTML element and attribute content
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn fmt_time(t: &NaiveDateTime) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn fmt_duration(secs: i64) -> String {
    format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn layout(title: &str, body: &str, head_extra: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title} - LeafSpy</title>
    <style>{STYLE}</style>
    {head_extra}
</head>
<body>
<div class="container">
    <nav><span class="logo">LeafSpy</span><a href="/index/">Status</a><a href="/trips/">Trips</a></nav>
{body}
</div>
</body>
</html>
"#,
        title = escape_html(title),
    )
}

fn maps_script(api_key: Option<&str>) -> String {
    match api_key {
        Some(key) => format!(
            r#"<script src="https://maps.googleapis.com/maps/api/js?key={}"></script>"#,
            escape_html(key)
        ),
        None => String::new(),
    }
}

#[derive(Serialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

/// Inline script drawing `points` as a polyline (or a marker for one point)
fn map_block(samples: &[Sample]) -> String {
    let points: Vec<LatLng> = samples
        .iter()
        .map(|s| LatLng {
            lat: s.latitude,
            lng: s.longitude,
        })
        .collect();
    let json = serde_json::to_string(&points).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"<div class="card"><div id="map"></div></div>
<script>
(function() {{
    var points = {json};
    if (!window.google || points.length === 0) {{ return; }}
    var map = new google.maps.Map(document.getElementById('map'), {{ zoom: 13, center: points[points.length - 1] }});
    if (points.length === 1) {{
        new google.maps.Marker({{ position: points[0], map: map }});
    }} else {{
        new google.maps.Polyline({{ path: points, map: map, strokeColor: '#007aff', strokeWeight: 4 }});
        var bounds = new google.maps.LatLngBounds();
        points.forEach(function(p) {{ bounds.extend(p); }});
        map.fitBounds(bounds);
    }}
}})();
</script>"#
    )
}

/// Landing page
pub fn base_page(gmaps_api_key: Option<&str>) -> String {
    let body = r#"    <div class="card">
        <h1>LeafSpy telemetry</h1>
        <p class="dim">Live data relayed from the car. See the <a href="/index/">current status</a> or browse <a href="/trips/">trips</a>.</p>
    </div>"#;
    layout("Home", body, &maps_script(gmaps_api_key))
}

/// Current status: the most recent sample
pub fn index_page(latest: Option<&Sample>, gmaps_api_key: Option<&str>) -> String {
    let Some(s) = latest else {
        return layout(
            "Status",
            r#"    <div class="card"><h1>Status</h1><p class="dim">No data received yet.</p></div>"#,
            "",
        );
    };

    let mut body = String::new();
    let _ = write!(
        body,
        r#"    <div class="card">
        <h1>Status</h1>
        <p class="dim">Last update {time} (trip <a href="/trips/?id={trip}">{trip}</a>)</p>
        <table>
            <tr><th>State of charge</th><td>{soc:.1} %</td></tr>
            <tr><th>GIDs</th><td>{gids}</td></tr>
            <tr><th>Amp hours</th><td>{ahr:.2} Ah</td></tr>
            <tr><th>State of health</th><td>{soh:.1} %</td></tr>
            <tr><th>Battery temperature</th><td>{bat:.1} °{units}</td></tr>
            <tr><th>Ambient temperature</th><td>{amb:.1} °{units}</td></tr>
            <tr><th>Odometer</th><td>{km:.0} km / {mi:.0} mi</td></tr>
            <tr><th>Charge power</th><td>{pwr} W</td></tr>
            <tr><th>Plug state</th><td>{plug}</td></tr>
            <tr><th>Elevation</th><td>{elv} m</td></tr>
            <tr><th>12V battery</th><td>{devbat}</td></tr>
            <tr><th>VIN</th><td>{vin}</td></tr>
        </table>
    </div>
"#,
        time = fmt_time(&s.timestamp),
        trip = s.trip_id,
        soc = s.state_of_charge,
        gids = s.gids,
        ahr = s.amp_hours,
        soh = s.state_of_health,
        bat = s.battery_temp,
        amb = s.ambient_temp,
        units = escape_html(&s.temperature_units),
        km = s.odometer_km,
        mi = s.odometer_mi,
        pwr = s.charge_power,
        plug = s.plug_state,
        elv = s.elevation,
        devbat = s.dev_battery,
        vin = escape_html(&s.vin),
    );
    if gmaps_api_key.is_some() {
        body.push_str(&map_block(std::slice::from_ref(s)));
    }
    layout("Status", &body, &maps_script(gmaps_api_key))
}

/// Trip index with a link flipping the sort order
pub fn trips_page(trips: &[Trip], order: TripOrder) -> String {
    let flip = order.flipped();
    let mut body = String::new();
    let _ = write!(
        body,
        r#"    <div class="card">
        <h1>Trips</h1>
        <p class="dim">{count} trips, {label} first. <a href="/trips/?order={flip}">Sort {flip_label} first</a></p>
"#,
        count = trips.len(),
        label = if order == TripOrder::Asc { "oldest" } else { "newest" },
        flip = flip.as_str(),
        flip_label = if flip == TripOrder::Asc { "oldest" } else { "newest" },
    );

    if trips.is_empty() {
        body.push_str("        <p>No trips recorded.</p>\n");
    } else {
        body.push_str("        <table>\n            <tr><th>Trip</th><th>Started</th></tr>\n");
        for trip in trips {
            let _ = writeln!(
                body,
                r#"            <tr><td><a href="/trips/?id={id}">{id}</a></td><td>{start}</td></tr>"#,
                id = trip.trip_id,
                start = fmt_time(&trip.first_timestamp),
            );
        }
        body.push_str("        </table>\n");
    }
    body.push_str("    </div>");
    layout("Trips", &body, "")
}

/// One trip: summary, map and every sample in time order
pub fn trip_page(trip_id: i32, samples: &[Sample], gmaps_api_key: Option<&str>) -> String {
    let title = format!("Trip {}", trip_id);
    let Some(summary) = TripSummary::from_samples(samples) else {
        let body = format!(
            r#"    <div class="card"><h1>{}</h1><p class="dim">No samples for this trip.</p></div>"#,
            escape_html(&title)
        );
        return layout(&title, &body, "");
    };

    let mut body = String::new();
    let _ = write!(
        body,
        r#"    <div class="card">
        <h1>{title}</h1>
        <table>
            <tr><th>Start</th><td>{start}</td></tr>
            <tr><th>End</th><td>{end}</td></tr>
            <tr><th>Duration</th><td>{duration}</td></tr>
            <tr><th>Samples</th><td>{count}</td></tr>
        </table>
    </div>
"#,
        title = escape_html(&title),
        start = fmt_time(&summary.start),
        end = fmt_time(&summary.end),
        duration = fmt_duration(summary.duration_secs),
        count = samples.len(),
    );
    if gmaps_api_key.is_some() {
        body.push_str(&map_block(samples));
        body.push('\n');
    }

    body.push_str(
        "    <div class=\"card\">\n        <table>\n            <tr><th>Time</th><th>SOC</th><th>GIDs</th><th>Odometer (km)</th><th>Odometer (mi)</th><th>Elevation</th><th>RPM</th></tr>\n",
    );
    for s in samples {
        let _ = writeln!(
            body,
            "            <tr><td>{}</td><td>{:.1}</td><td>{}</td><td>{:.1}</td><td>{:.1}</td><td>{}</td><td>{}</td></tr>",
            fmt_time(&s.timestamp),
            s.state_of_charge,
            s.gids,
            s.odometer_km,
            s.odometer_mi,
            s.elevation,
            s.rpm,
        );
    }
    body.push_str("        </table>\n    </div>");
    layout(&title, &body, &maps_script(gmaps_api_key))
}

/// Shown to a browser when a page cannot be produced
pub fn error_page(status: u16, message: &str) -> String {
    let body = format!(
        r#"    <div class="card"><h1>Error {}</h1><p>{}</p></div>"#,
        status,
        escape_html(message)
    );
    layout("Error", &body, "")
}
