//! Decoding of the upstream AIS feed (aisstream.io JSON) and the in-memory
//! vessel registry that joins position reports with static voyage data.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use qaaq_types::ais::Ship;
use qaaq_types::geo::{BoundingBox, valid_coordinates};

/// Heading value meaning "not available".
const HEADING_UNAVAILABLE: u16 = 511;

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(rename = "MessageType")]
    message_type: String,
    #[serde(rename = "MetaData")]
    meta: MetaData,
    #[serde(rename = "Message")]
    message: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MetaData {
    #[serde(rename = "MMSI")]
    mmsi: u32,
    #[serde(rename = "ShipName", default)]
    ship_name: String,
    #[serde(default)]
    time_utc: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PositionReport {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    sog: f64,
    #[serde(default)]
    cog: f64,
    #[serde(default = "heading_unavailable")]
    true_heading: u16,
}

fn heading_unavailable() -> u16 {
    HEADING_UNAVAILABLE
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ShipStaticData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    call_sign: String,
    #[serde(default)]
    imo_number: u32,
    #[serde(rename = "Type", default)]
    ship_type: u8,
    #[serde(default)]
    destination: String,
    eta: Option<Eta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Eta {
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
}

/// One decoded upstream message that the registry cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    Position {
        mmsi: u32,
        name: Option<String>,
        latitude: f64,
        longitude: f64,
        speed: f64,
        course: f64,
        heading: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    Static {
        mmsi: u32,
        name: Option<String>,
        call_sign: Option<String>,
        imo: Option<u32>,
        ship_type: String,
        destination: Option<String>,
        eta: Option<String>,
    },
}

/// Decode one upstream frame. `Ok(None)` for message types we do not use
/// and for positions with unusable coordinates.
pub fn parse_stream_message(text: &str) -> Result<Option<FeedUpdate>> {
    let msg: StreamMessage = serde_json::from_str(text)?;
    let mmsi = msg.meta.mmsi;

    match msg.message_type.as_str() {
        "PositionReport" | "StandardClassBPositionReport" => {
            let body = msg
                .message
                .get(&msg.message_type)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("{} without body", msg.message_type))?;
            let report: PositionReport = serde_json::from_value(body)?;

            if !valid_coordinates(report.latitude, report.longitude) {
                return Ok(None);
            }

            Ok(Some(FeedUpdate::Position {
                mmsi,
                name: clean_text(&msg.meta.ship_name),
                latitude: report.latitude,
                longitude: report.longitude,
                speed: report.sog,
                course: report.cog,
                heading: (report.true_heading != HEADING_UNAVAILABLE).then_some(report.true_heading as f64),
                timestamp: parse_feed_time(&msg.meta.time_utc).unwrap_or_else(Utc::now),
            }))
        }
        "ShipStaticData" => {
            let body = msg
                .message
                .get("ShipStaticData")
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("ShipStaticData without body"))?;
            let data: ShipStaticData = serde_json::from_value(body)?;

            Ok(Some(FeedUpdate::Static {
                mmsi,
                name: clean_text(&data.name).or_else(|| clean_text(&msg.meta.ship_name)),
                call_sign: clean_text(&data.call_sign),
                imo: (data.imo_number != 0).then_some(data.imo_number),
                ship_type: ship_type_name(data.ship_type).to_string(),
                destination: clean_text(&data.destination),
                eta: data.eta.and_then(format_eta),
            }))
        }
        _ => Ok(None),
    }
}

/// Subscription frame the upstream expects right after connecting.
pub fn subscription_message(api_key: &str, boxes: &[BoundingBox]) -> serde_json::Value {
    let boxes: Vec<[[f64; 2]; 2]> = if boxes.is_empty() {
        vec![[[-90.0, -180.0], [90.0, 180.0]]]
    } else {
        boxes
            .iter()
            .map(|b| [[b.south, b.west], [b.north, b.east]])
            .collect()
    };

    json!({
        "APIKey": api_key,
        "BoundingBoxes": boxes,
        "FilterMessageTypes": ["PositionReport", "StandardClassBPositionReport", "ShipStaticData"],
    })
}

/// AIS text fields are space- or '@'-padded.
fn clean_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim_matches(|c: char| c == '@' || c.is_whitespace());
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Upstream timestamps look like "2024-05-01 10:22:32.318353 +0000 UTC".
fn parse_feed_time(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim_end_matches(" UTC");
    DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f %z")
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}

/// Month 0 or day 0 means no ETA was entered.
fn format_eta(eta: Eta) -> Option<String> {
    if eta.month == 0 || eta.day == 0 || eta.month > 12 || eta.day > 31 {
        return None;
    }
    if eta.hour >= 24 || eta.minute >= 60 {
        return Some(format!("{:02}-{:02}", eta.month, eta.day));
    }
    Some(format!("{:02}-{:02} {:02}:{:02}", eta.month, eta.day, eta.hour, eta.minute))
}

/// Map an AIS ship-type code to a display category.
pub fn ship_type_name(code: u8) -> &'static str {
    match code {
        20..=29 => "Wing in Ground",
        30 => "Fishing",
        31 | 32 => "Towing",
        33 => "Dredging",
        34 => "Diving Ops",
        35 => "Military Ops",
        36 => "Sailing",
        37 => "Pleasure Craft",
        40..=49 => "High Speed Craft",
        50 => "Pilot Vessel",
        51 => "Search and Rescue",
        52 => "Tug",
        53 => "Port Tender",
        54 => "Anti-Pollution",
        55 => "Law Enforcement",
        58 => "Medical Transport",
        60..=69 => "Passenger",
        70..=79 => "Cargo",
        80..=89 => "Tanker",
        90..=99 => "Other",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, Default)]
struct Vessel {
    name: Option<String>,
    call_sign: Option<String>,
    imo: Option<u32>,
    ship_type: Option<String>,
    destination: Option<String>,
    eta: Option<String>,
    position: Option<Position>,
    last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct Position {
    latitude: f64,
    longitude: f64,
    speed: f64,
    course: f64,
    heading: Option<f64>,
    timestamp: DateTime<Utc>,
}

impl Vessel {
    fn to_ship(&self, mmsi: u32) -> Option<Ship> {
        let pos = self.position?;
        Some(Ship {
            id: mmsi.to_string(),
            name: self.name.clone().unwrap_or_else(|| format!("MMSI {}", mmsi)),
            latitude: pos.latitude,
            longitude: pos.longitude,
            speed: pos.speed,
            course: pos.course,
            heading: pos.heading,
            mmsi,
            ship_type: self.ship_type.clone().unwrap_or_else(|| "Unknown".to_string()),
            destination: self.destination.clone(),
            eta: self.eta.clone(),
            call_sign: self.call_sign.clone(),
            imo: self.imo,
            timestamp: pos.timestamp,
        })
    }
}

/// Latest known state per MMSI.
#[derive(Debug, Default)]
pub struct VesselRegistry {
    vessels: HashMap<u32, Vessel>,
}

impl VesselRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vessels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vessels.is_empty()
    }

    /// Fold an update in. Returns the vessel as it should be relayed, or
    /// `None` while its position is still unknown.
    pub fn apply(&mut self, update: FeedUpdate, now: DateTime<Utc>) -> Option<Ship> {
        match update {
            FeedUpdate::Position { mmsi, name, latitude, longitude, speed, course, heading, timestamp } => {
                let vessel = self.vessels.entry(mmsi).or_default();
                if vessel.name.is_none() {
                    vessel.name = name;
                }
                vessel.position = Some(Position { latitude, longitude, speed, course, heading, timestamp });
                vessel.last_seen = Some(now);
                vessel.to_ship(mmsi)
            }
            FeedUpdate::Static { mmsi, name, call_sign, imo, ship_type, destination, eta } => {
                let vessel = self.vessels.entry(mmsi).or_default();
                if name.is_some() {
                    vessel.name = name;
                }
                vessel.call_sign = call_sign.or(vessel.call_sign.take());
                vessel.imo = imo.or(vessel.imo);
                vessel.ship_type = Some(ship_type);
                vessel.destination = destination;
                vessel.eta = eta;
                vessel.last_seen = Some(now);
                vessel.to_ship(mmsi)
            }
        }
    }

    /// Every positioned vessel inside `bounds` (or everywhere).
    pub fn ships_in(&self, bounds: Option<&BoundingBox>) -> Vec<Ship> {
        self.vessels
            .iter()
            .filter_map(|(mmsi, vessel)| vessel.to_ship(*mmsi))
            .filter(|ship| bounds.is_none_or(|b| b.contains(ship.latitude, ship.longitude)))
            .collect()
    }

    /// Forget vessels not heard from since `cutoff`. Returns how many went.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.vessels.len();
        self.vessels
            .retain(|_, vessel| vessel.last_seen.is_some_and(|seen| seen >= cutoff));
        before - self.vessels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSITION: &str = r#"{
        "MessageType": "PositionReport",
        "MetaData": {"MMSI": 419000123, "ShipName": "SAGAR KANYA         ", "latitude": 18.95, "longitude": 72.83,
                     "time_utc": "2024-05-01 10:22:32.318353 +0000 UTC"},
        "Message": {"PositionReport": {"Cog": 212.4, "Sog": 11.2, "TrueHeading": 511,
                    "Latitude": 18.95, "Longitude": 72.83, "UserID": 419000123}}
    }"#;

    const STATIC: &str = r#"{
        "MessageType": "ShipStaticData",
        "MetaData": {"MMSI": 419000123, "ShipName": "SAGAR KANYA", "latitude": 18.95, "longitude": 72.83,
                     "time_utc": "2024-05-01 10:23:00.000000 +0000 UTC"},
        "Message": {"ShipStaticData": {"Name": "SAGAR KANYA@@@@", "CallSign": "VWSK  ", "ImoNumber": 8201234,
                    "Type": 71, "Destination": "SINGAPORE", "Eta": {"Month": 5, "Day": 4, "Hour": 6, "Minute": 30},
                    "UserID": 419000123}}
    }"#;

    #[test]
    fn parses_position_report() {
        let update = parse_stream_message(POSITION).unwrap().unwrap();
        match update {
            FeedUpdate::Position { mmsi, name, heading, speed, timestamp, .. } => {
                assert_eq!(mmsi, 419000123);
                assert_eq!(name.as_deref(), Some("SAGAR KANYA"));
                assert_eq!(heading, None);
                assert!((speed - 11.2).abs() < 1e-9);
                assert_eq!(timestamp.timestamp(), 1714558952);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_class_b_positions() {
        let class_b = POSITION.replace("PositionReport", "StandardClassBPositionReport");
        match parse_stream_message(&class_b).unwrap().unwrap() {
            FeedUpdate::Position { mmsi, latitude, .. } => {
                assert_eq!(mmsi, 419000123);
                assert!((latitude - 18.95).abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }
        let msg = subscription_message("key", &[]);
        assert_eq!(msg["FilterMessageTypes"][1], "StandardClassBPositionReport");
    }

    #[test]
    fn parses_static_data() {
        match parse_stream_message(STATIC).unwrap().unwrap() {
            FeedUpdate::Static { name, call_sign, imo, ship_type, eta, .. } => {
                assert_eq!(name.as_deref(), Some("SAGAR KANYA"));
                assert_eq!(call_sign.as_deref(), Some("VWSK"));
                assert_eq!(imo, Some(8201234));
                assert_eq!(ship_type, "Cargo");
                assert_eq!(eta.as_deref(), Some("05-04 06:30"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn drops_unavailable_coordinates_and_unknown_types() {
        let bad = POSITION.replace(r#""Latitude": 18.95"#, r#""Latitude": 91"#);
        assert!(parse_stream_message(&bad).unwrap().is_none());

        let other = r#"{"MessageType": "AidsToNavigationReport", "MetaData": {"MMSI": 1}, "Message": {}}"#;
        assert!(parse_stream_message(other).unwrap().is_none());

        assert!(parse_stream_message("not json").is_err());
    }

    #[test]
    fn registry_merges_static_into_positions() {
        let mut registry = VesselRegistry::new();
        let now = Utc::now();

        // Static data alone has nothing to draw yet
        let static_update = parse_stream_message(STATIC).unwrap().unwrap();
        assert!(registry.apply(static_update, now).is_none());

        let position = parse_stream_message(POSITION).unwrap().unwrap();
        let ship = registry.apply(position, now).unwrap();
        assert_eq!(ship.id, "419000123");
        assert_eq!(ship.destination.as_deref(), Some("SINGAPORE"));
        assert_eq!(ship.imo, Some(8201234));
        assert_eq!(ship.ship_type, "Cargo");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_filters_by_box_and_prunes() {
        let mut registry = VesselRegistry::new();
        let old = Utc::now() - chrono::Duration::hours(2);
        let now = Utc::now();

        registry.apply(parse_stream_message(POSITION).unwrap().unwrap(), old);
        let far = POSITION
            .replace("419000123", "563000001")
            .replace(r#""Latitude": 18.95, "Longitude": 72.83"#, r#""Latitude": 1.26, "Longitude": 103.84"#);
        registry.apply(parse_stream_message(&far).unwrap().unwrap(), now);

        let arabian_sea = BoundingBox { north: 25.0, south: 10.0, east: 78.0, west: 60.0 };
        let inside = registry.ships_in(Some(&arabian_sea));
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].mmsi, 419000123);
        assert_eq!(registry.ships_in(None).len(), 2);

        assert_eq!(registry.prune(now - chrono::Duration::minutes(30)), 1);
        assert_eq!(registry.ships_in(None)[0].mmsi, 563000001);
    }

    #[test]
    fn subscription_defaults_to_whole_world() {
        let msg = subscription_message("key", &[]);
        assert_eq!(msg["APIKey"], "key");
        assert_eq!(msg["BoundingBoxes"][0][1][1], 180.0);
    }

    #[test]
    fn eta_without_time_keeps_date() {
        let eta = Eta { month: 12, day: 24, hour: 24, minute: 60 };
        assert_eq!(format_eta(eta).as_deref(), Some("12-24"));
        assert!(format_eta(Eta { month: 0, day: 0, hour: 24, minute: 60 }).is_none());
    }
}
