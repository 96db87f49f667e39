use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::BoundingBox;

/// A vessel as relayed to map clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ship {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Speed over ground, knots.
    pub speed: f64,
    /// Course over ground, degrees.
    pub course: f64,
    /// True heading in degrees; `None` when the transponder reports 511.
    pub heading: Option<f64>,
    pub mmsi: u32,
    pub ship_type: String,
    pub destination: Option<String>,
    pub eta: Option<String>,
    pub call_sign: Option<String>,
    pub imo: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

/// Frames sent from the relay to a downstream client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AisFrame {
    /// One vessel changed position or static data
    ShipUpdate { ship: Ship },

    /// All known vessels inside the client's box
    Snapshot { ships: Vec<Ship> },

    /// Upstream feed state
    Status { connected: bool, message: String },
}

/// Messages a downstream client may send to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AisClientMessage {
    SetBounds { bounds: BoundingBox },
    ClearBounds,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ship_update_uses_camel_case_fields() {
        let frame = AisFrame::ShipUpdate {
            ship: Ship {
                id: "419000123".into(),
                name: "MV SAGAR".into(),
                latitude: 18.9,
                longitude: 72.8,
                speed: 11.5,
                course: 210.0,
                heading: None,
                mmsi: 419000123,
                ship_type: "Cargo".into(),
                destination: Some("SINGAPORE".into()),
                eta: None,
                call_sign: Some("AVXY".into()),
                imo: Some(9123456),
                timestamp: Utc::now(),
            },
        };

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "ship_update");
        assert_eq!(json["ship"]["shipType"], "Cargo");
        assert_eq!(json["ship"]["callSign"], "AVXY");
        assert!(json["ship"]["heading"].is_null());
    }

    #[test]
    fn client_set_bounds_parses() {
        let msg: AisClientMessage = serde_json::from_str(
            r#"{"type":"set_bounds","bounds":{"north":20,"south":10,"east":80,"west":70}}"#,
        )
        .unwrap();
        match msg {
            AisClientMessage::SetBounds { bounds } => assert!(bounds.contains(15.0, 75.0)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
