//! CZML trajectory documents.
//!
//! Produces the time-dynamic scene a propagator node writes when its
//! visualization window is configured: a document preamble with a clock,
//! then one packet per track carrying a satellite billboard, a label, a
//! trajectory path, and Lagrange-interpolated inertial position samples.

use bobcat_core::format_epoch;
use hifitime::Epoch;
use serde_json::{json, Value as Json};

/// Generic satellite marker, inlined so viewers need no asset server.
const BILLBOARD_IMAGE: &str = concat!(
    "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAABAAAAAQCAYAAAAf8/9",
    "hAAAAAXNSR0IArs4c6QAAAARnQU1BAACxjwv8YQUAAAAJcEhZcwAADsMAAA7DAcdv",
    "qGQAAADJSURBVDhPnZHRDcMgEEMZjVEYpaNklIzSEfLfD4qNnXAJSFWfhO7w2Zc0T",
    "f9QG2rXrEzSUeZLOGm47WoH95x3Hl3jEgilvDgsOQUTqsNl68ezEwn1vae6lceSEE",
    "YvvWNT/Rxc4CXQNGadho1NXoJ+9iaqc2xi2xbt23PJCDIB6TQjOC6Bho/sDy3fBQT",
    "8PrVhibU7yBFcEPaRxOoeTwbwByCOYf9VGp1BYI1BA+EeHhmfzKbBoJEQwn1yzUZt",
    "yspIQUha85MpkNIXB7GizqDEECsAAAAASUVORK5CYII=",
);

/// One sampled track: simtime-tagged inertial positions in kilometers.
#[derive(Debug, Clone)]
pub struct Track<'a> {
    /// Packet identity (stable per node and emission).
    pub id: &'a str,
    /// Display name (the meta-node the samples belong to).
    pub name: &'a str,
    /// UTC start of the availability interval.
    pub start: Epoch,
    /// UTC end of the availability interval.
    pub end: Epoch,
    /// `(simtime_secs, [x, y, z] km)` samples, ascending in time.
    pub samples_km: &'a [(f64, [f64; 3])],
}

/// Build a complete CZML document for one track.
///
/// `doc_epoch` is the scenario epoch (simtime zero); sample time tags are
/// seconds relative to it, matching how the engine stamps them.
pub fn satellite_document(doc_epoch: Epoch, doc_end: Epoch, track: &Track<'_>) -> Json {
    // CZML wants a flat [t, x_m, y_m, z_m, ...] array in meters.
    let mut cartesian = Vec::with_capacity(track.samples_km.len() * 4);
    for (t, position) in track.samples_km {
        cartesian.push(json!(t));
        for component in position {
            cartesian.push(json!(component * 1000.0));
        }
    }

    let interval = format!("{}/{}", format_epoch(doc_epoch), format_epoch(doc_end));
    let availability = format!("{}/{}", format_epoch(track.start), format_epoch(track.end));

    json!([
        {
            "id": "document",
            "name": "simple",
            "version": "1.0",
            "clock": {
                "interval": interval,
                "currentTime": format_epoch(track.start),
                "multiplier": 60,
            },
        },
        {
            "id": track.id,
            "name": track.name,
            "availability": availability,
            "billboard": {
                "horizontalOrigin": "CENTER",
                "verticalOrigin": "CENTER",
                "image": BILLBOARD_IMAGE,
                "scale": 1.5,
                "show": true,
            },
            "label": {
                "horizontalOrigin": "LEFT",
                "verticalOrigin": "CENTER",
                "outlineWidth": 2,
                "show": true,
                "font": "11pt Lucida Console",
                "style": "FILL_AND_OUTLINE",
                "text": track.name,
                "fillColor": { "rgba": [0, 255, 0, 255] },
                "outlineColor": { "rgba": [0, 0, 0, 255] },
            },
            "path": {
                "show": [{ "interval": availability, "boolean": true }],
                "width": 1,
                "resolution": 120,
                "material": { "solidColor": { "color": { "rgba": [0, 255, 0, 255] } } },
            },
            "position": {
                "interpolationAlgorithm": "LAGRANGE",
                "interpolationDegree": 5,
                "referenceFrame": "INERTIAL",
                "epoch": format_epoch(doc_epoch),
                "cartesian": cartesian,
            },
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use bobcat_core::parse_epoch;

    #[test]
    fn test_document_shape() {
        let epoch = parse_epoch("2024-01-01T00:00:00Z").unwrap();
        let end = parse_epoch("2024-01-01T01:00:00Z").unwrap();
        let samples = vec![
            (0.0, [6378.137, 0.0, 0.0]),
            (30.0, [6378.0, 13.9, 0.0]),
        ];
        let track = Track {
            id: "pkt-1",
            name: "Ground_Site",
            start: epoch,
            end,
            samples_km: &samples,
        };

        let doc = satellite_document(epoch, end, &track);
        let packets = doc.as_array().unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0]["id"], "document");
        assert_eq!(packets[0]["version"], "1.0");
        assert_eq!(packets[1]["name"], "Ground_Site");

        // Flat [t, x, y, z] quads, converted to meters.
        let cartesian = packets[1]["position"]["cartesian"].as_array().unwrap();
        assert_eq!(cartesian.len(), 8);
        assert_eq!(cartesian[0], 0.0);
        assert!((cartesian[1].as_f64().unwrap() - 6_378_137.0).abs() < 1.0);
        assert_eq!(cartesian[4], 30.0);
    }
}
