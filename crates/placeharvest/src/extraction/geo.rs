//! Coordinate decoding from place identifiers and URLs.

use crate::record::GeoPoint;
use regex::Regex;
use std::sync::OnceLock;

fn patterns() -> &'static [Regex; 2] {
    static RE: OnceLock<[Regex; 2]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            // Viewport segment: /@40.7128,-74.0060,17z
            Regex::new(r"@(-?\d{1,3}(?:\.\d+)?),(-?\d{1,3}(?:\.\d+)?)")
                .expect("viewport regex is valid"),
            // Data directive: !3d40.7128!4d-74.0060
            Regex::new(r"!3d(-?\d{1,3}(?:\.\d+)?)!4d(-?\d{1,3}(?:\.\d+)?)")
                .expect("directive regex is valid"),
        ]
    })
}

/// Decode a coordinate pair from an identifier or URL.
///
/// Patterns are tried in order and the first one yielding a valid pair
/// wins. Values are never merged across patterns.
pub fn decode_coords(identifier: &str) -> Option<GeoPoint> {
    patterns().iter().find_map(|re| {
        let caps = re.captures(identifier)?;
        let lat = caps.get(1)?.as_str().parse::<f64>().ok()?;
        let lon = caps.get(2)?.as_str().parse::<f64>().ok()?;
        GeoPoint::new(lat, lon)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_viewport_pattern() {
        let p = decode_coords(
            "https://www.google.com/maps/place/Clinic/@40.7128,-74.0060,17z/data=!4m2",
        )
        .unwrap();
        assert!((p.lat - 40.7128).abs() < 1e-9);
        assert!((p.lon + 74.0060).abs() < 1e-9);
    }

    #[test]
    fn test_decode_directive_pattern() {
        let p = decode_coords("https://www.google.com/maps/place/X/data=!4m7!3m6!8m2!3d38.7223!4d-9.1393")
            .unwrap();
        assert!((p.lat - 38.7223).abs() < 1e-9);
        assert!((p.lon + 9.1393).abs() < 1e-9);
    }

    #[test]
    fn test_viewport_wins_over_directive() {
        let p = decode_coords("/maps/place/X/@1.5,2.5,10z/data=!3d3.5!4d4.5").unwrap();
        assert_eq!((p.lat, p.lon), (1.5, 2.5));
    }

    #[test]
    fn test_invalid_viewport_falls_through_to_directive() {
        let p = decode_coords("/maps/place/X/@95.0,2.5,10z/data=!3d3.5!4d4.5").unwrap();
        assert_eq!((p.lat, p.lon), (3.5, 4.5));
    }

    #[test]
    fn test_no_coordinates() {
        assert!(decode_coords("https://www.google.com/maps/place/Clinic").is_none());
        assert!(decode_coords("").is_none());
        assert!(decode_coords("user@example.com").is_none());
    }

    #[test]
    fn test_pair_is_all_or_nothing() {
        let inputs = [
            "@12.5,",
            "@12.5",
            "!3d12.5!4dabc",
            "!3d12.5",
            "@-91.0,10.0",
            "@10.0,-181.0",
            "@0,0",
            "@-33.86,151.2,14z",
        ];
        for input in inputs {
            if let Some(p) = decode_coords(input) {
                assert!(p.lat.is_finite() && p.lon.is_finite(), "{input}");
            }
        }
        assert!(decode_coords("@12.5,").is_none());
        assert!(decode_coords("!3d12.5").is_none());
        assert!(decode_coords("@0,0").is_some());
    }
}
