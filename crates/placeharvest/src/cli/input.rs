//! Reading discovered places from an input file.
//!
//! One place per line, either a JSON object or a bare identifier:
//!
//! ```text
//! {"url": "https://www.google.com/maps/place/...", "query": "clinics", "locale": "en"}
//! https://www.google.com/maps/place/?q=place_id:ChIJ...
//! # comments and blank lines are skipped
//! ```

use placeharvest::error::{HarvestError, HarvestResult};
use placeharvest::record::DiscoveredPlace;
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
struct InputLine {
    #[serde(alias = "identifier", alias = "link")]
    url: String,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    locale: Option<String>,
}

pub fn read_places(path: &Path, default_query: &str) -> HarvestResult<Vec<DiscoveredPlace>> {
    let text = std::fs::read_to_string(path).map_err(|source| HarvestError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse_places(&text, default_query)
}

/// Parse input text. An input without a single place is a configuration
/// error, as is a line that looks like JSON but does not parse, or a line
/// left without a query when no default query was given.
pub fn parse_places(text: &str, default_query: &str) -> HarvestResult<Vec<DiscoveredPlace>> {
    let mut places = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let place = if line.starts_with('{') {
            let parsed: InputLine = serde_json::from_str(line)
                .map_err(|e| HarvestError::config(format!("input line {}: {e}", n + 1)))?;
            if parsed.url.trim().is_empty() {
                return Err(HarvestError::config(format!("input line {}: empty url", n + 1)));
            }
            let query = match parsed.query.filter(|q| !q.trim().is_empty()) {
                Some(query) => query,
                None => fallback_query(default_query, n)?,
            };
            let mut place = DiscoveredPlace::new(parsed.url.trim(), query);
            place.locale = parsed.locale.filter(|l| !l.trim().is_empty());
            place
        } else {
            DiscoveredPlace::new(line, fallback_query(default_query, n)?)
        };
        places.push(place);
    }

    if places.is_empty() {
        return Err(HarvestError::config("input contains no place identifiers"));
    }
    Ok(places)
}

fn fallback_query(default_query: &str, n: usize) -> HarvestResult<String> {
    let query = default_query.trim();
    if query.is_empty() {
        return Err(HarvestError::config(format!(
            "input line {}: no query; add one to the line or pass --query",
            n + 1
        )));
    }
    Ok(query.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_lines() {
        let text = r#"
# exported from discovery
{"url": "https://maps.example/place/a", "query": "clinics", "locale": "de"}
{"identifier": "https://maps.example/place/b"}
https://maps.example/place/c
"#;
        let places = parse_places(text, "fallback").unwrap();
        assert_eq!(places.len(), 3);
        assert_eq!(places[0].query, "clinics");
        assert_eq!(places[0].locale.as_deref(), Some("de"));
        assert_eq!(places[1].query, "fallback");
        assert_eq!(places[2].identifier.as_str(), "https://maps.example/place/c");
    }

    #[test]
    fn test_empty_input_is_configuration_error() {
        let err = parse_places("\n# nothing\n", "q").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_missing_query_without_default_is_configuration_error() {
        let err = parse_places("https://maps.example/place/a\n", "  ").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("line 1"));

        let err = parse_places(
            "{\"url\": \"https://maps.example/place/a\", \"query\": \"clinics\"}\n{\"url\": \"https://maps.example/place/b\"}",
            "",
        )
        .unwrap_err();
        assert!(err.to_string().contains("line 2"));

        let places =
            parse_places("{\"url\": \"https://maps.example/place/a\", \"query\": \"clinics\"}", "").unwrap();
        assert_eq!(places[0].query, "clinics");
    }

    #[test]
    fn test_malformed_json_line() {
        let err = parse_places("{\"query\": \"x\"}", "q").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_read_places_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("places.jsonl");
        std::fs::write(&path, "https://maps.example/place/a\n").unwrap();
        assert_eq!(read_places(&path, "q").unwrap().len(), 1);
    }
}
