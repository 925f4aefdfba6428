//! Probe lists for the rendered-page extractor and the browser gateway.
//!
//! Markup drifts often, so every markup-dependent lookup lives in data:
//! the built-in set is embedded from `place_selectors.json` at compile
//! time, and a replacement set can be loaded from disk without a rebuild.

use crate::error::{HarvestError, HarvestResult};
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

const SELECTORS_JSON: &str = include_str!("place_selectors.json");

/// One lookup strategy for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Probe {
    /// Attribute value of each matching element.
    Attr {
        selector: String,
        attr: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        strip_prefixes: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        strip_suffixes: Vec<String>,
    },
    /// Text content of each matching element.
    Text {
        selector: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        strip_prefixes: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        strip_suffixes: Vec<String>,
    },
    /// Text content of short matching elements that contain a time of day.
    TimeText { selector: String },
    /// `url(...)` inside the `style` attribute of each matching element.
    Background { selector: String },
}

impl Probe {
    pub fn selector(&self) -> &str {
        match self {
            Probe::Attr { selector, .. }
            | Probe::Text { selector, .. }
            | Probe::TimeText { selector }
            | Probe::Background { selector } => selector,
        }
    }
}

/// Every markup-dependent lookup the pipeline performs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSet {
    pub name: Vec<Probe>,
    pub category: Vec<Probe>,
    pub address: Vec<Probe>,
    pub phone: Vec<Probe>,
    pub website: Vec<Probe>,
    pub rating: Vec<Probe>,
    pub review_count: Vec<Probe>,
    pub hours: Vec<Probe>,
    pub coords: Vec<Probe>,
    pub images: Vec<Probe>,
    pub reviews: Vec<Probe>,
    /// Elements whose presence means a place page finished rendering.
    pub place_ready: Vec<String>,
    /// Same for a search results page; the feed markup changes most often.
    pub feed_ready: Vec<String>,
    pub reviews_tab: Vec<String>,
    pub review_pane: Vec<String>,
    pub consent_buttons: Vec<String>,
}

impl SelectorSet {
    /// The embedded selector set.
    pub fn builtin() -> &'static SelectorSet {
        static BUILTIN: OnceLock<SelectorSet> = OnceLock::new();
        BUILTIN.get_or_init(|| serde_json::from_str(SELECTORS_JSON).unwrap_or_default())
    }

    pub fn from_json(json: &str) -> HarvestResult<SelectorSet> {
        let set: SelectorSet = serde_json::from_str(json)
            .map_err(|e| HarvestError::Selectors(format!("invalid selector JSON: {e}")))?;
        set.validate()?;
        Ok(set)
    }

    pub fn from_file(path: &Path) -> HarvestResult<SelectorSet> {
        let json = std::fs::read_to_string(path).map_err(|source| HarvestError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Reject sets without name probes or with selectors that do not parse.
    pub fn validate(&self) -> HarvestResult<()> {
        if self.name.is_empty() {
            return Err(HarvestError::Selectors(
                "at least one name probe is required".to_string(),
            ));
        }

        let probe_selectors = [
            &self.name,
            &self.category,
            &self.address,
            &self.phone,
            &self.website,
            &self.rating,
            &self.review_count,
            &self.hours,
            &self.coords,
            &self.images,
            &self.reviews,
        ]
        .into_iter()
        .flatten()
        .map(Probe::selector);
        let plain_selectors = [
            &self.place_ready,
            &self.feed_ready,
            &self.reviews_tab,
            &self.review_pane,
            &self.consent_buttons,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str);

        let invalid: Vec<&str> = probe_selectors
            .chain(plain_selectors)
            .filter(|s| Selector::parse(s).is_err())
            .collect();
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(HarvestError::Selectors(format!(
                "unparseable selectors: {}",
                invalid.join(" | ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_set_parses_and_validates() {
        let set = SelectorSet::from_json(SELECTORS_JSON).expect("embedded selectors are valid");
        assert_eq!(&set, SelectorSet::builtin());
        assert!(!set.name.is_empty());
        assert!(!set.feed_ready.is_empty());
    }

    #[test]
    fn test_hours_probes_are_ordered_attr_text_time() {
        let set = SelectorSet::builtin();
        let first_text = set
            .hours
            .iter()
            .position(|p| matches!(p, Probe::Text { .. }))
            .unwrap();
        let last_attr = set
            .hours
            .iter()
            .rposition(|p| matches!(p, Probe::Attr { .. }))
            .unwrap();
        assert!(last_attr < first_text);
        assert!(matches!(set.hours.last(), Some(Probe::TimeText { .. })));
    }

    #[test]
    fn test_rejects_missing_name_probes() {
        let err = SelectorSet::from_json(r#"{"phone": [{"kind": "text", "selector": "a"}]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("name probe"));
    }

    #[test]
    fn test_rejects_bad_selector() {
        let err = SelectorSet::from_json(
            r#"{"name": [{"kind": "text", "selector": "h1[[["}], "feed_ready": ["div"]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("h1[[["));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selectors.json");
        std::fs::write(&path, r#"{"name": [{"kind": "text", "selector": "h2.title"}]}"#).unwrap();
        let set = SelectorSet::from_file(&path).unwrap();
        assert_eq!(set.name.len(), 1);
        assert!(SelectorSet::from_file(&dir.path().join("missing.json")).is_err());
    }
}
