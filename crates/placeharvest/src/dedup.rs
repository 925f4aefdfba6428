//! Place identifiers, their canonical form, and the run-wide dedup ledger.
//!
//! Discovery can surface the same listing many times: under different search
//! terms, with different viewport segments (`/@lat,lon,17z`) or tracking
//! parameters. The ledger compares canonical forms only and admits each
//! listing once per run.

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Query parameters that identify a listing. Everything else is volatile.
const IDENTIFYING_PARAMS: &[&str] = &["cid", "ftid", "place_id", "query", "query_place_id", "q"];

/// Opaque reference to one listing, as produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaceIdentifier(String);

impl PlaceIdentifier {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical form used for equality between listings.
    pub fn canonical(&self) -> String {
        canonicalize(&self.0)
    }
}

impl fmt::Display for PlaceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlaceIdentifier {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Strip volatile parts of an identifier.
///
/// Lowercases scheme and host, drops the fragment, every non-identifying
/// query parameter and any `@` viewport path segment, and removes a trailing
/// slash. Input that does not parse as a URL is only trimmed.
pub fn canonicalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut parsed) = url::Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    if parsed.cannot_be_a_base() {
        return trimmed.to_string();
    }

    let mut kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| IDENTIFYING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    kept.sort();

    let segments: Vec<String> = parsed
        .path_segments()
        .map(|segs| {
            segs.filter(|s| !s.is_empty() && !s.starts_with('@'))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    parsed.set_fragment(None);
    parsed.set_query(None);
    parsed.set_path(&segments.join("/"));
    if !kept.is_empty() {
        parsed.query_pairs_mut().extend_pairs(kept.iter());
    }

    // `Url` already lowercases scheme and host.
    let out = parsed.to_string();
    match out.strip_suffix('/') {
        Some(stripped) if parsed.query().is_none() => stripped.to_string(),
        _ => out,
    }
}

/// Run-wide set of admitted canonical identifiers.
#[derive(Debug, Default)]
pub struct DedupLedger {
    seen: DashSet<String>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an identifier unless its canonical form was already admitted.
    ///
    /// The check and the insert are one atomic operation, so two workers
    /// racing on the same listing cannot both be admitted.
    pub fn admit(&self, identifier: &PlaceIdentifier) -> bool {
        let admitted = self.seen.insert(identifier.canonical());
        if !admitted {
            tracing::debug!(identifier = %identifier, "duplicate listing suppressed");
        }
        admitted
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_canonical_strips_volatile_parts() {
        let a = PlaceIdentifier::new(
            "https://www.google.com/maps/place/City+Heart+Clinic/@40.71,-74.00,17z/data=!4m6!3m5?authuser=0&hl=en&entry=ttu#top",
        );
        let b = PlaceIdentifier::new(
            "https://WWW.GOOGLE.COM/maps/place/City+Heart+Clinic/@40.72,-74.01,15z/data=!4m6!3m5?hl=fr",
        );
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(
            a.canonical(),
            "https://www.google.com/maps/place/City+Heart+Clinic/data=!4m6!3m5"
        );
    }

    #[test]
    fn test_canonical_keeps_identifying_params() {
        let a = PlaceIdentifier::new("https://maps.google.com/?hl=en&cid=123");
        let b = PlaceIdentifier::new("https://maps.google.com/?cid=124");
        assert_ne!(a.canonical(), b.canonical());
        assert!(a.canonical().contains("cid=123"));
        assert!(!a.canonical().contains("hl="));
    }

    #[test]
    fn test_canonical_non_url_is_trimmed() {
        assert_eq!(canonicalize("  ChIJabc123  "), "ChIJabc123");
        assert_eq!(canonicalize(""), "");
    }

    #[test]
    fn test_canonical_is_stable() {
        let raw = "https://www.google.com/maps/place/Cafe/@1.0,2.0,12z?entry=ttu";
        let once = canonicalize(raw);
        assert_eq!(canonicalize(&once), once);
    }

    #[test]
    fn test_ledger_admits_once_per_canonical_form() {
        let ledger = DedupLedger::new();
        let a = PlaceIdentifier::new("https://www.google.com/maps/place/Cafe/@1,2,12z?hl=en");
        let b = PlaceIdentifier::new("https://www.google.com/maps/place/Cafe?authuser=1");
        assert!(ledger.admit(&a));
        assert!(!ledger.admit(&b));
        assert!(!ledger.admit(&a));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_ledger_concurrent_admit_is_exclusive() {
        let ledger = Arc::new(DedupLedger::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    let id = PlaceIdentifier::new(format!(
                        "https://www.google.com/maps/place/Same/@{i},{i},10z?hl=en"
                    ));
                    ledger.admit(&id)
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|a| *a)
            .count();
        assert_eq!(admitted, 1);
    }
}
