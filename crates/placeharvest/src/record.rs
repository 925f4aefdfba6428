//! Records flowing through the pipeline: requests in, dataset entries out.

use crate::dedup::PlaceIdentifier;
use crate::extraction::text::{normalize_hours, normalize_text};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of image URLs attached to a record.
pub const MAX_IMAGES: usize = 5;
/// Maximum number of review snippets attached to a record.
pub const MAX_REVIEWS: usize = 10;

/// A listing reference handed over by the discovery collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPlace {
    pub identifier: PlaceIdentifier,
    pub query: String,
    #[serde(default)]
    pub locale: Option<String>,
}

impl DiscoveredPlace {
    pub fn new(identifier: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            identifier: PlaceIdentifier::new(identifier),
            query: query.into(),
            locale: None,
        }
    }
}

/// One admitted listing to extract. Consumed by a single worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRequest {
    pub identifier: PlaceIdentifier,
    pub query: String,
    pub locale: Option<String>,
    pub include_reviews: bool,
    pub include_images: bool,
}

impl ExtractionRequest {
    /// URL to navigate to, with the locale hint applied as `hl=`.
    pub fn target_url(&self) -> String {
        let raw = self.identifier.as_str().trim();
        let Some(locale) = self.locale.as_deref().filter(|l| !l.is_empty()) else {
            return raw.to_string();
        };
        match url::Url::parse(raw) {
            Ok(mut parsed) if !parsed.cannot_be_a_base() => {
                let others: Vec<(String, String)> = parsed
                    .query_pairs()
                    .filter(|(k, _)| k != "hl")
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                parsed.set_query(None);
                {
                    let mut pairs = parsed.query_pairs_mut();
                    pairs.extend_pairs(others.iter());
                    pairs.append_pair("hl", locale);
                }
                parsed.to_string()
            }
            _ => raw.to_string(),
        }
    }

    /// Whether the identifier points at a search results page rather than a
    /// single place.
    pub fn is_search_page(&self) -> bool {
        self.identifier.as_str().contains("/maps/search/")
    }
}

/// Which transport produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSource {
    Fetched,
    Rendered,
}

/// Transport-layer result, owned by the attempt that produced it.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub body: String,
    pub final_url: String,
    pub status: u16,
    pub source: PayloadSource,
}

/// The strategy that made a record sufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// JSON-LD over the cheaply fetched body.
    Structured,
    /// Selector probes over the cheaply fetched body.
    FetchedDom,
    /// Full browser render.
    Rendered,
}

/// A latitude/longitude pair. Either both are known or the pair is absent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Build a pair, rejecting non-finite or out-of-range values.
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        valid.then_some(Self { lat, lon })
    }
}

/// Postal address, as components when the source provides them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        self.full.is_none()
            && self.street.is_none()
            && self.locality.is_none()
            && self.region.is_none()
            && self.postal_code.is_none()
            && self.country.is_none()
    }

    fn merge(self, lower: Address) -> Address {
        Address {
            full: self.full.or(lower.full),
            street: self.street.or(lower.street),
            locality: self.locality.or(lower.locality),
            region: self.region.or(lower.region),
            postal_code: self.postal_code.or(lower.postal_code),
            country: self.country.or(lower.country),
        }
    }

    fn normalized(self) -> Address {
        let mut out = Address {
            full: clean(self.full),
            street: clean(self.street),
            locality: clean(self.locality),
            region: clean(self.region),
            postal_code: clean(self.postal_code),
            country: clean(self.country),
        };
        if out.full.is_none() {
            let joined = [&out.street, &out.locality, &out.region, &out.postal_code, &out.country]
                .into_iter()
                .flatten()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            out.full = (!joined.is_empty()).then_some(joined);
        }
        out
    }
}

/// Fields recovered by one extractor. Nothing here is validated yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialRecord {
    pub name: Option<String>,
    pub category: Option<String>,
    pub address: Address,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    pub coords: Option<GeoPoint>,
    pub hours: Option<String>,
    pub images: Vec<String>,
    pub reviews: Vec<String>,
}

impl PartialRecord {
    /// Sufficient iff the normalized name is non-empty.
    pub fn is_sufficient(&self) -> bool {
        !normalize_text(self.name.as_deref()).is_empty()
    }

    /// Field-wise merge where `self` wins over `lower` when both are present.
    pub fn merge(self, lower: PartialRecord) -> PartialRecord {
        PartialRecord {
            name: self
                .name
                .filter(|n| !normalize_text(Some(n.as_str())).is_empty())
                .or(lower.name),
            category: self.category.or(lower.category),
            address: self.address.merge(lower.address),
            phone: self.phone.or(lower.phone),
            website: self.website.or(lower.website),
            rating: self.rating.or(lower.rating),
            review_count: self.review_count.or(lower.review_count),
            coords: self.coords.or(lower.coords),
            hours: self.hours.or(lower.hours),
            images: if self.images.is_empty() { lower.images } else { self.images },
            reviews: if self.reviews.is_empty() { lower.reviews } else { self.reviews },
        }
    }
}

/// The output entity. Built only through [`BusinessRecord::from_partial`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRecord {
    pub name: String,
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Address::is_empty")]
    pub address: Address,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub hours: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub reviews: Vec<String>,
    pub source: PlaceIdentifier,
    pub query: String,
    pub extracted_at: DateTime<Utc>,
    pub extracted_via: Strategy,
}

impl BusinessRecord {
    /// Normalize and validate a partial record.
    ///
    /// Returns `None` when no name survives normalization. Text fields pass
    /// through the normalizer, out-of-range numbers become absent, and the
    /// image and review lists are capped.
    pub fn from_partial(
        partial: PartialRecord,
        request: &ExtractionRequest,
        via: Strategy,
        extracted_at: DateTime<Utc>,
    ) -> Option<BusinessRecord> {
        let name = clean(partial.name)?;
        let coords = partial.coords.and_then(|c| GeoPoint::new(c.lat, c.lon));

        Some(BusinessRecord {
            name,
            category: clean(partial.category),
            address: partial.address.normalized(),
            phone: clean(partial.phone),
            website: clean(partial.website),
            rating: partial.rating.filter(|r| r.is_finite() && (0.0..=5.0).contains(r)),
            review_count: partial.review_count,
            latitude: coords.map(|c| c.lat),
            longitude: coords.map(|c| c.lon),
            hours: Some(normalize_hours(partial.hours.as_deref())).filter(|h| !h.is_empty()),
            images: dedup_capped(
                partial
                    .images
                    .into_iter()
                    .map(|u| u.trim().to_string())
                    .filter(|u| is_absolute_http(u)),
                MAX_IMAGES,
            ),
            reviews: dedup_capped(
                partial.reviews.into_iter().filter_map(|r| clean(Some(r))),
                MAX_REVIEWS,
            ),
            source: request.identifier.clone(),
            query: request.query.clone(),
            extracted_at,
            extracted_via: via,
        })
    }

    /// Append review snippets, normalized, deduplicated and capped like
    /// the ones built in [`from_partial`](Self::from_partial).
    pub fn attach_reviews(&mut self, snippets: Vec<String>) {
        let existing = std::mem::take(&mut self.reviews);
        let incoming = snippets.into_iter().filter_map(|r| clean(Some(r)));
        self.reviews = dedup_capped(existing.into_iter().chain(incoming), MAX_REVIEWS);
    }
}

/// Why a transient failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    /// Timeout, non-200, network error.
    Transient,
    /// Anti-automation interstitial; the identity must be rotated.
    Challenged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientFailure {
    pub kind: TransientKind,
    pub reason: String,
}

impl TransientFailure {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            kind: TransientKind::Transient,
            reason: reason.into(),
        }
    }

    pub fn challenged(reason: impl Into<String>) -> Self {
        Self {
            kind: TransientKind::Challenged,
            reason: reason.into(),
        }
    }

    pub fn is_challenge(&self) -> bool {
        self.kind == TransientKind::Challenged
    }
}

impl fmt::Display for TransientFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransientKind::Transient => write!(f, "transient: {}", self.reason),
            TransientKind::Challenged => write!(f, "challenged: {}", self.reason),
        }
    }
}

/// Result of one extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Success(Box<BusinessRecord>),
    /// Content problem. Logged and dropped, never retried.
    PartialFailure(String),
    /// Retry with a fresh identity.
    TransientFailure(TransientFailure),
}

impl ExtractionOutcome {
    pub fn no_name() -> Self {
        ExtractionOutcome::PartialFailure("no-name".to_string())
    }

    pub fn record(&self) -> Option<&BusinessRecord> {
        match self {
            ExtractionOutcome::Success(record) => Some(record.as_ref()),
            _ => None,
        }
    }
}

/// Terminal failure entry written next to successful records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Always `true`; marks the entry as a failure in the shared dataset.
    pub error: bool,
    pub identifier: PlaceIdentifier,
    pub query: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(request: &ExtractionRequest, reason: impl Into<String>) -> Self {
        Self {
            error: true,
            identifier: request.identifier.clone(),
            query: request.query.clone(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One line of the output dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatasetEntry {
    Failure(FailureRecord),
    Record(Box<BusinessRecord>),
}

impl DatasetEntry {
    pub fn is_failure(&self) -> bool {
        matches!(self, DatasetEntry::Failure(_))
    }
}

fn clean(value: Option<String>) -> Option<String> {
    let text = normalize_text(value.as_deref());
    (!text.is_empty()).then_some(text)
}

pub(crate) fn is_absolute_http(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

fn dedup_capped(items: impl Iterator<Item = String>, cap: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if out.len() >= cap {
            break;
        }
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
