//! Field extraction from place documents.
//!
//! - `structured`: JSON-LD business objects embedded in the page
//! - `rendered`: ordered selector probes over the DOM
//! - `selectors`: the probe lists both the extractor and the gateway read
//! - `geo` and `text`: coordinate decoding and text normalization

pub mod geo;
pub mod rendered;
pub mod selectors;
pub mod structured;
pub mod text;

pub use geo::decode_coords;
pub use rendered::{extract_from_document, extract_reviews};
pub use selectors::{Probe, SelectorSet};
pub use structured::extract_structured;
pub use text::{normalize_hours, normalize_text};
