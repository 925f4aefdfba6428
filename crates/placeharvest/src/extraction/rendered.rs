//! Selector-probe extraction over a rendered (or raw) place document.
//!
//! This is the fallback layer that runs when structured data is absent or
//! has no name. Each field owns an ordered probe list from the
//! [`SelectorSet`]; the first probe that yields a usable value wins, and a
//! field is only missing once every probe has been tried. Nothing here
//! fails: a field that cannot be read is simply left empty.
//!
//! All entry points are synchronous because `scraper` documents are
//! `!Send`; parse, extract and drop the document before the next `.await`.

use super::geo::decode_coords;
use super::selectors::{Probe, SelectorSet};
use super::text::normalize_text;
use crate::record::{is_absolute_http, Address, PartialRecord, MAX_IMAGES, MAX_REVIEWS};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

/// Elements longer than this are layout containers, not hour blocks.
const MAX_TIME_BLOCK_CHARS: usize = 300;

/// Extract every field the selector set knows about.
pub fn extract_from_document(
    document: &Html,
    include_images: bool,
    selectors: &SelectorSet,
) -> PartialRecord {
    let website = first_value(document, &selectors.website, clean).map(|w| unwrap_redirect(&w));

    let record = PartialRecord {
        name: first_value(document, &selectors.name, clean),
        category: first_value(document, &selectors.category, clean),
        address: Address {
            full: first_value(document, &selectors.address, clean),
            ..Default::default()
        },
        phone: first_value(document, &selectors.phone, clean),
        website,
        rating: first_value(document, &selectors.rating, parse_rating),
        review_count: first_value(document, &selectors.review_count, parse_review_count),
        coords: first_value(document, &selectors.coords, decode_coords),
        hours: first_value(document, &selectors.hours, clean),
        images: if include_images {
            collect_images(document, &selectors.images)
        } else {
            Vec::new()
        },
        reviews: Vec::new(),
    };

    tracing::debug!(
        name = record.name.is_some(),
        rating = record.rating.is_some(),
        hours = record.hours.is_some(),
        images = record.images.len(),
        "rendered-page probes finished"
    );
    record
}

/// Review snippets, normalized and deduplicated, up to [`MAX_REVIEWS`].
pub fn extract_reviews(document: &Html, selectors: &SelectorSet) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for probe in &selectors.reviews {
        for value in probe_values(document, probe) {
            if out.len() >= MAX_REVIEWS {
                return out;
            }
            if let Some(text) = clean(&value) {
                if !out.contains(&text) {
                    out.push(text);
                }
            }
        }
    }
    out
}

/// First decimal number in the text, accepted only within `[0, 5]`.
pub fn parse_rating(text: &str) -> Option<f64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\d+(?:[.,]\d+)?").expect("rating regex is valid"));
    let raw = re.find(text)?.as_str().replace(',', ".");
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && (0.0..=5.0).contains(v))
}

/// First numeric run in the text with separators stripped: `"(1,204)"` → 1204.
pub fn parse_review_count(text: &str) -> Option<u64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\d[\d,.\u{00A0}\u{202F} ]*").expect("count regex is valid")
    });
    let digits: String = re
        .find(text)?
        .as_str()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b\d{1,2}(?::\d{2})?\s*(?:a\.?m\.?|p\.?m\.?)|\b\d{1,2}:\d{2}\b|open 24 hours")
            .expect("time regex is valid")
    })
}

/// Run probes in order and return the first value `accept` keeps.
fn first_value<T>(
    document: &Html,
    probes: &[Probe],
    accept: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    for probe in probes {
        if let Some(found) = probe_values(document, probe).iter().find_map(|v| accept(v.as_str())) {
            tracing::trace!(selector = probe.selector(), "probe matched");
            return Some(found);
        }
    }
    None
}

/// Raw values produced by one probe, in document order.
fn probe_values(document: &Html, probe: &Probe) -> Vec<String> {
    let Ok(sel) = Selector::parse(probe.selector()) else {
        return Vec::new();
    };
    let elements = document.select(&sel);

    match probe {
        Probe::Attr {
            attr,
            strip_prefixes,
            strip_suffixes,
            ..
        } => elements
            .filter_map(|el| el.value().attr(attr))
            .map(|v| strip_affixes(v, strip_prefixes, strip_suffixes))
            .filter(|v| !v.trim().is_empty())
            .collect(),
        Probe::Text {
            strip_prefixes,
            strip_suffixes,
            ..
        } => elements
            .map(|el| element_text(&el))
            .map(|v| strip_affixes(&v, strip_prefixes, strip_suffixes))
            .filter(|v| !v.is_empty())
            .collect(),
        Probe::TimeText { .. } => elements
            .map(|el| element_text(&el))
            .filter(|v| v.chars().count() < MAX_TIME_BLOCK_CHARS && time_re().is_match(v))
            .collect(),
        Probe::Background { .. } => elements
            .filter_map(|el| el.value().attr("style"))
            .filter_map(background_url)
            .collect(),
    }
}

fn collect_images(document: &Html, probes: &[Probe]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for probe in probes {
        for url in probe_values(document, probe) {
            if out.len() >= MAX_IMAGES {
                return out;
            }
            let url = url.trim().to_string();
            if is_absolute_http(&url) && !out.contains(&url) {
                out.push(url);
            }
        }
    }
    out
}

/// Visible text of an element, whitespace-collapsed.
fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_affixes(value: &str, prefixes: &[String], suffixes: &[String]) -> String {
    let mut v = value.trim();
    for p in prefixes {
        if v.len() >= p.len() && v.is_char_boundary(p.len()) && v[..p.len()].eq_ignore_ascii_case(p) {
            v = &v[p.len()..];
            break;
        }
    }
    for s in suffixes {
        if let Some(stripped) = v.strip_suffix(s.as_str()) {
            v = stripped;
            break;
        }
    }
    v.trim().to_string()
}

fn background_url(style: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"url\(\s*['"]?([^'")]+)['"]?\s*\)"#).expect("background regex is valid")
    });
    let url = re.captures(style)?.get(1)?.as_str().trim();
    let url = url.strip_prefix("//").map_or_else(|| url.to_string(), |rest| format!("https://{rest}"));
    Some(url)
}

/// Outbound links are sometimes wrapped as `/url?q=<target>`.
fn unwrap_redirect(href: &str) -> String {
    if href.starts_with("/url?") || href.contains("google.com/url?") {
        let absolute = if href.starts_with('/') {
            format!("https://www.google.com{href}")
        } else {
            href.to_string()
        };
        if let Ok(parsed) = url::Url::parse(&absolute) {
            if let Some((_, target)) = parsed.query_pairs().find(|(k, _)| k == "q" || k == "url") {
                return target.into_owned();
            }
        }
    }
    href.to_string()
}

fn clean(value: &str) -> Option<String> {
    let text = normalize_text(Some(value));
    (!text.is_empty()).then_some(text)
}
