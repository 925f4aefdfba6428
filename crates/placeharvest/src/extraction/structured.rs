//! Parse business listings from JSON-LD blocks in raw HTML.
//!
//! Structured data is trusted as authoritative: fields map directly from
//! their schema.org names, with no selector fallback. Blocks that fail to
//! parse are skipped, and a page without a recognized business block yields
//! `None`.

use crate::record::{Address, GeoPoint, PartialRecord};
use scraper::{Html, Selector};
use serde_json::Value;

/// schema.org types accepted as a business listing.
const BUSINESS_TYPES: &[&str] = &[
    "LocalBusiness",
    "Organization",
    "Restaurant",
    "FoodEstablishment",
    "CafeOrCoffeeShop",
    "BarOrPub",
    "Bakery",
    "FastFoodRestaurant",
    "Store",
    "ClothingStore",
    "ConvenienceStore",
    "GroceryStore",
    "HardwareStore",
    "ElectronicsStore",
    "FurnitureStore",
    "BookStore",
    "ShoppingCenter",
    "MedicalBusiness",
    "MedicalClinic",
    "MedicalOrganization",
    "Dentist",
    "Physician",
    "Hospital",
    "Pharmacy",
    "Optician",
    "HealthAndBeautyBusiness",
    "BeautySalon",
    "HairSalon",
    "DaySpa",
    "LodgingBusiness",
    "Hotel",
    "Motel",
    "BedAndBreakfast",
    "AutomotiveBusiness",
    "AutoRepair",
    "AutoDealer",
    "GasStation",
    "ProfessionalService",
    "LegalService",
    "Attorney",
    "FinancialService",
    "AccountingService",
    "RealEstateAgent",
    "HomeAndConstructionBusiness",
    "Electrician",
    "Plumber",
    "SportsActivityLocation",
    "ExerciseGym",
    "EntertainmentBusiness",
    "TouristAttraction",
    "ChildCare",
    "EducationalOrganization",
];

/// Types too generic to be reported as a category.
const GENERIC_TYPES: &[&str] = &["LocalBusiness", "Organization", "Place", "Thing"];

/// Extract a partial listing from the first recognized JSON-LD business block.
pub fn extract_structured(html: &str) -> Option<PartialRecord> {
    let document = Html::parse_document(html);
    extract_structured_from(&document)
}

/// Same as [`extract_structured`] over an already parsed document.
pub fn extract_structured_from(document: &Html) -> Option<PartialRecord> {
    let sel = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;
    for element in document.select(&sel) {
        let text = element.inner_html();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            tracing::debug!("skipping malformed JSON-LD block");
            continue;
        };
        if let Some(business) = find_business(&value) {
            return Some(parse_business(business));
        }
    }
    None
}

/// Walk top-level objects, arrays and `@graph` arrays for a business node.
fn find_business(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_business),
        Value::Object(map) => {
            if declared_types(value).iter().any(|t| BUSINESS_TYPES.contains(t)) {
                return Some(value);
            }
            map.get("@graph").and_then(find_business)
        }
        _ => None,
    }
}

fn declared_types(value: &Value) -> Vec<&str> {
    match value.get("@type") {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn parse_business(v: &Value) -> PartialRecord {
    let (rating, review_count) = match v.get("aggregateRating") {
        Some(rating) => (
            rating.get("ratingValue").and_then(number),
            rating
                .get("reviewCount")
                .or_else(|| rating.get("ratingCount"))
                .and_then(count),
        ),
        None => (None, None),
    };

    let coords = v.get("geo").and_then(|geo| {
        let lat = geo.get("latitude").and_then(number)?;
        let lon = geo.get("longitude").and_then(number)?;
        GeoPoint::new(lat, lon)
    });

    PartialRecord {
        name: string_field(v, "name"),
        category: category(v),
        address: v.get("address").map(parse_address).unwrap_or_default(),
        phone: string_field(v, "telephone"),
        website: string_field(v, "url").or_else(|| first_string(v.get("sameAs"))),
        rating,
        review_count,
        coords,
        hours: opening_hours(v),
        images: images(v.get("image")),
        reviews: Vec::new(),
    }
}

fn parse_address(v: &Value) -> Address {
    if let Some(s) = v.as_str() {
        return Address {
            full: Some(s.to_string()),
            ..Default::default()
        };
    }
    let country = v.get("addressCountry").and_then(|c| {
        c.as_str()
            .or_else(|| c.get("name").and_then(Value::as_str))
            .map(str::to_string)
    });
    Address {
        full: None,
        street: string_field(v, "streetAddress"),
        locality: string_field(v, "addressLocality"),
        region: string_field(v, "addressRegion"),
        postal_code: string_field(v, "postalCode"),
        country,
    }
}

/// The most specific declared type, humanized (`CafeOrCoffeeShop` →
/// `Cafe or coffee shop`).
fn category(v: &Value) -> Option<String> {
    declared_types(v)
        .into_iter()
        .find(|t| !GENERIC_TYPES.contains(t))
        .map(humanize_type)
}

fn humanize_type(t: &str) -> String {
    let mut out = String::with_capacity(t.len() + 4);
    for (i, c) in t.chars().enumerate() {
        if i > 0 && c.is_uppercase() {
            out.push(' ');
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn opening_hours(v: &Value) -> Option<String> {
    match v.get("openingHours") {
        Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
        Some(Value::Array(items)) => {
            let joined = items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                return Some(joined);
            }
        }
        _ => {}
    }

    let specs = match v.get("openingHoursSpecification")? {
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        single @ Value::Object(_) => vec![single],
        _ => return None,
    };
    let lines: Vec<String> = specs
        .into_iter()
        .filter_map(|spec| {
            let days = match spec.get("dayOfWeek")? {
                Value::String(d) => vec![day_name(d)],
                Value::Array(ds) => ds.iter().filter_map(Value::as_str).map(day_name).collect(),
                _ => return None,
            };
            let opens = spec.get("opens").and_then(Value::as_str)?;
            let closes = spec.get("closes").and_then(Value::as_str)?;
            Some(format!("{} {}-{}", days.join(", "), short_time(opens), short_time(closes)))
        })
        .collect();
    (!lines.is_empty()).then(|| lines.join("; "))
}

/// `https://schema.org/Monday` → `Monday`.
fn day_name(raw: &str) -> &str {
    raw.rsplit('/').next().unwrap_or(raw)
}

/// `09:00:00` → `09:00`.
fn short_time(raw: &str) -> &str {
    if raw.len() == 8 && raw.as_bytes()[2] == b':' && raw.as_bytes()[5] == b':' {
        &raw[..5]
    } else {
        raw
    }
}

fn images(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items.iter().flat_map(|i| images(Some(i))).collect(),
        Some(obj @ Value::Object(_)) => string_field(obj, "url")
            .or_else(|| string_field(obj, "contentUrl"))
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

fn string_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_string(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|i| i.as_str().map(str::to_string)),
        _ => None,
    }
}

fn number(v: &Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().replace(',', ".").parse().ok()))
}

fn count(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| {
        v.as_str().and_then(|s| {
            s.chars()
                .filter(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .ok()
        })
    })
}
