//! Text and opening-hours normalization.
//!
//! Both functions are total and idempotent: any input, including `None`,
//! yields a string, and feeding the output back in returns it unchanged.

use regex::Regex;
use std::sync::OnceLock;

/// UI chrome that leaks into scraped text.
const BOILERPLATE_PHRASES: &[&str] = &[
    "see more hours",
    "copy open hours",
    "hide open hours for the week",
    "show open hours for the week",
    "suggest new hours",
    "send to your phone",
];

fn boilerplate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternatives = BOILERPLATE_PHRASES
            .iter()
            .map(|p| {
                p.split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!("(?i){alternatives}")).expect("boilerplate regex is valid")
    })
}

/// Icons, emoji and invisible formatting characters.
fn symbol_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\p{Extended_Pictographic}\p{Co}\u{FE00}-\u{FE0F}\u{200B}-\u{200D}\u{2060}\u{FEFF}\u{E0020}-\u{E007F}]")
            .expect("symbol regex is valid")
    })
}

/// Canonical form of a free-text field.
pub fn normalize_text(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };

    let without_controls: String = raw
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let mut text = collapse_whitespace(&symbol_re().replace_all(&without_controls, ""));

    // Removing a phrase can join two fragments into a new one.
    loop {
        let next = collapse_whitespace(&boilerplate_re().replace_all(&text, " "));
        if next == text {
            return text;
        }
        text = next;
    }
}

/// Canonical form of an opening-hours string: day segments joined by `"; "`.
pub fn normalize_hours(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };

    raw.split(['\n', '\r', ';', '|'])
        .map(|segment| segment.replace(['\u{2013}', '\u{2014}'], "-"))
        .map(|segment| normalize_text(Some(&segment)))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
