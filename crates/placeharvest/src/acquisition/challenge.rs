//! Anti-bot interstitial detection.

/// Lowercase body markers of a challenge page.
const BODY_MARKERS: &[&str] = &[
    "unusual traffic from your computer network",
    "our systems have detected unusual traffic",
    "detected unusual",
    "g-recaptcha",
    "recaptcha/api.js",
    "id=\"captcha-form\"",
    "name=\"captcha\"",
];

/// URL path fragments of challenge interstitials.
const URL_MARKERS: &[&str] = &["/sorry/", "/sorry?", "/recaptcha/"];

/// Why a payload was classified as a challenge, if it was.
pub fn detect(final_url: &str, body: &str) -> Option<&'static str> {
    let url = final_url.to_ascii_lowercase();
    if let Some(marker) = URL_MARKERS.iter().copied().find(|m| url.contains(m)) {
        return Some(marker);
    }
    // Markers sit near the top of interstitials; avoid scanning huge DOMs.
    let head = prefix_at_char_boundary(body, 256 * 1024).to_ascii_lowercase();
    BODY_MARKERS.iter().copied().find(|m| head.contains(m))
}

/// Whether a page is a cookie-consent wall served in place of content.
///
/// Consent walls are not challenges: the identity is fine, but the page
/// has to be rendered so the wall can be dismissed.
pub fn is_consent_wall(final_url: &str) -> bool {
    url::Url::parse(final_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase().starts_with("consent.")))
        .unwrap_or(false)
}

fn prefix_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
