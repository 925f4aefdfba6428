//! Browser fingerprints and human-paced delays.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36 Edg/130.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
];

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1536, 864), (1440, 900), (1366, 768)];

/// What a session presents to the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub user_agent: String,
    pub accept_language: String,
    pub viewport: (u32, u32),
}

impl Fingerprint {
    /// A random desktop fingerprint whose language matches `locale`.
    pub fn random(locale: Option<&str>) -> Self {
        let mut rng = rand::thread_rng();
        let user_agent = USER_AGENTS
            .choose(&mut rng)
            .copied()
            .unwrap_or(USER_AGENTS[0])
            .to_string();
        let viewport = VIEWPORTS.choose(&mut rng).copied().unwrap_or((1920, 1080));
        Self {
            user_agent,
            accept_language: accept_language(locale),
            viewport,
        }
    }
}

/// `Accept-Language` value for a locale hint such as `de` or `pt-BR`.
pub fn accept_language(locale: Option<&str>) -> String {
    match locale.map(str::trim).filter(|l| !l.is_empty()) {
        None => "en-US,en;q=0.9".to_string(),
        Some(l) if l.eq_ignore_ascii_case("en") || l.to_ascii_lowercase().starts_with("en-") => {
            format!("{l},en;q=0.9")
        }
        Some(l) => {
            let primary = l.split(['-', '_']).next().unwrap_or(l);
            if primary.len() == l.len() {
                format!("{l},en;q=0.8")
            } else {
                format!("{l},{primary};q=0.9,en;q=0.8")
            }
        }
    }
}

/// A uniformly random delay in `[min_ms, max_ms]`.
pub fn jitter(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

/// Sleep for a jittered, human-looking interval.
pub async fn human_delay(min_ms: u64, max_ms: u64) {
    let delay = jitter(min_ms, max_ms);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_fingerprint_is_from_pool() {
        for _ in 0..20 {
            let fp = Fingerprint::random(None);
            assert!(USER_AGENTS.contains(&fp.user_agent.as_str()));
            assert!(VIEWPORTS.contains(&fp.viewport));
            assert_eq!(fp.accept_language, "en-US,en;q=0.9");
        }
    }

    #[test]
    fn test_accept_language() {
        assert_eq!(accept_language(Some("de")), "de,en;q=0.8");
        assert_eq!(accept_language(Some("pt-BR")), "pt-BR,pt;q=0.9,en;q=0.8");
        assert_eq!(accept_language(Some("en-GB")), "en-GB,en;q=0.9");
        assert_eq!(accept_language(Some("  ")), "en-US,en;q=0.9");
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let d = jitter(50, 120).as_millis() as u64;
            assert!((50..=120).contains(&d));
        }
        assert_eq!(jitter(300, 100), Duration::from_millis(300));
        assert_eq!(jitter(0, 0), Duration::ZERO);
    }
}
