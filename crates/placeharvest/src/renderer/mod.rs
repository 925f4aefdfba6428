//! Browser rendering for the full-render path.
//!
//! The `Renderer` and `RenderContext` traits abstract over the browser
//! engine (Chromium via chromiumoxide) so the gateway can be driven by a
//! stub when no browser is installed.

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// How a browser instance presents itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub viewport: Option<(u32, u32)>,
    pub headless: bool,
}

/// Resource families that can be blocked while rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    Fonts,
    Media,
    Stylesheets,
    Analytics,
    Images,
    ReviewRequests,
}

impl ResourceClass {
    /// URL patterns (Chromium wildcard syntax) covering this class.
    pub fn url_patterns(self) -> &'static [&'static str] {
        match self {
            ResourceClass::Fonts => &["*.woff", "*.woff2", "*.ttf", "*.otf", "*fonts.gstatic.com*"],
            ResourceClass::Media => &["*.mp4", "*.webm", "*.mp3", "*.m4a", "*.ogg"],
            ResourceClass::Stylesheets => &["*.css"],
            ResourceClass::Analytics => &[
                "*google-analytics.com*",
                "*googletagmanager.com*",
                "*doubleclick.net*",
                "*/gen_204*",
                "*/log?format=*",
                "*play.google.com/log*",
            ],
            ResourceClass::Images => &[
                "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico",
                "*googleusercontent.com*",
            ],
            ResourceClass::ReviewRequests => &["*listugcposts*", "*/preview/review*"],
        }
    }
}

/// Blocklist for one render. Images and review requests stay allowed when
/// the caller needs them.
pub fn blocked_url_patterns(include_images: bool, include_reviews: bool) -> Vec<String> {
    let mut classes = vec![
        ResourceClass::Fonts,
        ResourceClass::Media,
        ResourceClass::Stylesheets,
        ResourceClass::Analytics,
    ];
    if !include_images {
        classes.push(ResourceClass::Images);
    }
    if !include_reviews {
        classes.push(ResourceClass::ReviewRequests);
    }
    classes
        .into_iter()
        .flat_map(|c| c.url_patterns().iter().map(|p| p.to_string()))
        .collect()
}

/// Starts browser engines, one per identity.
#[async_trait]
pub trait RendererFactory: Send + Sync {
    async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn Renderer>>;
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab) for rendering pages.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Block requests whose URL matches any of the wildcard patterns.
    async fn block_urls(&mut self, patterns: &[String]) -> Result<()>;
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// Get the full page HTML.
    async fn get_html(&self) -> Result<String>;
    /// Get the current URL.
    async fn get_url(&self) -> Result<String>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Factory used when Chromium is unavailable: every launch fails, so the
/// gateway reports the full-render path as unavailable and cheap fetches
/// still work.
pub struct NoopRendererFactory;

#[async_trait]
impl RendererFactory for NoopRendererFactory {
    async fn launch(&self, _options: LaunchOptions) -> Result<Box<dyn Renderer>> {
        Err(anyhow::anyhow!("browser not available, HTTP-only mode"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocklist_respects_flags() {
        let lean = blocked_url_patterns(false, false);
        assert!(lean.iter().any(|p| p == "*.woff2"));
        assert!(lean.iter().any(|p| p == "*.jpg"));
        assert!(lean.iter().any(|p| p == "*listugcposts*"));

        let full = blocked_url_patterns(true, true);
        assert!(full.iter().any(|p| p == "*.css"));
        assert!(!full.iter().any(|p| p == "*.jpg"));
        assert!(!full.iter().any(|p| p == "*listugcposts*"));
    }

    #[tokio::test]
    async fn test_noop_factory_fails_launch() {
        let err = NoopRendererFactory
            .launch(LaunchOptions::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("not available"));
    }
}
