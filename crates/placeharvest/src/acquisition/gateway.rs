//! The two transports behind every extraction: a cheap HTTP fetch and an
//! expensive full browser render.
//!
//! Both paths run under an [`Identity`] and report failures in the same
//! three classes, so the coordinator can treat them uniformly. Transport
//! state (HTTP clients with their cookie jars, browser processes) is bound
//! to the identity and dropped when the identity is retired.

use super::challenge;
use super::http_client::HttpClient;
use crate::extraction::SelectorSet;
use crate::pool::{Identity, IdentityId};
use crate::record::{ExtractionRequest, PayloadSource, RawPayload};
use crate::renderer::{blocked_url_patterns, LaunchOptions, RenderContext, Renderer, RendererFactory};
use crate::stealth;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const READY_POLL_MS: u64 = 250;
const REVIEW_SCROLLS: usize = 3;

/// Failure of one transport call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Timeout, non-200, network error. Worth retrying with another identity.
    #[error("transient: {0}")]
    Transient(String),
    /// An anti-bot interstitial was served instead of content.
    #[error("challenged: {0}")]
    Challenged(String),
    /// The path cannot run at all (no browser installed, launch failure).
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Transport seam between the coordinator and the network.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// One plain GET of the place page.
    async fn fetch_cheap(
        &self,
        request: &ExtractionRequest,
        identity: &Identity,
    ) -> Result<RawPayload, FetchError>;

    /// Render the place page in a browser and snapshot the DOM.
    async fn render_full(
        &self,
        request: &ExtractionRequest,
        identity: &Identity,
    ) -> Result<RawPayload, FetchError>;

    /// Render the place page with the reviews pane opened and scrolled.
    async fn render_reviews(
        &self,
        request: &ExtractionRequest,
        identity: &Identity,
    ) -> Result<RawPayload, FetchError>;

    /// Drop transport state bound to a retired identity.
    async fn retire(&self, identity: IdentityId);
}

/// Timeouts and pacing for [`WebGateway`].
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub fetch_timeout_ms: u64,
    pub render_timeout_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub headless: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 10_000,
            render_timeout_ms: 30_000,
            min_delay_ms: 400,
            max_delay_ms: 1_200,
            headless: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenderMode {
    Place,
    Reviews,
}

/// Gateway backed by reqwest and a browser factory.
pub struct WebGateway {
    options: GatewayOptions,
    selectors: Arc<SelectorSet>,
    factory: Arc<dyn RendererFactory>,
    clients: DashMap<IdentityId, HttpClient>,
    browsers: DashMap<IdentityId, Arc<dyn Renderer>>,
}

impl WebGateway {
    pub fn new(
        options: GatewayOptions,
        selectors: Arc<SelectorSet>,
        factory: Arc<dyn RendererFactory>,
    ) -> Self {
        Self {
            options,
            selectors,
            factory,
            clients: DashMap::new(),
            browsers: DashMap::new(),
        }
    }

    /// Shut down every browser still running.
    pub async fn shutdown(&self) {
        let ids: Vec<IdentityId> = self.browsers.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.retire(id).await;
        }
    }

    pub fn live_browsers(&self) -> usize {
        self.browsers.len()
    }

    fn client_for(&self, identity: &Identity) -> Result<HttpClient, FetchError> {
        if let Some(client) = self.clients.get(&identity.id) {
            return Ok(client.clone());
        }
        let client = HttpClient::for_identity(identity, self.options.fetch_timeout_ms)
            .map_err(|e| FetchError::Unavailable(format!("http client: {e:#}")))?;
        self.clients.insert(identity.id, client.clone());
        Ok(client)
    }

    async fn browser_for(&self, identity: &Identity) -> Result<Arc<dyn Renderer>, FetchError> {
        if let Some(browser) = self.browsers.get(&identity.id) {
            return Ok(Arc::clone(browser.value()));
        }
        // Checkout is exclusive per identity, so no other task races this launch.
        let options = LaunchOptions {
            proxy: identity.proxy.clone(),
            user_agent: Some(identity.fingerprint.user_agent.clone()),
            accept_language: Some(identity.fingerprint.accept_language.clone()),
            viewport: Some(identity.fingerprint.viewport),
            headless: self.options.headless,
        };
        let browser: Arc<dyn Renderer> = self
            .factory
            .launch(options)
            .await
            .map_err(|e| FetchError::Unavailable(format!("{e:#}")))?
            .into();
        self.browsers.insert(identity.id, Arc::clone(&browser));
        Ok(browser)
    }

    async fn render(
        &self,
        request: &ExtractionRequest,
        identity: &Identity,
        mode: RenderMode,
    ) -> Result<RawPayload, FetchError> {
        let browser = self.browser_for(identity).await?;
        let ctx = browser
            .new_context()
            .await
            .map_err(|e| FetchError::Transient(format!("failed to open tab: {e:#}")))?;
        let mut tab = OpenTab(Some(ctx));

        let timeout = Duration::from_millis(self.options.render_timeout_ms);
        let result = match tab.0.as_deref_mut() {
            Some(ctx) => match tokio::time::timeout(timeout, self.drive(ctx, request, mode)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Transient(format!(
                    "render timed out after {}ms",
                    self.options.render_timeout_ms
                ))),
            },
            None => Err(FetchError::Transient("tab closed before rendering".to_string())),
        };
        tab.close().await;
        result
    }

    async fn drive(
        &self,
        ctx: &mut dyn RenderContext,
        request: &ExtractionRequest,
        mode: RenderMode,
    ) -> Result<RawPayload, FetchError> {
        let started = Instant::now();
        let patterns = blocked_url_patterns(
            request.include_images,
            mode == RenderMode::Reviews || request.include_reviews,
        );
        if let Err(e) = ctx.block_urls(&patterns).await {
            tracing::warn!(identifier = %request.identifier, "resource blocking failed: {e:#}");
        }

        let url = request.target_url();
        let nav = ctx
            .navigate(&url, self.options.render_timeout_ms)
            .await
            .map_err(|e| FetchError::Transient(format!("{e:#}")))?;

        if click_first(ctx, &self.selectors.consent_buttons).await {
            tracing::debug!(identifier = %request.identifier, "consent interstitial dismissed");
            stealth::human_delay(self.options.min_delay_ms, self.options.max_delay_ms).await;
        }
        stealth::human_delay(self.options.min_delay_ms, self.options.max_delay_ms).await;

        let ready = if request.is_search_page() {
            &self.selectors.feed_ready
        } else {
            &self.selectors.place_ready
        };
        let remaining = self
            .options
            .render_timeout_ms
            .saturating_sub(started.elapsed().as_millis() as u64);
        if !wait_for_any(ctx, ready, remaining).await {
            tracing::debug!(identifier = %request.identifier, "no content element appeared before timeout");
        }

        if mode == RenderMode::Reviews {
            self.open_reviews(ctx, request).await?;
        }

        let body = ctx
            .get_html()
            .await
            .map_err(|e| FetchError::Transient(format!("{e:#}")))?;
        let final_url = ctx.get_url().await.unwrap_or(nav.final_url);

        if let Some(marker) = challenge::detect(&final_url, &body) {
            return Err(FetchError::Challenged(format!("render hit {marker}")));
        }

        Ok(RawPayload {
            body,
            final_url,
            status: nav.status,
            source: PayloadSource::Rendered,
        })
    }

    async fn open_reviews(
        &self,
        ctx: &mut dyn RenderContext,
        request: &ExtractionRequest,
    ) -> Result<(), FetchError> {
        if !click_first(ctx, &self.selectors.reviews_tab).await {
            return Err(FetchError::Transient("reviews tab not found".to_string()));
        }
        stealth::human_delay(self.options.min_delay_ms, self.options.max_delay_ms).await;

        for round in 0..REVIEW_SCROLLS {
            if !scroll_first(ctx, &self.selectors.review_pane).await {
                tracing::debug!(identifier = %request.identifier, round, "review pane not scrollable");
                break;
            }
            stealth::human_delay(self.options.min_delay_ms, self.options.max_delay_ms).await;
        }
        Ok(())
    }
}

/// A tab owned by one render. Closed explicitly on the normal path; if the
/// render future is dropped first, the close runs on a background task.
struct OpenTab(Option<Box<dyn RenderContext>>);

impl OpenTab {
    async fn close(mut self) {
        if let Some(ctx) = self.0.take() {
            if let Err(e) = ctx.close().await {
                tracing::debug!("failed to close tab: {e:#}");
            }
        }
    }
}

impl Drop for OpenTab {
    fn drop(&mut self) {
        let Some(ctx) = self.0.take() else { return };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = ctx.close().await {
                        tracing::debug!("failed to close abandoned tab: {e:#}");
                    }
                });
            }
            Err(_) => tracing::warn!("abandoned tab dropped outside a runtime"),
        }
    }
}

#[async_trait]
impl Gateway for WebGateway {
    async fn fetch_cheap(
        &self,
        request: &ExtractionRequest,
        identity: &Identity,
    ) -> Result<RawPayload, FetchError> {
        let client = self.client_for(identity)?;
        let url = request.target_url();
        let resp = client
            .get(&url, self.options.fetch_timeout_ms)
            .await
            .map_err(|e| FetchError::Transient(format!("fetch failed: {e:#}")))?;

        if let Some(marker) = challenge::detect(&resp.final_url, &resp.body) {
            return Err(FetchError::Challenged(format!("fetch hit {marker}")));
        }
        if resp.status != 200 {
            return Err(FetchError::Transient(format!("fetch returned status {}", resp.status)));
        }

        Ok(RawPayload {
            body: resp.body,
            final_url: resp.final_url,
            status: resp.status,
            source: PayloadSource::Fetched,
        })
    }

    async fn render_full(
        &self,
        request: &ExtractionRequest,
        identity: &Identity,
    ) -> Result<RawPayload, FetchError> {
        self.render(request, identity, RenderMode::Place).await
    }

    async fn render_reviews(
        &self,
        request: &ExtractionRequest,
        identity: &Identity,
    ) -> Result<RawPayload, FetchError> {
        self.render(request, identity, RenderMode::Reviews).await
    }

    async fn retire(&self, identity: IdentityId) {
        self.clients.remove(&identity);
        if let Some((_, browser)) = self.browsers.remove(&identity) {
            if let Err(e) = browser.shutdown().await {
                tracing::debug!(%identity, "browser shutdown failed: {e:#}");
            }
        }
    }
}

/// Poll until any selector matches or the budget runs out.
async fn wait_for_any(ctx: &dyn RenderContext, selectors: &[String], budget_ms: u64) -> bool {
    if selectors.is_empty() {
        return true;
    }
    let script = format!(
        "(() => {}.some(s => document.querySelector(s) !== null))()",
        js_array(selectors)
    );
    let deadline = Instant::now() + Duration::from_millis(budget_ms);
    loop {
        if matches!(ctx.execute_js(&script).await, Ok(serde_json::Value::Bool(true))) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(READY_POLL_MS)).await;
    }
}

/// Click the first element matching any selector, in priority order.
async fn click_first(ctx: &dyn RenderContext, selectors: &[String]) -> bool {
    if selectors.is_empty() {
        return false;
    }
    let script = format!(
        "(() => {{ for (const s of {}) {{ const el = document.querySelector(s); \
         if (el) {{ el.click(); return true; }} }} return false; }})()",
        js_array(selectors)
    );
    matches!(ctx.execute_js(&script).await, Ok(serde_json::Value::Bool(true)))
}

async fn scroll_first(ctx: &dyn RenderContext, selectors: &[String]) -> bool {
    if selectors.is_empty() {
        return false;
    }
    let script = format!(
        "(() => {{ for (const s of {}) {{ const el = document.querySelector(s); \
         if (el) {{ el.scrollBy(0, el.scrollHeight); return true; }} }} return false; }})()",
        js_array(selectors)
    );
    matches!(ctx.execute_js(&script).await, Ok(serde_json::Value::Bool(true)))
}

fn js_array(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}
