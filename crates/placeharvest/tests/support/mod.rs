//! Scripted gateway shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use placeharvest::acquisition::{FetchError, Gateway};
use placeharvest::config::{HarvestConfig, RetryConfig};
use placeharvest::pool::{Identity, IdentityId};
use placeharvest::record::{DatasetEntry, ExtractionRequest, PayloadSource, RawPayload};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Which gateway operation is being answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Fetch,
    Render,
    Reviews,
}

type Script = dyn Fn(&ExtractionRequest, Call, usize) -> Result<String, FetchError> + Send + Sync;

/// A gateway whose answers come from a closure. The closure also receives
/// how many times this identifier has been fetched before.
pub struct ScriptedGateway {
    script: Box<Script>,
    latency: Duration,
    slow_first: Option<(Call, Duration)>,
    fetch_url: Option<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<(String, Call, IdentityId)>>,
    retired: Mutex<Vec<IdentityId>>,
}

impl ScriptedGateway {
    pub fn new(
        script: impl Fn(&ExtractionRequest, Call, usize) -> Result<String, FetchError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            latency: Duration::from_millis(0),
            slow_first: None,
            fetch_url: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay only the first call of `call` for each identifier.
    pub fn with_slow_first_call(mut self, call: Call, latency: Duration) -> Self {
        self.slow_first = Some((call, latency));
        self
    }

    /// Report `url` as the final URL of every cheap fetch.
    pub fn with_fetch_url(mut self, url: &str) -> Self {
        self.fetch_url = Some(url.to_string());
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self, call: Call) -> Vec<(String, IdentityId)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c, _)| *c == call)
            .map(|(id, _, identity)| (id.clone(), *identity))
            .collect()
    }

    pub fn retired(&self) -> Vec<IdentityId> {
        self.retired.lock().unwrap().clone()
    }

    async fn answer(
        &self,
        request: &ExtractionRequest,
        identity: &Identity,
        call: Call,
    ) -> Result<RawPayload, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let previous = {
            let mut calls = self.calls.lock().unwrap();
            let previous = calls
                .iter()
                .filter(|(id, c, _)| id == request.identifier.as_str() && *c == call)
                .count();
            calls.push((request.identifier.to_string(), call, identity.id));
            previous
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some((slow, latency)) = self.slow_first {
            if slow == call && previous == 0 {
                tokio::time::sleep(latency).await;
            }
        }
        let result = (self.script)(request, call, previous);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        result.map(|body| RawPayload {
            body,
            final_url: match (&self.fetch_url, call) {
                (Some(url), Call::Fetch) => url.clone(),
                _ => request.identifier.to_string(),
            },
            status: 200,
            source: if call == Call::Fetch {
                PayloadSource::Fetched
            } else {
                PayloadSource::Rendered
            },
        })
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn fetch_cheap(
        &self,
        request: &ExtractionRequest,
        identity: &Identity,
    ) -> Result<RawPayload, FetchError> {
        self.answer(request, identity, Call::Fetch).await
    }

    async fn render_full(
        &self,
        request: &ExtractionRequest,
        identity: &Identity,
    ) -> Result<RawPayload, FetchError> {
        self.answer(request, identity, Call::Render).await
    }

    async fn render_reviews(
        &self,
        request: &ExtractionRequest,
        identity: &Identity,
    ) -> Result<RawPayload, FetchError> {
        self.answer(request, identity, Call::Reviews).await
    }

    async fn retire(&self, identity: IdentityId) {
        self.retired.lock().unwrap().push(identity);
    }
}

pub fn json_ld_with_reviews(name: &str, review_count: u64) -> String {
    format!(
        r#"<html><head><script type="application/ld+json">{{"@context": "https://schema.org", "@type": "Dentist", "name": "{name}", "aggregateRating": {{"@type": "AggregateRating", "ratingValue": "4.6", "reviewCount": "{review_count}"}}}}</script></head><body></body></html>"#
    )
}

/// A configuration with fast retries.
pub fn test_config(concurrency: usize) -> HarvestConfig {
    HarvestConfig {
        concurrency,
        request_timeout_ms: 5_000,
        retry: RetryConfig {
            max_transient_retries: 2,
            max_challenge_retries: 1,
            backoff_ms: 1,
        },
        ..Default::default()
    }
}

/// Drain everything the pipeline sent.
pub async fn collect(mut rx: mpsc::Receiver<DatasetEntry>) -> Vec<DatasetEntry> {
    let mut out = Vec::new();
    while let Some(entry) = rx.recv().await {
        out.push(entry);
    }
    out
}

pub fn json_ld(name: &str) -> String {
    format!(
        r#"<html><head><script type="application/ld+json">{{"@context": "https://schema.org", "@type": "MedicalClinic", "name": "{name}", "telephone": "+1 212 555 0100"}}</script></head><body></body></html>"#
    )
}
