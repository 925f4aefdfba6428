//! Per-listing strategy selection.
//!
//! Strategies run cheapest first and stop at the first one that yields a
//! name:
//!
//! 1. structured data in the cheaply fetched page,
//! 2. selector probes over that same fetched page,
//! 3. a full browser render, with structured data and probes over the
//!    rendered DOM.
//!
//! Later strategies never discard what earlier ones found; partial results
//! are merged with structured(rendered) over structured(fetched) over
//! probes(rendered) over probes(fetched).

use crate::acquisition::{challenge, FetchError, Gateway};
use crate::extraction::{decode_coords, extract_from_document, extract_reviews, SelectorSet};
use crate::extraction::structured::extract_structured_from;
use crate::pool::Identity;
use crate::record::{
    BusinessRecord, ExtractionOutcome, ExtractionRequest, PartialRecord, Strategy,
    TransientFailure,
};
use chrono::Utc;
use scraper::Html;
use std::sync::Arc;
use std::time::Duration;

/// Both extractor results over one document.
#[derive(Debug, Default)]
struct Analysis {
    structured: PartialRecord,
    probes: PartialRecord,
}

impl Analysis {
    fn of(body: &str, include_images: bool, selectors: &SelectorSet) -> Self {
        let document = Html::parse_document(body);
        Self {
            structured: extract_structured_from(&document).unwrap_or_default(),
            probes: extract_from_document(&document, include_images, selectors),
        }
    }
}

/// Default budget for opening and scrolling the reviews pane.
const DEFAULT_REVIEWS_BUDGET: Duration = Duration::from_secs(30);

pub struct ExtractionCoordinator {
    gateway: Arc<dyn Gateway>,
    selectors: Arc<SelectorSet>,
    reviews_budget: Duration,
}

impl ExtractionCoordinator {
    pub fn new(gateway: Arc<dyn Gateway>, selectors: Arc<SelectorSet>) -> Self {
        Self {
            gateway,
            selectors,
            reviews_budget: DEFAULT_REVIEWS_BUDGET,
        }
    }

    /// Time allowed for review enrichment, separate from the core budget.
    pub fn with_reviews_budget(mut self, budget: Duration) -> Self {
        self.reviews_budget = budget;
        self
    }

    /// Run the strategy sequence for one request under one identity, then
    /// enrich a successful record with reviews.
    ///
    /// Never returns an error: every exit is an [`ExtractionOutcome`].
    pub async fn extract(&self, request: &ExtractionRequest, identity: &Identity) -> ExtractionOutcome {
        let outcome = self.extract_core(request, identity).await;
        self.enrich(outcome, request, identity).await
    }

    /// Like [`extract`](Self::extract), with the core strategies bounded by
    /// `budget`. Running out of time there is a transient failure; review
    /// enrichment runs afterwards under its own budget and never fails a
    /// record that already has a name.
    pub async fn extract_within(
        &self,
        request: &ExtractionRequest,
        identity: &Identity,
        budget: Duration,
    ) -> ExtractionOutcome {
        let outcome = match tokio::time::timeout(budget, self.extract_core(request, identity)).await {
            Ok(outcome) => outcome,
            Err(_) => ExtractionOutcome::TransientFailure(TransientFailure::transient(format!(
                "attempt timed out after {}ms",
                budget.as_millis()
            ))),
        };
        self.enrich(outcome, request, identity).await
    }

    async fn extract_core(&self, request: &ExtractionRequest, identity: &Identity) -> ExtractionOutcome {
        let id = &request.identifier;
        let mut fetched = Analysis::default();
        let mut fetched_url: Option<String> = None;
        let mut fetch_failure: Option<String> = None;

        match self.gateway.fetch_cheap(request, identity).await {
            Ok(payload) if challenge::is_consent_wall(&payload.final_url) => {
                tracing::debug!(identifier = %id, final_url = %payload.final_url, "fetch landed on a consent wall, rendering");
                fetch_failure = Some("fetch landed on a consent wall".to_string());
            }
            Ok(payload) => {
                tracing::debug!(
                    identifier = %id,
                    status = payload.status,
                    source = ?payload.source,
                    bytes = payload.body.len(),
                    "payload received"
                );
                fetched = Analysis::of(&payload.body, request.include_images, &self.selectors);
                fetched_url = Some(payload.final_url);

                if fetched.structured.is_sufficient() {
                    tracing::debug!(identifier = %id, "structured data in fetched page is sufficient");
                    let partial = fetched.structured.merge(fetched.probes);
                    return self.finish(partial, request, fetched_url.as_deref(), Strategy::Structured);
                }
                if fetched.probes.is_sufficient() {
                    tracing::debug!(identifier = %id, "probes over fetched page are sufficient");
                    let partial = fetched.structured.merge(fetched.probes);
                    return self.finish(partial, request, fetched_url.as_deref(), Strategy::FetchedDom);
                }
                tracing::debug!(identifier = %id, "fetched page has no name, rendering");
            }
            Err(FetchError::Challenged(reason)) => {
                tracing::warn!(identifier = %id, identity = %identity.id, "cheap fetch challenged: {reason}");
                return ExtractionOutcome::TransientFailure(TransientFailure::challenged(reason));
            }
            Err(e) => {
                tracing::warn!(identifier = %id, "cheap fetch failed, rendering: {e}");
                fetch_failure = Some(e.to_string());
            }
        }

        let rendered = match self.gateway.render_full(request, identity).await {
            Ok(payload) => payload,
            Err(FetchError::Challenged(reason)) => {
                tracing::warn!(identifier = %id, identity = %identity.id, "render challenged: {reason}");
                return ExtractionOutcome::TransientFailure(TransientFailure::challenged(reason));
            }
            Err(FetchError::Transient(reason)) => {
                tracing::warn!(identifier = %id, "render failed: {reason}");
                return ExtractionOutcome::TransientFailure(TransientFailure::transient(reason));
            }
            Err(FetchError::Unavailable(reason)) => {
                tracing::warn!(identifier = %id, "renderer unavailable: {reason}");
                // Nothing usable was fetched either, so another identity may still succeed.
                if let Some(fetch_reason) = fetch_failure {
                    return ExtractionOutcome::TransientFailure(TransientFailure::transient(
                        format!("{fetch_reason}; renderer unavailable"),
                    ));
                }
                return ExtractionOutcome::PartialFailure("renderer-unavailable".to_string());
            }
        };
        if challenge::is_consent_wall(&rendered.final_url) {
            tracing::warn!(identifier = %id, "consent wall survived the render");
            return ExtractionOutcome::TransientFailure(TransientFailure::transient(
                "consent wall was not dismissed",
            ));
        }
        tracing::debug!(
            identifier = %id,
            status = rendered.status,
            source = ?rendered.source,
            bytes = rendered.body.len(),
            "payload received"
        );

        let analysis = Analysis::of(&rendered.body, request.include_images, &self.selectors);
        let partial = analysis
            .structured
            .merge(fetched.structured)
            .merge(analysis.probes)
            .merge(fetched.probes);

        if !partial.is_sufficient() {
            tracing::debug!(identifier = %id, "no name after all strategies");
            return ExtractionOutcome::no_name();
        }
        let final_url = Some(rendered.final_url)
            .filter(|u| !u.is_empty())
            .or(fetched_url);
        self.finish(partial, request, final_url.as_deref(), Strategy::Rendered)
    }

    fn finish(
        &self,
        mut partial: PartialRecord,
        request: &ExtractionRequest,
        final_url: Option<&str>,
        via: Strategy,
    ) -> ExtractionOutcome {
        if partial.coords.is_none() {
            partial.coords = final_url
                .and_then(decode_coords)
                .or_else(|| decode_coords(request.identifier.as_str()));
        }
        match BusinessRecord::from_partial(partial, request, via, Utc::now()) {
            Some(record) => ExtractionOutcome::Success(Box::new(record)),
            None => ExtractionOutcome::no_name(),
        }
    }

    /// Attach review snippets to a successful record that reports reviews.
    /// Failures and timeouts are logged and the record is kept as is.
    async fn enrich(
        &self,
        outcome: ExtractionOutcome,
        request: &ExtractionRequest,
        identity: &Identity,
    ) -> ExtractionOutcome {
        let mut record = match outcome {
            ExtractionOutcome::Success(record) => record,
            other => return other,
        };
        if !request.include_reviews || record.review_count.unwrap_or(0) == 0 {
            return ExtractionOutcome::Success(record);
        }

        let rendered = tokio::time::timeout(
            self.reviews_budget,
            self.gateway.render_reviews(request, identity),
        )
        .await;
        match rendered {
            Ok(Ok(payload)) => {
                let snippets = {
                    let document = Html::parse_document(&payload.body);
                    extract_reviews(&document, &self.selectors)
                };
                tracing::debug!(identifier = %request.identifier, count = snippets.len(), "reviews attached");
                record.attach_reviews(snippets);
            }
            Ok(Err(e)) => {
                tracing::warn!(identifier = %request.identifier, "review enrichment failed: {e}");
            }
            Err(_) => {
                tracing::warn!(
                    identifier = %request.identifier,
                    budget_ms = self.reviews_budget.as_millis() as u64,
                    "review enrichment timed out, keeping record without reviews"
                );
            }
        }
        ExtractionOutcome::Success(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::IdentityId;
    use crate::record::{PayloadSource, RawPayload};
    use crate::stealth::Fingerprint;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Canned {
        fetch: Result<String, FetchError>,
        render: Result<String, FetchError>,
        reviews: Result<String, FetchError>,
        render_url: Option<String>,
        renders: AtomicUsize,
        review_renders: AtomicUsize,
    }

    impl Canned {
        fn new(fetch: Result<&str, FetchError>, render: Result<&str, FetchError>) -> Self {
            Self {
                fetch: fetch.map(str::to_string),
                render: render.map(str::to_string),
                reviews: Err(FetchError::Transient("no reviews".to_string())),
                render_url: None,
                renders: AtomicUsize::new(0),
                review_renders: AtomicUsize::new(0),
            }
        }
    }

    fn payload(body: &str, source: PayloadSource) -> RawPayload {
        RawPayload {
            body: body.to_string(),
            final_url: "https://maps.example/maps/place/x/@10.5,20.25,17z".to_string(),
            status: 200,
            source,
        }
    }

    #[async_trait]
    impl Gateway for Canned {
        async fn fetch_cheap(&self, _: &ExtractionRequest, _: &Identity) -> Result<RawPayload, FetchError> {
            self.fetch.clone().map(|b| payload(&b, PayloadSource::Fetched))
        }
        async fn render_full(&self, _: &ExtractionRequest, _: &Identity) -> Result<RawPayload, FetchError> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            self.render.clone().map(|b| {
                let mut rendered = payload(&b, PayloadSource::Rendered);
                if let Some(url) = &self.render_url {
                    rendered.final_url = url.clone();
                }
                rendered
            })
        }
        async fn render_reviews(&self, _: &ExtractionRequest, _: &Identity) -> Result<RawPayload, FetchError> {
            self.review_renders.fetch_add(1, Ordering::SeqCst);
            self.reviews.clone().map(|b| payload(&b, PayloadSource::Rendered))
        }
        async fn retire(&self, _: IdentityId) {}
    }

    fn identity() -> Identity {
        serde_json::from_value(serde_json::json!({
            "id": 7,
            "proxy": null,
            "fingerprint": Fingerprint::random(None),
        }))
        .unwrap()
    }

    fn request() -> ExtractionRequest {
        ExtractionRequest {
            identifier: "https://maps.example/maps/place/x".into(),
            query: "clinics".to_string(),
            locale: None,
            include_reviews: false,
            include_images: false,
        }
    }

    async fn run(gateway: Canned, request: ExtractionRequest) -> (ExtractionOutcome, Arc<Canned>) {
        let gateway = Arc::new(gateway);
        let coordinator =
            ExtractionCoordinator::new(gateway.clone(), Arc::new(SelectorSet::builtin().clone()));
        (coordinator.extract(&request, &identity()).await, gateway)
    }

    const JSON_LD: &str = r#"<script type="application/ld+json">
        {"@type": "MedicalClinic", "name": "City Heart Clinic", "telephone": "+1 212 555 0100"}
        </script>"#;

    #[tokio::test]
    async fn test_fetched_probes_fill_structured_gaps() {
        let body = format!(
            r#"<html><head>{JSON_LD}</head><body><div class="F7nice"><span aria-hidden="true">4.6</span></div></body></html>"#
        );
        let (outcome, gateway) = run(Canned::new(Ok(&body), Ok("")), request()).await;
        let record = outcome.record().unwrap();
        assert_eq!(record.name, "City Heart Clinic");
        assert_eq!(record.rating, Some(4.6));
        assert_eq!(record.extracted_via, Strategy::Structured);
        assert_eq!((record.latitude, record.longitude), (Some(10.5), Some(20.25)));
        assert_eq!(gateway.renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_rendered_url_falls_back_to_fetched_url() {
        let mut gateway = Canned::new(Ok("<div>loading</div>"), Ok("<h1>Bean There</h1>"));
        gateway.render_url = Some(String::new());
        let (outcome, _) = run(gateway, request()).await;
        let record = outcome.record().unwrap();
        assert_eq!(record.extracted_via, Strategy::Rendered);
        assert_eq!((record.latitude, record.longitude), (Some(10.5), Some(20.25)));
    }

    #[tokio::test]
    async fn test_fetched_dom_strategy() {
        let (outcome, gateway) =
            run(Canned::new(Ok("<h1>Bean There</h1>"), Ok("")), request()).await;
        assert_eq!(outcome.record().unwrap().extracted_via, Strategy::FetchedDom);
        assert_eq!(gateway.renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_render_merges_under_fetched_structured_fields() {
        let fetched = r#"<script type="application/ld+json">{"@type": "Dentist", "telephone": "+1 555"}</script>"#;
        let rendered = r#"<h1>Smile Dental</h1><button data-item-id="phone:tel:+1999"></button>"#;
        let (outcome, _) = run(Canned::new(Ok(fetched), Ok(rendered)), request()).await;
        let record = outcome.record().unwrap();
        assert_eq!(record.name, "Smile Dental");
        assert_eq!(record.phone.as_deref(), Some("+1 555"));
        assert_eq!(record.extracted_via, Strategy::Rendered);
    }

    #[tokio::test]
    async fn test_fetch_failure_falls_through_to_render() {
        let (outcome, gateway) = run(
            Canned::new(Err(FetchError::Transient("status 500".into())), Ok("<h1>Clinic</h1>")),
            request(),
        )
        .await;
        assert_eq!(outcome.record().unwrap().name, "Clinic");
        assert_eq!(gateway.renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_challenge_on_fetch_stops_before_render() {
        let (outcome, gateway) = run(
            Canned::new(Err(FetchError::Challenged("sorry".into())), Ok("<h1>X</h1>")),
            request(),
        )
        .await;
        match outcome {
            ExtractionOutcome::TransientFailure(f) => assert!(f.is_challenge()),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(gateway.renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_render_transient_failure() {
        let (outcome, _) = run(
            Canned::new(Ok("<p>nothing</p>"), Err(FetchError::Transient("timeout".into()))),
            request(),
        )
        .await;
        match outcome {
            ExtractionOutcome::TransientFailure(f) => assert!(!f.is_challenge()),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_renderer_unavailable() {
        let (outcome, _) = run(
            Canned::new(Ok("<p>nothing</p>"), Err(FetchError::Unavailable("no chromium".into()))),
            request(),
        )
        .await;
        assert_eq!(outcome, ExtractionOutcome::PartialFailure("renderer-unavailable".into()));

        let (outcome, _) = run(
            Canned::new(
                Err(FetchError::Transient("reset".into())),
                Err(FetchError::Unavailable("no chromium".into())),
            ),
            request(),
        )
        .await;
        assert!(matches!(outcome, ExtractionOutcome::TransientFailure(_)));
    }

    #[tokio::test]
    async fn test_reviews_enrichment_only_when_count_positive() {
        let mut gateway = Canned::new(
            Ok(r#"<h1>Clinic</h1><div class="F7nice"><span aria-label="12 reviews"></span></div>"#),
            Ok(""),
        );
        gateway.reviews = Ok(r#"<span class="wiI7pd">Friendly staff</span>"#.to_string());
        let mut req = request();
        req.include_reviews = true;
        let (outcome, gateway) = run(gateway, req.clone()).await;
        let record = outcome.record().unwrap();
        assert_eq!(record.review_count, Some(12));
        assert_eq!(record.reviews, vec!["Friendly staff".to_string()]);
        assert_eq!(gateway.review_renders.load(Ordering::SeqCst), 1);

        let (outcome, gateway) = run(Canned::new(Ok("<h1>Clinic</h1>"), Ok("")), req).await;
        assert!(outcome.record().unwrap().reviews.is_empty());
        assert_eq!(gateway.review_renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_review_enrichment_failure_keeps_record() {
        let mut req = request();
        req.include_reviews = true;
        let (outcome, gateway) = run(
            Canned::new(
                Ok(r#"<h1>Clinic</h1><div class="F7nice"><span aria-label="3 reviews"></span></div>"#),
                Ok(""),
            ),
            req,
        )
        .await;
        assert!(outcome.record().is_some());
        assert_eq!(gateway.review_renders.load(Ordering::SeqCst), 1);
    }
}
