//! Strategy selection in the extraction coordinator, driven through a
//! scripted gateway.

mod support;

use placeharvest::acquisition::FetchError;
use placeharvest::coordinator::ExtractionCoordinator;
use placeharvest::extraction::SelectorSet;
use placeharvest::pool::{IdentityPool, PoolLimits};
use placeharvest::record::{ExtractionOutcome, ExtractionRequest, Strategy};
use std::sync::Arc;
use support::{json_ld, Call, ScriptedGateway};

// ── Builders ──

fn request(identifier: &str) -> ExtractionRequest {
    ExtractionRequest {
        identifier: identifier.into(),
        query: "clinics near me".to_string(),
        locale: None,
        include_reviews: false,
        include_images: false,
    }
}

async fn extract(gateway: Arc<ScriptedGateway>, req: &ExtractionRequest) -> ExtractionOutcome {
    let pool = IdentityPool::new(
        PoolLimits {
            ceiling: 1,
            max_uses: 10,
            max_errors: 3,
        },
        Vec::new(),
        None,
    );
    let slot = pool.acquire(&[]).await.unwrap();
    let coordinator = ExtractionCoordinator::new(gateway, Arc::new(SelectorSet::builtin().clone()));
    coordinator.extract(req, slot.identity()).await
}

// ── Cheap paths ──

#[tokio::test]
async fn test_structured_data_needs_no_render() {
    let gateway = Arc::new(ScriptedGateway::new(|_, call, _| match call {
        Call::Fetch => Ok(json_ld("City Heart Clinic")),
        _ => Err(FetchError::Transient("render should not run".into())),
    }));
    let req = request("https://www.google.com/maps/place/City+Heart/@40.7128,-74.006,17z");

    let outcome = extract(Arc::clone(&gateway), &req).await;
    let record = outcome.record().expect("record");
    assert_eq!(record.name, "City Heart Clinic");
    assert_eq!(record.extracted_via, Strategy::Structured);
    assert_eq!(record.phone.as_deref(), Some("+1 212 555 0100"));
    assert_eq!(record.latitude, Some(40.7128));
    assert_eq!(record.longitude, Some(-74.006));
    assert!(gateway.calls(Call::Render).is_empty());
}

#[tokio::test]
async fn test_heading_fallback_strips_decoration() {
    let gateway = Arc::new(ScriptedGateway::new(|_, call, _| match call {
        Call::Fetch => Ok("<html><body><h1>  City Heart Clinic ⭐ </h1></body></html>".to_string()),
        _ => Err(FetchError::Transient("render should not run".into())),
    }));
    let req = request("https://www.google.com/maps/place/City+Heart");

    let outcome = extract(Arc::clone(&gateway), &req).await;
    let record = outcome.record().expect("record");
    assert_eq!(record.name, "City Heart Clinic");
    assert_eq!(record.extracted_via, Strategy::FetchedDom);
    assert!(gateway.calls(Call::Render).is_empty());
}

#[tokio::test]
async fn test_consent_wall_from_fetch_is_rendered_past() {
    let gateway = Arc::new(
        ScriptedGateway::new(|_, call, _| match call {
            Call::Fetch => Ok("<html><body><h1>Before you continue to Google</h1></body></html>".to_string()),
            _ => Ok(json_ld("City Heart Clinic")),
        })
        .with_fetch_url("https://consent.google.com/ml?continue=https://www.google.com/maps/place/City+Heart&gl=DE"),
    );
    let req = request("https://www.google.com/maps/place/City+Heart");

    let outcome = extract(Arc::clone(&gateway), &req).await;
    let record = outcome.record().expect("record");
    assert_eq!(record.name, "City Heart Clinic");
    assert_eq!(record.extracted_via, Strategy::Rendered);
    assert_eq!(gateway.calls(Call::Render).len(), 1);
}

// ── Rendering ──

#[tokio::test]
async fn test_nameless_fetch_falls_back_to_render() {
    let gateway = Arc::new(ScriptedGateway::new(|_, call, _| match call {
        Call::Fetch => Ok("<html><body><div>loading</div></body></html>".to_string()),
        _ => Ok(r#"<html><body><h1 class="DUwDvf">Harbor Dental</h1>
            <button data-item-id="address" aria-label="Address: 1 Pier St, Boston, MA"></button>
            </body></html>"#
            .to_string()),
    }));
    let req = request("https://www.google.com/maps/place/Harbor+Dental");

    let outcome = extract(Arc::clone(&gateway), &req).await;
    let record = outcome.record().expect("record");
    assert_eq!(record.name, "Harbor Dental");
    assert_eq!(record.extracted_via, Strategy::Rendered);
    assert_eq!(record.address.full.as_deref(), Some("1 Pier St, Boston, MA"));
    assert_eq!(gateway.calls(Call::Render).len(), 1);
}

#[tokio::test]
async fn test_no_name_anywhere_is_a_content_failure() {
    let gateway = Arc::new(ScriptedGateway::new(|_, _, _| {
        Ok("<html><body><p>Nothing here</p></body></html>".to_string())
    }));
    let req = request("https://www.google.com/maps/place/Ghost");

    let outcome = extract(gateway, &req).await;
    assert_eq!(outcome, ExtractionOutcome::PartialFailure("no-name".to_string()));
}

#[tokio::test]
async fn test_challenged_render_is_transient() {
    let gateway = Arc::new(ScriptedGateway::new(|_, call, _| match call {
        Call::Fetch => Err(FetchError::Transient("fetch returned status 503".into())),
        _ => Err(FetchError::Challenged("/sorry/".into())),
    }));
    let req = request("https://www.google.com/maps/place/Busy");

    match extract(gateway, &req).await {
        ExtractionOutcome::TransientFailure(failure) => assert!(failure.is_challenge()),
        other => panic!("expected a challenge, got {other:?}"),
    }
}
