//! End-to-end stream-resolution tests: template rendering, probe
//! validation, caching, and public-source gating.

use std::sync::Arc;

use axum::http::StatusCode;
use harmonia_core::api::ApiError;
use harmonia_core::cache::MemoryFastTier;
use harmonia_core::service::StreamService;
use harmonia_core::source::{JamendoSource, MusicBrainzSource};
use harmonia_core::{
    ApiClient, CatalogAggregator, RetryPolicy, SourceAdapter, SourceId, SourceRateLimiter,
    StreamError, StreamResolver, UpstreamError,
};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Wires real adapters (Jamendo base pointed at the mock server) through the
/// stream service with an in-memory fast tier.
fn service(server: &MockServer, retry_policy: RetryPolicy) -> StreamService {
    let client = ApiClient::default();
    let sources: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(JamendoSource::new(client.clone(), server.uri(), "be6cb53f")),
        Arc::new(MusicBrainzSource::new(client.clone(), server.uri())),
    ];
    let aggregator = Arc::new(CatalogAggregator::new(
        sources,
        Arc::new(SourceRateLimiter::with_default_intervals()),
        retry_policy.clone(),
    ));
    let resolver = StreamResolver::new(client, Arc::new(MemoryFastTier::new()), retry_policy);
    StreamService::new(aggregator, resolver)
}

#[tokio::test]
async fn test_public_stream_happy_path_renders_template_and_probes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tracks/stream"))
        .and(query_param("client_id", "be6cb53f"))
        .and(query_param("id", "12345"))
        .and(header("range", "bytes=0-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "audio/mpeg")
                .set_body_bytes(b"ID".to_vec()),
        )
        .mount(&server)
        .await;

    let service = service(&server, RetryPolicy::no_retries());
    let descriptor = service
        .get_stream("12345", SourceId::Jamendo, true)
        .await
        .expect("stream should resolve");

    assert_eq!(
        descriptor.url,
        format!("{}/tracks/stream?client_id=be6cb53f&id=12345", server.uri())
    );
    assert!(descriptor.url.starts_with("http"));
    assert!(descriptor.expires_at > chrono::Utc::now());
}

#[tokio::test]
async fn test_second_resolution_within_ttl_does_no_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tracks/stream"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Type", "audio/mpeg"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server, RetryPolicy::no_retries());
    let first = service
        .get_stream("12345", SourceId::Jamendo, true)
        .await
        .unwrap();
    let second = service
        .get_stream("12345", SourceId::Jamendo, true)
        .await
        .unwrap();

    assert_eq!(first.url, second.url);
    // expect(1) verifies the second resolution performed no upstream probe.
}

#[tokio::test]
async fn test_public_request_for_metadata_source_is_403() {
    let server = MockServer::start().await;
    let service = service(&server, RetryPolicy::no_retries());

    let error = service
        .get_stream("abcd", SourceId::MusicBrainz, true)
        .await
        .expect_err("must be gated");
    assert!(matches!(error, StreamError::PublicSourceForbidden { .. }));

    let api: ApiError = error.into();
    assert_eq!(api.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_authenticated_request_for_metadata_source_is_500_not_supported() {
    let server = MockServer::start().await;
    let service = service(&server, RetryPolicy::no_retries());

    let error = service
        .get_stream("abcd", SourceId::MusicBrainz, false)
        .await
        .expect_err("metadata-only source cannot stream");
    assert!(matches!(
        error,
        StreamError::Upstream(UpstreamError::StreamNotSupported { .. })
    ));

    let api: ApiError = error.into();
    assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(api.message().contains("does not support streaming"));
}

#[tokio::test]
async fn test_probe_429_then_success_takes_at_least_the_hint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tracks/stream"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tracks/stream"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Type", "audio/mpeg"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server, RetryPolicy::with_max_retries(1));
    let start = std::time::Instant::now();
    let descriptor = service
        .get_stream("12345", SourceId::Jamendo, true)
        .await
        .expect("second attempt should succeed");

    // Exactly two attempts (expect counters), client-visible latency >= hint.
    assert!(start.elapsed() >= std::time::Duration::from_secs(2));
    assert!(descriptor.expires_at > chrono::Utc::now());
}

#[tokio::test]
async fn test_probe_rejection_maps_to_500() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tracks/stream"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let service = service(&server, RetryPolicy::no_retries());
    let error = service
        .get_stream("12345", SourceId::Jamendo, true)
        .await
        .expect_err("probe must reject");
    assert!(matches!(
        error,
        StreamError::Upstream(UpstreamError::InvalidStream { .. })
    ));

    let api: ApiError = error.into();
    assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_expiry_respects_cache_control_max_age() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tracks/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "audio/mpeg")
                .insert_header("Cache-Control", "public, max-age=600"),
        )
        .mount(&server)
        .await;

    let service = service(&server, RetryPolicy::no_retries());
    let descriptor = service
        .get_stream("12345", SourceId::Jamendo, true)
        .await
        .unwrap();

    let remaining = descriptor.expires_at - chrono::Utc::now();
    assert!(remaining <= chrono::Duration::seconds(601));
    assert!(remaining >= chrono::Duration::seconds(590));
}

#[tokio::test]
async fn test_octet_stream_content_type_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tracks/stream"))
        .respond_with(
            ResponseTemplate::new(206).insert_header("Content-Type", "application/octet-stream"),
        )
        .mount(&server)
        .await;

    let service = service(&server, RetryPolicy::no_retries());
    assert!(
        service
            .get_stream("12345", SourceId::Jamendo, true)
            .await
            .is_ok()
    );
}
