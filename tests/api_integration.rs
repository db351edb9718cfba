//! HTTP-surface tests: contractual response shapes and status mapping,
//! served over a real socket.

use std::sync::Arc;

use harmonia_core::api::{AppState, router};
use harmonia_core::cache::{MemoryFastTier, MemorySlowTier};
use harmonia_core::hub::HubHandle;
use harmonia_core::service::{CacheAdmin, SearchService, StreamService, TrackService};
use harmonia_core::source::{JamendoSource, MusicBrainzSource};
use harmonia_core::{
    ApiClient, AuthValidator, CatalogAggregator, RetryPolicy, SourceAdapter, SourceRateLimiter,
    StreamResolver,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Serves a fully wired app (mock upstreams, in-memory tiers, mock identity
/// service) on an ephemeral port and returns its base URL.
async fn serve(upstream: &MockServer, auth: &MockServer) -> String {
    let client = ApiClient::default();
    let sources: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(JamendoSource::new(
            client.clone(),
            upstream.uri(),
            "be6cb53f",
        )),
        Arc::new(MusicBrainzSource::new(client.clone(), upstream.uri())),
    ];
    let aggregator = Arc::new(CatalogAggregator::new(
        sources,
        Arc::new(SourceRateLimiter::with_default_intervals()),
        RetryPolicy::no_retries(),
    ));
    let fast = Arc::new(MemoryFastTier::new());
    let slow = Arc::new(MemorySlowTier::new());

    let state = AppState {
        search: Arc::new(SearchService::new(
            Arc::clone(&aggregator),
            fast.clone(),
            slow.clone(),
        )),
        stream: Arc::new(StreamService::new(
            Arc::clone(&aggregator),
            StreamResolver::new(client, fast.clone(), RetryPolicy::no_retries()),
        )),
        tracks: Arc::new(TrackService::new(Arc::clone(&aggregator), slow)),
        notify: None,
        cache_admin: CacheAdmin::new(fast),
        auth: Arc::new(AuthValidator::new(auth.uri())),
        hub: HubHandle::start(),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.ok();
    });
    format!("http://{addr}")
}

fn jamendo_body() -> serde_json::Value {
    serde_json::json!({
        "headers": {"code": 0, "error_message": ""},
        "results": [
            {"id": "12345", "name": "Open Road", "artist_name": "The Commons",
             "album_name": "First Light", "duration": 212, "musicinfo_genres": ["indie"]}
        ]
    })
}

fn musicbrainz_body() -> serde_json::Value {
    serde_json::json!({
        "recordings": [
            {"id": "m1", "title": "Cold Water", "length": 215_000,
             "artist-credit": [{"name": "River Lane"}], "releases": []}
        ]
    })
}

async fn mount_upstreams(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/tracks/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jamendo_body()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/recording"))
        .respond_with(ResponseTemplate::new(200).set_body_json(musicbrainz_body()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_healthz() {
    let upstream = MockServer::start().await;
    let auth = MockServer::start().await;
    let base = serve(&upstream, &auth).await;

    let response = reqwest::get(format!("{base}/healthz")).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_search_response_shape() {
    let upstream = MockServer::start().await;
    let auth = MockServer::start().await;
    mount_upstreams(&upstream).await;
    let base = serve(&upstream, &auth).await;

    let body: serde_json::Value =
        reqwest::get(format!("{base}/search?q=indie&limit=3&sort_by=title&order=asc"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

    assert_eq!(body["query"], "indie");
    assert_eq!(body["total"], 2);
    assert_eq!(body["page"], 1);
    assert_eq!(body["limit"], 3);
    assert_eq!(body["offset"], 0);
    assert!(body["results"].is_array());
    assert_eq!(body["sort"]["by"], "title");
    assert_eq!(body["sort"]["order"], "asc");
    assert!(body["filters"].is_object());
    // Stream URLs are never part of a Track.
    assert!(body["results"][0].get("stream_url").is_none());
    assert!(body["results"][0].get("audio").is_none());
}

#[tokio::test]
async fn test_search_empty_query_is_400_with_error_body() {
    let upstream = MockServer::start().await;
    let auth = MockServer::start().await;
    let base = serve(&upstream, &auth).await;

    let response = reqwest::get(format!("{base}/search?q=")).await.unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_public_stream_success_shape() {
    let upstream = MockServer::start().await;
    let auth = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tracks/stream"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Type", "audio/mpeg"))
        .mount(&upstream)
        .await;
    let base = serve(&upstream, &auth).await;

    let response = reqwest::get(format!("{base}/stream/12345?source=jamendo"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        body["stream_url"],
        format!(
            "{}/tracks/stream?client_id=be6cb53f&id=12345",
            upstream.uri()
        )
    );
}

#[tokio::test]
async fn test_public_stream_non_streamable_source_is_403() {
    let upstream = MockServer::start().await;
    let auth = MockServer::start().await;
    let base = serve(&upstream, &auth).await;

    let response = reqwest::get(format!("{base}/stream/abcd?source=musicbrainz"))
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_stream_unknown_source_is_400() {
    let upstream = MockServer::start().await;
    let auth = MockServer::start().await;
    let base = serve(&upstream, &auth).await;

    let response = reqwest::get(format!("{base}/stream/1?source=spotify"))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_authenticated_stream_for_metadata_source_is_500() {
    let upstream = MockServer::start().await;
    let auth = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "valid": true, "userId": "u1", "username": "ada", "role": "listener"
        })))
        .mount(&auth)
        .await;
    let base = serve(&upstream, &auth).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/api/stream/abcd?source=musicbrainz"))
        .bearer_auth("tok")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("does not support streaming")
    );
}

#[tokio::test]
async fn test_protected_route_without_credentials_is_401() {
    let upstream = MockServer::start().await;
    let auth = MockServer::start().await;
    let base = serve(&upstream, &auth).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/api/stream/1?source=jamendo"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_protected_route_with_rejected_token_is_401() {
    let upstream = MockServer::start().await;
    let auth = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/validate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"valid": false, "error": "expired"})),
        )
        .mount(&auth)
        .await;
    let base = serve(&upstream, &auth).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/api/stream/1?source=jamendo"))
        .bearer_auth("bad")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_track_detail_round_trip_and_404() {
    let upstream = MockServer::start().await;
    let auth = MockServer::start().await;
    mount_upstreams(&upstream).await;
    Mock::given(method("GET"))
        .and(path("/recording/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&upstream)
        .await;
    let base = serve(&upstream, &auth).await;

    let body: serde_json::Value = reqwest::get(format!("{base}/tracks/jamendo/12345"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["source"], "jamendo");
    assert_eq!(body["external_id"], "12345");
    assert_eq!(body["title"], "Open Road");

    let missing = reqwest::get(format!("{base}/tracks/musicbrainz/missing"))
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}
