//! Server entry point: construct every component explicitly and serve.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use harmonia_core::api::{AppState, router};
use harmonia_core::cache::{FastTier, MemoryFastTier, MongoSlowTier, RedisFastTier, SlowTier};
use harmonia_core::hub::{BusPublisher, HubHandle, run_bridge};
use harmonia_core::service::{
    CacheAdmin, NotifyService, SearchService, StreamService, TrackService,
};
use harmonia_core::{
    ApiClient, AuthValidator, CatalogAggregator, Config, RetryPolicy, SourceRateLimiter,
    StreamResolver, build_default_sources,
};
use tracing::{info, warn};

/// Interval of the expired-document sweep on the slow tier.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env().context("invalid configuration")?;
    info!(bind = %config.bind_addr, "harmonia starting");

    // Upstream plumbing.
    let client = ApiClient::new(&config.user_agent);
    let limiter = Arc::new(SourceRateLimiter::with_default_intervals());
    let sources = build_default_sources(&config, &client);
    let aggregator = Arc::new(CatalogAggregator::new(
        sources,
        limiter,
        RetryPolicy::default(),
    ));

    // Fast tier + bus. Redis being down is a degradation: requests proceed
    // uncached and cross-instance notifications are disabled.
    let bus_url = config.bus_url();
    let (fast, notify, bus_client): (
        Arc<dyn FastTier>,
        Option<NotifyService>,
        Option<redis::Client>,
    ) = match RedisFastTier::connect(&bus_url).await {
        Ok(tier) => {
            let redis_client =
                redis::Client::open(bus_url.as_str()).context("invalid bus address")?;
            let publisher_conn = redis::aio::ConnectionManager::new(redis_client.clone())
                .await
                .context("bus connection failed")?;
            (
                Arc::new(tier),
                Some(NotifyService::new(BusPublisher::new(publisher_conn))),
                Some(redis_client),
            )
        }
        Err(error) => {
            warn!(%error, "redis unavailable, running with in-memory fast tier and no bus");
            (Arc::new(MemoryFastTier::new()), None, None)
        }
    };

    // Slow tier: the document store is required.
    let slow: Arc<dyn SlowTier> = Arc::new(
        MongoSlowTier::connect(&config.doc_store_uri)
            .await
            .context("document store connection failed")?,
    );

    // Orchestrators.
    let search = Arc::new(SearchService::new(
        Arc::clone(&aggregator),
        Arc::clone(&fast),
        Arc::clone(&slow),
    ));
    let stream = Arc::new(StreamService::new(
        Arc::clone(&aggregator),
        StreamResolver::new(client.clone(), Arc::clone(&fast), RetryPolicy::default()),
    ));
    let tracks = Arc::new(TrackService::new(
        Arc::clone(&aggregator),
        Arc::clone(&slow),
    ));
    let auth = Arc::new(AuthValidator::new(config.auth_service_url.clone()));
    let cache_admin = CacheAdmin::new(Arc::clone(&fast));

    // Real-time hub and its bus bridge.
    let hub = HubHandle::start();
    if let Some(bus_client) = bus_client {
        tokio::spawn(run_bridge(bus_client, hub.clone()));
    }

    // Periodic reap of expired slow-tier documents.
    tokio::spawn(sweep_loop(Arc::clone(&slow)));

    let state = AppState {
        search,
        stream,
        tracks,
        notify,
        cache_admin,
        auth,
        hub,
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state))
        .await
        .context("server error")?;
    Ok(())
}

async fn sweep_loop(slow: Arc<dyn SlowTier>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match slow.sweep_expired().await {
            Ok(removed) if removed > 0 => info!(removed, "swept expired search documents"),
            Ok(_) => {}
            Err(error) => warn!(%error, "sweep failed"),
        }
    }
}
