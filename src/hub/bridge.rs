//! Bridge between the shared message bus and the in-process hub.
//!
//! On startup the bridge subscribes to the well-known channels plus the
//! per-user `notifications:*` pattern. Every inbound payload deserializes to
//! a [`BusMessage`] and is routed into the hub: user channels become
//! user-directed sends, room-scoped live-playlist payloads become room
//! sends, everything else is a broadcast.
//!
//! Components never talk to the hub directly for notifications - they
//! publish to the bus through [`BusPublisher`], so peer instances fan out to
//! their own connections without knowing about each other.

use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::HubHandle;
use crate::model::BusMessage;

/// Global notification channel.
pub const GLOBAL_NOTIFICATIONS: &str = "notifications:global";
/// Live catalog/update feed.
pub const LIVE_UPDATES: &str = "live_updates";
/// Playlist change feed.
pub const PLAYLIST_UPDATES: &str = "playlist_updates";
/// Presence change feed.
pub const USER_PRESENCE: &str = "user_presence";
/// Now-playing feed.
pub const NOW_PLAYING: &str = "now_playing";
/// Live (collaborative) playlist feed.
pub const LIVE_PLAYLISTS: &str = "live_playlists";
/// Operator announcement feed.
pub const SYSTEM_NOTIFICATIONS: &str = "system_notifications";

/// Delay between reconnect attempts when the bus subscription drops.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Channel carrying notifications for one user.
#[must_use]
pub fn user_channel(user_id: &str) -> String {
    format!("notifications:{user_id}")
}

/// Errors from bus publishes.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus is unreachable or refused the publish.
    #[error("bus unavailable: {detail}")]
    Unavailable {
        /// Short backend diagnostic.
        detail: String,
    },

    /// The message could not be encoded.
    #[error("bus message encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Publishes component notifications onto the shared bus.
#[derive(Clone)]
pub struct BusPublisher {
    conn: ConnectionManager,
}

impl BusPublisher {
    /// Wraps a redis connection manager.
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Publishes one message to one channel.
    ///
    /// # Errors
    ///
    /// [`BusError`] on encoding or transport failure.
    #[instrument(skip(self, message), fields(channel, kind = %message.kind))]
    pub async fn publish(&self, channel: &str, message: &BusMessage) -> Result<(), BusError> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.conn.clone();
        conn.publish(channel, payload)
            .await
            .map_err(|e| BusError::Unavailable {
                detail: e.to_string(),
            })
    }
}

impl std::fmt::Debug for BusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusPublisher").finish_non_exhaustive()
    }
}

/// Where a bus payload should be delivered.
#[derive(Debug, PartialEq)]
enum Route {
    Broadcast,
    User(String),
    Room(String),
    Ignore,
}

/// Routing rules for inbound bus traffic.
fn route(channel: &str, message: &BusMessage) -> Route {
    if channel == GLOBAL_NOTIFICATIONS {
        return Route::Broadcast;
    }
    if let Some(user_id) = channel.strip_prefix("notifications:") {
        if user_id.is_empty() {
            return Route::Ignore;
        }
        return Route::User(user_id.to_string());
    }
    if channel == LIVE_PLAYLISTS {
        // Room-scoped payloads carry the room id; fall back to broadcast so
        // lobby views still see activity.
        if let Some(room) = message.data.get("room").and_then(|r| r.as_str()) {
            return Route::Room(room.to_string());
        }
        return Route::Broadcast;
    }
    match channel {
        LIVE_UPDATES | PLAYLIST_UPDATES | USER_PRESENCE | NOW_PLAYING | SYSTEM_NOTIFICATIONS => {
            Route::Broadcast
        }
        _ => Route::Ignore,
    }
}

/// Feeds one inbound payload into the hub.
async fn dispatch_payload(hub: &HubHandle, channel: &str, payload: &str) {
    let message: BusMessage = match serde_json::from_str(payload) {
        Ok(message) => message,
        Err(error) => {
            warn!(channel, %error, "ignoring undecodable bus payload");
            return;
        }
    };
    match route(channel, &message) {
        Route::Broadcast => hub.broadcast(message).await,
        Route::User(user_id) => hub.send_to_user(user_id, message).await,
        Route::Room(room) => hub.send_to_room(room, message).await,
        Route::Ignore => debug!(channel, "ignoring payload on unknown channel"),
    }
}

/// Runs the bus subscription loop, reconnecting on failure.
///
/// Spawned once per process at startup; runs until the process exits.
#[instrument(skip_all)]
pub async fn run_bridge(client: redis::Client, hub: HubHandle) {
    loop {
        match subscribe_and_pump(&client, &hub).await {
            Ok(()) => info!("bus subscription ended, resubscribing"),
            Err(error) => warn!(%error, "bus subscription failed, retrying"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn subscribe_and_pump(client: &redis::Client, hub: &HubHandle) -> redis::RedisResult<()> {
    let connection = client.get_async_connection().await?;
    let mut pubsub = connection.into_pubsub();

    for channel in [
        GLOBAL_NOTIFICATIONS,
        LIVE_UPDATES,
        PLAYLIST_UPDATES,
        USER_PRESENCE,
        NOW_PLAYING,
        LIVE_PLAYLISTS,
        SYSTEM_NOTIFICATIONS,
    ] {
        pubsub.subscribe(channel).await?;
    }
    pubsub.psubscribe("notifications:*").await?;
    info!("bus bridge subscribed");

    let mut stream = pubsub.on_message();
    while let Some(message) = futures_util::StreamExt::next(&mut stream).await {
        let channel = message.get_channel_name().to_string();
        match message.get_payload::<String>() {
            Ok(payload) => dispatch_payload(hub, &channel, &payload).await,
            Err(error) => warn!(%error, channel, "unreadable bus payload"),
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_user_channel_format() {
        assert_eq!(user_channel("u1"), "notifications:u1");
    }

    #[test]
    fn test_route_global_is_broadcast() {
        let msg = BusMessage::notification(serde_json::json!(1));
        assert_eq!(route(GLOBAL_NOTIFICATIONS, &msg), Route::Broadcast);
    }

    #[test]
    fn test_route_user_channel() {
        let msg = BusMessage::notification(serde_json::json!(1));
        assert_eq!(route("notifications:u42", &msg), Route::User("u42".to_string()));
        assert_eq!(route("notifications:", &msg), Route::Ignore);
    }

    #[test]
    fn test_route_known_feeds_broadcast() {
        let msg = BusMessage::now_playing(serde_json::json!(1));
        for channel in [
            LIVE_UPDATES,
            PLAYLIST_UPDATES,
            USER_PRESENCE,
            NOW_PLAYING,
            SYSTEM_NOTIFICATIONS,
        ] {
            assert_eq!(route(channel, &msg), Route::Broadcast, "channel {channel}");
        }
    }

    #[test]
    fn test_route_live_playlists_with_room() {
        let msg = BusMessage::live_playlist(serde_json::json!({"room": "r1", "track": "t"}));
        assert_eq!(route(LIVE_PLAYLISTS, &msg), Route::Room("r1".to_string()));

        let roomless = BusMessage::live_playlist(serde_json::json!({"track": "t"}));
        assert_eq!(route(LIVE_PLAYLISTS, &roomless), Route::Broadcast);
    }

    #[test]
    fn test_route_unknown_channel_ignored() {
        let msg = BusMessage::notification(serde_json::json!(1));
        assert_eq!(route("mystery", &msg), Route::Ignore);
    }

    #[tokio::test]
    async fn test_dispatch_payload_routes_user_messages() {
        let hub = HubHandle::start();
        let mut conn = hub.register(Some("u1".to_string())).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let payload =
            serde_json::to_string(&BusMessage::notification(serde_json::json!("hello"))).unwrap();
        dispatch_payload(&hub, "notifications:u1", &payload).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(conn.outbound.recv().await.unwrap().data, "hello");
    }

    #[tokio::test]
    async fn test_dispatch_payload_ignores_garbage() {
        let hub = HubHandle::start();
        let mut conn = hub.register(Some("u1".to_string())).await;
        tokio::task::yield_now().await;

        dispatch_payload(&hub, "notifications:u1", "{not json").await;
        tokio::task::yield_now().await;

        assert!(conn.outbound.try_recv().is_err());
    }
}
