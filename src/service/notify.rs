//! Notification orchestration: typed publishes onto the shared bus.
//!
//! Components never hand messages to the hub directly; everything goes
//! through the bus so every process instance (this one included) fans out to
//! its own connections via the bridge.

use tracing::instrument;

use crate::hub::{
    BusError, BusPublisher, GLOBAL_NOTIFICATIONS, LIVE_PLAYLISTS, NOW_PLAYING, PLAYLIST_UPDATES,
    USER_PRESENCE, user_channel,
};
use crate::model::BusMessage;

/// Notification orchestrator.
#[derive(Debug, Clone)]
pub struct NotifyService {
    publisher: BusPublisher,
}

impl NotifyService {
    /// Creates the orchestrator over a bus publisher.
    #[must_use]
    pub fn new(publisher: BusPublisher) -> Self {
        Self { publisher }
    }

    /// Sends a notification to one user.
    ///
    /// # Errors
    ///
    /// [`BusError`] when the bus is unreachable.
    #[instrument(skip(self, payload))]
    pub async fn notify_user(
        &self,
        user_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), BusError> {
        self.publisher
            .publish(&user_channel(user_id), &BusMessage::notification(payload))
            .await
    }

    /// Sends a notification to every connected user.
    ///
    /// # Errors
    ///
    /// [`BusError`] when the bus is unreachable.
    #[instrument(skip(self, payload))]
    pub async fn notify_all(&self, payload: serde_json::Value) -> Result<(), BusError> {
        self.publisher
            .publish(GLOBAL_NOTIFICATIONS, &BusMessage::notification(payload))
            .await
    }

    /// Publishes a now-playing update.
    ///
    /// # Errors
    ///
    /// [`BusError`] when the bus is unreachable.
    #[instrument(skip(self, payload))]
    pub async fn now_playing(&self, payload: serde_json::Value) -> Result<(), BusError> {
        self.publisher
            .publish(NOW_PLAYING, &BusMessage::now_playing(payload))
            .await
    }

    /// Publishes a playlist change.
    ///
    /// # Errors
    ///
    /// [`BusError`] when the bus is unreachable.
    #[instrument(skip(self, payload))]
    pub async fn playlist_update(&self, payload: serde_json::Value) -> Result<(), BusError> {
        self.publisher
            .publish(PLAYLIST_UPDATES, &BusMessage::playlist_update(payload))
            .await
    }

    /// Publishes a live-playlist (room) update.
    ///
    /// # Errors
    ///
    /// [`BusError`] when the bus is unreachable.
    #[instrument(skip(self, payload))]
    pub async fn live_playlist(&self, payload: serde_json::Value) -> Result<(), BusError> {
        self.publisher
            .publish(LIVE_PLAYLISTS, &BusMessage::live_playlist(payload))
            .await
    }

    /// Publishes a presence change for a user.
    ///
    /// # Errors
    ///
    /// [`BusError`] when the bus is unreachable.
    #[instrument(skip(self))]
    pub async fn presence(&self, user_id: &str, online: bool) -> Result<(), BusError> {
        self.publisher
            .publish(
                USER_PRESENCE,
                &BusMessage::user_presence(serde_json::json!({
                    "user_id": user_id,
                    "online": online,
                })),
            )
            .await
    }
}
