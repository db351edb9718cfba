//! Connection identity and registration types.

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::model::BusMessage;

/// Length of generated connection ids.
const CONNECTION_ID_LEN: usize = 16;

/// Unique identifier of a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generates a fresh id from a uniform alphanumeric sample.
    #[must_use]
    pub fn generate() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CONNECTION_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The hub's record of one live connection.
///
/// Owned exclusively by the hub registry from registration until
/// unregistration; dropping the entry drops the only long-lived sender,
/// which closes the outbound queue exactly once.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionEntry {
    /// Associated user, empty for anonymous connections.
    pub user_id: Option<String>,
    /// Bounded outbound queue feeding the connection's writer worker.
    pub outbound: mpsc::Sender<BusMessage>,
}

/// What a registering caller receives: the id and the receiving half of the
/// outbound queue, to be drained by the connection's writer worker.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Identifier to use for unregister and room events.
    pub id: ConnectionId,
    /// Outbound queue; yields `None` once the hub closes the connection.
    pub outbound: mpsc::Receiver<BusMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_alphanumeric_and_sized() {
        let id = ConnectionId::generate();
        assert_eq!(id.as_str().len(), CONNECTION_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generated_ids_do_not_collide_cheaply() {
        let ids: HashSet<String> = (0..1000)
            .map(|_| ConnectionId::generate().as_str().to_string())
            .collect();
        assert_eq!(ids.len(), 1000);
    }
}
