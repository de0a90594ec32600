//! Listener status snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of the bus listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerStatus {
    /// Whether the listener currently holds a live bus connection.
    pub connected: bool,
    /// Channel the listener subscribes to.
    pub channel: String,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

impl ListenerStatus {
    /// Takes a snapshot stamped with the current time.
    pub fn now(connected: bool, channel: impl Into<String>) -> Self {
        Self {
            connected,
            channel: channel.into(),
            timestamp: Utc::now(),
        }
    }
}
