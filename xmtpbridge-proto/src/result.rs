//! Outcome of a single relay attempt.
//!
//! [`RelayResult`] is a tagged variant so that a success always carries a
//! message id and a failure always carries an error string. On the wire (and
//! in logs) it is flattened to `{"success": bool, "messageId"?: …, "error"?: …}`.

use serde::{Deserialize, Serialize};

/// Result of relaying one request to the messaging network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RelayResultRecord", into = "RelayResultRecord")]
pub enum RelayResult {
    /// The message was accepted by the network.
    Sent {
        /// Network-assigned id of the sent message.
        message_id: String,
    },
    /// The relay did not complete.
    Failed {
        /// Human-readable description of what went wrong.
        error: String,
    },
}

impl RelayResult {
    /// Creates a successful result.
    pub fn sent(message_id: impl Into<String>) -> Self {
        Self::Sent {
            message_id: message_id.into(),
        }
    }

    /// Creates a failed result.
    ///
    /// An empty error string is replaced by `"unknown error"` so that a
    /// failure is never blank.
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            "unknown error".to_string()
        } else {
            error
        };
        Self::Failed { error }
    }

    /// Returns `true` for [`RelayResult::Sent`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    /// Returns the message id of a successful relay.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Sent { message_id } => Some(message_id),
            Self::Failed { .. } => None,
        }
    }

    /// Returns the error of a failed relay.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Sent { .. } => None,
            Self::Failed { error } => Some(error),
        }
    }
}

/// Flat wire form of [`RelayResult`].
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayResultRecord {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<RelayResult> for RelayResultRecord {
    fn from(result: RelayResult) -> Self {
        match result {
            RelayResult::Sent { message_id } => Self {
                success: true,
                message_id: Some(message_id),
                error: None,
            },
            RelayResult::Failed { error } => Self {
                success: false,
                message_id: None,
                error: Some(error),
            },
        }
    }
}

impl TryFrom<RelayResultRecord> for RelayResult {
    type Error = String;

    fn try_from(record: RelayResultRecord) -> Result<Self, Self::Error> {
        match (record.success, record.message_id, record.error) {
            (true, Some(message_id), None) => Ok(Self::Sent { message_id }),
            (false, None, Some(error)) => Ok(Self::Failed { error }),
            (true, _, _) => Err("successful result must carry only a messageId".to_string()),
            (false, _, _) => Err("failed result must carry only an error".to_string()),
        }
    }
}
