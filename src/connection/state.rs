//! Connection lifecycle states and their transition table.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};

/// Lifecycle of a [`StreamConnection`](super::StreamConnection).
///
/// ```text
/// Idle -> Connecting -> Live <-> Reconnecting
///   \          \          \          \
///    `----------`----------`----------`--> Closed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Live,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Live)
                | (Connecting, Reconnecting)
                | (Live, Reconnecting)
                | (Reconnecting, Live)
                | (Idle | Connecting | Live | Reconnecting, Closed)
        )
    }

    pub fn transition(self, next: ConnectionState) -> Result<ConnectionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(SyncError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_closed(self) -> bool {
        self == ConnectionState::Closed
    }
}
