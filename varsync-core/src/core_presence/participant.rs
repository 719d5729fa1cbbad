//! Connected endpoint identity

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One connected endpoint of a match
///
/// Snapshots are immutable; a reconnect produces a new participant with a
/// fresh `session_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub session_id: String,
    pub username: String,
    pub status: Option<String>,
}

impl Participant {
    /// New participant with a random session id
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Participant {
            user_id: user_id.into(),
            session_id: Uuid::new_v4().to_string(),
            username: username.into(),
            status: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.username, self.user_id)
    }
}
