/*
    key.rs - Replicated slot identity

    A key is (owner, name). Shared variables have no owner; owned variables
    belong to one user id and only that user writes them locally.
*/

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one replicated slot across every participant of a match
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicatedKey {
    /// `None` for shared variables, the owning user id otherwise
    pub owner_id: Option<String>,

    /// Variable name as declared by the application
    pub name: String,
}

impl ReplicatedKey {
    pub fn shared(name: impl Into<String>) -> Self {
        ReplicatedKey {
            owner_id: None,
            name: name.into(),
        }
    }

    pub fn owned(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        ReplicatedKey {
            owner_id: Some(owner_id.into()),
            name: name.into(),
        }
    }

    pub fn is_owned(&self) -> bool {
        self.owner_id.is_some()
    }

    /// Whether `user_id` owns this key. Shared keys are owned by nobody.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id.as_deref() == Some(user_id)
    }
}

impl fmt::Display for ReplicatedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner_id {
            Some(owner) => write!(f, "user:{}/{}", owner, self.name),
            None => write!(f, "shared/{}", self.name),
        }
    }
}

/// Approval state of a key's current value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationStatus {
    /// No approval workflow applies
    #[default]
    None,
    /// A guest proposed this value and waits for the host
    Pending,
    /// The host approved the current value
    Validated,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationStatus::None => "none",
            ValidationStatus::Pending => "pending",
            ValidationStatus::Validated => "validated",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_equality_by_value() {
        let a = ReplicatedKey::shared("score");
        let b = ReplicatedKey::shared(String::from("score"));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_owned_and_shared_keys_differ() {
        let shared = ReplicatedKey::shared("hp");
        let owned = ReplicatedKey::owned("alice", "hp");
        assert_ne!(shared, owned);
        assert!(owned.is_owned_by("alice"));
        assert!(!owned.is_owned_by("bob"));
        assert!(!shared.is_owned_by("alice"));
        assert_eq!(owned.to_string(), "user:alice/hp");
    }
}
