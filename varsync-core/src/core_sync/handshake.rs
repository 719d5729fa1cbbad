//! Join handshake
//!
//! A joiner lists its registered keys; the host accepts when every key it
//! knows is in that list and answers with a full snapshot of its registry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core_presence::Participant;
use crate::core_vars::{RegistryTables, ReplicatedKey, ValueBatch};

/// Progress of the local participant's join
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HandshakeState {
    /// No host seen yet
    #[default]
    Idle,
    AwaitingResponse { host: Participant },
    Complete,
    /// The host refused us; replication traffic is ignored from now on
    Refused,
}

impl HandshakeState {
    pub fn is_complete(&self) -> bool {
        matches!(self, HandshakeState::Complete)
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self, HandshakeState::AwaitingResponse { .. })
    }
}

/// Envelope on the handshake opcode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HandshakeMessage {
    Request { keys: Vec<ReplicatedKey> },
    Response(HandshakeResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HandshakeResponse {
    Accepted { snapshot: ValueBatch },
    /// Host keys absent from the request
    Rejected { missing: Vec<ReplicatedKey> },
}

/// Request listing every locally registered key
pub fn request(tables: &RegistryTables) -> HandshakeMessage {
    HandshakeMessage::Request {
        keys: tables.keys().cloned().collect(),
    }
}

/// Host-side answer to a request
pub fn respond(tables: &RegistryTables, requested: &[ReplicatedKey]) -> HandshakeResponse {
    let requested: BTreeSet<&ReplicatedKey> = requested.iter().collect();
    let missing: Vec<ReplicatedKey> = tables
        .keys()
        .filter(|key| !requested.contains(key))
        .cloned()
        .collect();

    if missing.is_empty() {
        HandshakeResponse::Accepted {
            snapshot: tables.snapshot(),
        }
    } else {
        HandshakeResponse::Rejected { missing }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core_vars::VarCell;

    fn tables(names: &[&str]) -> RegistryTables {
        let mut tables = RegistryTables::default();
        for name in names {
            tables
                .register(ReplicatedKey::shared(*name), Arc::new(VarCell::new(0i64, None, 4)))
                .unwrap();
        }
        tables
    }

    #[test]
    fn test_superset_is_accepted() {
        let host = tables(&["score", "lives"]);
        let joiner = tables(&["score", "lives", "extra"]);

        let HandshakeMessage::Request { keys } = request(&joiner) else {
            panic!("expected a request");
        };
        match respond(&host, &keys) {
            HandshakeResponse::Accepted { snapshot } => assert_eq!(snapshot.len(), 2),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_missing_keys_are_rejected() {
        let host = tables(&["score", "lives"]);
        let requested = vec![ReplicatedKey::shared("score")];

        assert_eq!(
            respond(&host, &requested),
            HandshakeResponse::Rejected {
                missing: vec![ReplicatedKey::shared("lives")]
            }
        );
    }

    #[test]
    fn test_empty_host_accepts_anyone() {
        let host = tables(&[]);
        assert!(matches!(
            respond(&host, &[]),
            HandshakeResponse::Accepted { .. }
        ));
    }
}
