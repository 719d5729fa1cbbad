/*
    tracker.rs - Presence tracking and host election

    The host is the earliest-joined participant still present. Election is
    a pure function of the ordered join/leave stream, so every observer fed
    the same stream agrees on the host without an extra round trip.

    Once the participant set becomes empty the match is over and the
    tracker ignores further events.
*/

use std::collections::HashMap;
use tracing::debug;

use super::participant::Participant;
use crate::errors::{SyncError, SyncResult};

/// Notifications produced while applying a presence event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    /// `old` is `None` when the first participant is elected
    HostChanged {
        old: Option<Participant>,
        new: Participant,
    },
    GuestJoined(Participant),
    GuestLeft(Participant),
}

#[derive(Debug, Clone)]
pub struct PresenceTracker {
    self_id: String,
    presences: HashMap<String, Participant>,
    join_order: Vec<String>,
    host: Option<String>,
    ended: bool,
}

impl PresenceTracker {
    /// Tracker as seen by `self_id`
    pub fn new(self_id: impl Into<String>) -> Self {
        PresenceTracker {
            self_id: self_id.into(),
            presences: HashMap::new(),
            join_order: Vec::new(),
            host: None,
            ended: false,
        }
    }

    /// Apply one channel presence event: joins first, then leaves.
    ///
    /// The event is applied as a whole or not at all. A duplicate join or
    /// an unknown leaver anywhere in the event leaves the tracker untouched.
    ///
    /// # Returns
    /// The notifications in the order they happened. If the event empties
    /// the set, the notifications before the last leave are still returned
    /// and [`has_ended`](Self::has_ended) turns true.
    pub fn handle_presence_event(
        &mut self,
        joins: &[Participant],
        leaves: &[Participant],
    ) -> SyncResult<Vec<PresenceChange>> {
        let mut changes = Vec::new();

        if self.ended {
            debug!(self_id = %self.self_id, "match ended, ignoring presence event");
            return Ok(changes);
        }

        let mut next = self.clone();
        for joiner in joins {
            next.handle_join(joiner, &mut changes)?;
        }

        for leaver in leaves {
            next.handle_leave(leaver, &mut changes)?;
            if next.ended {
                break;
            }
        }

        *self = next;
        Ok(changes)
    }

    fn handle_join(&mut self, joiner: &Participant, changes: &mut Vec<PresenceChange>) -> SyncResult<()> {
        if self.presences.contains_key(&joiner.user_id) {
            return Err(SyncError::DuplicateJoin(joiner.user_id.clone()));
        }

        self.presences.insert(joiner.user_id.clone(), joiner.clone());
        self.join_order.push(joiner.user_id.clone());

        if self.host.is_none() {
            debug!(self_id = %self.self_id, host = %joiner.user_id, "first host elected");
            self.host = Some(joiner.user_id.clone());
            changes.push(PresenceChange::HostChanged {
                old: None,
                new: joiner.clone(),
            });
        } else {
            changes.push(PresenceChange::GuestJoined(joiner.clone()));
        }

        Ok(())
    }

    fn handle_leave(&mut self, leaver: &Participant, changes: &mut Vec<PresenceChange>) -> SyncResult<()> {
        let removed = self
            .presences
            .remove(&leaver.user_id)
            .ok_or_else(|| SyncError::UnknownLeaver(leaver.user_id.clone()))?;
        self.join_order.retain(|id| id != &leaver.user_id);

        if self.presences.is_empty() {
            debug!(self_id = %self.self_id, "last participant left, match ended");
            self.host = None;
            self.ended = true;
            return Ok(());
        }

        if self.host.as_deref() == Some(leaver.user_id.as_str()) {
            // join_order is non-empty because presences is non-empty
            let next = self.join_order[0].clone();
            let new_host = self.presences[&next].clone();
            debug!(
                self_id = %self.self_id,
                old = %removed.user_id,
                new = %new_host.user_id,
                "host left, electing earliest remaining joiner"
            );
            self.host = Some(next);
            changes.push(PresenceChange::HostChanged {
                old: Some(removed),
                new: new_host,
            });
        } else {
            changes.push(PresenceChange::GuestLeft(removed));
        }

        Ok(())
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn host(&self) -> Option<&Participant> {
        self.host.as_ref().and_then(|id| self.presences.get(id))
    }

    pub fn host_id(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn is_self_host(&self) -> bool {
        self.host.as_deref() == Some(self.self_id.as_str())
    }

    pub fn presence(&self, user_id: &str) -> Option<&Participant> {
        self.presences.get(user_id)
    }

    pub fn self_presence(&self) -> Option<&Participant> {
        self.presences.get(&self.self_id)
    }

    /// Participants in join order
    pub fn participants(&self) -> Vec<&Participant> {
        self.join_order
            .iter()
            .filter_map(|id| self.presences.get(id))
            .collect()
    }

    /// Everyone except the host, in join order
    pub fn guests(&self) -> Vec<&Participant> {
        self.participants()
            .into_iter()
            .filter(|p| Some(p.user_id.as_str()) != self.host.as_deref())
            .collect()
    }

    pub fn join_order(&self) -> &[String] {
        &self.join_order
    }

    pub fn len(&self) -> usize {
        self.presences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presences.is_empty()
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }
}
