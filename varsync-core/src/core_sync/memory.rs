/*
    memory.rs - In-process match transport

    MemoryHub routes payloads between sessions living in the same process
    through unbounded tokio mpsc inboxes. MemoryMatch drives a whole match:
    it delivers presence events synchronously and pumps queued payloads
    until every inbox is drained. Used by the integration tests and the
    `varsync simulate` command.
*/

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::channel::{Recipients, SyncChannel};
use super::session::SyncSession;
use crate::config::Config;
use crate::core_presence::Participant;
use crate::errors::{poisoned, SyncError, SyncResult};

/// One payload in flight
#[derive(Debug, Clone)]
pub struct Delivery {
    pub sender: Participant,
    pub opcode: i64,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct HubState {
    /// Joined participants in join order
    members: Vec<Participant>,
    inboxes: HashMap<String, mpsc::UnboundedSender<Delivery>>,
}

/// Shared routing table of one in-memory match
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a participant to the hub
    ///
    /// The participant receives nothing until it joins.
    ///
    /// # Arguments
    /// * `participant` - Identity used as the sender of everything it sends
    ///
    /// # Returns
    /// The channel to hand to its session and the inbox the integrator
    /// drains into [`SyncSession::on_data_received`]
    pub fn connect(&self, participant: Participant) -> SyncResult<(MemoryChannel, mpsc::UnboundedReceiver<Delivery>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .map_err(poisoned("hub"))?
            .inboxes
            .insert(participant.user_id.clone(), tx);
        let channel = MemoryChannel {
            hub: self.clone(),
            sender: participant,
        };
        Ok((channel, rx))
    }

    fn join(&self, participant: &Participant) -> SyncResult<Vec<Participant>> {
        let mut state = self.state.lock().map_err(poisoned("hub"))?;
        state.members.push(participant.clone());
        Ok(state.members.clone())
    }

    fn leave(&self, user_id: &str) -> SyncResult<Option<Participant>> {
        let mut state = self.state.lock().map_err(poisoned("hub"))?;
        let position = state.members.iter().position(|p| p.user_id == user_id);
        Ok(position.map(|index| state.members.remove(index)))
    }

    pub fn members(&self) -> SyncResult<Vec<Participant>> {
        Ok(self.state.lock().map_err(poisoned("hub"))?.members.clone())
    }

    fn route(&self, sender: &Participant, recipients: &Recipients, opcode: i64, payload: Vec<u8>) -> SyncResult<()> {
        let state = self.state.lock().map_err(poisoned("hub"))?;
        for member in &state.members {
            if member.user_id == sender.user_id || !recipients.includes(&member.user_id) {
                continue;
            }
            let Some(inbox) = state.inboxes.get(&member.user_id) else {
                continue;
            };
            inbox
                .send(Delivery {
                    sender: sender.clone(),
                    opcode,
                    payload: payload.clone(),
                })
                .map_err(|_| SyncError::Channel(format!("inbox of {} is closed", member.user_id)))?;
        }
        Ok(())
    }
}

/// [`SyncChannel`] of one participant on a [`MemoryHub`]
#[derive(Clone)]
pub struct MemoryChannel {
    hub: MemoryHub,
    sender: Participant,
}

impl SyncChannel for MemoryChannel {
    fn send(&self, recipients: &Recipients, opcode: i64, payload: Vec<u8>) -> SyncResult<()> {
        self.hub.route(&self.sender, recipients, opcode, payload)
    }
}

struct MemoryPeer {
    session: SyncSession,
    inbox: mpsc::UnboundedReceiver<Delivery>,
}

/// A complete match of in-process sessions
pub struct MemoryMatch {
    hub: MemoryHub,
    config: Config,
    peers: Vec<MemoryPeer>,
}

impl MemoryMatch {
    pub fn new(config: Config) -> Self {
        MemoryMatch {
            hub: MemoryHub::new(),
            config,
            peers: Vec::new(),
        }
    }

    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }

    /// Create a session for `participant` without joining it
    pub fn add_peer(&mut self, participant: Participant) -> SyncResult<SyncSession> {
        let (channel, inbox) = self.hub.connect(participant.clone())?;
        let session = SyncSession::with_config(participant, Arc::new(channel), &self.config)?;
        self.peers.push(MemoryPeer {
            session: session.clone(),
            inbox,
        });
        Ok(session)
    }

    pub fn session(&self, user_id: &str) -> Option<&SyncSession> {
        self.peers
            .iter()
            .map(|peer| &peer.session)
            .find(|session| session.self_participant().user_id == user_id)
    }

    fn require(&self, user_id: &str) -> SyncResult<SyncSession> {
        self.session(user_id)
            .cloned()
            .ok_or_else(|| SyncError::Channel(format!("no peer named {}", user_id)))
    }

    /// Join a peer: it sees every member including itself, the others see it
    pub fn join(&mut self, user_id: &str) -> SyncResult<()> {
        let joiner = self.require(user_id)?;
        let participant = joiner.self_participant().clone();
        let members = self.hub.join(&participant)?;
        debug!(user_id, members = members.len(), "peer joined memory match");

        for member in &members {
            if member.user_id != participant.user_id {
                self.require(&member.user_id)?
                    .on_presence_changed(std::slice::from_ref(&participant), &[])?;
            }
        }
        joiner.on_presence_changed(&members, &[])
    }

    /// Remove a peer: the others see it leave and its own session closes
    pub fn leave(&mut self, user_id: &str) -> SyncResult<()> {
        let leaver = self.require(user_id)?;
        let Some(participant) = self.hub.leave(user_id)? else {
            return Ok(());
        };
        debug!(user_id, "peer left memory match");

        for member in self.hub.members()? {
            self.require(&member.user_id)?
                .on_presence_changed(&[], std::slice::from_ref(&participant))?;
        }
        leaver.close()
    }

    /// Deliver queued payloads until every inbox is empty
    ///
    /// Errors from individual deliveries are logged and do not stop the
    /// pump; conflicts and violations also surface as session events.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let mut progressed = false;
            for peer in &mut self.peers {
                while let Ok(delivery) = peer.inbox.try_recv() {
                    progressed = true;
                    delivered += 1;
                    if let Err(err) = peer.session.on_data_received(
                        &delivery.sender,
                        delivery.opcode,
                        &delivery.payload,
                    ) {
                        warn!(
                            receiver = %peer.session.self_participant().user_id,
                            sender = %delivery.sender.user_id,
                            error = %err,
                            "delivery failed"
                        );
                    }
                }
            }
            if !progressed {
                return delivered;
            }
        }
    }
}
