/*
    session.rs - Session orchestrator

    SyncSession ties the registry, presence tracker, current role and
    handshake together for one local participant in one match. Inbound
    presence and payloads are handled synchronously; every outgoing
    payload is encoded under the locks and handed to the channel after
    they are released.

    Lock order: session state, then registry.
*/

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use super::channel::{Recipients, SyncChannel, SyncOpcodes};
use super::codec::{Codec, SyncMessage};
use super::events::{EventBroadcaster, SyncEvent};
use super::handle::SyncVar;
use super::handshake::{self, HandshakeMessage, HandshakeResponse, HandshakeState};
use super::merge::{merge_as_guest, MergeContext, Violation};
use super::role::{Outgoing, Role, Target};
use crate::config::Config;
use crate::core_presence::{Participant, PresenceChange, PresenceTracker};
use crate::core_vars::{
    ApprovalFn, ReplicatedKey, ValidationStatus, ValueChange, VarCell, VarRegistry, VarValue,
};
use crate::errors::{poisoned, SyncError, SyncResult};
use crate::metrics::SyncMetrics;

struct SessionState {
    presence: PresenceTracker,
    role: Option<Role>,
    handshake: HandshakeState,
    /// Set by the first presence event; registration is closed afterwards
    started: bool,
    closed: bool,
}

/// An encoded payload waiting to be sent
struct Envelope {
    recipients: Recipients,
    opcode: i64,
    payload: Vec<u8>,
    kind: &'static str,
}

pub(crate) struct SessionCore {
    me: Participant,
    opcodes: SyncOpcodes,
    codec: Codec,
    event_capacity: usize,
    metrics: SyncMetrics,
    registry: VarRegistry,
    state: Mutex<SessionState>,
    channel: Arc<dyn SyncChannel>,
    events: EventBroadcaster,
}

/// Replication session of the local participant
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SyncSession {
    core: Arc<SessionCore>,
}

impl SyncSession {
    /// Session with the default configuration
    pub fn new(me: Participant, channel: Arc<dyn SyncChannel>) -> SyncResult<Self> {
        Self::with_config(me, channel, &Config::default())
    }

    pub fn with_config(
        me: Participant,
        channel: Arc<dyn SyncChannel>,
        config: &Config,
    ) -> SyncResult<Self> {
        config.validate()?;
        let settings = &config.session;

        info!(
            user_id = %me.user_id,
            session_id = %me.session_id,
            wire_format = %settings.wire_format,
            "creating sync session"
        );

        let core = SessionCore {
            opcodes: settings.opcodes()?,
            codec: Codec::new(settings.wire_format),
            event_capacity: settings.event_capacity,
            metrics: SyncMetrics::new(config.metrics.enabled),
            registry: VarRegistry::new(),
            state: Mutex::new(SessionState {
                presence: PresenceTracker::new(me.user_id.clone()),
                role: None,
                handshake: HandshakeState::Idle,
                started: false,
                closed: false,
            }),
            channel,
            events: EventBroadcaster::new(settings.event_capacity),
            me,
        };

        Ok(SyncSession {
            core: Arc::new(core),
        })
    }

    pub fn self_participant(&self) -> &Participant {
        &self.core.me
    }

    pub fn opcodes(&self) -> SyncOpcodes {
        self.core.opcodes
    }

    /// Register a shared variable
    pub fn register<T: VarValue>(&self, name: impl Into<String>, initial: T) -> SyncResult<SyncVar<T>> {
        self.register_key(ReplicatedKey::shared(name), initial, None)
    }

    /// Register a shared variable whose guest writes need host approval
    pub fn register_with_approval<T, F>(
        &self,
        name: impl Into<String>,
        initial: T,
        approve: F,
    ) -> SyncResult<SyncVar<T>>
    where
        T: VarValue,
        F: Fn(&ValueChange<T>) -> bool + Send + Sync + 'static,
    {
        let approval: ApprovalFn<T> = Arc::new(approve);
        self.register_key(ReplicatedKey::shared(name), initial, Some(approval))
    }

    /// Register a variable owned by `owner_id`
    ///
    /// Every participant registers the owned variables of every user it
    /// expects; only the owner may write them.
    pub fn register_owned<T: VarValue>(
        &self,
        owner_id: impl Into<String>,
        name: impl Into<String>,
        initial: T,
    ) -> SyncResult<SyncVar<T>> {
        self.register_key(ReplicatedKey::owned(owner_id, name), initial, None)
    }

    pub fn register_owned_with_approval<T, F>(
        &self,
        owner_id: impl Into<String>,
        name: impl Into<String>,
        initial: T,
        approve: F,
    ) -> SyncResult<SyncVar<T>>
    where
        T: VarValue,
        F: Fn(&ValueChange<T>) -> bool + Send + Sync + 'static,
    {
        let approval: ApprovalFn<T> = Arc::new(approve);
        self.register_key(ReplicatedKey::owned(owner_id, name), initial, Some(approval))
    }

    /// Register a variable under an explicit key
    ///
    /// # Arguments
    /// * `key` - Shared or owned key, unique within the session
    /// * `initial` - Value before any replication, at lock version 0
    /// * `approval` - Rule the host applies to guest proposals, if any
    ///
    /// # Errors
    /// `DuplicateKey` for a key already registered, `InvalidState` once the
    /// first presence event was handled.
    pub fn register_key<T: VarValue>(
        &self,
        key: ReplicatedKey,
        initial: T,
        approval: Option<ApprovalFn<T>>,
    ) -> SyncResult<SyncVar<T>> {
        let state = self.core.state()?;
        if state.closed {
            return Err(SyncError::SessionClosed);
        }
        if state.started {
            return Err(SyncError::InvalidState(format!(
                "cannot register {} after the session started",
                key
            )));
        }

        let cell = Arc::new(VarCell::new(initial, approval, self.core.event_capacity));
        self.core.registry.register(key.clone(), Arc::clone(&cell))?;
        Ok(SyncVar::new(key, cell, Arc::downgrade(&self.core)))
    }

    /// Feed one presence event from the channel
    ///
    /// Joins are applied before leaves. The whole event is rejected when it
    /// repeats a present participant or names an absent one, and then
    /// nothing changes. The first event closes registration.
    ///
    /// # Arguments
    /// * `joins` - Participants that joined, in join order
    /// * `leaves` - Participants that left
    pub fn on_presence_changed(&self, joins: &[Participant], leaves: &[Participant]) -> SyncResult<()> {
        self.core.on_presence_changed(joins, leaves)
    }

    /// Feed one payload from the channel
    ///
    /// Payloads on foreign opcodes are ignored, as is everything that
    /// arrives after `close()`.
    ///
    /// # Returns
    /// `Err(Conflict)` when the batch collided with local state and was not
    /// applied; the same conflict is emitted as [`SyncEvent::Conflict`].
    pub fn on_data_received(&self, sender: &Participant, opcode: i64, payload: &[u8]) -> SyncResult<()> {
        self.core.on_data_received(sender, opcode, payload)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.core.events.subscribe()
    }

    pub fn is_host(&self) -> SyncResult<bool> {
        Ok(self.core.state()?.presence.is_self_host())
    }

    pub fn host(&self) -> SyncResult<Option<Participant>> {
        Ok(self.core.state()?.presence.host().cloned())
    }

    pub fn handshake_state(&self) -> SyncResult<HandshakeState> {
        Ok(self.core.state()?.handshake.clone())
    }

    /// Present participants in join order
    pub fn participants(&self) -> SyncResult<Vec<Participant>> {
        Ok(self
            .core
            .state()?
            .presence
            .participants()
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn is_closed(&self) -> SyncResult<bool> {
        Ok(self.core.state()?.closed)
    }

    /// Stop processing and drop all registry state
    pub fn close(&self) -> SyncResult<()> {
        let mut state = self.core.state()?;
        if state.closed {
            return Ok(());
        }
        self.core.shutdown(&mut state)
    }
}

impl SessionCore {
    fn state(&self) -> SyncResult<MutexGuard<'_, SessionState>> {
        self.state.lock().map_err(poisoned("session"))
    }

    fn shutdown(&self, state: &mut SessionState) -> SyncResult<()> {
        info!(user_id = %self.me.user_id, "closing sync session");
        state.closed = true;
        state.role = None;
        self.registry.clear()
    }

    fn open_state(&self) -> SyncResult<MutexGuard<'_, SessionState>> {
        let state = self.state()?;
        if state.closed {
            return Err(SyncError::SessionClosed);
        }
        Ok(state)
    }

    pub(crate) fn key_status(&self, key: &ReplicatedKey) -> SyncResult<ValidationStatus> {
        let _state = self.open_state()?;
        self.registry.status(key)
    }

    pub(crate) fn key_version(&self, key: &ReplicatedKey) -> SyncResult<u64> {
        let _state = self.open_state()?;
        self.registry.version(key)
    }

    pub(crate) fn local_set<T: VarValue>(&self, key: &ReplicatedKey, value: T) -> SyncResult<()> {
        if key.is_owned() && !key.is_owned_by(&self.me.user_id) {
            return Err(SyncError::NotOwner {
                key: key.clone(),
                user_id: self.me.user_id.clone(),
            });
        }

        let envelopes = {
            let state = self.open_state()?;
            match &state.handshake {
                HandshakeState::AwaitingResponse { host } => {
                    return Err(SyncError::InvalidState(format!(
                        "cannot write {} while joining {}",
                        key, host.user_id
                    )));
                }
                HandshakeState::Refused => {
                    return Err(SyncError::InvalidState(
                        "join was refused by the host".to_string(),
                    ));
                }
                HandshakeState::Idle | HandshakeState::Complete => {}
            }

            let mut tables = self.registry.lock()?;
            let outgoing = match &state.role {
                Some(role) => role.handle_local_data_changed(&mut tables, key, value)?,
                None => {
                    // Not in a match yet: only the local value changes
                    tables.cell::<T>(key)?.replace(key, value, &self.me);
                    None
                }
            };
            drop(tables);

            self.resolve(&state, outgoing.into_iter().collect())?
        };

        self.dispatch(envelopes)
    }

    fn on_presence_changed(&self, joins: &[Participant], leaves: &[Participant]) -> SyncResult<()> {
        let (events, envelopes) = {
            let mut state = self.state()?;
            if state.closed {
                debug!(user_id = %self.me.user_id, "session closed, ignoring presence event");
                return Ok(());
            }
            let changes = state.presence.handle_presence_event(joins, leaves)?;
            state.started = true;

            let mut events = Vec::with_capacity(changes.len());
            let mut host_changed = false;
            for change in changes {
                match change {
                    PresenceChange::HostChanged { old, new } => {
                        info!(
                            old = ?old.as_ref().map(|p| p.user_id.as_str()),
                            new = %new.user_id,
                            "host changed"
                        );
                        host_changed = true;
                        events.push(SyncEvent::HostChanged { old, new });
                    }
                    PresenceChange::GuestJoined(guest) => {
                        debug!(guest = %guest.user_id, "guest joined");
                        events.push(SyncEvent::GuestJoined(guest));
                    }
                    PresenceChange::GuestLeft(guest) => {
                        debug!(guest = %guest.user_id, "guest left");
                        events.push(SyncEvent::GuestLeft(guest));
                    }
                }
            }

            let envelopes = if state.presence.has_ended() {
                self.shutdown(&mut state)?;
                Vec::new()
            } else if host_changed {
                self.on_host_changed(&mut state, &mut events)?
            } else {
                Vec::new()
            };
            (events, envelopes)
        };

        self.events.emit_many(events);
        self.dispatch(envelopes)
    }

    /// Rebuild the role and move the handshake along after an election
    fn on_host_changed(
        &self,
        state: &mut SessionState,
        events: &mut Vec<SyncEvent>,
    ) -> SyncResult<Vec<Envelope>> {
        if state.handshake == HandshakeState::Refused {
            debug!(user_id = %self.me.user_id, "join was refused, staying out of the election");
            return Ok(Vec::new());
        }

        let was_host = state.role.as_ref().map_or(false, Role::is_host);
        state.role = Role::for_election(&state.presence, &self.me);
        let (role, host) = match (&state.role, state.presence.host()) {
            (Some(role), Some(host)) => (role.clone(), host.clone()),
            _ => return Ok(Vec::new()),
        };

        match state.handshake {
            HandshakeState::Idle | HandshakeState::AwaitingResponse { .. } => {
                if role.is_host() {
                    info!(user_id = %self.me.user_id, "elected host while joining, handshake complete");
                    state.handshake = HandshakeState::Complete;
                    self.metrics.handshake("self");
                    events.push(SyncEvent::HandshakeCompleted {
                        host: self.me.clone(),
                    });
                    return Ok(Vec::new());
                }

                let request = handshake::request(&*self.registry.lock()?);
                debug!(host = %host.user_id, "requesting handshake");
                state.handshake = HandshakeState::AwaitingResponse { host: host.clone() };
                let envelope = self.handshake_envelope(
                    Recipients::only(host),
                    &request,
                    "handshake_request",
                )?;
                Ok(vec![envelope])
            }
            HandshakeState::Complete => {
                let outgoing = {
                    let mut tables = self.registry.lock()?;
                    match &role {
                        Role::Host(host_role) if !was_host => host_role.migrate(&mut tables),
                        Role::Host(_) => None,
                        Role::Guest(guest_role) => guest_role.repropose(&tables),
                    }
                };
                self.resolve(state, outgoing.into_iter().collect())
            }
            HandshakeState::Refused => Ok(Vec::new()),
        }
    }

    fn on_data_received(&self, sender: &Participant, opcode: i64, payload: &[u8]) -> SyncResult<()> {
        if opcode == self.opcodes.data() {
            self.handle_data(sender, payload)
        } else if opcode == self.opcodes.handshake() {
            self.handle_handshake(sender, payload)
        } else {
            trace!(opcode, sender = %sender.user_id, "ignoring foreign opcode");
            Ok(())
        }
    }

    fn handle_data(&self, sender: &Participant, payload: &[u8]) -> SyncResult<()> {
        let SyncMessage::Data(batch) = self.codec.decode::<SyncMessage>(payload)?;

        let (result, events, envelopes) = {
            let state = self.state()?;
            if state.closed {
                return Ok(());
            }
            let role = match (&state.handshake, &state.role) {
                (HandshakeState::Complete, Some(role)) => role,
                (handshake, _) => {
                    debug!(
                        sender = %sender.user_id,
                        state = ?handshake,
                        "dropping data outside a completed handshake"
                    );
                    return Ok(());
                }
            };
            let label = if role.is_host() { "host" } else { "guest" };

            let timer = self.metrics.timer();
            let merged = {
                let mut tables = self.registry.lock()?;
                role.handle_remote_data_changed(&mut tables, sender, &batch)
            };

            match merged {
                Ok((outcome, outgoing)) => {
                    if let Some(timer) = timer {
                        timer.stop();
                    }
                    self.metrics.merged(label, outcome.accepted, outcome.discarded);
                    self.metrics.violations(outcome.violations.len());
                    let events = self.violation_events(sender, outcome.violations);
                    let envelopes = self.resolve(&state, outgoing)?;
                    (Ok(()), events, envelopes)
                }
                Err(SyncError::Conflict { key, lock_version }) => {
                    warn!(
                        sender = %sender.user_id,
                        %key,
                        lock_version,
                        "version conflict, batch not applied"
                    );
                    self.metrics.conflict();
                    let event = SyncEvent::Conflict {
                        key: key.clone(),
                        lock_version,
                        source: sender.clone(),
                    };
                    (
                        Err(SyncError::Conflict { key, lock_version }),
                        vec![event],
                        Vec::new(),
                    )
                }
                Err(err) => return Err(err),
            }
        };

        self.events.emit_many(events);
        self.dispatch(envelopes)?;
        result
    }

    fn handle_handshake(&self, sender: &Participant, payload: &[u8]) -> SyncResult<()> {
        match self.codec.decode::<HandshakeMessage>(payload)? {
            HandshakeMessage::Request { keys } => self.answer_handshake(sender, &keys),
            HandshakeMessage::Response(response) => self.complete_handshake(sender, response),
        }
    }

    fn answer_handshake(&self, sender: &Participant, keys: &[ReplicatedKey]) -> SyncResult<()> {
        let envelope = {
            let state = self.state()?;
            if state.closed {
                return Ok(());
            }
            if !state.presence.is_self_host() {
                warn!(sender = %sender.user_id, "handshake request received by a non-host, ignoring");
                return Ok(());
            }
            if !state.handshake.is_complete() {
                warn!(
                    sender = %sender.user_id,
                    state = ?state.handshake,
                    "cannot answer a handshake without a completed join, ignoring"
                );
                return Ok(());
            }

            let response = handshake::respond(&*self.registry.lock()?, keys);
            match &response {
                HandshakeResponse::Accepted { snapshot } => {
                    info!(guest = %sender.user_id, entries = snapshot.len(), "accepting handshake");
                    self.metrics.handshake("accepted");
                }
                HandshakeResponse::Rejected { missing } => {
                    warn!(
                        guest = %sender.user_id,
                        missing = missing.len(),
                        "rejecting handshake, guest lacks host variables"
                    );
                    self.metrics.handshake("rejected");
                }
            }

            self.handshake_envelope(
                Recipients::only(sender.clone()),
                &HandshakeMessage::Response(response),
                "handshake_response",
            )?
        };

        self.dispatch(vec![envelope])
    }

    fn complete_handshake(&self, sender: &Participant, response: HandshakeResponse) -> SyncResult<()> {
        let events = {
            let mut state = self.state()?;
            if state.closed {
                return Ok(());
            }
            let host = match &state.handshake {
                HandshakeState::AwaitingResponse { host } if host.user_id == sender.user_id => {
                    host.clone()
                }
                other => {
                    warn!(sender = %sender.user_id, state = ?other, "unexpected handshake response, ignoring");
                    return Ok(());
                }
            };

            match response {
                HandshakeResponse::Accepted { snapshot } => {
                    let outcome = {
                        let mut tables = self.registry.lock()?;
                        merge_as_guest(&mut tables, &MergeContext::snapshot(&host), &snapshot)?
                    };
                    info!(host = %host.user_id, entries = outcome.accepted, "handshake complete");
                    state.handshake = HandshakeState::Complete;

                    let mut events = self.violation_events(sender, outcome.violations);
                    events.push(SyncEvent::HandshakeCompleted { host });
                    events
                }
                HandshakeResponse::Rejected { missing } => {
                    warn!(host = %host.user_id, ?missing, "join refused by host");
                    state.handshake = HandshakeState::Refused;
                    state.role = None;
                    vec![SyncEvent::JoinRefused { host, missing }]
                }
            }
        };

        self.events.emit_many(events);
        Ok(())
    }

    fn violation_events(&self, sender: &Participant, violations: Vec<Violation>) -> Vec<SyncEvent> {
        violations
            .into_iter()
            .map(|violation| SyncEvent::ProtocolViolation {
                source: sender.clone(),
                key: violation.key,
                reason: violation.reason,
            })
            .collect()
    }

    /// Address and encode role output
    fn resolve(&self, state: &SessionState, outgoing: Vec<Outgoing>) -> SyncResult<Vec<Envelope>> {
        let mut envelopes = Vec::with_capacity(outgoing.len());
        for Outgoing { target, batch } in outgoing {
            let recipients = match target {
                Target::Everyone => Recipients::All,
                Target::Participant(participant) => Recipients::only(participant),
                Target::Host => match state.presence.host() {
                    Some(host) => Recipients::only(host.clone()),
                    None => {
                        warn!(entries = batch.len(), "no host to address, dropping batch");
                        continue;
                    }
                },
            };
            envelopes.push(Envelope {
                recipients,
                opcode: self.opcodes.data(),
                payload: self.codec.encode(&SyncMessage::Data(batch))?,
                kind: "data",
            });
        }
        Ok(envelopes)
    }

    fn handshake_envelope(
        &self,
        recipients: Recipients,
        message: &HandshakeMessage,
        kind: &'static str,
    ) -> SyncResult<Envelope> {
        Ok(Envelope {
            recipients,
            opcode: self.opcodes.handshake(),
            payload: self.codec.encode(message)?,
            kind,
        })
    }

    fn dispatch(&self, envelopes: Vec<Envelope>) -> SyncResult<()> {
        for envelope in envelopes {
            trace!(
                opcode = envelope.opcode,
                kind = envelope.kind,
                bytes = envelope.payload.len(),
                "sending"
            );
            self.channel
                .send(&envelope.recipients, envelope.opcode, envelope.payload)?;
            self.metrics.batch_sent(envelope.kind);
        }
        Ok(())
    }
}
