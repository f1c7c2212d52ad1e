//! Engine orchestration with tokio mpsc command/notification pattern.
//!
//! The engine runs in a dedicated tokio task that owns the broker table and
//! the family group state, so every `issue`/`on_response`/`sweep`/`cancel`
//! is serialized without a lock. External code talks to it through the
//! [`EngineHandle`] and receives [`EngineEvent`]s; the mesh transport feeds
//! traffic in through its own channel.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use lantern_shared::constants::{
    JOIN_REQUEST_TTL_SECS, LOCATION_REQUEST_TTL_SECS, SWEEP_INTERVAL_MILLIS,
};
use lantern_shared::group_code::FamilyGroupCode;
use lantern_shared::protocol::{
    AlertKind, ChatMessage, EmergencyAlert, FamilyJoinRequest, FamilySync, LocationPayload,
    LocationRequest, MeshMessage, MemberInfo,
};
use lantern_shared::types::{ConversationId, PeerId};
use lantern_shared::LanternError;

use crate::broker::{Broker, JoinOutcome, LocationOutcome, Settled};
use crate::estimate::{estimate_distance, DistanceEstimate};
use crate::events::EngineEvent;
use crate::family::FamilyGroup;
use crate::responder::{self, DeviceSensors};
use crate::transport::{self, TransportCommand, TransportEvent};

/// Configuration for spawning the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Our own peer id, as assigned by the transport session.
    pub self_peer: PeerId,
    /// Lightweight info announced in family sync and join messages.
    pub member_info: MemberInfo,
    /// Window for location requests.
    pub location_ttl: Duration,
    /// Window for join requests.
    pub join_ttl: Duration,
    /// How often expired requests are finalized.
    pub sweep_interval: Duration,
}

impl EngineConfig {
    pub fn new(self_peer: PeerId) -> Self {
        Self {
            self_peer,
            member_info: MemberInfo::default(),
            location_ttl: Duration::from_secs(LOCATION_REQUEST_TTL_SECS),
            join_ttl: Duration::from_secs(JOIN_REQUEST_TTL_SECS),
            sweep_interval: Duration::from_millis(SWEEP_INTERVAL_MILLIS),
        }
    }
}

/// Commands sent *into* the engine task.
enum EngineCommand {
    ResolveLocation {
        request: LocationRequest,
        reply: oneshot::Sender<LocationOutcome>,
    },
    JoinGroup {
        request: FamilyJoinRequest,
        reply: oneshot::Sender<JoinOutcome>,
    },
    Cancel(Uuid),
    SendChat {
        conversation: ConversationId,
        body: String,
    },
    RaiseAlert {
        kind: AlertKind,
        message: Option<String>,
    },
    CreateGroup {
        name: String,
        reply: oneshot::Sender<FamilyGroup>,
    },
    LeaveGroup,
    GetGroup(oneshot::Sender<Option<FamilyGroup>>),
    DistanceTo {
        peer: PeerId,
        reply: oneshot::Sender<Option<DistanceEstimate>>,
    },
    Shutdown,
}

/// An issued request: its correlation id plus the future outcome.
///
/// Keep the id around to [`EngineHandle::cancel`] the request if the caller
/// loses interest before it settles.
pub struct PendingQuery<T> {
    pub id: Uuid,
    rx: oneshot::Receiver<T>,
}

impl<T> PendingQuery<T> {
    /// Wait for the outcome. Errors only if the engine shut down.
    pub async fn outcome(self) -> Result<T, LanternError> {
        self.rx.await.map_err(|_| LanternError::ChannelClosed)
    }
}

/// Cloneable handle for talking to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    self_peer: PeerId,
    member_info: MemberInfo,
}

impl EngineHandle {
    pub fn self_peer(&self) -> &PeerId {
        &self.self_peer
    }

    /// Ask the mesh where `target` is.
    pub async fn resolve_location(
        &self,
        target: PeerId,
        allow_collaborative: bool,
    ) -> Result<PendingQuery<LocationOutcome>, LanternError> {
        let request = LocationRequest {
            id: Uuid::new_v4(),
            requester: self.self_peer.clone(),
            target,
            timestamp: Utc::now(),
            allow_collaborative,
        };
        let id = request.id;
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::ResolveLocation { request, reply: tx })
            .await?;
        Ok(PendingQuery { id, rx })
    }

    /// Search the mesh for a group holding `code`. A malformed code never
    /// gets here; `FamilyGroupCode::parse` already rejected it.
    pub async fn join_group(
        &self,
        code: FamilyGroupCode,
    ) -> Result<PendingQuery<JoinOutcome>, LanternError> {
        let request = FamilyJoinRequest {
            id: Uuid::new_v4(),
            requester: self.self_peer.clone(),
            group_code: code,
            member_info: self.member_info.clone(),
            timestamp: Utc::now(),
        };
        let id = request.id;
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::JoinGroup { request, reply: tx })
            .await?;
        Ok(PendingQuery { id, rx })
    }

    /// Stop an outstanding request from ever resolving.
    pub async fn cancel(&self, request_id: Uuid) -> Result<(), LanternError> {
        self.send(EngineCommand::Cancel(request_id)).await
    }

    pub async fn send_chat(
        &self,
        conversation: ConversationId,
        body: String,
    ) -> Result<(), LanternError> {
        self.send(EngineCommand::SendChat { conversation, body })
            .await
    }

    pub async fn raise_alert(
        &self,
        kind: AlertKind,
        message: Option<String>,
    ) -> Result<(), LanternError> {
        self.send(EngineCommand::RaiseAlert { kind, message }).await
    }

    /// Create a fresh local group with a newly generated code.
    pub async fn create_group(&self, name: String) -> Result<FamilyGroup, LanternError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::CreateGroup { name, reply: tx })
            .await?;
        rx.await.map_err(|_| LanternError::ChannelClosed)
    }

    pub async fn leave_group(&self) -> Result<(), LanternError> {
        self.send(EngineCommand::LeaveGroup).await
    }

    /// Snapshot of the current family group, if any.
    pub async fn group(&self) -> Result<Option<FamilyGroup>, LanternError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::GetGroup(tx)).await?;
        rx.await.map_err(|_| LanternError::ChannelClosed)
    }

    /// Best current distance estimate to `peer`: an active ranging session
    /// if one exists, otherwise GPS fixes on both sides.
    pub async fn distance_to(&self, peer: PeerId) -> Result<Option<DistanceEstimate>, LanternError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::DistanceTo { peer, reply: tx })
            .await?;
        rx.await.map_err(|_| LanternError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<(), LanternError> {
        self.send(EngineCommand::Shutdown).await
    }

    async fn send(&self, cmd: EngineCommand) -> Result<(), LanternError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| LanternError::ChannelClosed)
    }
}

/// Spawn the engine in a background tokio task.
///
/// # Returns
///
/// `(handle, event_rx, transport_event_tx)` — commands go through the
/// handle, engine events come out of `event_rx`, and the mesh transport
/// feeds inbound traffic into `transport_event_tx`.
pub fn spawn_engine(
    config: EngineConfig,
    sensors: Arc<dyn DeviceSensors>,
    transport_tx: mpsc::Sender<TransportCommand>,
) -> (
    EngineHandle,
    mpsc::Receiver<EngineEvent>,
    mpsc::Sender<TransportEvent>,
) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<EngineCommand>(256);
    let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(256);
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<TransportEvent>(256);

    let handle = EngineHandle {
        cmd_tx,
        self_peer: config.self_peer.clone(),
        member_info: config.member_info.clone(),
    };

    info!(peer = %config.self_peer.short(), "Starting engine");

    let mut engine = Engine {
        config,
        sensors,
        transport_tx,
        event_tx,
        broker: Broker::new(),
        group: None,
        seen_messages: RecentIds::new(1024),
    };

    tokio::spawn(async move {
        let mut sweep = tokio::time::interval(engine.config.sweep_interval);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(EngineCommand::Shutdown) | None => {
                            info!("Engine shutting down");
                            break;
                        }
                        Some(cmd) => engine.handle_command(cmd).await,
                    }
                }

                event = inbound_rx.recv() => {
                    match event {
                        Some(event) => engine.handle_transport_event(event).await,
                        None => {
                            info!("Transport channel closed, shutting down engine");
                            break;
                        }
                    }
                }

                _ = sweep.tick() => {
                    for settled in engine.broker.sweep(Instant::now()) {
                        engine.apply_settled(settled).await;
                    }
                }
            }
        }
    });

    (handle, event_rx, inbound_tx)
}

struct Engine {
    config: EngineConfig,
    sensors: Arc<dyn DeviceSensors>,
    transport_tx: mpsc::Sender<TransportCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
    broker: Broker,
    group: Option<FamilyGroup>,
    seen_messages: RecentIds,
}

impl Engine {
    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::ResolveLocation { request, reply } => {
                let deadline = Instant::now() + self.config.location_ttl;
                self.broker.register_location(&request, deadline, reply);
                debug!(
                    request = %request.id,
                    target = %request.target.short(),
                    collaborative = request.allow_collaborative,
                    "Issuing location request"
                );

                // Anyone might be able to answer a collaborative request;
                // otherwise only the target can.
                let outcome = if request.allow_collaborative {
                    transport::broadcast(
                        &self.transport_tx,
                        MeshMessage::LocationRequest(request),
                    )
                    .await
                } else {
                    let target = request.target.clone();
                    transport::unicast(
                        &self.transport_tx,
                        target,
                        MeshMessage::LocationRequest(request),
                    )
                    .await
                };
                if outcome.is_err() {
                    warn!("Transport unavailable, request will time out");
                }
            }

            EngineCommand::JoinGroup { request, reply } => {
                let deadline = Instant::now() + self.config.join_ttl;
                self.broker.register_join(&request, deadline, reply);
                debug!(
                    request = %request.id,
                    code = %request.group_code,
                    "Issuing join request"
                );
                if transport::broadcast(
                    &self.transport_tx,
                    MeshMessage::FamilyJoinRequest(request),
                )
                .await
                .is_err()
                {
                    warn!("Transport unavailable, join will time out");
                }
            }

            EngineCommand::Cancel(request_id) => {
                if self.broker.cancel(request_id) {
                    debug!(request = %request_id, "Request cancelled");
                }
            }

            EngineCommand::SendChat { conversation, body } => {
                let message = ChatMessage {
                    sender: self.config.self_peer.clone(),
                    conversation,
                    body,
                    timestamp: Utc::now(),
                    message_id: Uuid::new_v4(),
                };
                self.seen_messages.insert(message.message_id);
                let _ = transport::broadcast(&self.transport_tx, MeshMessage::Chat(message)).await;
            }

            EngineCommand::RaiseAlert { kind, message } => {
                let alert = EmergencyAlert {
                    sender: self.config.self_peer.clone(),
                    kind,
                    location: self.sensors.last_fix(),
                    message,
                    timestamp: Utc::now(),
                    alert_id: Uuid::new_v4(),
                };
                self.seen_messages.insert(alert.alert_id);
                info!(kind = ?kind, "Raising emergency alert");
                let _ = transport::broadcast(&self.transport_tx, MeshMessage::EmergencyAlert(alert))
                    .await;
            }

            EngineCommand::CreateGroup { name, reply } => {
                let group = FamilyGroup::create(
                    name,
                    self.config.self_peer.clone(),
                    &self.config.member_info,
                );
                info!(code = %group.code, "Created family group");
                self.group = Some(group.clone());
                let _ = reply.send(group);
                self.announce_membership().await;
                self.emit_group_changed().await;
            }

            EngineCommand::LeaveGroup => {
                if self.group.take().is_some() {
                    info!("Left family group");
                    self.emit_group_changed().await;
                }
            }

            EngineCommand::GetGroup(reply) => {
                let _ = reply.send(self.group.clone());
            }

            EngineCommand::DistanceTo { peer, reply } => {
                let ranging = self.sensors.ranging_to(&peer);
                let own_fix = self.sensors.last_fix();
                let peer_fix = self
                    .group
                    .as_ref()
                    .and_then(|g| g.member(&peer))
                    .and_then(|m| m.last_location);
                let estimate =
                    estimate_distance(ranging.as_ref(), own_fix.as_ref(), peer_fix.as_ref());
                let _ = reply.send(estimate);
            }

            // Shutdown is intercepted by the event loop
            EngineCommand::Shutdown => {}
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected { peer } => {
                // One sync per new direct connection
                if let Some(group) = &self.group {
                    let sync = self.sync_message(group);
                    let _ = transport::unicast(&self.transport_tx, peer.clone(), sync).await;
                }
                let _ = self.event_tx.send(EngineEvent::PeerConnected(peer)).await;
            }

            TransportEvent::PeerDisconnected { peer } => {
                let _ = self
                    .event_tx
                    .send(EngineEvent::PeerDisconnected(peer))
                    .await;
            }

            TransportEvent::Message { from, message } => {
                self.handle_message(from, message).await;
            }
        }
    }

    async fn handle_message(&mut self, from: PeerId, message: MeshMessage) {
        match message {
            MeshMessage::Chat(chat) => {
                if chat.sender == self.config.self_peer
                    || !self.seen_messages.insert(chat.message_id)
                {
                    return;
                }
                // Any traffic from a family member counts as being seen
                if let Some(group) = &mut self.group {
                    group.touch(&chat.sender, Utc::now());
                }
                let _ = self.event_tx.send(EngineEvent::ChatReceived(chat)).await;
            }

            MeshMessage::LocationRequest(request) => {
                if request.requester == self.config.self_peer {
                    return; // our own broadcast, echoed back
                }
                if let Some(response) = responder::answer_location_request(
                    &self.config.self_peer,
                    self.sensors.as_ref(),
                    &request,
                ) {
                    let _ = transport::unicast(
                        &self.transport_tx,
                        request.requester,
                        MeshMessage::LocationResponse(response),
                    )
                    .await;
                }
            }

            MeshMessage::LocationResponse(response) => {
                debug!(
                    request = %response.request_id,
                    responder = %from.short(),
                    kind = ?response.payload.rank(),
                    "Location response received"
                );
                if let Some(settled) = self.broker.on_location_response(response) {
                    self.apply_settled(settled).await;
                }
            }

            MeshMessage::FamilySync(sync) => {
                if sync.sender == self.config.self_peer {
                    return;
                }
                if let Some(group) = &mut self.group {
                    if group.apply_sync(&sync, Utc::now()) {
                        self.emit_group_changed().await;
                    }
                }
            }

            MeshMessage::FamilyJoinRequest(request) => {
                if request.requester == self.config.self_peer {
                    return;
                }
                if let Some(info) = responder::answer_join_request(
                    &self.config.self_peer,
                    self.group.as_mut(),
                    &request,
                ) {
                    let _ = transport::unicast(
                        &self.transport_tx,
                        request.requester,
                        MeshMessage::FamilyGroupInfo(info),
                    )
                    .await;
                    // Answering admitted the joiner into our roster
                    self.emit_group_changed().await;
                }
            }

            MeshMessage::FamilyGroupInfo(info) => {
                if let Some(settled) = self.broker.on_group_info(info) {
                    self.apply_settled(settled).await;
                }
            }

            MeshMessage::EmergencyAlert(alert) => {
                if alert.sender == self.config.self_peer
                    || !self.seen_messages.insert(alert.alert_id)
                {
                    return;
                }
                info!(sender = %alert.sender.short(), kind = ?alert.kind, "Emergency alert received");
                let _ = self.event_tx.send(EngineEvent::AlertReceived(alert)).await;
            }
        }
    }

    /// Post-process a finalized request: update family state, emit events.
    async fn apply_settled(&mut self, settled: Settled) {
        match settled {
            Settled::Location(request_id, outcome) => {
                if let LocationOutcome::Located(response) = &outcome {
                    if let LocationPayload::Triangulated(relative) = &response.payload {
                        debug!(
                            request = %request_id,
                            via = %relative.intermediary.short(),
                            estimate = %relative.describe(),
                            "Location resolved by intermediary"
                        );
                    }
                    if let LocationPayload::Direct(fix) = &response.payload {
                        let updated = self
                            .group
                            .as_mut()
                            .map(|g| g.update_location(&response.target, *fix))
                            .unwrap_or(false);
                        if updated {
                            self.emit_group_changed().await;
                        }
                    }
                }
                let _ = self
                    .event_tx
                    .send(EngineEvent::LocationResolved {
                        request_id,
                        outcome,
                    })
                    .await;
            }

            Settled::Join(request_id, outcome) => {
                if let JoinOutcome::Joined(info) = &outcome {
                    // Wholesale adoption of the returned roster
                    self.group = Some(FamilyGroup::adopt_roster(
                        info,
                        &self.config.self_peer,
                        &self.config.member_info,
                    ));
                    self.announce_membership().await;
                    self.emit_group_changed().await;
                }
                let _ = self
                    .event_tx
                    .send(EngineEvent::JoinSettled {
                        request_id,
                        outcome,
                    })
                    .await;
            }
        }
    }

    fn sync_message(&self, group: &FamilyGroup) -> MeshMessage {
        MeshMessage::FamilySync(FamilySync {
            sender: self.config.self_peer.clone(),
            group_code: group.code.clone(),
            member_info: self.config.member_info.clone(),
            timestamp: Utc::now(),
        })
    }

    /// Broadcast our membership to the mesh. Sent when a group is created
    /// or joined, so peers already connected at that point learn about us.
    async fn announce_membership(&self) {
        if let Some(group) = &self.group {
            let _ = transport::broadcast(&self.transport_tx, self.sync_message(group)).await;
        }
    }

    async fn emit_group_changed(&self) {
        let _ = self
            .event_tx
            .send(EngineEvent::GroupChanged(self.group.clone()))
            .await;
    }
}

/// Bounded set of recently seen message ids, for broadcast deduplication.
struct RecentIds {
    set: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    cap: usize,
}

impl RecentIds {
    fn new(cap: usize) -> Self {
        Self {
            set: HashSet::with_capacity(cap),
            order: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Returns false when the id was already present.
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.set.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }
}
