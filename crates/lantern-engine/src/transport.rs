//! Seam between the engine and the external mesh transport.
//!
//! The transport (discovery, connections, raw send/receive) lives outside
//! this crate. It consumes [`TransportCommand`]s from an mpsc channel and
//! feeds [`TransportEvent`]s back in, so the engine never blocks on I/O.

use tokio::sync::mpsc;
use tracing::debug;

use lantern_shared::protocol::MeshMessage;
use lantern_shared::types::PeerId;

/// Outbound instructions for the mesh transport.
#[derive(Debug)]
pub enum TransportCommand {
    /// Fan a message out to every reachable peer.
    Broadcast(MeshMessage),
    /// Deliver a message to one peer.
    Unicast(PeerId, MeshMessage),
}

/// Inbound traffic and link changes from the mesh transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A new direct connection was established.
    PeerConnected { peer: PeerId },
    /// A direct connection went away.
    PeerDisconnected { peer: PeerId },
    /// A message arrived, already deframed and decoded.
    Message { from: PeerId, message: MeshMessage },
}

pub async fn broadcast(
    tx: &mpsc::Sender<TransportCommand>,
    message: MeshMessage,
) -> anyhow::Result<()> {
    debug!(kind = message_kind(&message), "Broadcasting message");
    tx.send(TransportCommand::Broadcast(message))
        .await
        .map_err(|_| anyhow::anyhow!("Transport command channel closed"))?;

    Ok(())
}

pub async fn unicast(
    tx: &mpsc::Sender<TransportCommand>,
    peer: PeerId,
    message: MeshMessage,
) -> anyhow::Result<()> {
    debug!(peer = %peer.short(), kind = message_kind(&message), "Sending unicast message");
    tx.send(TransportCommand::Unicast(peer, message))
        .await
        .map_err(|_| anyhow::anyhow!("Transport command channel closed"))?;

    Ok(())
}

/// Short tag for log lines.
pub fn message_kind(message: &MeshMessage) -> &'static str {
    match message {
        MeshMessage::Chat(_) => "chat",
        MeshMessage::LocationRequest(_) => "location-request",
        MeshMessage::LocationResponse(_) => "location-response",
        MeshMessage::FamilySync(_) => "family-sync",
        MeshMessage::FamilyJoinRequest(_) => "family-join-request",
        MeshMessage::FamilyGroupInfo(_) => "family-group-info",
        MeshMessage::EmergencyAlert(_) => "emergency-alert",
    }
}
