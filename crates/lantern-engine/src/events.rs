//! Events the engine emits to the embedding application.

use uuid::Uuid;

use lantern_shared::protocol::{ChatMessage, EmergencyAlert};
use lantern_shared::types::PeerId;

use crate::broker::{JoinOutcome, LocationOutcome};
use crate::family::FamilyGroup;

/// Notifications sent from the engine task to the application.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A chat message arrived (deduplicated, never our own echo).
    ChatReceived(ChatMessage),
    /// An emergency alert arrived (deduplicated by alert id).
    AlertReceived(EmergencyAlert),
    /// A location request finalized, by response, timeout or cancel.
    LocationResolved {
        request_id: Uuid,
        outcome: LocationOutcome,
    },
    /// A join request finalized.
    JoinSettled {
        request_id: Uuid,
        outcome: JoinOutcome,
    },
    /// The local family group changed; `None` after leaving.
    GroupChanged(Option<FamilyGroup>),
    /// A direct connection appeared.
    PeerConnected(PeerId),
    /// A direct connection went away.
    PeerDisconnected(PeerId),
}
