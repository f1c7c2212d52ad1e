use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LanternError;
use crate::geo::{DirectionVector, RelativeLocation, UserLocation};
use crate::group_code::FamilyGroupCode;
use crate::types::{ConversationId, PeerId};

/// All wire protocol messages exchanged between peers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MeshMessage {
    /// Chat message on a conversation
    Chat(ChatMessage),

    /// "Where is peer T" query
    LocationRequest(LocationRequest),

    /// Answer to a location request
    LocationResponse(LocationResponse),

    /// Periodic family self-announcement to a direct neighbor
    FamilySync(FamilySync),

    /// Broadcast "does anyone hold group code C"
    FamilyJoinRequest(FamilyJoinRequest),

    /// Full roster reply to a join request
    FamilyGroupInfo(FamilyGroupInfo),

    /// Emergency broadcast
    EmergencyAlert(EmergencyAlert),
}

/// A chat message addressed to a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: PeerId,
    pub conversation: ConversationId,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    /// Message UUID for deduplication
    pub message_id: Uuid,
}

/// "Where is peer `target`"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationRequest {
    pub id: Uuid,
    pub requester: PeerId,
    pub target: PeerId,
    pub timestamp: DateTime<Utc>,
    /// Whether peers other than the target may answer with a triangulated
    /// estimate. Also decides broadcast (true) vs unicast to the target.
    pub allow_collaborative: bool,
}

/// Answer to a [`LocationRequest`], correlated by `request_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationResponse {
    pub id: Uuid,
    pub request_id: Uuid,
    pub responder: PeerId,
    pub target: PeerId,
    pub timestamp: DateTime<Utc>,
    pub payload: LocationPayload,
}

/// The one payload a response carries, enforced by the tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LocationPayload {
    /// The target reports its own GPS fix
    Direct(UserLocation),

    /// The target reports a ranging-based estimate of the requester
    RangingDirect(RangingReport),

    /// A third party relays "target is here relative to me"
    Triangulated(RelativeLocation),

    /// Synthesized by the requester when the TTL expires empty
    Unavailable,
}

/// Ranging self-report: "the requester is this far from me", measured by the
/// target itself. No GPS anchor, so it is not a [`RelativeLocation`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RangingReport {
    /// Measured distance to the requester in meters
    pub distance: f64,
    /// Absent in distance-only ranging mode
    pub direction: Option<DirectionVector>,
    /// Estimated error in meters
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

/// Quality ranking used to arbitrate between simultaneous responses.
/// A target's own GPS fix beats its ranging self-report, which beats a
/// third-party estimate, which beats nothing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResponseRank {
    Unavailable = 0,
    Triangulated = 1,
    RangingDirect = 2,
    Direct = 3,
}

impl LocationPayload {
    pub fn rank(&self) -> ResponseRank {
        match self {
            Self::Direct(_) => ResponseRank::Direct,
            Self::RangingDirect(_) => ResponseRank::RangingDirect,
            Self::Triangulated(_) => ResponseRank::Triangulated,
            Self::Unavailable => ResponseRank::Unavailable,
        }
    }
}

/// Lightweight member info carried in sync and join messages
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberInfo {
    pub nickname: Option<String>,
    pub relationship: Option<String>,
}

/// One roster entry as shipped inside a [`FamilyGroupInfo`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSummary {
    pub id: Uuid,
    pub peer: PeerId,
    pub nickname: Option<String>,
    pub relationship: Option<String>,
}

/// Unsolicited self-announcement, sent once per new direct connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilySync {
    pub sender: PeerId,
    pub group_code: FamilyGroupCode,
    pub member_info: MemberInfo,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast group search, answered only by peers holding the code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyJoinRequest {
    pub id: Uuid,
    pub requester: PeerId,
    pub group_code: FamilyGroupCode,
    pub member_info: MemberInfo,
    pub timestamp: DateTime<Utc>,
}

/// Full roster reply, correlated by `request_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyGroupInfo {
    pub id: Uuid,
    pub request_id: Uuid,
    pub responder: PeerId,
    pub group_code: FamilyGroupCode,
    pub group_name: String,
    pub creator: PeerId,
    pub member_count: u32,
    pub members: Vec<MemberSummary>,
    pub timestamp: DateTime<Utc>,
}

/// Fire-and-forget emergency broadcast, deduplicated by `alert_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyAlert {
    pub sender: PeerId,
    pub kind: AlertKind,
    pub location: Option<UserLocation>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub alert_id: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertKind {
    Sos,
    Medical,
    LostChild,
    Evacuation,
}

impl MeshMessage {
    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, LanternError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary
    pub fn from_bytes(data: &[u8]) -> Result<Self, LanternError> {
        Ok(bincode::deserialize(data)?)
    }
}
