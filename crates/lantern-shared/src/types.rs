use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Peer identity = opaque transport-assigned string, stable for one mesh session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncated form for log lines. Ids are opaque transport strings, so
    /// truncation has to respect char boundaries.
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(8)
            .map_or(self.0.as_str(), |(i, _)| &self.0[..i])
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Addressing key for a message thread.
///
/// Text form: `conversation.public`, `conversation.family.<peerId>`,
/// `conversation.direct.<peerId>`, `conversation.familyGroup.<groupUuid>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConversationId {
    Public,
    Family(PeerId),
    Direct(PeerId),
    FamilyGroup(GroupId),
}

impl ConversationId {
    pub fn encode(&self) -> String {
        match self {
            Self::Public => "conversation.public".to_string(),
            Self::Family(peer) => format!("conversation.family.{peer}"),
            Self::Direct(peer) => format!("conversation.direct.{peer}"),
            Self::FamilyGroup(group) => format!("conversation.familyGroup.{group}"),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s == "conversation.public" {
            return Some(Self::Public);
        }
        if let Some(peer) = s.strip_prefix("conversation.family.") {
            if peer.is_empty() {
                return None;
            }
            return Some(Self::Family(PeerId(peer.to_string())));
        }
        if let Some(peer) = s.strip_prefix("conversation.direct.") {
            if peer.is_empty() {
                return None;
            }
            return Some(Self::Direct(PeerId(peer.to_string())));
        }
        if let Some(raw) = s.strip_prefix("conversation.familyGroup.") {
            let uuid = Uuid::parse_str(raw).ok()?;
            return Some(Self::FamilyGroup(GroupId(uuid)));
        }
        None
    }

    /// The peer on the other end, for the per-peer variants.
    pub fn peer_id(&self) -> Option<&PeerId> {
        match self {
            Self::Family(peer) | Self::Direct(peer) => Some(peer),
            _ => None,
        }
    }

    pub fn group_id(&self) -> Option<GroupId> {
        match self {
            Self::FamilyGroup(group) => Some(*group),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_id_roundtrip() {
        let ids = [
            ConversationId::Public,
            ConversationId::Family(PeerId::from("peer-a")),
            ConversationId::Direct(PeerId::from("peer-b")),
            ConversationId::FamilyGroup(GroupId::new()),
        ];

        for id in ids {
            let encoded = id.encode();
            let parsed = ConversationId::parse(&encoded).expect("should parse");
            assert_eq!(id, parsed);
        }
    }

    #[test]
    fn test_conversation_id_rejects_garbage() {
        assert!(ConversationId::parse("conversation.").is_none());
        assert!(ConversationId::parse("conversation.family.").is_none());
        assert!(ConversationId::parse("conversation.familyGroup.not-a-uuid").is_none());
        assert!(ConversationId::parse("something.else").is_none());
    }

    #[test]
    fn test_extraction_is_total() {
        let public = ConversationId::Public;
        assert!(public.peer_id().is_none());
        assert!(public.group_id().is_none());

        let direct = ConversationId::Direct(PeerId::from("peer-c"));
        assert_eq!(direct.peer_id().map(|p| p.as_str()), Some("peer-c"));
        assert!(direct.group_id().is_none());
    }

    #[test]
    fn test_peer_id_short() {
        assert_eq!(PeerId::from("abcdefghij").short(), "abcdefgh");
        assert_eq!(PeerId::from("abc").short(), "abc");
    }

    #[test]
    fn test_peer_id_short_on_multibyte_ids() {
        // A two-byte char straddling the eighth byte must not split
        assert_eq!(PeerId::from("aaaaaaa\u{e9}x").short(), "aaaaaaa\u{e9}");
        assert_eq!(PeerId::from("\u{3042}\u{3044}\u{3046}").short(), "\u{3042}\u{3044}\u{3046}");
    }
}
