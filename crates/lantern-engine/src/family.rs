//! Local family group state.
//!
//! Every device holds its own, possibly stale, copy of the roster. All
//! mutation goes through merge operations keyed by peer id; nothing here is
//! ever matched by array index, and members are only removed explicitly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use lantern_shared::geo::UserLocation;
use lantern_shared::group_code::FamilyGroupCode;
use lantern_shared::protocol::{FamilyGroupInfo, FamilySync, MemberInfo, MemberSummary};
use lantern_shared::types::{GroupId, PeerId};

/// One participant in a family group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FamilyMember {
    pub id: Uuid,
    pub peer: PeerId,
    pub nickname: Option<String>,
    pub relationship: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub last_location: Option<UserLocation>,
    pub is_current_device: bool,
}

impl FamilyMember {
    fn from_info(peer: PeerId, info: &MemberInfo, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            nickname: info.nickname.clone(),
            relationship: info.relationship.clone(),
            last_seen: now,
            last_location: None,
            is_current_device: false,
        }
    }
}

/// A family's roster, unique by member peer id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FamilyGroup {
    pub id: GroupId,
    pub name: String,
    pub code: FamilyGroupCode,
    pub creator: PeerId,
    pub created_at: DateTime<Utc>,
    members: Vec<FamilyMember>,
}

impl FamilyGroup {
    /// Create a fresh group with the local device as creator and first member.
    pub fn create(name: String, creator: PeerId, creator_info: &MemberInfo) -> Self {
        let now = Utc::now();
        let mut first = FamilyMember::from_info(creator.clone(), creator_info, now);
        first.is_current_device = true;

        Self {
            id: GroupId::new(),
            name,
            code: FamilyGroupCode::generate(),
            creator,
            created_at: now,
            members: vec![first],
        }
    }

    /// Rebuild a group from a roster reply, marking `self_peer` as the local
    /// device. Wholesale replacement is the join-flow contract.
    ///
    /// A responder that replied before recording the joiner returns a roster
    /// without us in it; in that case we append ourselves from `self_info`,
    /// so the local device is always a member of its own group.
    pub fn adopt_roster(info: &FamilyGroupInfo, self_peer: &PeerId, self_info: &MemberInfo) -> Self {
        let now = Utc::now();
        let mut members: Vec<FamilyMember> = info
            .members
            .iter()
            .map(|summary| FamilyMember {
                id: summary.id,
                peer: summary.peer.clone(),
                nickname: summary.nickname.clone(),
                relationship: summary.relationship.clone(),
                last_seen: now,
                last_location: None,
                is_current_device: &summary.peer == self_peer,
            })
            .collect();

        if !members.iter().any(|m| m.is_current_device) {
            let mut me = FamilyMember::from_info(self_peer.clone(), self_info, now);
            me.is_current_device = true;
            members.push(me);
        }

        Self {
            id: GroupId::new(),
            name: info.group_name.clone(),
            code: info.group_code.clone(),
            creator: info.creator.clone(),
            created_at: now,
            members,
        }
    }

    pub fn members(&self) -> &[FamilyMember] {
        &self.members
    }

    pub fn member(&self, peer: &PeerId) -> Option<&FamilyMember> {
        self.members.iter().find(|m| &m.peer == peer)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Merge a passive sync announcement. Returns true when the roster
    /// changed (a last-seen refresh alone counts as unchanged).
    ///
    /// A sync for a different group code is ignored; announcements from
    /// strangers are expected under broadcast fan-out.
    pub fn apply_sync(&mut self, sync: &FamilySync, now: DateTime<Utc>) -> bool {
        if sync.group_code != self.code {
            return false;
        }
        self.admit(sync.sender.clone(), &sync.member_info, now)
    }

    /// Upsert a member by peer id. Returns true when the roster changed
    /// (a last-seen refresh alone counts as unchanged).
    ///
    /// Used both for passive sync announcements and for admitting a joiner
    /// whose join request we are about to answer.
    pub fn admit(&mut self, peer: PeerId, info: &MemberInfo, now: DateTime<Utc>) -> bool {
        match self.members.iter_mut().find(|m| m.peer == peer) {
            Some(existing) => {
                existing.last_seen = now;
                let changed = existing.nickname != info.nickname
                    || existing.relationship != info.relationship;
                existing.nickname = info.nickname.clone();
                existing.relationship = info.relationship.clone();
                changed
            }
            None => {
                debug!(peer = %peer.short(), "New family member");
                self.members.push(FamilyMember::from_info(peer, info, now));
                true
            }
        }
    }

    /// Record a fresh location observation for a member.
    pub fn update_location(&mut self, peer: &PeerId, location: UserLocation) -> bool {
        match self.members.iter_mut().find(|m| &m.peer == peer) {
            Some(member) => {
                member.last_location = Some(location);
                // A stale fix must not move last-seen backwards
                member.last_seen = member.last_seen.max(location.timestamp);
                true
            }
            None => false,
        }
    }

    /// Refresh a member's last-seen timestamp.
    pub fn touch(&mut self, peer: &PeerId, now: DateTime<Utc>) -> bool {
        match self.members.iter_mut().find(|m| &m.peer == peer) {
            Some(member) => {
                member.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Explicit member removal. Passive staleness never evicts anyone.
    pub fn remove_member(&mut self, peer: &PeerId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| &m.peer != peer);
        before != self.members.len()
    }

    /// Build the roster reply for a join request.
    pub fn to_group_info(&self, request_id: Uuid, responder: PeerId) -> FamilyGroupInfo {
        FamilyGroupInfo {
            id: Uuid::new_v4(),
            request_id,
            responder,
            group_code: self.code.clone(),
            group_name: self.name.clone(),
            creator: self.creator.clone(),
            member_count: self.members.len() as u32,
            members: self
                .members
                .iter()
                .map(|m| MemberSummary {
                    id: m.id,
                    peer: m.peer.clone(),
                    nickname: m.nickname.clone(),
                    relationship: m.relationship.clone(),
                })
                .collect(),
            timestamp: Utc::now(),
        }
    }
}
