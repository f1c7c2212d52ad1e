//! Responder-side duty: decide whether an incoming request deserves an
//! answer, and build it.
//!
//! Silence is a valid answer. A peer that can neither report the target nor
//! triangulate stays quiet; only the requester synthesizes `Unavailable`
//! when its TTL runs out empty.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use lantern_shared::geo::{RelativeLocation, UserLocation};
use lantern_shared::protocol::{
    FamilyGroupInfo, FamilyJoinRequest, LocationPayload, LocationRequest, LocationResponse,
    RangingReport,
};
use lantern_shared::types::PeerId;

use crate::estimate::RangingSample;
use crate::family::FamilyGroup;

/// On-device sensing consumed by the responder and the alert path.
/// Implemented by the embedding application over its GPS and ranging stacks.
pub trait DeviceSensors: Send + Sync {
    /// Most recent GPS fix, if location is available at all.
    fn last_fix(&self) -> Option<UserLocation>;

    /// Current reading of an active ranging session with `peer`, if one
    /// exists right now.
    fn ranging_to(&self, peer: &PeerId) -> Option<RangingSample>;
}

/// Answer an incoming location request, or stay silent.
///
/// - We are the target: answer `Direct` with our own fix, falling back to a
///   `RangingDirect` self-report when we only hold a ranging estimate of the
///   requester.
/// - We are a bystander with an active ranging session to the target, and the
///   requester allows collaboration: answer `Triangulated` with ourselves as
///   intermediary. Needs our own fix to anchor the relative estimate.
pub fn answer_location_request(
    self_peer: &PeerId,
    sensors: &dyn DeviceSensors,
    request: &LocationRequest,
) -> Option<LocationResponse> {
    let payload = if request.target == *self_peer {
        if let Some(fix) = sensors.last_fix() {
            Some(LocationPayload::Direct(fix))
        } else {
            sensors.ranging_to(&request.requester).map(|sample| {
                LocationPayload::RangingDirect(RangingReport {
                    distance: sample.distance,
                    direction: sample.direction,
                    accuracy: sample.accuracy,
                    timestamp: sample.timestamp,
                })
            })
        }
    } else if request.allow_collaborative {
        match (sensors.ranging_to(&request.target), sensors.last_fix()) {
            (Some(sample), Some(own_fix)) => {
                Some(LocationPayload::Triangulated(RelativeLocation {
                    intermediary: self_peer.clone(),
                    intermediary_location: own_fix,
                    distance: sample.distance,
                    direction: sample.direction,
                    accuracy: sample.accuracy,
                    timestamp: sample.timestamp,
                }))
            }
            _ => None,
        }
    } else {
        None
    };

    let payload = payload?;
    debug!(
        request = %request.id,
        target = %request.target.short(),
        kind = ?payload.rank(),
        "Answering location request"
    );

    Some(LocationResponse {
        id: Uuid::new_v4(),
        request_id: request.id,
        responder: self_peer.clone(),
        target: request.target.clone(),
        timestamp: Utc::now(),
        payload,
    })
}

/// Answer a join request when we hold a group with the matching code.
///
/// The joiner is admitted into our roster first, so the reply we hand back
/// already lists them and later sync traffic propagates them outward.
pub fn answer_join_request(
    self_peer: &PeerId,
    group: Option<&mut FamilyGroup>,
    request: &FamilyJoinRequest,
) -> Option<FamilyGroupInfo> {
    let group = group.filter(|g| g.code == request.group_code)?;
    group.admit(request.requester.clone(), &request.member_info, Utc::now());
    debug!(
        request = %request.id,
        code = %request.group_code,
        joiner = %request.requester.short(),
        "Answering join request with roster"
    );
    Some(group.to_group_info(request.id, self_peer.clone()))
}
