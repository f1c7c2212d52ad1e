//! Outstanding-request table with priority arbitration and deadlines.
//!
//! The broker is owned by the engine task, which serializes every call on
//! it; there is no internal locking. Each pending entry carries its own
//! deadline and a oneshot sender back to the caller, so many requests can be
//! in flight at once, keyed solely by request id.
//!
//! Arbitration rules:
//! - Location: a `Direct` response is authoritative and finalizes
//!   immediately. Anything weaker is held until the TTL expires, so a
//!   better-ranked answer still has a chance to arrive. An empty window
//!   settles as `Unavailable`.
//! - Join: roster replies have no quality ordering, so the first reply with
//!   the matching code wins outright.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use lantern_shared::group_code::FamilyGroupCode;
use lantern_shared::protocol::{
    FamilyGroupInfo, FamilyJoinRequest, LocationRequest, LocationResponse, ResponseRank,
};
use lantern_shared::types::PeerId;

/// How a location request ended.
#[derive(Debug, Clone)]
pub enum LocationOutcome {
    /// The best response that arrived within the window.
    Located(LocationResponse),
    /// The window closed with no response at all.
    Unavailable,
    /// The caller cancelled before resolution.
    Cancelled,
}

/// How a join request ended.
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    /// A peer holding the code returned its roster.
    Joined(FamilyGroupInfo),
    /// No holder of the code was reachable within the window.
    NotFound,
    /// The caller cancelled before resolution.
    Cancelled,
}

/// A request the broker finalized, reported so the engine can emit events.
#[derive(Debug, Clone)]
pub enum Settled {
    Location(Uuid, LocationOutcome),
    Join(Uuid, JoinOutcome),
}

struct PendingLocation {
    target: PeerId,
    deadline: Instant,
    best: Option<LocationResponse>,
    reply: oneshot::Sender<LocationOutcome>,
}

struct PendingJoin {
    code: FamilyGroupCode,
    deadline: Instant,
    reply: oneshot::Sender<JoinOutcome>,
}

enum Pending {
    Location(PendingLocation),
    Join(PendingJoin),
}

impl Pending {
    fn deadline(&self) -> Instant {
        match self {
            Self::Location(entry) => entry.deadline,
            Self::Join(entry) => entry.deadline,
        }
    }
}

/// Table of outstanding requests.
pub struct Broker {
    pending: HashMap<Uuid, Pending>,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Register an issued location request. The caller's oneshot fires
    /// exactly once: on finalization, timeout or cancel.
    pub fn register_location(
        &mut self,
        request: &LocationRequest,
        deadline: Instant,
        reply: oneshot::Sender<LocationOutcome>,
    ) {
        self.pending.insert(
            request.id,
            Pending::Location(PendingLocation {
                target: request.target.clone(),
                deadline,
                best: None,
                reply,
            }),
        );
    }

    /// Register an issued join request.
    pub fn register_join(
        &mut self,
        request: &FamilyJoinRequest,
        deadline: Instant,
        reply: oneshot::Sender<JoinOutcome>,
    ) {
        self.pending.insert(
            request.id,
            Pending::Join(PendingJoin {
                code: request.group_code.clone(),
                deadline,
                reply,
            }),
        );
    }

    /// Feed an incoming location response through arbitration.
    ///
    /// Returns the settled entry when this response finalized the request.
    /// Stale, duplicate or mismatched correlation ids are silently dropped;
    /// that is the normal tail of a broadcast fan-out.
    pub fn on_location_response(&mut self, response: LocationResponse) -> Option<Settled> {
        let entry = match self.pending.get_mut(&response.request_id) {
            Some(Pending::Location(entry)) => entry,
            Some(Pending::Join(_)) | None => {
                debug!(request = %response.request_id, "Dropping uncorrelated location response");
                return None;
            }
        };

        if entry.target != response.target {
            debug!(
                request = %response.request_id,
                expected = %entry.target.short(),
                got = %response.target.short(),
                "Dropping response for wrong target"
            );
            return None;
        }

        if response.payload.rank() == ResponseRank::Direct {
            // Authoritative, cannot be improved upon
            let request_id = response.request_id;
            if let Some(Pending::Location(entry)) = self.pending.remove(&request_id) {
                let outcome = LocationOutcome::Located(response);
                let _ = entry.reply.send(outcome.clone());
                return Some(Settled::Location(request_id, outcome));
            }
            return None;
        }

        // Hold the best-ranked response seen so far until the TTL expires
        let current = entry.best.as_ref().map(|b| b.payload.rank());
        if current.map_or(true, |rank| response.payload.rank() > rank) {
            entry.best = Some(response);
        }
        None
    }

    /// Feed an incoming roster reply. First reply with the matching code
    /// wins; anything later finds no pending entry and is dropped.
    pub fn on_group_info(&mut self, info: FamilyGroupInfo) -> Option<Settled> {
        match self.pending.get(&info.request_id) {
            Some(Pending::Join(entry)) if entry.code == info.group_code => {}
            Some(Pending::Join(entry)) => {
                debug!(
                    request = %info.request_id,
                    expected = %entry.code,
                    got = %info.group_code,
                    "Dropping roster reply for wrong code"
                );
                return None;
            }
            Some(Pending::Location(_)) | None => {
                debug!(request = %info.request_id, "Dropping uncorrelated roster reply");
                return None;
            }
        }

        let request_id = info.request_id;
        if let Some(Pending::Join(entry)) = self.pending.remove(&request_id) {
            let outcome = JoinOutcome::Joined(info);
            let _ = entry.reply.send(outcome.clone());
            return Some(Settled::Join(request_id, outcome));
        }
        None
    }

    /// Caller-driven early termination. After this, no late response can
    /// ever resolve the request.
    pub fn cancel(&mut self, request_id: Uuid) -> bool {
        match self.pending.remove(&request_id) {
            Some(Pending::Location(entry)) => {
                let _ = entry.reply.send(LocationOutcome::Cancelled);
                true
            }
            Some(Pending::Join(entry)) => {
                let _ = entry.reply.send(JoinOutcome::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Finalize every entry whose deadline has passed.
    pub fn sweep(&mut self, now: Instant) -> Vec<Settled> {
        let expired: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline() <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut settled = Vec::with_capacity(expired.len());
        for id in expired {
            match self.pending.remove(&id) {
                Some(Pending::Location(entry)) => {
                    // A held wire `Unavailable` is still a non-answer
                    let outcome = match entry.best {
                        Some(best) if best.payload.rank() > ResponseRank::Unavailable => {
                            LocationOutcome::Located(best)
                        }
                        _ => LocationOutcome::Unavailable,
                    };
                    debug!(request = %id, "Location request timed out");
                    let _ = entry.reply.send(outcome.clone());
                    settled.push(Settled::Location(id, outcome));
                }
                Some(Pending::Join(entry)) => {
                    debug!(request = %id, code = %entry.code, "Join request timed out");
                    let _ = entry.reply.send(JoinOutcome::NotFound);
                    settled.push(Settled::Join(id, JoinOutcome::NotFound));
                }
                None => {}
            }
        }
        settled
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lantern_shared::geo::{RelativeLocation, UserLocation};
    use lantern_shared::protocol::{LocationPayload, MemberInfo};
    use tokio::sync::oneshot::error::TryRecvError;
    use tokio::time::Duration;

    fn request(target: &str) -> LocationRequest {
        LocationRequest {
            id: Uuid::new_v4(),
            requester: PeerId::from("peer-r"),
            target: PeerId::from(target),
            timestamp: Utc::now(),
            allow_collaborative: true,
        }
    }

    fn direct_response(request: &LocationRequest, responder: &str) -> LocationResponse {
        LocationResponse {
            id: Uuid::new_v4(),
            request_id: request.id,
            responder: PeerId::from(responder),
            target: request.target.clone(),
            timestamp: Utc::now(),
            payload: LocationPayload::Direct(UserLocation::new(59.33, 18.07, 4.0)),
        }
    }

    fn triangulated_response(request: &LocationRequest, responder: &str) -> LocationResponse {
        LocationResponse {
            id: Uuid::new_v4(),
            request_id: request.id,
            responder: PeerId::from(responder),
            target: request.target.clone(),
            timestamp: Utc::now(),
            payload: LocationPayload::Triangulated(RelativeLocation {
                intermediary: PeerId::from(responder),
                intermediary_location: UserLocation::new(59.33, 18.07, 4.0),
                distance: 25.0,
                direction: None,
                accuracy: 1.0,
                timestamp: Utc::now(),
            }),
        }
    }

    fn join_request(code: &str) -> FamilyJoinRequest {
        FamilyJoinRequest {
            id: Uuid::new_v4(),
            requester: PeerId::from("peer-r"),
            group_code: FamilyGroupCode::parse(code).unwrap(),
            member_info: MemberInfo::default(),
            timestamp: Utc::now(),
        }
    }

    fn group_info(request: &FamilyJoinRequest, responder: &str) -> FamilyGroupInfo {
        FamilyGroupInfo {
            id: Uuid::new_v4(),
            request_id: request.id,
            responder: PeerId::from(responder),
            group_code: request.group_code.clone(),
            group_name: "Larssons".to_string(),
            creator: PeerId::from(responder),
            member_count: 2,
            members: vec![],
            timestamp: Utc::now(),
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[test]
    fn test_direct_finalizes_immediately() {
        let mut broker = Broker::new();
        let req = request("peer-t");
        let (tx, mut rx) = oneshot::channel();
        broker.register_location(&req, far_deadline(), tx);

        let settled = broker.on_location_response(direct_response(&req, "peer-t"));
        assert!(matches!(settled, Some(Settled::Location(_, _))));
        assert_eq!(broker.pending_count(), 0);

        match rx.try_recv().unwrap() {
            LocationOutcome::Located(resp) => {
                assert!(matches!(resp.payload, LocationPayload::Direct(_)))
            }
            other => panic!("wrong outcome {other:?}"),
        }

        // Late responses for the settled id are dropped
        assert!(broker
            .on_location_response(triangulated_response(&req, "peer-i"))
            .is_none());
    }

    #[test]
    fn test_direct_beats_triangulated_in_either_order() {
        // Triangulated first, direct later
        let mut broker = Broker::new();
        let req = request("peer-t");
        let (tx, mut rx) = oneshot::channel();
        broker.register_location(&req, far_deadline(), tx);

        assert!(broker
            .on_location_response(triangulated_response(&req, "peer-i"))
            .is_none());
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);

        broker.on_location_response(direct_response(&req, "peer-t"));
        match rx.try_recv().unwrap() {
            LocationOutcome::Located(resp) => {
                assert_eq!(resp.responder, PeerId::from("peer-t"));
                assert!(matches!(resp.payload, LocationPayload::Direct(_)));
            }
            other => panic!("wrong outcome {other:?}"),
        }
    }

    #[test]
    fn test_triangulated_held_until_sweep() {
        let mut broker = Broker::new();
        let req = request("peer-t");
        let (tx, mut rx) = oneshot::channel();
        let deadline = Instant::now() + Duration::from_millis(50);
        broker.register_location(&req, deadline, tx);

        broker.on_location_response(triangulated_response(&req, "peer-i"));

        // Before the deadline nothing settles
        assert!(broker.sweep(Instant::now()).is_empty());
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);

        let settled = broker.sweep(deadline + Duration::from_millis(1));
        assert_eq!(settled.len(), 1);
        match rx.try_recv().unwrap() {
            LocationOutcome::Located(resp) => {
                assert!(matches!(resp.payload, LocationPayload::Triangulated(_)))
            }
            other => panic!("wrong outcome {other:?}"),
        }
    }

    #[test]
    fn test_empty_window_settles_unavailable_once() {
        let mut broker = Broker::new();
        let req = request("peer-t");
        let (tx, mut rx) = oneshot::channel();
        let deadline = Instant::now() + Duration::from_millis(10);
        broker.register_location(&req, deadline, tx);

        let after = deadline + Duration::from_millis(1);
        let settled = broker.sweep(after);
        assert_eq!(settled.len(), 1);
        assert!(matches!(rx.try_recv(), Ok(LocationOutcome::Unavailable)));

        // A second sweep finds nothing to settle
        assert!(broker.sweep(after + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_wire_unavailable_settles_as_unavailable() {
        let mut broker = Broker::new();
        let req = request("peer-t");
        let (tx, mut rx) = oneshot::channel();
        let deadline = Instant::now() + Duration::from_millis(10);
        broker.register_location(&req, deadline, tx);

        let unavailable = LocationResponse {
            id: Uuid::new_v4(),
            request_id: req.id,
            responder: PeerId::from("peer-t"),
            target: req.target.clone(),
            timestamp: Utc::now(),
            payload: LocationPayload::Unavailable,
        };
        assert!(broker.on_location_response(unavailable).is_none());

        let settled = broker.sweep(deadline + Duration::from_millis(1));
        assert_eq!(settled.len(), 1);
        assert!(matches!(rx.try_recv(), Ok(LocationOutcome::Unavailable)));
    }

    #[test]
    fn test_cancel_blocks_late_responses() {
        let mut broker = Broker::new();
        let req = request("peer-t");
        let (tx, mut rx) = oneshot::channel();
        broker.register_location(&req, far_deadline(), tx);

        assert!(broker.cancel(req.id));
        assert!(matches!(rx.try_recv(), Ok(LocationOutcome::Cancelled)));

        assert!(broker
            .on_location_response(direct_response(&req, "peer-t"))
            .is_none());
        assert!(!broker.cancel(req.id));
    }

    #[test]
    fn test_wrong_target_response_is_dropped() {
        let mut broker = Broker::new();
        let req = request("peer-t");
        let (tx, mut rx) = oneshot::channel();
        broker.register_location(&req, far_deadline(), tx);

        let mut forged = direct_response(&req, "peer-x");
        forged.target = PeerId::from("peer-x");
        assert!(broker.on_location_response(forged).is_none());
        assert_eq!(broker.pending_count(), 1);
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn test_first_roster_reply_wins() {
        let mut broker = Broker::new();
        let req = join_request("FAM-A2B3C");
        let (tx, mut rx) = oneshot::channel();
        broker.register_join(&req, far_deadline(), tx);

        let first = group_info(&req, "peer-a");
        let second = group_info(&req, "peer-b");

        assert!(broker.on_group_info(first).is_some());
        match rx.try_recv().unwrap() {
            JoinOutcome::Joined(info) => assert_eq!(info.responder, PeerId::from("peer-a")),
            other => panic!("wrong outcome {other:?}"),
        }

        // Second reply for the same id finds nothing pending
        assert!(broker.on_group_info(second).is_none());
    }

    #[test]
    fn test_roster_reply_with_wrong_code_keeps_request_pending() {
        let mut broker = Broker::new();
        let req = join_request("FAM-A2B3C");
        let (tx, _rx) = oneshot::channel();
        broker.register_join(&req, far_deadline(), tx);

        let mut wrong = group_info(&req, "peer-a");
        wrong.group_code = FamilyGroupCode::parse("FAM-ZZZZZ").unwrap();
        assert!(broker.on_group_info(wrong).is_none());
        assert_eq!(broker.pending_count(), 1);
    }

    #[test]
    fn test_join_timeout_reports_not_found() {
        let mut broker = Broker::new();
        let req = join_request("FAM-ZZZZZ");
        let (tx, mut rx) = oneshot::channel();
        let deadline = Instant::now() + Duration::from_millis(10);
        broker.register_join(&req, deadline, tx);

        broker.sweep(deadline + Duration::from_millis(1));
        assert!(matches!(rx.try_recv(), Ok(JoinOutcome::NotFound)));
    }

    #[test]
    fn test_independent_deadlines() {
        let mut broker = Broker::new();
        let short = request("peer-a");
        let long = request("peer-b");
        let (tx_a, mut rx_a) = oneshot::channel();
        let (tx_b, mut rx_b) = oneshot::channel();

        let now = Instant::now();
        broker.register_location(&short, now + Duration::from_millis(10), tx_a);
        broker.register_location(&long, now + Duration::from_secs(10), tx_b);

        let settled = broker.sweep(now + Duration::from_millis(20));
        assert_eq!(settled.len(), 1);
        assert!(matches!(rx_a.try_recv(), Ok(LocationOutcome::Unavailable)));
        assert_eq!(rx_b.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(broker.pending_count(), 1);
    }
}
