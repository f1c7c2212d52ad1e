//! Distance estimation as an explicit strategy chain.
//!
//! Ranging beats GPS, GPS beats nothing. The order is a contract, not a
//! side effect of nil-coalescing, so it can be asserted in tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lantern_shared::geo::{great_circle_distance, DirectionVector, UserLocation};

/// One reading from an active ranging session with a peer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RangingSample {
    /// Measured distance in meters.
    pub distance: f64,
    /// Absent when the session measures distance only.
    pub direction: Option<DirectionVector>,
    /// Estimated error in meters.
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

/// Which strategy produced an estimate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EstimateSource {
    /// Short-range sensing session.
    Ranging,
    /// Haversine between two GPS fixes.
    GreatCircle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceEstimate {
    pub meters: f64,
    pub source: EstimateSource,
}

/// Walk the strategies in priority order and return the first hit.
///
/// 1. An active ranging sample, if any.
/// 2. Great-circle distance, when both sides have a GPS fix.
/// 3. `None` otherwise.
pub fn estimate_distance(
    ranging: Option<&RangingSample>,
    own_fix: Option<&UserLocation>,
    peer_fix: Option<&UserLocation>,
) -> Option<DistanceEstimate> {
    if let Some(sample) = ranging {
        return Some(DistanceEstimate {
            meters: sample.distance,
            source: EstimateSource::Ranging,
        });
    }
    if let (Some(a), Some(b)) = (own_fix, peer_fix) {
        return Some(DistanceEstimate {
            meters: great_circle_distance(a, b),
            source: EstimateSource::GreatCircle,
        });
    }
    None
}
