// Shared value types, codecs and geometry for the Lantern mesh core.

pub mod constants;
pub mod error;
pub mod geo;
pub mod group_code;
pub mod protocol;
pub mod types;

pub use error::LanternError;
pub use geo::{
    format_distance, great_circle_distance, CardinalDirection, DirectionVector, RelativeLocation,
    UserLocation,
};
pub use group_code::FamilyGroupCode;
pub use protocol::{MeshMessage, ResponseRank};
pub use types::{ConversationId, GroupId, PeerId};
