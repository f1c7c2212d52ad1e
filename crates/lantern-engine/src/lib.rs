// Run-time core for the Lantern mesh: request brokering, responder duty,
// family group state and the transport seam.

pub mod broker;
pub mod engine;
pub mod estimate;
pub mod events;
pub mod family;
pub mod responder;
pub mod transport;

pub use broker::{JoinOutcome, LocationOutcome};
pub use engine::{spawn_engine, EngineConfig, EngineHandle, PendingQuery};
pub use estimate::{estimate_distance, DistanceEstimate, EstimateSource, RangingSample};
pub use events::EngineEvent;
pub use family::{FamilyGroup, FamilyMember};
pub use responder::DeviceSensors;
pub use transport::{TransportCommand, TransportEvent};
