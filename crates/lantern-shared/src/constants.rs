/// Protocol version string advertised to peers
pub const PROTOCOL_VERSION: &str = "/lantern/1.0.0";

/// Application name
pub const APP_NAME: &str = "Lantern";

/// Family group code prefix (text form: `FAM-XXXXX`)
pub const GROUP_CODE_PREFIX: &str = "FAM-";

/// Group code alphabet: A-Z and 2-9 minus the visually ambiguous O/I/0/1
pub const GROUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of random characters after the prefix
pub const GROUP_CODE_LEN: usize = 5;

/// Deep-link scheme for QR/share links (`lantern://family/FAM-XXXXX`)
pub const DEEP_LINK_SCHEME: &str = "lantern";

/// Time-to-live for an outstanding location request
pub const LOCATION_REQUEST_TTL_SECS: u64 = 10;

/// Time-to-live for an outstanding family join request
pub const JOIN_REQUEST_TTL_SECS: u64 = 5;

/// How often the broker sweeps for expired requests
pub const SWEEP_INTERVAL_MILLIS: u64 = 250;

/// Maximum serialized message size in bytes (64 KiB)
pub const MAX_MESSAGE_SIZE: usize = 65_536;

/// Mean Earth radius in meters, used by the haversine distance
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
