/// Keys predefined for persistance:
/// Prefix used with upstream response key
pub const RESPONSE_PREFIX: &str = "response";
/// Prefix used with response cache key
pub const RESPONSE_CACHE_PREFIX: &str = "response_cache";
/// Prefix used with pending request fingerprint key
pub const PENDING_FINGERPRINT_PREFIX: &str = "pending_fingerprint";
/// Prefix used with in-flight request marker
pub const IN_FLIGHT_PREFIX: &str = "in_flight";
/// Standing subscription IDs hash key
pub const SUBSCRIPTION_IDS_KEY: &str = "subscription_ids";
/// Latest subscription notifications hash key
pub const LATEST_NOTIFICATIONS_KEY: &str = "latest_notifications";
