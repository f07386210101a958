//! Engine defaults.
//!
//! Centralizes the values [`SyncConfig`](crate::SyncConfig) falls back to.

/// Items requested per page from paginated backbone endpoints.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Buffered [`SyncEvent`](crate::SyncEvent)s per subscriber before lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Upper bound on pages fetched in one paginated retrieval.
///
/// A backbone that keeps returning `has_more` past this is treated as
/// misbehaving rather than looped on forever.
pub const MAX_PAGES: usize = 10_000;

/// Fallback error code for failures that carry no domain code.
pub const UNKNOWN_ERROR_CODE: &str = "error.sync.unknown";

/// Domain tag mixed into every per-index key derivation.
pub const PAYLOAD_KEY_INFO: &[u8] = b"datawallet-modification";

/// Name of the field cacheable objects keep their fetched cache under.
pub const CACHE_FIELD: &str = "cache";
