//! Compiled-in tunables, overridable by environment variable.
//!
//! These are not a general configuration layer — loading config files,
//! CLI flags, and the like belong to the outer application, not the core.

use once_cell::sync::Lazy;

/// Parses an environment variable into a typed value, falling back to a
/// default when the variable is absent or fails to parse.
#[macro_export]
macro_rules! lazy_env_parse {
	($key:expr, $t:ty, $default:expr) => {
		once_cell::sync::Lazy::new(|| {
			std::env::var($key)
				.ok()
				.and_then(|s| s.parse::<$t>().ok())
				.unwrap_or($default)
		})
	};
}

/// Number of (key, value) pairs pulled per `get_range` page during a jsck
/// scan. Keeps the checker's resident memory bounded per derived-key
/// prefix regardless of database size.
pub static JSCK_SCAN_BATCH_SIZE: Lazy<usize> =
	lazy_env_parse!("OBJKV_JSCK_SCAN_BATCH_SIZE", usize, 1_000);

/// How many times object-id allocation retries on collision before giving up.
/// Collision is only possible while a type's id space is nearly exhausted;
/// this bounds the pathological case rather than spinning forever.
pub static OBJID_ALLOC_RETRIES: Lazy<u32> =
	lazy_env_parse!("OBJKV_OBJID_ALLOC_RETRIES", u32, 1_000);

/// Capacity of the in-process schema cache (version -> `Arc<Schema>`).
pub const SCHEMA_CACHE_CAPACITY: usize = 256;
