//! UUID v7 utilities for time-ordered identifiers.
//!
//! Job ids are UUIDv7 so that ordering by id matches ordering by start time.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
///
/// # Example
///
/// ```
/// use billdigest_core::uuid_utils::new_v7;
///
/// let id = new_v7();
/// assert_eq!(id.get_version_num(), 7);
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}
