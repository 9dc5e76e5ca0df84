//! Constants used across the transaction index.

/// Height stored in a serialized coin that is not yet included in a block.
pub const UNCONFIRMED_COIN_HEIGHT: u32 = 0x7FFF_FFFF;

/// Logical height of a transaction that is not yet included in a block.
pub const UNCONFIRMED_HEIGHT: i32 = -1;

/// Width, in decimal digits, of height and timestamp key components.
pub const KEY_PAD_WIDTH: usize = 10;

/// Largest timestamp representable within [`KEY_PAD_WIDTH`] digits.
pub const MAX_KEY_TIME: u64 = 9_999_999_999;

/// Character appended to a prefix to form a range upper bound. Sorts after
/// `/` and every character used in key components.
pub const RANGE_SENTINEL: char = '~';

/// Default limit/page-size used when returning ranged results.
pub const DEFAULT_RANGE_LIMIT: usize = 25;

/// Maximum limit/page-size that can be used when returning ranged results.
pub const MAX_RANGE_LIMIT: usize = 1000;

/// Default number of serialized coins kept in the in-memory coin cache.
pub const DEFAULT_COIN_CACHE_SIZE: usize = 10_000;
