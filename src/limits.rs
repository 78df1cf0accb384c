//! Hard limits on inputs and state size. Violations surface as
//! `EngineError::LimitExceeded` and are never retried.

pub const MAX_VISITS: usize = 10_000;
pub const MAX_SLOTS_PER_VISIT: usize = 10_000;

pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4_096;
pub const MAX_USER_ID_LEN: usize = 128;

/// Upper bound for a slot's max_appointments.
pub const MAX_SLOT_CAPACITY: u32 = 100_000;

/// Administrative listing pagination bounds.
pub const MAX_PAGE_SIZE: usize = 50;
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Max bytes in a single wire request line.
pub const MAX_LINE_LEN: usize = 64 * 1024;
