//! Hard limits. Every inbound value is checked against these before it can
//! grow unbounded state or wedge a scan.

use crate::model::Min;

pub const MAX_TABLES_PER_RESTAURANT: usize = 10_000;
pub const MAX_BOOKINGS_PER_RESTAURANT: usize = 1_000_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LOCATION_LEN: usize = 256;
pub const MAX_CONTACT_LEN: usize = 320;
pub const MAX_NOTES_LEN: usize = 4096;

pub const MAX_PARTY_SIZE: u32 = 100;
pub const MAX_TABLE_CAPACITY: u32 = 200;
pub const MAX_TABLES_PER_BOOKING: usize = 16;
pub const MAX_CLAIMS_PER_TABLE: usize = 10_000;

/// Longest single sitting: 12 hours.
pub const MAX_DURATION_MIN: Min = 720;
pub const MAX_BUFFER_MIN: Min = 240;

pub const DEFAULT_DURATION_MIN: Min = 120;
pub const DEFAULT_BUFFER_MIN: Min = 15;

pub const MAX_RESTAURANTS: usize = 256;
pub const MAX_RESTAURANT_NAME_LEN: usize = 256;
