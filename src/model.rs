use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since midnight, restaurant-local — the only time-of-day type.
pub type Min = i32;

pub const MINUTES_PER_DAY: Min = 1440;

/// Strict `HH:MM` parse. Malformed input is an error at the boundary,
/// never silently midnight.
pub fn parse_hhmm(s: &str) -> Result<Min, chrono::ParseError> {
    let t = NaiveTime::parse_from_str(s, "%H:%M")?;
    Ok((t.hour() * 60 + t.minute()) as Min)
}

pub fn format_hhmm(min: Min) -> String {
    format!("{:02}:{:02}", min / 60, min % 60)
}

/// Shift a time-of-day by `delta` minutes, wrapping at the 24h boundary.
/// Never carries into another date; cross-midnight slots are rejected upstream.
pub fn add_minutes(min: Min, delta: Min) -> Min {
    (min + delta).rem_euclid(MINUTES_PER_DAY)
}

/// Half-open minute interval `[start, end)` within a single service day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: Min,
    pub end: Min,
}

impl Slot {
    pub fn new(start: Min, end: Min) -> Self {
        debug_assert!(start < end, "Slot start must be before end");
        Self { start, end }
    }

    pub fn duration_min(&self) -> Min {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The window this slot blocks for conflict purposes: the slot itself
    /// widened by the turnover buffer on both sides. `start` may go negative;
    /// it is only ever compared, never rendered.
    pub fn buffered(&self, buffer: Min) -> Slot {
        Slot {
            start: self.start - buffer,
            end: self.end + buffer,
        }
    }
}

// ── Tables ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableStatus {
    Available,
    Occupied,
    Reserved,
    Cleaning,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Available => "available",
            TableStatus::Occupied => "occupied",
            TableStatus::Reserved => "reserved",
            TableStatus::Cleaning => "cleaning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(TableStatus::Available),
            "occupied" => Some(TableStatus::Occupied),
            "reserved" => Some(TableStatus::Reserved),
            "cleaning" => Some(TableStatus::Cleaning),
            _ => None,
        }
    }
}

/// A booking's hold on one table for one date and slot. Claims exist only
/// while the owning booking is confirmed or seated, and they — not
/// `TableState::status` — are what conflict detection consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub booking_id: Ulid,
    pub date: NaiveDate,
    pub slot: Slot,
}

#[derive(Debug, Clone)]
pub struct TableState {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub location: String,
    pub active: bool,
    /// Cached floor-plan hint. Lags multi-step workflows; never the source
    /// of truth for availability.
    pub status: TableStatus,
    /// Claims sorted by `(date, slot.start)`.
    pub claims: Vec<Claim>,
}

impl TableState {
    pub fn new(id: Ulid, name: String, capacity: u32, location: String) -> Self {
        Self {
            id,
            name,
            capacity,
            location,
            active: true,
            status: TableStatus::Available,
            claims: Vec::new(),
        }
    }

    /// Insert a claim maintaining sort order by `(date, slot.start)`.
    pub fn insert_claim(&mut self, claim: Claim) {
        let pos = self
            .claims
            .binary_search_by_key(&(claim.date, claim.slot.start), |c| (c.date, c.slot.start))
            .unwrap_or_else(|e| e);
        self.claims.insert(pos, claim);
    }

    /// Drop every claim held by `booking_id`.
    pub fn remove_claims_for(&mut self, booking_id: Ulid) {
        self.claims.retain(|c| c.booking_id != booking_id);
    }

    /// Claims for one service date. Uses binary search to skip other dates.
    pub fn claims_on(&self, date: NaiveDate) -> &[Claim] {
        let lo = self.claims.partition_point(|c| c.date < date);
        let hi = self.claims.partition_point(|c| c.date <= date);
        &self.claims[lo..hi]
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Seated,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Seated => "seated",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "seated" => Some(BookingStatus::Seated),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "no_show" => Some(BookingStatus::NoShow),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingSource {
    Online,
    Staff,
    WalkIn,
}

impl BookingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingSource::Online => "online",
            BookingSource::Staff => "staff",
            BookingSource::WalkIn => "walk_in",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(BookingSource::Online),
            "staff" => Some(BookingSource::Staff),
            "walk_in" => Some(BookingSource::WalkIn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    /// Human-readable reference handed to the customer.
    pub reference: String,
    pub date: NaiveDate,
    pub slot: Slot,
    pub party_size: u32,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub source: BookingSource,
    pub notes: String,
    pub status: BookingStatus,
    /// Assigned tables in assignment order; the first is the primary.
    /// Empty until confirmation.
    pub table_ids: Vec<Ulid>,
}

impl Booking {
    /// Reference derived from the id's random suffix, e.g. `BK-9G5FAVX7`.
    pub fn reference_for(id: Ulid) -> String {
        let s = id.to_string();
        format!("BK-{}", &s[s.len() - 8..])
    }

    pub fn primary_table(&self) -> Option<Ulid> {
        self.table_ids.first().copied()
    }
}

/// Inbound create-booking request. Date and time are already strictly
/// parsed at the wire boundary; everything else is validated by the engine.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub date: NaiveDate,
    pub start: Min,
    /// Explicit end time; derived as `start + duration` when absent.
    pub end: Option<Min>,
    pub duration: Option<Min>,
    pub party_size: u32,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub source: BookingSource,
    pub notes: String,
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TableCreated {
        id: Ulid,
        name: String,
        capacity: u32,
        location: String,
        active: bool,
        status: TableStatus,
    },
    TableUpdated {
        id: Ulid,
        name: String,
        capacity: u32,
        location: String,
        active: bool,
    },
    TableStatusSet {
        id: Ulid,
        status: TableStatus,
    },
    TableDeleted {
        id: Ulid,
    },
    /// Carries the full record so compaction can snapshot bookings in any
    /// state; a freshly created booking is always pending with no tables.
    BookingCreated {
        booking: Booking,
    },
    BookingConfirmed {
        id: Ulid,
        table_ids: Vec<Ulid>,
    },
    BookingRejected {
        id: Ulid,
        reason: String,
    },
    BookingSeated {
        id: Ulid,
    },
    BookingCompleted {
        id: Ulid,
    },
    BookingNoShow {
        id: Ulid,
    },
    BookingCancelled {
        id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub location: String,
    pub active: bool,
    pub status: TableStatus,
}

impl TableInfo {
    pub fn from_state(ts: &TableState) -> Self {
        Self {
            id: ts.id,
            name: ts.name.clone(),
            capacity: ts.capacity,
            location: ts.location.clone(),
            active: ts.active,
            status: ts.status,
        }
    }
}

/// Outcome of the table-assignment planner. An empty or under-capacity plan
/// is a result, not an error — callers check `sufficient` before confirming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    pub tables: Vec<TableInfo>,
    pub total_capacity: u32,
    pub sufficient: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableStats {
    pub total_tables: u32,
    pub active_tables: u32,
    pub total_capacity: u32,
    pub available: u32,
    pub occupied: u32,
    pub reserved: u32,
    pub cleaning: u32,
}
