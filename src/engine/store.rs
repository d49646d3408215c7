use dashmap::DashMap;
use ulid::Ulid;

use super::{SharedBooking, SharedTableState};

/// In-memory table + booking store for one restaurant. Each entity lives
/// behind its own `RwLock`, so every update is an atomic read-modify-write
/// at the store layer — there is no separate read-then-write for callers to
/// interleave. Cross-restaurant isolation is structural: each restaurant
/// owns a whole `Store`.
pub struct Store {
    tables: DashMap<Ulid, SharedTableState>,
    bookings: DashMap<Ulid, SharedBooking>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            bookings: DashMap::new(),
        }
    }

    // ── Tables ───────────────────────────────────────────────

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn contains_table(&self, id: &Ulid) -> bool {
        self.tables.contains_key(id)
    }

    pub fn get_table(&self, id: &Ulid) -> Option<SharedTableState> {
        self.tables.get(id).map(|e| e.value().clone())
    }

    pub fn insert_table(&self, id: Ulid, state: SharedTableState) {
        self.tables.insert(id, state);
    }

    pub fn remove_table(&self, id: &Ulid) -> Option<(Ulid, SharedTableState)> {
        self.tables.remove(id)
    }

    pub fn table_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.tables.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // ── Bookings ─────────────────────────────────────────────

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn contains_booking(&self, id: &Ulid) -> bool {
        self.bookings.contains_key(id)
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn insert_booking(&self, id: Ulid, booking: SharedBooking) {
        self.bookings.insert(id, booking);
    }

    pub fn remove_booking(&self, id: &Ulid) -> Option<(Ulid, SharedBooking)> {
        self.bookings.remove(id)
    }

    pub fn booking_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.bookings.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }
}
