use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::availability::{first_conflict, plan_tables};
use super::conflict::{validate_buffer, validate_slot};
use super::{Engine, EngineError};

impl Engine {
    /// Tables that could seat the party at the requested time: active, big
    /// enough, and free of conflicting claims for the buffered window.
    ///
    /// Pure function of store state at call time; result order is
    /// deterministic (capacity, then id).
    pub async fn check_availability(
        &self,
        date: NaiveDate,
        start: Min,
        party_size: u32,
        duration: Option<Min>,
        buffer: Option<Min>,
    ) -> Result<Vec<TableInfo>, EngineError> {
        if party_size == 0 {
            return Err(EngineError::Validation("party size must be at least 1"));
        }
        let duration = duration.unwrap_or(DEFAULT_DURATION_MIN);
        if !(1..=MAX_DURATION_MIN).contains(&duration) {
            return Err(EngineError::LimitExceeded("duration out of range"));
        }
        let buffer = buffer.unwrap_or(DEFAULT_BUFFER_MIN);
        validate_buffer(buffer)?;
        let want = Slot {
            start,
            end: start + duration,
        };
        validate_slot(&want)?;

        let mut free = Vec::new();
        for id in self.store.table_ids() {
            let Some(t) = self.store.get_table(&id) else {
                continue;
            };
            let guard = t.read().await;
            if !guard.active || guard.capacity < party_size {
                continue;
            }
            if first_conflict(guard.claims_on(date), date, &want, buffer).is_none() {
                free.push(TableInfo::from_state(&guard));
            }
        }
        free.sort_by_key(|t| (t.capacity, t.id));
        Ok(free)
    }

    /// Smallest-first greedy table assignment for a party. Candidates here
    /// are any active free tables, not just party-sized ones — combining
    /// small tables is the point.
    pub async fn suggest_tables(
        &self,
        date: NaiveDate,
        start: Min,
        party_size: u32,
        duration: Option<Min>,
    ) -> Result<TablePlan, EngineError> {
        if party_size == 0 {
            return Err(EngineError::Validation("party size must be at least 1"));
        }
        // party_size 1 as the capacity floor: every active free table is a
        // candidate for combination.
        let available = self
            .check_availability(date, start, 1, duration, None)
            .await?;
        Ok(plan_tables(available, party_size))
    }

    pub async fn list_tables(&self, active_only: bool) -> Vec<TableInfo> {
        let mut out = Vec::new();
        for id in self.store.table_ids() {
            if let Some(t) = self.store.get_table(&id) {
                let guard = t.read().await;
                if active_only && !guard.active {
                    continue;
                }
                out.push(TableInfo::from_state(&guard));
            }
        }
        out
    }

    /// The whole floor with current status hints, for staff visualization.
    pub async fn floor_plan(&self) -> Vec<TableInfo> {
        self.list_tables(false).await
    }

    pub async fn table_stats(&self) -> TableStats {
        let mut stats = TableStats::default();
        for id in self.store.table_ids() {
            if let Some(t) = self.store.get_table(&id) {
                let guard = t.read().await;
                stats.total_tables += 1;
                if guard.active {
                    stats.active_tables += 1;
                    stats.total_capacity += guard.capacity;
                }
                match guard.status {
                    TableStatus::Available => stats.available += 1,
                    TableStatus::Occupied => stats.occupied += 1,
                    TableStatus::Reserved => stats.reserved += 1,
                    TableStatus::Cleaning => stats.cleaning += 1,
                }
            }
        }
        stats
    }

    pub async fn list_bookings(
        &self,
        date: Option<NaiveDate>,
        status: Option<BookingStatus>,
    ) -> Vec<Booking> {
        let mut out = Vec::new();
        for id in self.store.booking_ids() {
            if let Some(b) = self.store.get_booking(&id) {
                let guard = b.read().await;
                if date.is_some_and(|d| guard.date != d) {
                    continue;
                }
                if status.is_some_and(|s| guard.status != s) {
                    continue;
                }
                out.push(guard.clone());
            }
        }
        out
    }

    pub async fn booking_by_id(&self, id: ulid::Ulid) -> Option<Booking> {
        let b = self.store.get_booking(&id)?;
        let guard = b.read().await;
        Some(guard.clone())
    }
}
