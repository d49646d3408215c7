use std::sync::Arc;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_table_free, validate_slot};
use super::{apply_to_booking, apply_to_table, Engine, EngineError};

impl Engine {
    // ── Table management ─────────────────────────────────────

    pub async fn create_table(
        &self,
        id: Ulid,
        name: String,
        capacity: u32,
        location: String,
    ) -> Result<(), EngineError> {
        if self.store.table_count() >= MAX_TABLES_PER_RESTAURANT {
            return Err(EngineError::LimitExceeded("too many tables"));
        }
        validate_table_fields(&name, capacity, &location)?;
        if self.store.contains_table(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::TableCreated {
            id,
            name: name.clone(),
            capacity,
            location: location.clone(),
            active: true,
            status: TableStatus::Available,
        };
        self.wal_append(&event).await?;
        let ts = TableState::new(id, name, capacity, location);
        self.notify_table(&ts);
        self.store.insert_table(id, Arc::new(RwLock::new(ts)));
        Ok(())
    }

    pub async fn update_table(
        &self,
        id: Ulid,
        name: Option<String>,
        capacity: Option<u32>,
        location: Option<String>,
        active: Option<bool>,
    ) -> Result<(), EngineError> {
        let t = self
            .store
            .get_table(&id)
            .ok_or(EngineError::TableNotFound(id))?;
        let mut guard = t.write().await;

        let name = name.unwrap_or_else(|| guard.name.clone());
        let capacity = capacity.unwrap_or(guard.capacity);
        let location = location.unwrap_or_else(|| guard.location.clone());
        let active = active.unwrap_or(guard.active);
        validate_table_fields(&name, capacity, &location)?;

        let event = Event::TableUpdated {
            id,
            name: name.clone(),
            capacity,
            location: location.clone(),
            active,
        };
        self.wal_append(&event).await?;
        guard.name = name;
        guard.capacity = capacity;
        guard.location = location;
        guard.active = active;
        self.notify_table(&guard);
        Ok(())
    }

    /// Staff toggle. Deliberately narrower than the lifecycle's own writes:
    /// staff can flip a table between cleaning and available, nothing else.
    pub async fn set_table_status(
        &self,
        id: Ulid,
        status: TableStatus,
    ) -> Result<(), EngineError> {
        if !matches!(status, TableStatus::Cleaning | TableStatus::Available) {
            return Err(EngineError::Validation(
                "staff may only mark a table cleaning or available",
            ));
        }
        let t = self
            .store
            .get_table(&id)
            .ok_or(EngineError::TableNotFound(id))?;
        let mut guard = t.write().await;

        let event = Event::TableStatusSet { id, status };
        self.wal_append(&event).await?;
        guard.status = status;
        self.notify_table(&guard);
        Ok(())
    }

    pub async fn delete_table(&self, id: Ulid) -> Result<(), EngineError> {
        let t = self
            .store
            .get_table(&id)
            .ok_or(EngineError::TableNotFound(id))?;
        let guard = t.write().await;
        if !guard.claims.is_empty() {
            return Err(EngineError::TableInUse(id));
        }

        let event = Event::TableDeleted { id };
        self.wal_append(&event).await?;
        self.notify_table(&guard);
        drop(guard);
        self.store.remove_table(&id);
        Ok(())
    }

    // ── Booking lifecycle ────────────────────────────────────

    /// Create a booking in `pending` with no tables assigned. Staff pick
    /// tables later; confirmation is where capacity and conflicts are checked.
    pub async fn create_booking(
        &self,
        id: Ulid,
        req: BookingRequest,
    ) -> Result<Booking, EngineError> {
        if self.store.booking_count() >= MAX_BOOKINGS_PER_RESTAURANT {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }
        if req.party_size == 0 {
            return Err(EngineError::Validation("party size must be at least 1"));
        }
        if req.party_size > MAX_PARTY_SIZE {
            return Err(EngineError::LimitExceeded("party too large"));
        }
        if req.customer_name.trim().is_empty() {
            return Err(EngineError::Validation("customer name is required"));
        }
        if req.customer_email.trim().is_empty() {
            return Err(EngineError::Validation("customer email is required"));
        }
        if req.customer_name.len() > MAX_NAME_LEN
            || req.customer_email.len() > MAX_CONTACT_LEN
            || req.customer_phone.as_ref().is_some_and(|p| p.len() > MAX_CONTACT_LEN)
        {
            return Err(EngineError::LimitExceeded("contact field too long"));
        }
        if req.notes.len() > MAX_NOTES_LEN {
            return Err(EngineError::LimitExceeded("notes too long"));
        }

        let duration = req.duration.unwrap_or(DEFAULT_DURATION_MIN);
        if !(1..=MAX_DURATION_MIN).contains(&duration) {
            return Err(EngineError::LimitExceeded("duration out of range"));
        }
        let end = req.end.unwrap_or(req.start + duration);
        let slot = Slot { start: req.start, end };
        validate_slot(&slot)?;

        if self.store.contains_booking(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let booking = Booking {
            id,
            reference: Booking::reference_for(id),
            date: req.date,
            slot,
            party_size: req.party_size,
            customer_name: req.customer_name,
            customer_email: req.customer_email,
            customer_phone: req.customer_phone,
            source: req.source,
            notes: req.notes,
            status: BookingStatus::Pending,
            table_ids: Vec::new(),
        };

        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.wal_append(&event).await?;
        self.store
            .insert_booking(id, Arc::new(RwLock::new(booking.clone())));
        self.notify_booking("booking:new", &booking);
        Ok(booking)
    }

    /// Confirm a pending booking onto one or more tables.
    ///
    /// Availability seen at suggestion time may be stale by now, so the
    /// conflict check is re-run here — under the write locks of every
    /// proposed table, in sorted id order (deadlock free). Of two racing
    /// confirms on a shared table, the loser blocks on that table's lock and
    /// then sees the winner's claim. Nothing is written until every check on
    /// every table has passed.
    pub async fn confirm_booking(
        &self,
        id: Ulid,
        table_ids: Vec<Ulid>,
    ) -> Result<Booking, EngineError> {
        if table_ids.is_empty() {
            return Err(EngineError::Validation(
                "confirmation requires at least one table",
            ));
        }
        if table_ids.len() > MAX_TABLES_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many tables for one booking"));
        }
        let mut sorted = table_ids.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != table_ids.len() {
            return Err(EngineError::Validation("duplicate table in assignment"));
        }

        let b_arc = self
            .store
            .get_booking(&id)
            .ok_or(EngineError::BookingNotFound(id))?;
        let mut booking = b_arc.write_owned().await;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                action: "confirm",
            });
        }

        let guards = self.lock_tables(&sorted).await?;

        let mut capacity = 0u32;
        for guard in &guards {
            if !guard.active {
                return Err(EngineError::TableInactive(guard.id));
            }
            if guard.claims.len() >= MAX_CLAIMS_PER_TABLE {
                return Err(EngineError::LimitExceeded("too many claims on table"));
            }
            capacity += guard.capacity;
        }
        if capacity < booking.party_size {
            return Err(EngineError::InsufficientCapacity {
                party_size: booking.party_size,
                capacity,
            });
        }
        for guard in &guards {
            check_table_free(guard, booking.date, &booking.slot, DEFAULT_BUFFER_MIN)?;
        }

        // All checks passed with every lock still held — commit.
        let event = Event::BookingConfirmed {
            id,
            table_ids: table_ids.clone(),
        };
        self.wal_append(&event).await?;
        apply_to_booking(&mut booking, &event);
        for mut guard in guards {
            apply_to_table(&mut guard, &booking, &event);
        }
        self.notify_booking("booking:confirmed", &booking);
        Ok(booking.clone())
    }

    /// Staff decline of a pending booking. The reason lands in the notes;
    /// no table was ever assigned, so there is no table side effect.
    pub async fn reject_booking(&self, id: Ulid, reason: String) -> Result<Booking, EngineError> {
        if reason.len() > MAX_NOTES_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let b_arc = self
            .store
            .get_booking(&id)
            .ok_or(EngineError::BookingNotFound(id))?;
        let mut booking = b_arc.write_owned().await;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                action: "reject",
            });
        }

        let event = Event::BookingRejected { id, reason };
        self.wal_append(&event).await?;
        apply_to_booking(&mut booking, &event);
        self.notify_booking("booking:rejected", &booking);
        Ok(booking.clone())
    }

    pub async fn seat_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, "seat", &[BookingStatus::Confirmed], |id| {
            Event::BookingSeated { id }
        })
        .await
    }

    /// Walk-ins are sometimes completed straight from `confirmed` when the
    /// seating step was skipped at the host stand.
    pub async fn complete_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(
            id,
            "complete",
            &[BookingStatus::Seated, BookingStatus::Confirmed],
            |id| Event::BookingCompleted { id },
        )
        .await
    }

    pub async fn no_show_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, "mark no-show", &[BookingStatus::Confirmed], |id| {
            Event::BookingNoShow { id }
        })
        .await
    }

    /// Customer self-service cancel: pending bookings only, and only by the
    /// email on the booking.
    pub async fn cancel_booking(
        &self,
        id: Ulid,
        requester_email: &str,
    ) -> Result<Booking, EngineError> {
        let b_arc = self
            .store
            .get_booking(&id)
            .ok_or(EngineError::BookingNotFound(id))?;
        let mut booking = b_arc.write_owned().await;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                action: "cancel",
            });
        }
        if !booking
            .customer_email
            .eq_ignore_ascii_case(requester_email.trim())
        {
            return Err(EngineError::OwnershipMismatch(id));
        }

        let event = Event::BookingCancelled { id };
        self.wal_append(&event).await?;
        apply_to_booking(&mut booking, &event);
        self.notify_booking("booking:cancelled", &booking);
        Ok(booking.clone())
    }

    // ── Shared transition plumbing ───────────────────────────

    /// Status transition with lockstep table side effects: booking lock,
    /// then table locks in sorted id order, then one WAL event applied to
    /// everything before any lock is released.
    async fn transition(
        &self,
        id: Ulid,
        action: &'static str,
        allowed_from: &[BookingStatus],
        make_event: fn(Ulid) -> Event,
    ) -> Result<Booking, EngineError> {
        let b_arc = self
            .store
            .get_booking(&id)
            .ok_or(EngineError::BookingNotFound(id))?;
        let mut booking = b_arc.write_owned().await;
        if !allowed_from.contains(&booking.status) {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                action,
            });
        }

        let mut table_ids = booking.table_ids.clone();
        table_ids.sort();
        let guards = self.lock_tables(&table_ids).await?;

        let event = make_event(id);
        self.wal_append(&event).await?;
        apply_to_booking(&mut booking, &event);
        for mut guard in guards {
            apply_to_table(&mut guard, &booking, &event);
        }
        let name = match event {
            Event::BookingSeated { .. } => "booking:seated",
            Event::BookingCompleted { .. } => "booking:completed",
            Event::BookingNoShow { .. } => "booking:no-show",
            _ => unreachable!(),
        };
        self.notify_booking(name, &booking);
        Ok(booking.clone())
    }

    /// Acquire write locks for the given (sorted, deduped) table ids. Sorted
    /// acquisition is what makes concurrent multi-table confirms deadlock
    /// free.
    async fn lock_tables(
        &self,
        sorted_ids: &[Ulid],
    ) -> Result<Vec<OwnedRwLockWriteGuard<TableState>>, EngineError> {
        let mut guards = Vec::with_capacity(sorted_ids.len());
        for tid in sorted_ids {
            let t = self
                .store
                .get_table(tid)
                .ok_or(EngineError::TableNotFound(*tid))?;
            guards.push(t.write_owned().await);
        }
        Ok(guards)
    }
}

fn validate_table_fields(name: &str, capacity: u32, location: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("table name is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("table name too long"));
    }
    if location.len() > MAX_LOCATION_LEN {
        return Err(EngineError::LimitExceeded("location too long"));
    }
    if capacity == 0 {
        return Err(EngineError::Validation("capacity must be at least 1"));
    }
    if capacity > MAX_TABLE_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    Ok(())
}
