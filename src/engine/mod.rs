mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{first_conflict, plan_tables};
pub use error::EngineError;
pub use store::Store;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{NotifyHub, BOOKINGS_CHANNEL, TABLES_CHANNEL};
use crate::wal::Wal;

pub type SharedTableState = Arc<RwLock<TableState>>;
pub type SharedBooking = Arc<RwLock<Booking>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// Booking/table engine for one restaurant. The restaurant id is the
/// partition key one level up (see `restaurant::RestaurantManager`); nothing
/// in here can see another restaurant's state.
pub struct Engine {
    pub store: Store,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Terminal bookings older than this many days are dropped at compaction.
    retention_days: u64,
}

/// Apply a lifecycle event to the booking record (no locking — caller holds
/// the lock, or owns the record exclusively during replay).
fn apply_to_booking(b: &mut Booking, event: &Event) {
    match event {
        Event::BookingConfirmed { table_ids, .. } => {
            b.status = BookingStatus::Confirmed;
            b.table_ids = table_ids.clone();
        }
        Event::BookingRejected { reason, .. } => {
            b.status = BookingStatus::Cancelled;
            if b.notes.is_empty() {
                b.notes = format!("rejected: {reason}");
            } else {
                b.notes = format!("{}; rejected: {reason}", b.notes);
            }
        }
        Event::BookingSeated { .. } => b.status = BookingStatus::Seated,
        Event::BookingCompleted { .. } => b.status = BookingStatus::Completed,
        Event::BookingNoShow { .. } => b.status = BookingStatus::NoShow,
        Event::BookingCancelled { .. } => b.status = BookingStatus::Cancelled,
        _ => {}
    }
}

/// Apply a lifecycle event's side effects to one assigned table. The booking
/// has already had `apply_to_booking` run for the same event.
fn apply_to_table(ts: &mut TableState, b: &Booking, event: &Event) {
    match event {
        Event::BookingConfirmed { .. } => {
            ts.insert_claim(Claim {
                booking_id: b.id,
                date: b.date,
                slot: b.slot,
            });
            ts.status = TableStatus::Reserved;
        }
        Event::BookingSeated { .. } => ts.status = TableStatus::Occupied,
        Event::BookingCompleted { .. } | Event::BookingNoShow { .. } => {
            ts.remove_claims_for(b.id);
            ts.status = TableStatus::Available;
        }
        _ => {}
    }
}

/// Extract the booking id from a lifecycle event.
fn event_booking_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingConfirmed { id, .. }
        | Event::BookingRejected { id, .. }
        | Event::BookingSeated { id }
        | Event::BookingCompleted { id }
        | Event::BookingNoShow { id }
        | Event::BookingCancelled { id } => Some(*id),
        _ => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, retention_days: u64) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Store::new(),
            wal_tx,
            notify,
            retention_days,
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/
        // try_write always succeed instantly (no contention). Never use
        // blocking_read/blocking_write here because this may run inside an
        // async context (lazy restaurant creation).
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::TableCreated {
                id,
                name,
                capacity,
                location,
                active,
                status,
            } => {
                let mut ts = TableState::new(*id, name.clone(), *capacity, location.clone());
                ts.active = *active;
                ts.status = *status;
                self.store.insert_table(*id, Arc::new(RwLock::new(ts)));
            }
            Event::TableUpdated {
                id,
                name,
                capacity,
                location,
                active,
            } => {
                if let Some(t) = self.store.get_table(id) {
                    let mut guard = t.try_write().expect("replay: uncontended write");
                    guard.name = name.clone();
                    guard.capacity = *capacity;
                    guard.location = location.clone();
                    guard.active = *active;
                }
            }
            Event::TableStatusSet { id, status } => {
                if let Some(t) = self.store.get_table(id) {
                    let mut guard = t.try_write().expect("replay: uncontended write");
                    guard.status = *status;
                }
            }
            Event::TableDeleted { id } => {
                self.store.remove_table(id);
            }
            Event::BookingCreated { booking } => {
                self.store
                    .insert_booking(booking.id, Arc::new(RwLock::new(booking.clone())));
                // Compacted snapshots carry confirmed/seated bookings whose
                // claims must be rebuilt; a live-log create is always pending
                // with no tables, so this loop is empty for it.
                if matches!(
                    booking.status,
                    BookingStatus::Confirmed | BookingStatus::Seated
                ) {
                    for tid in &booking.table_ids {
                        if let Some(t) = self.store.get_table(tid) {
                            let mut guard = t.try_write().expect("replay: uncontended write");
                            guard.insert_claim(Claim {
                                booking_id: booking.id,
                                date: booking.date,
                                slot: booking.slot,
                            });
                        }
                    }
                }
            }
            lifecycle => {
                let Some(id) = event_booking_id(lifecycle) else {
                    return;
                };
                let Some(b_arc) = self.store.get_booking(&id) else {
                    return;
                };
                let mut b = b_arc.try_write().expect("replay: uncontended write");
                apply_to_booking(&mut b, lifecycle);
                for tid in b.table_ids.clone() {
                    if let Some(t_arc) = self.store.get_table(&tid) {
                        let mut t = t_arc.try_write().expect("replay: uncontended write");
                        apply_to_table(&mut t, &b, lifecycle);
                    }
                }
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_table(&self, id: &Ulid) -> Option<SharedTableState> {
        self.store.get_table(id)
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<SharedBooking> {
        self.store.get_booking(id)
    }

    pub(super) fn notify_booking(&self, event: &'static str, booking: &Booking) {
        self.notify.send(BOOKINGS_CHANNEL, event, booking);
    }

    pub(super) fn notify_table(&self, table: &TableState) {
        self.notify
            .send(TABLES_CHANNEL, "table:updated", &TableRow::from(table));
    }

    /// Compact the WAL down to a snapshot of current state: one TableCreated
    /// per table, one BookingCreated per retained booking. Terminal bookings
    /// past the retention window are dropped from the log and the store.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let cutoff = chrono::Utc::now()
            .date_naive()
            .checked_sub_days(chrono::Days::new(self.retention_days))
            .unwrap_or(chrono::NaiveDate::MIN);

        let mut events = Vec::new();

        for id in self.store.table_ids() {
            if let Some(t) = self.store.get_table(&id) {
                let guard = t.read().await;
                events.push(Event::TableCreated {
                    id: guard.id,
                    name: guard.name.clone(),
                    capacity: guard.capacity,
                    location: guard.location.clone(),
                    active: guard.active,
                    status: guard.status,
                });
            }
        }

        let mut stale = Vec::new();
        for id in self.store.booking_ids() {
            if let Some(b) = self.store.get_booking(&id) {
                let guard = b.read().await;
                if guard.status.is_terminal() && guard.date < cutoff {
                    stale.push(id);
                    continue;
                }
                events.push(Event::BookingCreated {
                    booking: guard.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        // Snapshot written without them — safe to forget in memory too.
        for id in stale {
            self.store.remove_booking(&id);
        }
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Serializable projection of a table for outbound notifications.
#[derive(Debug, serde::Serialize)]
pub struct TableRow {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub location: String,
    pub active: bool,
    pub status: &'static str,
}

impl From<&TableState> for TableRow {
    fn from(ts: &TableState) -> Self {
        Self {
            id: ts.id,
            name: ts.name.clone(),
            capacity: ts.capacity,
            location: ts.location.clone(),
            active: ts.active,
            status: ts.status.as_str(),
        }
    }
}
