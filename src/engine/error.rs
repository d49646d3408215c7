use ulid::Ulid;

use crate::model::BookingStatus;

/// Every precondition failure gets its own variant so callers can render
/// specific feedback instead of a generic failure.
#[derive(Debug)]
pub enum EngineError {
    TableNotFound(Ulid),
    BookingNotFound(Ulid),
    AlreadyExists(Ulid),
    TableInactive(Ulid),
    /// Table still claimed by a confirmed or seated booking.
    TableInUse(Ulid),
    InvalidTransition {
        from: BookingStatus,
        action: &'static str,
    },
    InsufficientCapacity {
        party_size: u32,
        capacity: u32,
    },
    /// The proposed table already has an overlapping active booking.
    Conflict {
        table_id: Ulid,
        booking_id: Ulid,
    },
    /// Cancel requested by someone other than the booking's customer.
    OwnershipMismatch(Ulid),
    Validation(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::TableNotFound(id) => {
                write!(f, "no such table in this restaurant: {id}")
            }
            EngineError::BookingNotFound(id) => write!(f, "no such booking: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::TableInactive(id) => write!(f, "table {id} is not active"),
            EngineError::TableInUse(id) => {
                write!(f, "table {id} is still referenced by an active booking")
            }
            EngineError::InvalidTransition { from, action } => {
                write!(f, "cannot {action} a {} booking", from.as_str())
            }
            EngineError::InsufficientCapacity {
                party_size,
                capacity,
            } => write!(
                f,
                "party of {party_size} exceeds assigned capacity {capacity}"
            ),
            EngineError::Conflict {
                table_id,
                booking_id,
            } => write!(
                f,
                "table {table_id} has an overlapping booking: {booking_id}"
            ),
            EngineError::OwnershipMismatch(id) => {
                write!(f, "email does not match the customer on booking {id}")
            }
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
