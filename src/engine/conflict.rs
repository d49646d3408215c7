use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::availability::first_conflict;
use super::EngineError;

pub(crate) fn validate_slot(slot: &Slot) -> Result<(), EngineError> {
    if slot.start < 0 || slot.end > MINUTES_PER_DAY {
        return Err(EngineError::Validation("time outside the service day"));
    }
    if slot.start >= slot.end {
        return Err(EngineError::Validation(
            "end time must be after start time; bookings may not span midnight",
        ));
    }
    if slot.duration_min() > MAX_DURATION_MIN {
        return Err(EngineError::LimitExceeded("booking duration too long"));
    }
    Ok(())
}

pub(crate) fn validate_buffer(buffer: Min) -> Result<(), EngineError> {
    if !(0..=MAX_BUFFER_MIN).contains(&buffer) {
        return Err(EngineError::LimitExceeded("buffer out of range"));
    }
    Ok(())
}

/// Reject if any active claim on the table collides with the requested
/// window. Callers hold the table's lock, so a pass here stays valid until
/// the commit that follows it.
pub(crate) fn check_table_free(
    table: &TableState,
    date: NaiveDate,
    want: &Slot,
    buffer: Min,
) -> Result<(), EngineError> {
    match first_conflict(table.claims_on(date), date, want, buffer) {
        Some(claim) => Err(EngineError::Conflict {
            table_id: table.id,
            booking_id: claim.booking_id,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn slot_validation() {
        assert!(validate_slot(&Slot { start: 1080, end: 1200 }).is_ok());
        assert!(validate_slot(&Slot { start: -5, end: 100 }).is_err());
        assert!(validate_slot(&Slot { start: 100, end: 1500 }).is_err());
        assert!(validate_slot(&Slot { start: 1200, end: 1200 }).is_err());
        // 23:30 + 2h wrapped to 01:30 arrives as end < start
        assert!(validate_slot(&Slot { start: 1410, end: 90 }).is_err());
        assert!(validate_slot(&Slot { start: 0, end: MAX_DURATION_MIN + 1 }).is_err());
    }

    #[test]
    fn buffer_validation() {
        assert!(validate_buffer(0).is_ok());
        assert!(validate_buffer(DEFAULT_BUFFER_MIN).is_ok());
        assert!(validate_buffer(-1).is_err());
        assert!(validate_buffer(MAX_BUFFER_MIN + 1).is_err());
    }

    #[test]
    fn conflict_error_names_table_and_booking() {
        let mut ts = TableState::new(Ulid::new(), "T1".into(), 4, String::new());
        let other = Ulid::new();
        let d = date("2024-06-01");
        ts.insert_claim(Claim {
            booking_id: other,
            date: d,
            slot: Slot::new(1080, 1200),
        });

        let err = check_table_free(&ts, d, &Slot::new(1170, 1230), 15).unwrap_err();
        match err {
            EngineError::Conflict {
                table_id,
                booking_id,
            } => {
                assert_eq!(table_id, ts.id);
                assert_eq!(booking_id, other);
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn free_table_passes() {
        let ts = TableState::new(Ulid::new(), "T1".into(), 4, String::new());
        assert!(check_table_free(&ts, date("2024-06-01"), &Slot::new(1080, 1200), 15).is_ok());
    }
}
