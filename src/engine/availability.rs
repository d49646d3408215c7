use chrono::NaiveDate;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Find the first claim on a table that collides with a requested window.
///
/// The buffer widens the *existing* booking's window on both sides (turnover
/// time around a seated party); the incoming request is compared unbuffered,
/// so a request ending exactly when a booking starts conflicts only once
/// `buffer > 0`.
pub fn first_conflict<'a>(
    claims: &'a [Claim],
    date: NaiveDate,
    want: &Slot,
    buffer: Min,
) -> Option<&'a Claim> {
    // Claims are sorted by (date, start); callers usually pass the one-date
    // slice from `TableState::claims_on`, but a full scan is still correct.
    claims
        .iter()
        .filter(|c| c.date == date)
        .find(|c| c.slot.buffered(buffer).overlaps(want))
}

/// Greedy smallest-first packing: accumulate tables until combined capacity
/// covers the party. Minimizes wasted seats at the cost of possibly using
/// more tables than largest-first would.
pub fn plan_tables(mut available: Vec<TableInfo>, party_size: u32) -> TablePlan {
    if available.is_empty() {
        return TablePlan {
            tables: Vec::new(),
            total_capacity: 0,
            sufficient: false,
            message: Some("no tables are available for the requested time".into()),
        };
    }

    available.sort_by_key(|t| (t.capacity, t.id));

    let mut chosen = Vec::new();
    let mut total = 0u32;
    for table in available {
        if total >= party_size {
            break;
        }
        total += table.capacity;
        chosen.push(table);
    }

    let sufficient = total >= party_size;
    TablePlan {
        tables: chosen,
        total_capacity: total,
        sufficient,
        message: if sufficient {
            None
        } else {
            Some(format!(
                "available tables seat {total} of {party_size}; not enough capacity"
            ))
        },
    }
}
