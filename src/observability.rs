use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "maitred_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "maitred_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "maitred_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "maitred_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "maitred_connections_rejected_total";

/// Gauge: number of active restaurants (loaded engines).
pub const RESTAURANTS_ACTIVE: &str = "maitred_restaurants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "maitred_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "maitred_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertTable { .. } => "insert_table",
        Command::UpdateTable { .. } => "update_table",
        Command::SetTableStatus { .. } => "set_table_status",
        Command::DeleteTable { .. } => "delete_table",
        Command::SelectTables { .. } => "select_tables",
        Command::InsertBooking { .. } => "insert_booking",
        Command::ConfirmBooking { .. } => "confirm_booking",
        Command::RejectBooking { .. } => "reject_booking",
        Command::SeatBooking { .. } => "seat_booking",
        Command::CompleteBooking { .. } => "complete_booking",
        Command::NoShowBooking { .. } => "no_show_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSuggestions { .. } => "select_suggestions",
        Command::SelectFloorPlan => "select_floor_plan",
        Command::SelectTableStats => "select_table_stats",
        Command::Listen { .. } => "listen",
    }
}
