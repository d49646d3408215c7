use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input. Dates arrive as `'YYYY-MM-DD'`, times as
/// `'HH:MM'`; both are validated here, before anything touches the engine.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertTable {
        id: Ulid,
        name: String,
        capacity: u32,
        location: String,
    },
    UpdateTable {
        id: Ulid,
        name: Option<String>,
        capacity: Option<u32>,
        location: Option<String>,
        active: Option<bool>,
    },
    SetTableStatus {
        id: Ulid,
        status: TableStatus,
    },
    DeleteTable {
        id: Ulid,
    },
    SelectTables {
        active_only: bool,
    },
    InsertBooking {
        id: Ulid,
        date: NaiveDate,
        start: Min,
        party_size: u32,
        customer_name: String,
        customer_email: String,
        customer_phone: Option<String>,
        duration: Option<Min>,
        source: Option<BookingSource>,
        notes: Option<String>,
    },
    ConfirmBooking {
        id: Ulid,
        table_ids: Vec<Ulid>,
    },
    RejectBooking {
        id: Ulid,
        reason: String,
    },
    SeatBooking {
        id: Ulid,
    },
    CompleteBooking {
        id: Ulid,
    },
    NoShowBooking {
        id: Ulid,
    },
    CancelBooking {
        id: Ulid,
        requester_email: String,
    },
    SelectBookings {
        id: Option<Ulid>,
        date: Option<NaiveDate>,
        status: Option<BookingStatus>,
    },
    SelectAvailability {
        date: NaiveDate,
        time: Min,
        party_size: u32,
        duration: Option<Min>,
        buffer: Option<Min>,
    },
    SelectSuggestions {
        date: NaiveDate,
        time: Min,
        party_size: u32,
        duration: Option<Min>,
    },
    SelectFloorPlan,
    SelectTableStats,
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "tables" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("tables", 3, values.len()));
            }
            Ok(Command::InsertTable {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                capacity: parse_u32(&values[2])?,
                location: if values.len() >= 4 {
                    parse_string_or_null(&values[3])?.unwrap_or_default()
                } else {
                    String::new()
                },
            })
        }
        "bookings" => {
            // (id, date, start_time, party_size, customer_name, customer_email
            //  [, customer_phone, duration_minutes, source, notes])
            if values.len() < 6 {
                return Err(SqlError::WrongArity("bookings", 6, values.len()));
            }
            let source = if values.len() >= 9 {
                match parse_string_or_null(&values[8])? {
                    Some(s) => Some(
                        BookingSource::parse(&s)
                            .ok_or_else(|| SqlError::Parse(format!("bad source: {s}")))?,
                    ),
                    None => None,
                }
            } else {
                None
            };
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                date: parse_date(&values[1])?,
                start: parse_time(&values[2])?,
                party_size: parse_u32(&values[3])?,
                customer_name: parse_string(&values[4])?,
                customer_email: parse_string(&values[5])?,
                customer_phone: if values.len() >= 7 {
                    parse_string_or_null(&values[6])?
                } else {
                    None
                },
                duration: if values.len() >= 8 {
                    parse_min_or_null(&values[7])?
                } else {
                    None
                },
                source,
                notes: if values.len() >= 10 {
                    parse_string_or_null(&values[9])?
                } else {
                    None
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "tables" => Ok(Command::DeleteTable { id }),
        // Bookings are cancelled or rejected, never deleted
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table_name = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    let mut fields: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        fields.push((assignment_column(a)?, &a.value));
    }
    let get = |col: &str| fields.iter().find(|(c, _)| c == col).map(|(_, e)| *e);

    match table_name.as_str() {
        "tables" => {
            if let Some(status_expr) = get("status") {
                if fields.len() > 1 {
                    return Err(SqlError::Unsupported(
                        "status cannot be combined with attribute updates".into(),
                    ));
                }
                let s = parse_string(status_expr)?;
                let status = TableStatus::parse(&s)
                    .ok_or_else(|| SqlError::Parse(format!("bad table status: {s}")))?;
                return Ok(Command::SetTableStatus { id, status });
            }
            let name = get("name").map(parse_string).transpose()?;
            let capacity = get("capacity").map(parse_u32).transpose()?;
            let location = get("location").map(parse_string).transpose()?;
            let active = get("active").map(parse_bool).transpose()?;
            if name.is_none() && capacity.is_none() && location.is_none() && active.is_none() {
                return Err(SqlError::Unsupported("no updatable columns in SET".into()));
            }
            Ok(Command::UpdateTable {
                id,
                name,
                capacity,
                location,
                active,
            })
        }
        "bookings" => {
            let status_expr = get("status").ok_or(SqlError::MissingFilter("status"))?;
            let status = parse_string(status_expr)?;
            match status.as_str() {
                "confirmed" => {
                    let expr = get("table_ids").ok_or(SqlError::MissingFilter("table_ids"))?;
                    let table_ids = parse_ulid_list(expr)?;
                    Ok(Command::ConfirmBooking { id, table_ids })
                }
                "rejected" => {
                    let reason = get("reason").map(parse_string).transpose()?.unwrap_or_default();
                    Ok(Command::RejectBooking { id, reason })
                }
                "seated" => Ok(Command::SeatBooking { id }),
                "completed" => Ok(Command::CompleteBooking { id }),
                "no_show" => Ok(Command::NoShowBooking { id }),
                "cancelled" => {
                    let expr =
                        get("customer_email").ok_or(SqlError::MissingFilter("customer_email"))?;
                    Ok(Command::CancelBooking {
                        id,
                        requester_email: parse_string(expr)?,
                    })
                }
                other => Err(SqlError::Unsupported(format!(
                    "cannot set booking status to {other}"
                ))),
            }
        }
        _ => Err(SqlError::UnknownTable(table_name)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "tables" => {
            let mut active_only = false;
            if let Some(selection) = &select.selection {
                if let Expr::BinaryOp {
                    left,
                    op: ast::BinaryOperator::Eq,
                    right,
                } = selection
                {
                    if expr_column_name(left).as_deref() == Some("active") {
                        active_only = parse_bool(right)?;
                    }
                }
            }
            Ok(Command::SelectTables { active_only })
        }
        "bookings" => {
            let mut filters = BookingFilters::default();
            if let Some(selection) = &select.selection {
                extract_booking_filters(selection, &mut filters)?;
            }
            Ok(Command::SelectBookings {
                id: filters.id,
                date: filters.date,
                status: filters.status,
            })
        }
        "availability" => {
            let mut filters = SlotFilters::default();
            if let Some(selection) = &select.selection {
                extract_slot_filters(selection, &mut filters)?;
            }
            Ok(Command::SelectAvailability {
                date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
                time: filters.time.ok_or(SqlError::MissingFilter("time"))?,
                party_size: filters
                    .party_size
                    .ok_or(SqlError::MissingFilter("party_size"))?,
                duration: filters.duration,
                buffer: filters.buffer,
            })
        }
        "suggestions" => {
            let mut filters = SlotFilters::default();
            if let Some(selection) = &select.selection {
                extract_slot_filters(selection, &mut filters)?;
            }
            Ok(Command::SelectSuggestions {
                date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
                time: filters.time.ok_or(SqlError::MissingFilter("time"))?,
                party_size: filters
                    .party_size
                    .ok_or(SqlError::MissingFilter("party_size"))?,
                duration: filters.duration,
            })
        }
        "floor_plan" => Ok(Command::SelectFloorPlan),
        "table_stats" => Ok(Command::SelectTableStats),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct BookingFilters {
    id: Option<Ulid>,
    date: Option<NaiveDate>,
    status: Option<BookingStatus>,
}

fn extract_booking_filters(expr: &Expr, out: &mut BookingFilters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_booking_filters(left, out)?;
                extract_booking_filters(right, out)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("id") => out.id = Some(parse_ulid(right)?),
                Some("date") => out.date = Some(parse_date(right)?),
                Some("status") => {
                    let s = parse_string(right)?;
                    out.status = Some(
                        BookingStatus::parse(&s)
                            .ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))?,
                    );
                }
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

#[derive(Default)]
struct SlotFilters {
    date: Option<NaiveDate>,
    time: Option<Min>,
    party_size: Option<u32>,
    duration: Option<Min>,
    buffer: Option<Min>,
}

fn extract_slot_filters(expr: &Expr, out: &mut SlotFilters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_slot_filters(left, out)?;
                extract_slot_filters(right, out)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("date") => out.date = Some(parse_date(right)?),
                Some("time") => out.time = Some(parse_time(right)?),
                Some("party_size") => out.party_size = Some(parse_u32(right)?),
                Some("duration_minutes") => out.duration = Some(parse_min(right)?),
                Some("buffer_minutes") => out.buffer = Some(parse_min(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn assignment_column(a: &ast::Assignment) -> Result<String, SqlError> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column in SET".into()))
        }
        _ => Err(SqlError::Parse("unsupported SET target".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_list(expr: &Expr) -> Result<Vec<Ulid>, SqlError> {
    let s = parse_string(expr)?;
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            Ulid::from_string(part).map_err(|e| SqlError::Parse(format!("bad ULID {part}: {e}")))
        })
        .collect()
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

fn parse_time(expr: &Expr) -> Result<Min, SqlError> {
    let s = parse_string(expr)?;
    parse_hhmm(&s).map_err(|e| SqlError::Parse(format!("bad time {s}: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_min(expr: &Expr) -> Result<Min, SqlError> {
    let v = parse_i64_expr(expr)?;
    Min::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of minute range")))
}

fn parse_min_or_null(expr: &Expr) -> Result<Option<Min>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_min(expr).map(Some)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
