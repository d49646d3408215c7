use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::MaitredAuthSource;
use crate::engine::Engine;
use crate::model::*;
use crate::notify::{BOOKINGS_CHANNEL, TABLES_CHANNEL};
use crate::observability;
use crate::restaurant::RestaurantManager;
use crate::sql::{self, Command};

pub struct MaitredHandler {
    restaurants: Arc<RestaurantManager>,
    query_parser: Arc<MaitredQueryParser>,
}

impl MaitredHandler {
    pub fn new(restaurants: Arc<RestaurantManager>) -> Self {
        Self {
            restaurants,
            query_parser: Arc::new(MaitredQueryParser),
        }
    }

    /// The pgwire database name is the restaurant id — the partition key.
    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.restaurants.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("restaurant error: {e}"),
            )))
        })
    }

    async fn dispatch(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertTable {
                id,
                name,
                capacity,
                location,
            } => {
                engine
                    .create_table(id, name, capacity, location)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateTable {
                id,
                name,
                capacity,
                location,
                active,
            } => {
                engine
                    .update_table(id, name, capacity, location, active)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SetTableStatus { id, status } => {
                engine
                    .set_table_status(id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteTable { id } => {
                engine.delete_table(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectTables { active_only } => {
                let tables = engine.list_tables(active_only).await;
                Ok(vec![table_rows(tables)])
            }
            Command::InsertBooking {
                id,
                date,
                start,
                party_size,
                customer_name,
                customer_email,
                customer_phone,
                duration,
                source,
                notes,
            } => {
                let req = BookingRequest {
                    date,
                    start,
                    end: None,
                    duration,
                    party_size,
                    customer_name,
                    customer_email,
                    customer_phone,
                    source: source.unwrap_or(BookingSource::Online),
                    notes: notes.unwrap_or_default(),
                };
                engine.create_booking(id, req).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::ConfirmBooking { id, table_ids } => {
                engine
                    .confirm_booking(id, table_ids)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::RejectBooking { id, reason } => {
                engine.reject_booking(id, reason).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SeatBooking { id } => {
                engine.seat_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CompleteBooking { id } => {
                engine.complete_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::NoShowBooking { id } => {
                engine.no_show_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CancelBooking {
                id,
                requester_email,
            } => {
                engine
                    .cancel_booking(id, &requester_email)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectBookings { id, date, status } => {
                let bookings = match id {
                    Some(id) => engine.booking_by_id(id).await.into_iter().collect(),
                    None => engine.list_bookings(date, status).await,
                };
                Ok(vec![booking_rows(bookings)?])
            }
            Command::SelectAvailability {
                date,
                time,
                party_size,
                duration,
                buffer,
            } => {
                let tables = engine
                    .check_availability(date, time, party_size, duration, buffer)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![table_rows(tables)])
            }
            Command::SelectSuggestions {
                date,
                time,
                party_size,
                duration,
            } => {
                let plan = engine
                    .suggest_tables(date, time, party_size, duration)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![suggestion_rows(plan)])
            }
            Command::SelectFloorPlan => {
                let tables = engine.floor_plan().await;
                Ok(vec![table_rows(tables)])
            }
            Command::SelectTableStats => {
                let stats = engine.table_stats().await;
                Ok(vec![stats_row(stats)])
            }
            Command::Listen { channel } => {
                if channel != BOOKINGS_CHANNEL && channel != TABLES_CHANNEL {
                    return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected bookings or tables)"),
                    ))));
                }
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

// ── Row schemas ──────────────────────────────────────────────────

fn tables_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("name".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("capacity".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("location".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("active".into(), None, None, Type::BOOL, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("reference".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("date".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start_time".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("end_time".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("party_size".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("customer_name".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("customer_email".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("customer_phone".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("source".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("table_ids".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("notes".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn suggestions_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("table_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("name".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("capacity".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("total_capacity".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("sufficient".into(), None, None, Type::BOOL, FieldFormat::Text),
        FieldInfo::new("message".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn stats_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("total_tables".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("active_tables".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("total_capacity".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("available".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("occupied".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("reserved".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("cleaning".into(), None, None, Type::INT4, FieldFormat::Text),
    ]
}

fn table_rows(tables: Vec<TableInfo>) -> Response {
    let schema = Arc::new(tables_schema());
    let rows: Vec<PgWireResult<_>> = tables
        .into_iter()
        .map(|t| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&t.id.to_string())?;
            encoder.encode_field(&t.name)?;
            encoder.encode_field(&(t.capacity as i32))?;
            encoder.encode_field(&t.location)?;
            encoder.encode_field(&t.active)?;
            encoder.encode_field(&t.status.as_str())?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn booking_rows(bookings: Vec<Booking>) -> PgWireResult<Response> {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let table_ids = b
                .table_ids
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.reference)?;
            encoder.encode_field(&b.date.to_string())?;
            encoder.encode_field(&format_hhmm(b.slot.start))?;
            encoder.encode_field(&format_hhmm(b.slot.end))?;
            encoder.encode_field(&(b.party_size as i32))?;
            encoder.encode_field(&b.customer_name)?;
            encoder.encode_field(&b.customer_email)?;
            encoder.encode_field(&b.customer_phone)?;
            encoder.encode_field(&b.source.as_str())?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&table_ids)?;
            encoder.encode_field(&b.notes)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn suggestion_rows(plan: TablePlan) -> Response {
    let schema = Arc::new(suggestions_schema());
    let total = plan.total_capacity as i32;
    let sufficient = plan.sufficient;
    let message = plan.message;
    let rows: Vec<PgWireResult<_>> = plan
        .tables
        .into_iter()
        .map(|t| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&t.id.to_string())?;
            encoder.encode_field(&t.name)?;
            encoder.encode_field(&(t.capacity as i32))?;
            encoder.encode_field(&total)?;
            encoder.encode_field(&sufficient)?;
            encoder.encode_field(&message)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn stats_row(stats: TableStats) -> Response {
    let schema = Arc::new(stats_schema());
    let rows: Vec<PgWireResult<_>> = vec![stats]
        .into_iter()
        .map(|s| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&(s.total_tables as i32))?;
            encoder.encode_field(&(s.active_tables as i32))?;
            encoder.encode_field(&(s.total_capacity as i32))?;
            encoder.encode_field(&(s.available as i32))?;
            encoder.encode_field(&(s.occupied as i32))?;
            encoder.encode_field(&(s.reserved as i32))?;
            encoder.encode_field(&(s.cleaning as i32))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

#[async_trait]
impl SimpleQueryHandler for MaitredHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.dispatch(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

/// Map a statement to its result schema by parsing it like the executor will.
fn schema_for(stmt: &str) -> Vec<FieldInfo> {
    match sql::parse_sql(stmt) {
        Ok(Command::SelectTables { .. })
        | Ok(Command::SelectAvailability { .. })
        | Ok(Command::SelectFloorPlan) => tables_schema(),
        Ok(Command::SelectBookings { .. }) => bookings_schema(),
        Ok(Command::SelectSuggestions { .. }) => suggestions_schema(),
        Ok(Command::SelectTableStats) => stats_schema(),
        _ => vec![],
    }
}

#[derive(Debug)]
pub struct MaitredQueryParser;

#[async_trait]
impl QueryParser for MaitredQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for MaitredHandler {
    type Statement = String;
    type QueryParser = MaitredQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.dispatch(&engine, cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct MaitredFactory {
    handler: Arc<MaitredHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<MaitredAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl MaitredFactory {
    pub fn new(restaurants: Arc<RestaurantManager>, password: String) -> Self {
        let auth_source = MaitredAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(MaitredHandler::new(restaurants)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for MaitredFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    restaurants: Arc<RestaurantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let factory = Arc::new(MaitredFactory::new(restaurants, password));
    pgwire::tokio::process_socket(socket, tls, factory).await?;
    Ok(())
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    use crate::engine::EngineError::*;
    // SQLSTATE picks: exclusion violation for slot conflicts, unique
    // violation for duplicate ids, invalid parameter for validation, the
    // generic raise_exception for state errors.
    let code = match &e {
        Conflict { .. } => "23P01",
        AlreadyExists(_) => "23505",
        Validation(_) | LimitExceeded(_) => "22023",
        TableNotFound(_) | BookingNotFound(_) => "P0002",
        _ => "P0001",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
