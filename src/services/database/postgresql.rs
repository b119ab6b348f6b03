// PostgreSQL connector: one un-pooled session per database per run
use crate::api::middleware::AppError;
use crate::models::DatabaseConfig;
use crate::services::database::adapter::DatabaseConnector;
use crate::services::database::DatabaseType;
use crate::services::document::normalizer::parse_iso_datetime;
use crate::validation::{StatementClassifier, StatementKind};
use bytes::BytesMut;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Map, Number, Value};
use std::error::Error;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};

const DEFAULT_PORT: u16 = 5432;
const CONNECT_TIMEOUT_SECS: u64 = 10;

enum SessionState {
    Disconnected,
    Connected {
        client: Client,
        connection: JoinHandle<()>,
    },
    Closed,
}

pub struct PostgresConnector {
    config: tokio_postgres::Config,
    state: SessionState,
}

impl PostgresConnector {
    pub fn new(db: &DatabaseConfig) -> Self {
        let mut config = tokio_postgres::Config::new();
        config
            .host(db.host.trim())
            .port(db.port.unwrap_or(DEFAULT_PORT))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS));
        if let Some(user) = db.user.as_deref() {
            config.user(user);
        }
        if let Some(password) = db.password.as_deref() {
            config.password(password);
        }
        if let Some(database) = db.database.as_deref() {
            config.dbname(database);
        }

        Self {
            config,
            state: SessionState::Disconnected,
        }
    }

    fn client(&self) -> Result<&Client, AppError> {
        match &self.state {
            SessionState::Connected { client, .. } => Ok(client),
            SessionState::Disconnected => {
                Err(AppError::Connection("PostgreSQL session is not connected".to_string()))
            }
            SessionState::Closed => {
                Err(AppError::Connection("PostgreSQL session is already closed".to_string()))
            }
        }
    }

    async fn run(&self, payload: SqlPayload) -> Result<Value, AppError> {
        let client = self.client()?;
        let statement = client.prepare(&payload.query).await?;

        if payload.params.len() != statement.params().len() {
            return Err(AppError::Validation(format!(
                "SQL statement expects {} parameter(s), got {}",
                statement.params().len(),
                payload.params.len()
            )));
        }

        let params: Vec<JsonParam> = payload.params.into_iter().map(JsonParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        match StatementClassifier::classify(&payload.query, payload.action.as_deref()) {
            StatementKind::Read => {
                let rows = client.query(&statement, &refs).await?;
                tracing::debug!("SQL read returned {} row(s)", rows.len());
                Ok(Value::Array(rows.iter().map(row_to_json).collect()))
            }
            StatementKind::Write => {
                let affected = client.execute(&statement, &refs).await?;
                let status = command_status(&payload.query, affected);
                Ok(json!({
                    "status": status,
                    "affected_rows": parse_affected_rows(&status),
                }))
            }
        }
    }
}

#[async_trait::async_trait]
impl DatabaseConnector for PostgresConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(&mut self) -> Result<(), AppError> {
        if matches!(self.state, SessionState::Connected { .. }) {
            return Ok(());
        }

        tracing::info!(
            "Connecting to PostgreSQL at {:?}:{:?}",
            self.config.get_hosts(),
            self.config.get_ports()
        );

        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| AppError::Connection(format!("Failed to connect to PostgreSQL: {}", e)))?;

        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        self.state = SessionState::Connected { client, connection };
        Ok(())
    }

    async fn list_sources(&self) -> Result<Vec<String>, AppError> {
        let rows = self
            .client()?
            .query(
                r#"
                SELECT table_name
                FROM information_schema.tables
                WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
                ORDER BY table_name
                "#,
                &[],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to get tables: {}", e)))?;

        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    async fn execute(&self, generated: &Value, _sources: &[String]) -> Result<Value, AppError> {
        let payload = SqlPayload::from_generated(generated)?;
        tracing::debug!("Executing SQL: {}", payload.query);
        self.run(payload).await
    }

    async fn close(&mut self) -> Result<(), AppError> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Connected { client, connection } => {
                // Dropping the client ends the connection task
                drop(client);
                connection
                    .await
                    .map_err(|e| AppError::Internal(format!("PostgreSQL connection task failed: {}", e)))?;
                tracing::debug!("PostgreSQL session closed");
            }
            SessionState::Disconnected => self.state = SessionState::Disconnected,
            SessionState::Closed => {}
        }
        Ok(())
    }
}

/// SQL to run: a bare statement or `{query, params, action}`
#[derive(Debug, Clone, PartialEq)]
pub struct SqlPayload {
    pub query: String,
    pub params: Vec<Value>,
    pub action: Option<String>,
}

impl SqlPayload {
    /// Payload from the generator's object. A string `query` is read together
    /// with the sibling `params` and `action`; an object `query` carries its own.
    pub fn from_generated(generated: &Value) -> Result<Self, AppError> {
        match generated.get("query") {
            Some(nested @ Value::Object(_)) => Self::from_value(nested),
            _ => Self::from_value(generated),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, AppError> {
        match value {
            Value::String(sql) => Ok(Self {
                query: sql.clone(),
                params: Vec::new(),
                action: None,
            }),
            Value::Object(map) => {
                let query = map
                    .get("query")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AppError::Validation("SQL query must be a string".to_string()))?
                    .to_string();
                let params = match map.get("params") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(params)) => params.clone(),
                    Some(single) => vec![single.clone()],
                };
                let action = map
                    .get("action")
                    .and_then(Value::as_str)
                    .map(str::to_lowercase);
                Ok(Self {
                    query,
                    params,
                    action,
                })
            }
            other => Err(AppError::Validation(format!(
                "Unsupported SQL payload: {}",
                other
            ))),
        }
    }
}

/// Status line in the server's `CommandComplete` format, e.g. `INSERT 0 3`
pub fn command_status(sql: &str, affected: u64) -> String {
    let verb = sql
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .find(|word| !word.is_empty())
        .unwrap_or("EXECUTE")
        .to_uppercase();
    match verb.as_str() {
        "INSERT" => format!("INSERT 0 {}", affected),
        _ => format!("{} {}", verb, affected),
    }
}

/// Trailing numeric token of a command status; 0 when there is none
pub fn parse_affected_rows(status: &str) -> u64 {
    status
        .split_whitespace()
        .last()
        .and_then(|token| token.parse().ok())
        .unwrap_or(0)
}

fn cell<'a, T, F>(row: &'a Row, idx: usize, convert: F) -> Value
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(v)) => convert(v),
        Ok(None) => Value::Null,
        Err(_) => json!(format!("<{}>", row.columns()[idx].type_().name())),
    }
}

/// NUMERIC as a JSON number when that is exact, otherwise its decimal text
fn decimal_to_json(value: Decimal) -> Value {
    let value = value.normalize();
    if value.scale() == 0 {
        if let Some(int) = value.to_i64() {
            return json!(int);
        }
    }

    let text = value.to_string();
    match value.to_f64().and_then(Number::from_f64) {
        Some(number) if number.to_string() == text => Value::Number(number),
        _ => Value::String(text),
    }
}

fn row_to_json(row: &Row) -> Value {
    let mut object = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::BOOL => cell::<bool, _>(row, idx, |v| json!(v)),
            Type::INT2 => cell::<i16, _>(row, idx, |v| json!(v)),
            Type::INT4 => cell::<i32, _>(row, idx, |v| json!(v)),
            Type::INT8 => cell::<i64, _>(row, idx, |v| json!(v)),
            Type::OID => cell::<u32, _>(row, idx, |v| json!(v)),
            Type::FLOAT4 => cell::<f32, _>(row, idx, |v| json!(v)),
            Type::FLOAT8 => cell::<f64, _>(row, idx, |v| json!(v)),
            Type::JSON | Type::JSONB => cell::<Value, _>(row, idx, |v| v),
            Type::UUID => cell::<uuid::Uuid, _>(row, idx, |v| json!(v.to_string())),
            Type::TIMESTAMPTZ => cell::<chrono::DateTime<chrono::Utc>, _>(row, idx, |v| {
                json!(v.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
            }),
            Type::TIMESTAMP => cell::<chrono::NaiveDateTime, _>(row, idx, |v| {
                json!(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }),
            Type::DATE => cell::<chrono::NaiveDate, _>(row, idx, |v| json!(v.to_string())),
            Type::NUMERIC => cell::<Decimal, _>(row, idx, decimal_to_json),
            _ => cell::<String, _>(row, idx, |v| json!(v)),
        };
        object.insert(column.name().to_string(), value);
    }
    Value::Object(object)
}

type BoxError = Box<dyn Error + Sync + Send>;

/// A JSON parameter encoded as whatever type the server inferred for its slot
#[derive(Debug)]
struct JsonParam(Value);

impl JsonParam {
    fn as_i64(&self) -> Result<i64, BoxError> {
        match &self.0 {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| format!("{} is not an integer", n).into()),
            Value::String(s) => Ok(s.trim().parse()?),
            Value::Bool(b) => Ok(i64::from(*b)),
            other => Err(format!("cannot bind {} as an integer", other).into()),
        }
    }

    fn as_f64(&self) -> Result<f64, BoxError> {
        match &self.0 {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| format!("{} is not a number", n).into()),
            Value::String(s) => Ok(s.trim().parse()?),
            other => Err(format!("cannot bind {} as a number", other).into()),
        }
    }

    fn as_bool(&self) -> Result<bool, BoxError> {
        match &self.0 {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => Ok(s.trim().parse()?),
            Value::Number(n) => Ok(n.as_i64().is_some_and(|n| n != 0)),
            other => Err(format!("cannot bind {} as a boolean", other).into()),
        }
    }

    /// Same formats the document normalizer accepts; naive values are UTC
    fn as_timestamp(&self) -> Result<chrono::DateTime<chrono::Utc>, BoxError> {
        let text = self.as_text();
        parse_iso_datetime(&text).ok_or_else(|| format!("'{}' is not a timestamp", text).into())
    }

    fn as_text(&self) -> String {
        match &self.0 {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl ToSql for JsonParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.0.is_null() {
            return Ok(IsNull::Yes);
        }

        match *ty {
            Type::BOOL => self.as_bool()?.to_sql(ty, out),
            Type::INT2 => i16::try_from(self.as_i64()?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(self.as_i64()?)?.to_sql(ty, out),
            Type::INT8 => self.as_i64()?.to_sql(ty, out),
            Type::FLOAT4 => (self.as_f64()? as f32).to_sql(ty, out),
            Type::FLOAT8 => self.as_f64()?.to_sql(ty, out),
            Type::JSON | Type::JSONB => self.0.to_sql(ty, out),
            Type::UUID => uuid::Uuid::parse_str(&self.as_text())?.to_sql(ty, out),
            Type::TIMESTAMPTZ => self.as_timestamp()?.to_sql(ty, out),
            Type::TIMESTAMP => self.as_timestamp()?.naive_utc().to_sql(ty, out),
            Type::NUMERIC => self.as_text().trim().parse::<Decimal>()?.to_sql(ty, out),
            Type::DATE => self.as_text().parse::<chrono::NaiveDate>()?.to_sql(ty, out),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                self.as_text().to_sql(ty, out)
            }
            _ => Err(format!("unsupported parameter type {}", ty.name()).into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
