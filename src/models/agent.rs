use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Connection settings for one target database of an agent run
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database kind: `mongo`/`mongodb` or `postgres`/`postgresql`
    #[serde(rename = "type")]
    pub db_type: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    /// MongoDB only: use a `mongodb+srv://` seed-list URI (default true)
    #[serde(default)]
    pub srv: Option<bool>,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("db_type", &self.db_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("srv", &self.srv)
            .finish()
    }
}

/// Request body of `POST /api/db-agent/run`
#[derive(Debug, Clone, Deserialize)]
pub struct AgentRunRequest {
    pub prompt: String,
    pub databases: Vec<DatabaseConfig>,
}

impl AgentRunRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("Prompt cannot be empty".to_string());
        }

        if self.databases.is_empty() {
            return Err("At least one database must be provided".to_string());
        }

        for (idx, db) in self.databases.iter().enumerate() {
            if db.host.trim().is_empty() {
                return Err(format!("Database #{} is missing a host", idx + 1));
            }
        }

        Ok(())
    }
}

/// Outcome of one database's generate-and-execute cycle.
///
/// Exactly one of `rows` (populated) and `error` is meaningful: a failed
/// database carries `query: null`, `rows: []`, `metadata: null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRunResult {
    pub db_type: String,
    pub db_host: String,
    pub query: Option<Value>,
    pub rows: Value,
    pub metadata: Option<Value>,
    pub error: Option<String>,
}

impl DatabaseRunResult {
    pub fn success(db: &DatabaseConfig, query: Value, rows: Value, metadata: Value) -> Self {
        Self {
            db_type: db.db_type.clone(),
            db_host: db.host.clone(),
            query: Some(query),
            rows,
            metadata: Some(metadata),
            error: None,
        }
    }

    pub fn failure(db: &DatabaseConfig, error: impl Into<String>) -> Self {
        Self {
            db_type: db.db_type.clone(),
            db_host: db.host.clone(),
            query: None,
            rows: Value::Array(Vec::new()),
            metadata: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
