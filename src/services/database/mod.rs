// Database connectors: one live session per database per agent run
pub mod adapter;
pub mod mongo;
pub mod postgresql;

pub use adapter::{ConnectorFactory, DatabaseConnector, DriverConnectorFactory};
pub use mongo::{MongoConnector, MongoStore};
pub use postgresql::PostgresConnector;

use crate::api::middleware::AppError;

/// Database kinds an agent run can target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    Mongo,
    Postgres,
}

impl DatabaseType {
    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s.trim().to_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(DatabaseType::Mongo),
            "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            _ => Err(AppError::Validation(format!("Unsupported database type: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::Mongo => "mongo",
            DatabaseType::Postgres => "postgres",
        }
    }

    /// Kind handed to the plan generator
    pub fn generator_kind(&self) -> &'static str {
        match self {
            DatabaseType::Mongo => "mongo",
            DatabaseType::Postgres => "sql",
        }
    }

    /// Key under which listed sources are reported in a result's metadata
    pub fn source_label(&self) -> &'static str {
        match self {
            DatabaseType::Mongo => "collections",
            DatabaseType::Postgres => "tables",
        }
    }
}
