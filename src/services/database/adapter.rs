// Connector abstraction shared by the document and relational backends
use crate::api::middleware::AppError;
use crate::models::DatabaseConfig;
use crate::services::database::{DatabaseType, MongoConnector, PostgresConnector};
use serde_json::Value;

/// Session against one target database.
///
/// Lifecycle is `connect` -> (`list_sources` | `execute`)* -> `close`.
/// Instances are never shared between requests.
#[async_trait::async_trait]
pub trait DatabaseConnector: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Open the session and verify the server is reachable
    async fn connect(&mut self) -> Result<(), AppError>;

    /// Collection (document store) or table (relational) names
    async fn list_sources(&self) -> Result<Vec<String>, AppError>;

    /// Run the generator's output (`{"query": ...}`) and return the rows
    async fn execute(&self, generated: &Value, sources: &[String]) -> Result<Value, AppError>;

    /// Release the session. A no-op when never connected.
    async fn close(&mut self) -> Result<(), AppError>;
}

/// Builds a fresh connector for each database of a run
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, db: &DatabaseConfig) -> Result<Box<dyn DatabaseConnector>, AppError>;
}

/// Factory backed by the real drivers
#[derive(Debug, Default, Clone, Copy)]
pub struct DriverConnectorFactory;

impl ConnectorFactory for DriverConnectorFactory {
    fn create(&self, db: &DatabaseConfig) -> Result<Box<dyn DatabaseConnector>, AppError> {
        match DatabaseType::from_str(&db.db_type)? {
            DatabaseType::Mongo => Ok(Box::new(MongoConnector::new(db)?)),
            DatabaseType::Postgres => Ok(Box::new(PostgresConnector::new(db))),
        }
    }
}
