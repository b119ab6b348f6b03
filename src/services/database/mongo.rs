// MongoDB connector: owns the client session and runs generated plans
// through the query plan executor.
use crate::api::middleware::AppError;
use crate::models::{DatabaseConfig, QueryPlan};
use crate::services::database::adapter::DatabaseConnector;
use crate::services::database::DatabaseType;
use crate::services::document::{DocumentStore, QueryPlanExecutor, UpdateOutcome};
use futures::{StreamExt, TryStreamExt};
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Client, Database};
use serde_json::Value;
use url::Url;

enum SessionState {
    Disconnected,
    Connected { client: Client, database: Database },
    Closed,
}

pub struct MongoConnector {
    uri: String,
    database_name: String,
    state: SessionState,
    executor: QueryPlanExecutor,
}

impl MongoConnector {
    pub fn new(db: &DatabaseConfig) -> Result<Self, AppError> {
        let database_name = db
            .database
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                AppError::Validation("MongoDB connections require a 'database' name".to_string())
            })?
            .to_string();

        Ok(Self {
            uri: Self::build_uri(db)?,
            database_name,
            state: SessionState::Disconnected,
            executor: QueryPlanExecutor::new(),
        })
    }

    /// Connection string for `db`.
    ///
    /// A host that already is a `mongodb://` or `mongodb+srv://` URI is used
    /// verbatim. Otherwise a seed-list URI is built unless `srv` is false, in
    /// which case the host and optional port are addressed directly.
    pub fn build_uri(db: &DatabaseConfig) -> Result<String, AppError> {
        let host = db.host.trim();
        if host.starts_with("mongodb://") || host.starts_with("mongodb+srv://") {
            return Ok(host.to_string());
        }

        let base = match (db.srv.unwrap_or(true), db.port) {
            (true, _) => format!("mongodb+srv://{}/", host),
            (false, Some(port)) => format!("mongodb://{}:{}/", host, port),
            (false, None) => format!("mongodb://{}/", host),
        };

        let mut url = Url::parse(&base)
            .map_err(|e| AppError::Validation(format!("Invalid MongoDB host '{}': {}", host, e)))?;

        if let Some(user) = db.user.as_deref().filter(|user| !user.is_empty()) {
            // set_username/set_password percent-encode the userinfo
            url.set_username(user)
                .map_err(|_| AppError::Validation("Invalid MongoDB username".to_string()))?;
            url.set_password(db.password.as_deref())
                .map_err(|_| AppError::Validation("Invalid MongoDB password".to_string()))?;
        }

        Ok(url.to_string())
    }

    /// Connection string with the password replaced, for logging
    fn mask_credentials(uri: &str) -> String {
        match Url::parse(uri) {
            Ok(mut parsed) => {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("***"));
                }
                parsed.to_string()
            }
            Err(_) => "[invalid-uri]".to_string(),
        }
    }

    fn database(&self) -> Result<&Database, AppError> {
        match &self.state {
            SessionState::Connected { database, .. } => Ok(database),
            SessionState::Disconnected => {
                Err(AppError::Connection("MongoDB session is not connected".to_string()))
            }
            SessionState::Closed => {
                Err(AppError::Connection("MongoDB session is already closed".to_string()))
            }
        }
    }
}

#[async_trait::async_trait]
impl DatabaseConnector for MongoConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mongo
    }

    async fn connect(&mut self) -> Result<(), AppError> {
        if matches!(self.state, SessionState::Connected { .. }) {
            return Ok(());
        }

        tracing::info!("Connecting to MongoDB at {}", Self::mask_credentials(&self.uri));

        let client = Client::with_uri_str(&self.uri)
            .await
            .map_err(|e| AppError::Connection(format!("Failed to create MongoDB client: {}", e)))?;
        let database = client.database(&self.database_name);

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| AppError::Connection(format!("MongoDB server is unreachable: {}", e)))?;

        tracing::debug!("MongoDB ping succeeded for database '{}'", self.database_name);
        self.state = SessionState::Connected { client, database };
        Ok(())
    }

    async fn list_sources(&self) -> Result<Vec<String>, AppError> {
        let mut names = self.database()?.list_collection_names().await?;
        names.sort();
        Ok(names)
    }

    async fn execute(&self, generated: &Value, sources: &[String]) -> Result<Value, AppError> {
        let store = MongoStore::new(self.database()?.clone());
        let plan = QueryPlan::from_generated(generated)?;
        let results = self.executor.execute(&store, &plan, sources).await?;
        Ok(Value::Object(results))
    }

    async fn close(&mut self) -> Result<(), AppError> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Connected { client, .. } => {
                client.shutdown().await;
                tracing::debug!("MongoDB session for '{}' closed", self.database_name);
            }
            SessionState::Disconnected => self.state = SessionState::Disconnected,
            SessionState::Closed => {}
        }
        Ok(())
    }
}

/// DocumentStore over a live MongoDB database handle
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

#[async_trait::async_trait]
impl DocumentStore for MongoStore {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        limit: usize,
    ) -> Result<Vec<Document>, AppError> {
        let cursor = self
            .collection(collection)
            .find(filter)
            .limit(limit as i64)
            .await?;
        Ok(cursor.take(limit).try_collect::<Vec<Document>>().await?)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, AppError> {
        Ok(self.collection(collection).find_one(filter).await?)
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> Result<u64, AppError> {
        Ok(self.collection(collection).count_documents(filter).await?)
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
    ) -> Result<Vec<Bson>, AppError> {
        Ok(self.collection(collection).distinct(field, filter).await?)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        limit: usize,
    ) -> Result<Vec<Document>, AppError> {
        let cursor = self.collection(collection).aggregate(pipeline).await?;
        Ok(cursor.take(limit).try_collect::<Vec<Document>>().await?)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson, AppError> {
        let result = self.collection(collection).insert_one(document).await?;
        Ok(result.inserted_id)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<Bson>, AppError> {
        let result = self.collection(collection).insert_many(documents).await?;
        // The driver keys ids by input position
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(idx, _)| *idx);
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome, AppError> {
        let result = self
            .collection(collection)
            .update_many(filter, update)
            .await?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64, AppError> {
        let result = self.collection(collection).delete_many(filter).await?;
        Ok(result.deleted_count)
    }
}
