// Agent orchestration: for every requested database, list its sources, ask
// the generator for a plan, execute it and record the outcome. Databases run
// one after another and a failure is confined to its own record.
use crate::api::middleware::AppError;
use crate::models::{AgentRunRequest, DatabaseConfig, DatabaseRunResult};
use crate::services::database::{ConnectorFactory, DatabaseConnector};
use crate::services::llm_service::PlanGenerator;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone)]
pub struct AgentService {
    generator: Arc<dyn PlanGenerator>,
    connectors: Arc<dyn ConnectorFactory>,
}

impl AgentService {
    pub fn new(generator: Arc<dyn PlanGenerator>, connectors: Arc<dyn ConnectorFactory>) -> Self {
        Self {
            generator,
            connectors,
        }
    }

    /// One result per requested database, in request order
    pub async fn run(&self, request: &AgentRunRequest) -> Vec<DatabaseRunResult> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("agent_run", %run_id, databases = request.databases.len());

        async {
            tracing::info!("Starting agent run");
            let mut results = Vec::with_capacity(request.databases.len());
            for db in &request.databases {
                results.push(self.run_database(&request.prompt, db).await);
            }
            let failed = results.iter().filter(|r| !r.is_success()).count();
            tracing::info!("Agent run finished: {} succeeded, {} failed", results.len() - failed, failed);
            results
        }
        .instrument(span)
        .await
    }

    async fn run_database(&self, prompt: &str, db: &DatabaseConfig) -> DatabaseRunResult {
        let span = tracing::info_span!("database", db_type = %db.db_type, host = %db.host);
        match self.try_run_database(prompt, db).instrument(span).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Database {} ({}) failed: {}", db.host, db.db_type, e);
                DatabaseRunResult::failure(db, e.to_string())
            }
        }
    }

    async fn try_run_database(
        &self,
        prompt: &str,
        db: &DatabaseConfig,
    ) -> Result<DatabaseRunResult, AppError> {
        let mut connector = self.connectors.create(db)?;
        connector.connect().await?;

        let outcome = self.generate_and_execute(connector.as_ref(), prompt, db).await;

        // The session is released whatever the outcome; the primary error wins
        if let Err(e) = connector.close().await {
            tracing::warn!("Failed to close session for {}: {}", db.host, e);
        }

        outcome
    }

    async fn generate_and_execute(
        &self,
        connector: &dyn DatabaseConnector,
        prompt: &str,
        db: &DatabaseConfig,
    ) -> Result<DatabaseRunResult, AppError> {
        let db_type = connector.database_type();
        let sources = connector.list_sources().await?;
        tracing::debug!("Available {}: {:?}", db_type.source_label(), sources);

        let generated = self
            .generator
            .generate(db_type.generator_kind(), prompt, &sources)
            .await?;
        tracing::debug!("Generated plan: {}", generated);

        let rows = connector.execute(&generated, &sources).await?;
        let mut metadata = Map::new();
        metadata.insert(db_type.source_label().to_string(), json!(sources));

        Ok(DatabaseRunResult::success(db, generated, rows, Value::Object(metadata)))
    }
}
