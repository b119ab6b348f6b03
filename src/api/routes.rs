use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::handlers::agent::{self, AppState};
use crate::api::middleware::AppError;
use crate::config::{Config, CorsConfig};
use crate::services::database::DriverConnectorFactory;
use crate::services::{AgentService, LlmService};

/// Create router with application state wired to the real drivers and LLM
pub fn create_router_with_state(config: &Config) -> Result<Router, AppError> {
    let generator = Arc::new(LlmService::new(&config.llm)?);
    let agent = AgentService::new(generator, Arc::new(DriverConnectorFactory));

    Ok(router(AppState { agent }, &config.cors))
}

pub fn router(state: AppState, cors: &CorsConfig) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/db-agent/run", post(agent::run_agent))
        .layer(cors_layer(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::models::DatabaseRunResult;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let llm = LlmConfig {
            api_base: "http://127.0.0.1:9/v1".to_string(),
            api_key: None,
            model: "gpt-4".to_string(),
            temperature: 0.0,
            timeout_secs: 5,
            max_concurrency: 1,
        };
        let generator = Arc::new(LlmService::new(&llm).unwrap());
        let agent = AgentService::new(generator, Arc::new(DriverConnectorFactory));
        let cors = CorsConfig {
            allowed_origins: vec!["http://localhost:5173".to_string()],
        };
        router(AppState { agent }, &cors)
    }

    fn run_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/db-agent/run")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let response = test_app().oneshot(run_request("{not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_empty_prompt_is_bad_request() {
        let response = test_app()
            .oneshot(run_request(
                r#"{"prompt": "  ", "databases": [{"type": "mongo", "host": "cluster0"}]}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Prompt cannot be empty"));
    }

    #[tokio::test]
    async fn test_database_failures_are_reported_per_record() {
        let body = json!({
            "prompt": "count users",
            "databases": [
                {"type": "neo4j", "host": "graph.local", "port": 7687},
                {"type": "mongo", "host": "cluster0.example.net", "user": "ada", "password": "secret"}
            ]
        });
        let response = test_app()
            .oneshot(run_request(&body.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let records: Vec<DatabaseRunResult> =
            serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].db_type, "neo4j");
        assert_eq!(records[0].db_host, "graph.local");
        assert!(records[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Unsupported database type"));

        assert_eq!(records[1].db_type, "mongo");
        assert!(records[1].error.as_deref().unwrap().contains("'database'"));
        assert_eq!(records[1].rows, json!([]));
        assert_eq!(records[1].query, None);
    }

    #[tokio::test]
    async fn test_response_uses_camel_case_keys() {
        let body = json!({
            "prompt": "count users",
            "databases": [{"type": "redis", "host": "cache"}]
        });
        let response = test_app()
            .oneshot(run_request(&body.to_string()))
            .await
            .unwrap();

        let records = body_json(response).await;
        let record = &records[0];
        assert_eq!(record["dbType"], "redis");
        assert_eq!(record["dbHost"], "cache");
        assert_eq!(record["query"], Value::Null);
        assert_eq!(record["metadata"], Value::Null);
        assert_eq!(record["rows"], json!([]));
    }
}
