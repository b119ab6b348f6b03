use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API; `/chat/completions` is appended
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Upper bound on in-flight generation calls
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file first so its values act as environment overrides
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("llm.api_base", "https://api.openai.com/v1")?
            .set_default("llm.model", "gpt-4")?
            .set_default("llm.temperature", 0.0)?
            .set_default("llm.timeout_secs", 60)?
            .set_default("llm.max_concurrency", num_cpus::get() as i64)?
            .set_default("logging.level", "info")?
            .set_default(
                "cors.allowed_origins",
                vec!["http://localhost:5173", "http://localhost:3000"],
            )?;

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<i64>().unwrap_or(8000))?;
        }

        if let Ok(api_base) = env::var("LLM_API_BASE") {
            builder = builder.set_override("llm.api_base", api_base)?;
        }

        if let Some(api_key) = env::var("OPENAI_API_KEY")
            .ok()
            .or_else(|| env::var("LLM_API_KEY").ok())
        {
            builder = builder.set_override("llm.api_key", api_key)?;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            builder = builder.set_override("llm.model", model)?;
        }

        if let Ok(timeout) = env::var("LLM_TIMEOUT_SECS") {
            builder = builder.set_override("llm.timeout_secs", timeout.parse::<i64>().unwrap_or(60))?;
        }

        if let Ok(permits) = env::var("LLM_MAX_CONCURRENCY") {
            if let Ok(permits) = permits.parse::<i64>() {
                builder = builder.set_override("llm.max_concurrency", permits.max(1))?;
            }
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(origins) = env::var("CORS_ALLOWED_ORIGINS") {
            let origins: Vec<String> = origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
            builder = builder.set_override("cors.allowed_origins", origins)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        // Clear environment variables for this test
        env::remove_var("HOST");
        env::remove_var("PORT");
        env::remove_var("LLM_MODEL");
        env::remove_var("CORS_ALLOWED_ORIGINS");

        let config = Config::from_env();
        assert!(config.is_ok());

        let config = config.unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.llm.model, "gpt-4");
        assert!(config.llm.max_concurrency >= 1);
        assert_eq!(config.cors.allowed_origins.len(), 2);
        assert_eq!(config.server_address(), "0.0.0.0:8000");
    }
}
