pub mod agent_service;
pub mod database; // Document and relational connectors
pub mod document; // Plan execution against document stores
pub mod llm_service;

pub use agent_service::*;
pub use llm_service::*;
