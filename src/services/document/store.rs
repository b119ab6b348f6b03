use mongodb::bson::{Bson, Document};

use crate::api::middleware::AppError;

/// Counts reported by a multi-document update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

/// Collection-level operations the plan executor dispatches to.
///
/// All arguments are already normalized; implementations only talk to the
/// store. `limit` on reads is an upper bound on returned documents.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        limit: usize,
    ) -> Result<Vec<Document>, AppError>;

    async fn find_one(&self, collection: &str, filter: Document)
        -> Result<Option<Document>, AppError>;

    async fn count_documents(&self, collection: &str, filter: Document) -> Result<u64, AppError>;

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
    ) -> Result<Vec<Bson>, AppError>;

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        limit: usize,
    ) -> Result<Vec<Document>, AppError>;

    /// Returns the inserted `_id`
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson, AppError>;

    /// Returns the inserted `_id`s in input order
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<Bson>, AppError>;

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome, AppError>;

    /// Returns the number of deleted documents
    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64, AppError>;
}
