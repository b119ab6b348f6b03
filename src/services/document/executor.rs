// Query plan executor
//
// Runs a generated plan operation by operation against a DocumentStore. Each
// operation is validated as it is reached, so writes that precede a bad
// operation stay applied: there is no rollback across a plan.

use mongodb::bson::{Bson, Document};
use serde_json::{json, Map, Value};

use super::normalizer::{
    json_to_bson, normalize_all, normalize_dates, serialize, serialize_document,
    serialize_documents,
};
use super::store::DocumentStore;
use crate::api::middleware::AppError;
use crate::models::{OperationKind, QueryOperation, QueryPlan};
use crate::validation::OperationValidator;

/// Hard cap on documents returned by `find` and `aggregate`
pub const MAX_RESULT_DOCUMENTS: usize = 100;

/// Collection name -> serialized result of the last operation on it
pub type ResultMap = Map<String, Value>;

pub struct QueryPlanExecutor {
    result_limit: usize,
}

impl Default for QueryPlanExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPlanExecutor {
    pub fn new() -> Self {
        Self {
            result_limit: MAX_RESULT_DOCUMENTS,
        }
    }

    /// Execute every operation of `plan` in order.
    ///
    /// `available_collections` is only used to make the empty-plan error
    /// actionable for the caller.
    pub async fn execute(
        &self,
        store: &dyn DocumentStore,
        plan: &QueryPlan,
        available_collections: &[String],
    ) -> Result<ResultMap, AppError> {
        if plan.is_empty() {
            return Err(AppError::Validation(format!(
                "No queries provided. Available collections: {:?}",
                available_collections
            )));
        }

        let mut results = ResultMap::new();
        let mut applied_writes = 0usize;

        for (idx, operation) in plan.operations.iter().enumerate() {
            let outcome = self.execute_operation(store, operation).await;

            let (collection, kind, result) = match outcome {
                Ok(done) => done,
                Err(e) => {
                    if applied_writes > 0 {
                        tracing::warn!(
                            "Plan aborted at operation {} after {} write operation(s) were already applied: {}",
                            idx,
                            applied_writes,
                            e
                        );
                    }
                    return Err(e);
                }
            };

            if kind.is_write() {
                applied_writes += 1;
            }

            if results.insert(collection.to_string(), result).is_some() {
                tracing::warn!(
                    "Collection '{}' targeted more than once in one plan; keeping the result of operation {} ({})",
                    collection,
                    idx,
                    kind
                );
            }
        }

        Ok(results)
    }

    async fn execute_operation<'a>(
        &self,
        store: &dyn DocumentStore,
        operation: &'a QueryOperation,
    ) -> Result<(&'a str, OperationKind, Value), AppError> {
        let collection = operation
            .collection
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Each query must include 'collection'. Provided: {}",
                    serde_json::to_string(operation).unwrap_or_default()
                ))
            })?;

        let kind = OperationValidator::validate(operation.function_name())?;

        tracing::debug!("Executing {} on collection '{}'", kind, collection);

        let result = self
            .dispatch(store, collection, kind, &operation.parameters)
            .await?;

        Ok((collection, kind, result))
    }

    async fn dispatch(
        &self,
        store: &dyn DocumentStore,
        collection: &str,
        kind: OperationKind,
        params: &Value,
    ) -> Result<Value, AppError> {
        match kind {
            OperationKind::InsertOne => {
                let document = Self::prepare_document(params)?;
                let inserted_id = store.insert_one(collection, document).await?;
                Ok(json!({ "inserted_id": serialize(&inserted_id) }))
            }
            OperationKind::InsertMany => {
                let entries = match params {
                    Value::Array(entries) => entries.as_slice(),
                    Value::Object(map) if map.get("documents").is_some_and(Value::is_array) => {
                        map["documents"].as_array().map(Vec::as_slice).unwrap_or_default()
                    }
                    _ => {
                        return Err(AppError::Validation(format!(
                            "insertMany on '{}' expects a list of documents",
                            collection
                        )))
                    }
                };
                let documents = entries
                    .iter()
                    .map(Self::prepare_document)
                    .collect::<Result<Vec<_>, _>>()?;
                if documents.is_empty() {
                    return Err(AppError::Validation(format!(
                        "insertMany on '{}' requires at least one document",
                        collection
                    )));
                }
                let inserted_ids = store.insert_many(collection, documents).await?;
                Ok(json!({
                    "inserted_ids": inserted_ids.iter().map(serialize).collect::<Vec<_>>()
                }))
            }
            OperationKind::Find => {
                let filter = Self::read_filter(params)?;
                let documents = store.find(collection, filter, self.result_limit).await?;
                Ok(serialize_documents(&documents))
            }
            OperationKind::FindOne => {
                let filter = Self::read_filter(params)?;
                let document = store.find_one(collection, filter).await?;
                Ok(document
                    .map(|doc| serialize_document(&doc))
                    .unwrap_or(Value::Null))
            }
            OperationKind::CountDocuments => {
                let filter = Self::read_filter(params)?;
                let count = store.count_documents(collection, filter).await?;
                Ok(json!(count))
            }
            OperationKind::Distinct => {
                let field = params
                    .get("field")
                    .and_then(Value::as_str)
                    .filter(|field| !field.is_empty())
                    .ok_or_else(|| {
                        AppError::Validation(format!(
                            "distinct on '{}' requires a 'field' name",
                            collection
                        ))
                    })?;
                let filter = Self::optional_filter(params)?;
                let values = store.distinct(collection, field, filter).await?;
                Ok(Value::Array(values.iter().map(serialize).collect()))
            }
            OperationKind::Aggregate => {
                // Stages go to the store exactly as generated: no id/date normalization
                let pipeline = Self::pipeline(collection, params)?;
                let documents = store
                    .aggregate(collection, pipeline, self.result_limit)
                    .await?;
                Ok(serialize_documents(&documents))
            }
            OperationKind::Update => {
                let filter = Self::optional_filter(params)?;
                let update = params
                    .get("update")
                    .map(|update| normalize_dates(json_to_bson(update)))
                    .transpose()?
                    .filter(|update| !Self::is_blank(update))
                    .ok_or_else(|| {
                        AppError::Validation(format!(
                            "Update requires 'update' for collection {}",
                            collection
                        ))
                    })?;
                let update = Self::into_document(update, "update")?;
                let outcome = store.update_many(collection, filter, update).await?;
                Ok(json!({ "matched": outcome.matched, "modified": outcome.modified }))
            }
            OperationKind::Delete => {
                let filter = Self::optional_filter(params)?;
                let deleted = store.delete_many(collection, filter).await?;
                Ok(json!({ "deleted": deleted }))
            }
        }
    }

    /// `{document: {...}}` or the entry itself, normalized for insertion
    fn prepare_document(entry: &Value) -> Result<Document, AppError> {
        let raw = entry.get("document").unwrap_or(entry);
        Self::into_document(normalize_all(json_to_bson(raw))?, "document")
    }

    /// `parameters.filter`, or the whole parameters object when no filter key exists
    fn read_filter(params: &Value) -> Result<Document, AppError> {
        let raw = params.get("filter").unwrap_or(params);
        Self::into_document(normalize_all(json_to_bson(raw))?, "filter")
    }

    /// `parameters.filter`, empty when absent
    fn optional_filter(params: &Value) -> Result<Document, AppError> {
        match params.get("filter") {
            Some(raw) => Self::into_document(normalize_all(json_to_bson(raw))?, "filter"),
            None => Ok(Document::new()),
        }
    }

    fn pipeline(collection: &str, params: &Value) -> Result<Vec<Document>, AppError> {
        match params.get("pipeline") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(stages)) => stages
                .iter()
                .map(|stage| Self::into_document(json_to_bson(stage), "pipeline stage"))
                .collect(),
            Some(other) => Err(AppError::Validation(format!(
                "aggregate on '{}' expects 'pipeline' to be a list, got: {}",
                collection, other
            ))),
        }
    }

    fn is_blank(value: &Bson) -> bool {
        match value {
            Bson::Null => true,
            Bson::Document(doc) => doc.is_empty(),
            Bson::Array(items) => items.is_empty(),
            Bson::String(s) => s.is_empty(),
            _ => false,
        }
    }

    fn into_document(value: Bson, what: &str) -> Result<Document, AppError> {
        match value {
            Bson::Document(doc) => Ok(doc),
            Bson::Null => Ok(Document::new()),
            other => Err(AppError::Validation(format!(
                "{} must be an object, got: {}",
                what, other
            ))),
        }
    }
}
