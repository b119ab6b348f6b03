// In-memory DocumentStore used by the executor and orchestrator tests.
//
// Filters support plain equality plus $eq/$ne/$in/$gt/$gte/$lt/$lte; updates
// support $set/$unset/$inc; pipelines support $match and $limit.

use mongodb::bson::{oid::ObjectId, Bson, Document};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use super::store::{DocumentStore, UpdateOutcome};
use crate::api::middleware::AppError;

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, collection: &str, documents: Vec<Document>) {
        let mut collections = self.collections.lock().unwrap();
        let target = collections.entry(collection.to_string()).or_default();
        for document in documents {
            target.push(with_id(document));
        }
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    fn matching(&self, collection: &str, filter: &Document) -> Result<Vec<Document>, AppError> {
        let mut out = Vec::new();
        for document in self.documents(collection) {
            if matches(&document, filter)? {
                out.push(document);
            }
        }
        Ok(out)
    }
}

fn with_id(document: Document) -> Document {
    if document.contains_key("_id") {
        return document;
    }
    let mut out = Document::new();
    out.insert("_id", ObjectId::new());
    out.extend(document);
    out
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn matches(document: &Document, filter: &Document) -> Result<bool, AppError> {
    for (key, expected) in filter {
        let actual = document.get(key);
        let ok = match expected {
            Bson::Document(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => {
                matches_operators(actual, ops)?
            }
            _ => actual.is_some_and(|value| values_equal(value, expected)),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_operators(actual: Option<&Bson>, ops: &Document) -> Result<bool, AppError> {
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => actual.is_some_and(|v| values_equal(v, operand)),
            "$ne" => !actual.is_some_and(|v| values_equal(v, operand)),
            "$in" => match operand {
                Bson::Array(options) => {
                    actual.is_some_and(|v| options.iter().any(|o| values_equal(v, o)))
                }
                _ => return Err(AppError::Database("$in needs an array".to_string())),
            },
            "$gt" | "$gte" | "$lt" | "$lte" => {
                let ordering = actual.and_then(|v| compare(v, operand));
                match (op.as_str(), ordering) {
                    ("$gt", Some(o)) => o == Ordering::Greater,
                    ("$gte", Some(o)) => o != Ordering::Less,
                    ("$lt", Some(o)) => o == Ordering::Less,
                    ("$lte", Some(o)) => o != Ordering::Greater,
                    _ => false,
                }
            }
            other => {
                return Err(AppError::Database(format!("unknown operator {}", other)));
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn apply_update(document: &mut Document, update: &Document) -> Result<bool, AppError> {
    let before = document.clone();
    for (op, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| AppError::Database(format!("{} needs a document", op)))?;
        match op.as_str() {
            "$set" => {
                for (field, value) in fields {
                    document.insert(field.clone(), value.clone());
                }
            }
            "$unset" => {
                for (field, _) in fields {
                    document.remove(field);
                }
            }
            "$inc" => {
                for (field, delta) in fields {
                    let current = document.get(field).and_then(as_number).unwrap_or(0.0);
                    let delta = as_number(delta).ok_or_else(|| {
                        AppError::Database(format!("$inc on {} needs a number", field))
                    })?;
                    document.insert(field.clone(), Bson::Double(current + delta));
                }
            }
            other => {
                return Err(AppError::Database(format!(
                    "update document requires atomic operators, found {}",
                    other
                )))
            }
        }
    }
    Ok(*document != before)
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        limit: usize,
    ) -> Result<Vec<Document>, AppError> {
        let mut docs = self.matching(collection, &filter)?;
        docs.truncate(limit);
        Ok(docs)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, AppError> {
        Ok(self.matching(collection, &filter)?.into_iter().next())
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> Result<u64, AppError> {
        Ok(self.matching(collection, &filter)?.len() as u64)
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
    ) -> Result<Vec<Bson>, AppError> {
        let mut values: Vec<Bson> = Vec::new();
        for document in self.matching(collection, &filter)? {
            if let Some(value) = document.get(field) {
                if !values.iter().any(|seen| values_equal(seen, value)) {
                    values.push(value.clone());
                }
            }
        }
        Ok(values)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        limit: usize,
    ) -> Result<Vec<Document>, AppError> {
        let mut docs = self.documents(collection);
        for stage in &pipeline {
            if let Ok(filter) = stage.get_document("$match") {
                let mut kept = Vec::new();
                for document in docs {
                    if matches(&document, filter)? {
                        kept.push(document);
                    }
                }
                docs = kept;
            } else if let Some(n) = stage.get("$limit").and_then(as_number) {
                docs.truncate(n as usize);
            } else {
                return Err(AppError::Database(format!("unsupported stage {}", stage)));
            }
        }
        docs.truncate(limit);
        Ok(docs)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson, AppError> {
        let document = with_id(document);
        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push(document);
        Ok(id)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<Bson>, AppError> {
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            ids.push(self.insert_one(collection, document).await?);
        }
        Ok(ids)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome, AppError> {
        let mut collections = self.collections.lock().unwrap();
        let mut outcome = UpdateOutcome::default();
        if let Some(docs) = collections.get_mut(collection) {
            for document in docs.iter_mut() {
                if matches(document, &filter)? {
                    outcome.matched += 1;
                    if apply_update(document, &update)? {
                        outcome.modified += 1;
                    }
                }
            }
        }
        Ok(outcome)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64, AppError> {
        let mut collections = self.collections.lock().unwrap();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        let mut kept = Vec::with_capacity(before);
        for document in docs.drain(..) {
            if !matches(&document, &filter)? {
                kept.push(document);
            }
        }
        *docs = kept;
        Ok((before - docs.len()) as u64)
    }
}
