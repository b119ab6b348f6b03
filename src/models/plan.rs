// Query plan model
//
// A plan is what the language model hands back for a document database: an
// ordered list of `{collection, function, parameters}` operations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::api::middleware::AppError;

/// Closed set of operations the document executor knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Find,
    FindOne,
    CountDocuments,
    Distinct,
    Aggregate,
    InsertOne,
    InsertMany,
    Update,
    Delete,
}

impl OperationKind {
    pub const ALL: [OperationKind; 9] = [
        OperationKind::Find,
        OperationKind::FindOne,
        OperationKind::CountDocuments,
        OperationKind::Distinct,
        OperationKind::Aggregate,
        OperationKind::InsertOne,
        OperationKind::InsertMany,
        OperationKind::Update,
        OperationKind::Delete,
    ];

    /// Wire name as used in generated plans
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Find => "find",
            OperationKind::FindOne => "findOne",
            OperationKind::CountDocuments => "countDocuments",
            OperationKind::Distinct => "distinct",
            OperationKind::Aggregate => "aggregate",
            OperationKind::InsertOne => "insertOne",
            OperationKind::InsertMany => "insertMany",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    /// Exact, case-sensitive lookup of a wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            OperationKind::InsertOne
                | OperationKind::InsertMany
                | OperationKind::Update
                | OperationKind::Delete
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested operation, kept loosely typed until the executor validates it
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryOperation {
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

impl QueryOperation {
    /// Function name with the `find` default applied
    pub fn function_name(&self) -> &str {
        self.function.as_deref().unwrap_or("find")
    }
}

/// Ordered list of operations produced for one document database
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    pub operations: Vec<QueryOperation>,
}

impl QueryPlan {
    /// Build a plan from the generator's `{"query": ...}` object.
    ///
    /// A missing or null `query` yields an empty plan (rejected later by the
    /// executor, which knows the available collections); a single operation
    /// object is accepted as a one-element plan.
    pub fn from_generated(generated: &Value) -> Result<Self, AppError> {
        let operations = match generated.get("query") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(Self::parse_operation)
                .collect::<Result<Vec<_>, _>>()?,
            Some(item @ Value::Object(_)) => vec![Self::parse_operation(item)?],
            Some(other) => {
                return Err(AppError::Validation(format!(
                    "Query plan must be a list of operations, got: {}",
                    other
                )))
            }
        };

        Ok(Self { operations })
    }

    fn parse_operation(item: &Value) -> Result<QueryOperation, AppError> {
        serde_json::from_value(item.clone()).map_err(|e| {
            AppError::Validation(format!("Malformed query operation {}: {}", item, e))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_kind_names_round_trip() {
        for kind in OperationKind::ALL {
            assert_eq!(OperationKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(OperationKind::from_name("FIND"), None);
        assert_eq!(OperationKind::from_name("findMany"), None);
    }

    #[test]
    fn test_write_kinds() {
        assert!(OperationKind::Update.is_write());
        assert!(OperationKind::InsertMany.is_write());
        assert!(!OperationKind::Aggregate.is_write());
        assert!(!OperationKind::CountDocuments.is_write());
    }

    #[test]
    fn test_plan_from_list() {
        let plan = QueryPlan::from_generated(&json!({
            "query": [
                {"collection": "users", "function": "countDocuments", "parameters": {"filter": {"status": "active"}}},
                {"collection": "orders"}
            ]
        }))
        .unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.operations[0].function_name(), "countDocuments");
        assert_eq!(plan.operations[1].function_name(), "find");
        assert_eq!(plan.operations[1].parameters, Value::Null);
    }

    #[test]
    fn test_plan_from_single_object() {
        let plan = QueryPlan::from_generated(&json!({
            "query": {"collection": "users", "function": "find"}
        }))
        .unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_plan_missing_query_is_empty() {
        assert!(QueryPlan::from_generated(&json!({})).unwrap().is_empty());
        assert!(QueryPlan::from_generated(&json!({"query": null})).unwrap().is_empty());
        assert!(QueryPlan::from_generated(&json!({"query": []})).unwrap().is_empty());
    }

    #[test]
    fn test_plan_rejects_malformed_entries() {
        assert!(QueryPlan::from_generated(&json!({"query": "db.users.find()"})).is_err());
        assert!(QueryPlan::from_generated(&json!({"query": ["users"]})).is_err());
        assert!(QueryPlan::from_generated(&json!({"query": [{"collection": 42}]})).is_err());
    }
}
