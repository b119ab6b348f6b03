// Value normalization for document-store operations
//
// Plans arrive as JSON. Before they reach the driver, `_id` strings become
// ObjectIds and date placeholders / extended-JSON `$date` wrappers become BSON
// datetimes. Results go the other way: ObjectIds and datetimes are rendered as
// strings so the response is plain JSON.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use mongodb::bson::{oid::ObjectId, Bson, DateTime as BsonDateTime, Document};
use serde_json::{Map, Number, Value};

use crate::api::middleware::AppError;

/// Strings that stand for "the current time" (compared trimmed, lower-cased)
pub const DATE_PLACEHOLDERS: [&str; 7] = [
    "now",
    "today",
    "current date",
    "current time",
    "new date()",
    "date.now()",
    "current_timestamp",
];

/// Outcome of coercing an `_id` string
#[derive(Debug, Clone, PartialEq)]
pub enum IdCoercion {
    /// The string was a valid ObjectId
    Converted(ObjectId),
    /// Not an ObjectId; the original string is kept and the store decides
    PassThrough(String),
}

impl IdCoercion {
    pub fn into_bson(self) -> Bson {
        match self {
            IdCoercion::Converted(oid) => Bson::ObjectId(oid),
            IdCoercion::PassThrough(raw) => Bson::String(raw),
        }
    }
}

pub fn coerce_identifier(raw: &str) -> IdCoercion {
    match ObjectId::parse_str(raw) {
        Ok(oid) => IdCoercion::Converted(oid),
        Err(_) => IdCoercion::PassThrough(raw.to_string()),
    }
}

/// Structural JSON -> BSON mapping.
///
/// Extended-JSON keys (`$oid`, `$date`, ...) are left as ordinary keys; only
/// the normalizers below decide what becomes a native value.
pub fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bson::Int64(i)
            } else if let Some(u) = n.as_u64() {
                // Beyond i64 range; BSON has no unsigned 64-bit integer
                Bson::Double(u as f64)
            } else {
                Bson::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => Bson::Document(
            map.iter()
                .map(|(key, value)| (key.clone(), json_to_bson(value)))
                .collect(),
        ),
    }
}

/// Replace string `_id` values with ObjectIds wherever they parse, at any depth
pub fn normalize_ids(value: Bson) -> Bson {
    match value {
        Bson::Document(doc) => Bson::Document(normalize_document_ids(doc)),
        Bson::Array(items) => Bson::Array(items.into_iter().map(normalize_ids).collect()),
        other => other,
    }
}

fn normalize_document_ids(doc: Document) -> Document {
    doc.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Bson::String(raw) if key == "_id" => coerce_identifier(&raw).into_bson(),
                other => normalize_ids(other),
            };
            (key, value)
        })
        .collect()
}

/// Replace date placeholders and `$date` wrappers with datetimes, using the
/// current wall clock for placeholders
pub fn normalize_dates(value: Bson) -> Result<Bson, AppError> {
    normalize_dates_at(value, BsonDateTime::now())
}

/// Same as [`normalize_dates`] with an explicit "now"
pub fn normalize_dates_at(value: Bson, now: BsonDateTime) -> Result<Bson, AppError> {
    match value {
        Bson::Document(doc) => {
            if let Some(wrapped) = doc.get("$date") {
                return extended_json_date(wrapped).map(Bson::DateTime);
            }
            let converted = doc
                .into_iter()
                .map(|(key, value)| Ok((key, normalize_dates_at(value, now)?)))
                .collect::<Result<Document, AppError>>()?;
            Ok(Bson::Document(converted))
        }
        Bson::Array(items) => items
            .into_iter()
            .map(|item| normalize_dates_at(item, now))
            .collect::<Result<Vec<_>, _>>()
            .map(Bson::Array),
        Bson::String(s) if is_date_placeholder(&s) => Ok(Bson::DateTime(now)),
        other => Ok(other),
    }
}

pub fn is_date_placeholder(raw: &str) -> bool {
    let normalized = raw.trim().to_lowercase();
    DATE_PLACEHOLDERS.contains(&normalized.as_str())
}

/// Dates first, then identifiers: the order used for filters and inserted documents
pub fn normalize_all(value: Bson) -> Result<Bson, AppError> {
    Ok(normalize_ids(normalize_dates(value)?))
}

fn extended_json_date(wrapped: &Bson) -> Result<BsonDateTime, AppError> {
    match wrapped {
        Bson::Document(inner) if inner.contains_key("$numberLong") => {
            let millis = match inner.get("$numberLong") {
                Some(Bson::String(s)) => s.trim().parse::<i64>().ok(),
                Some(Bson::Int64(i)) => Some(*i),
                Some(Bson::Int32(i)) => Some(i64::from(*i)),
                _ => None,
            };
            millis.map(BsonDateTime::from_millis).ok_or_else(|| {
                AppError::Validation(format!("Invalid $numberLong date value: {}", wrapped))
            })
        }
        Bson::String(s) => parse_iso_datetime(s)
            .map(|dt| BsonDateTime::from_millis(dt.timestamp_millis()))
            .ok_or_else(|| AppError::Validation(format!("Invalid ISO-8601 date: {}", s))),
        Bson::Int64(millis) => Ok(BsonDateTime::from_millis(*millis)),
        Bson::Int32(millis) => Ok(BsonDateTime::from_millis(i64::from(*millis))),
        other => Err(AppError::Validation(format!(
            "Unsupported $date value: {}",
            other
        ))),
    }
}

/// Parse an ISO-8601 timestamp. Offsets are honoured; naive date-times and
/// plain dates are taken as UTC.
pub fn parse_iso_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Render a BSON value as transport-safe JSON
pub fn serialize(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::Number((*i).into()),
        Bson::Int64(i) => Value::Number((*i).into()),
        Bson::Double(f) => Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Bson::String(s) => Value::String(s.clone()),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => Value::String(format_datetime(dt)),
        Bson::Array(items) => Value::Array(items.iter().map(serialize).collect()),
        Bson::Document(doc) => serialize_document(doc),
        Bson::Symbol(s) | Bson::JavaScriptCode(s) => Value::String(s.clone()),
        Bson::Binary(bin) => Value::String(format!("<binary {} bytes>", bin.bytes.len())),
        Bson::RegularExpression(regex) => {
            Value::String(format!("/{}/{}", regex.pattern, regex.options))
        }
        Bson::Timestamp(ts) => Value::String(format!("Timestamp({}, {})", ts.time, ts.increment)),
        other => Value::String(other.to_string()),
    }
}

pub fn serialize_document(doc: &Document) -> Value {
    let map: Map<String, Value> = doc
        .iter()
        .map(|(key, value)| (key.clone(), serialize(value)))
        .collect();
    Value::Object(map)
}

pub fn serialize_documents(docs: &[Document]) -> Value {
    Value::Array(docs.iter().map(serialize_document).collect())
}

fn format_datetime(dt: &BsonDateTime) -> String {
    DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis())
        .map(|utc| utc.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| dt.to_string())
}
