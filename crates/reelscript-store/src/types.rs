//! Firestore REST API wire types and value conversions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Firestore document value types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    // Firestore sends integers as strings.
    IntegerValue(String),
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayValue {
    pub values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapValue {
    pub fields: Option<HashMap<String, Value>>,
}

/// Firestore document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name.
    pub name: Option<String>,
    pub fields: Option<HashMap<String, Value>>,
    pub create_time: Option<String>,
    pub update_time: Option<String>,
}

impl Document {
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self {
            name: None,
            fields: Some(fields),
            create_time: None,
            update_time: None,
        }
    }

    /// Trailing segment of the resource name (the document id).
    pub fn doc_id(&self) -> Option<&str> {
        self.name.as_deref().and_then(|n| n.rsplit('/').next())
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.as_ref().and_then(|f| f.get(key))
    }
}

/// List documents response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsResponse {
    pub documents: Option<Vec<Document>>,
    pub next_page_token: Option<String>,
}

// ============================================================================
// Structured queries
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
    pub field_path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFilter {
    pub field: FieldReference,
    /// "EQUAL", "LESS_THAN", "LESS_THAN_OR_EQUAL", "IN", ...
    pub op: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeFilter {
    /// Only "AND" is supported by the REST API for composite filters.
    pub op: String,
    pub filters: Vec<Filter>,
}

/// A filter node: exactly one of the variants is set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_filter: Option<FieldFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite_filter: Option<CompositeFilter>,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::op(field, "EQUAL", value)
    }

    pub fn lte(field: impl Into<String>, value: Value) -> Self {
        Self::op(field, "LESS_THAN_OR_EQUAL", value)
    }

    pub fn op(field: impl Into<String>, op: &str, value: Value) -> Self {
        Self {
            field_filter: Some(FieldFilter {
                field: FieldReference { field_path: field.into() },
                op: op.to_string(),
                value,
            }),
            composite_filter: None,
        }
    }

    /// Membership filter over an array of candidate values.
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::op(
            field,
            "IN",
            Value::ArrayValue(ArrayValue { values: Some(values) }),
        )
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Self {
            field_filter: None,
            composite_filter: Some(CompositeFilter {
                op: "AND".to_string(),
                filters,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSelector {
    pub collection_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub field: FieldReference,
    /// "ASCENDING" or "DESCENDING".
    pub direction: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
    pub from: Vec<CollectionSelector>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i32>,
}

impl StructuredQuery {
    pub fn collection(collection_id: impl Into<String>) -> Self {
        Self {
            from: vec![CollectionSelector { collection_id: collection_id.into() }],
            filter: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_asc(mut self, field: impl Into<String>) -> Self {
        self.order_by.push(Order {
            field: FieldReference { field_path: field.into() },
            direction: "ASCENDING".to_string(),
        });
        self
    }

    pub fn order_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by.push(Order {
            field: FieldReference { field_path: field.into() },
            direction: "DESCENDING".to_string(),
        });
        self
    }

    pub fn with_limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: i32) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub structured_query: StructuredQuery,
}

/// One streamed element of a runQuery response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryElement {
    pub document: Option<Document>,
}

// ============================================================================
// Aggregation queries (count)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAggregationQueryRequest {
    pub structured_aggregation_query: StructuredAggregationQuery,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredAggregationQuery {
    pub structured_query: StructuredQuery,
    pub aggregations: Vec<Aggregation>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    pub count: CountAggregation,
    pub alias: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountAggregation {}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAggregationQueryElement {
    pub result: Option<AggregationResult>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    pub aggregate_fields: HashMap<String, Value>,
}

// ============================================================================
// Value conversions
// ============================================================================

/// Convert a Rust value to a Firestore Value.
pub trait ToDocValue {
    fn to_doc_value(&self) -> Value;
}

impl ToDocValue for String {
    fn to_doc_value(&self) -> Value {
        Value::StringValue(self.clone())
    }
}

impl ToDocValue for &str {
    fn to_doc_value(&self) -> Value {
        Value::StringValue(self.to_string())
    }
}

impl ToDocValue for i64 {
    fn to_doc_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToDocValue for u32 {
    fn to_doc_value(&self) -> Value {
        Value::IntegerValue((*self as i64).to_string())
    }
}

impl ToDocValue for u64 {
    fn to_doc_value(&self) -> Value {
        Value::IntegerValue((*self as i64).to_string())
    }
}

impl ToDocValue for f64 {
    fn to_doc_value(&self) -> Value {
        Value::DoubleValue(*self)
    }
}

impl ToDocValue for bool {
    fn to_doc_value(&self) -> Value {
        Value::BooleanValue(*self)
    }
}

impl ToDocValue for DateTime<Utc> {
    fn to_doc_value(&self) -> Value {
        Value::TimestampValue(self.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
    }
}

impl ToDocValue for Vec<String> {
    fn to_doc_value(&self) -> Value {
        Value::ArrayValue(ArrayValue {
            values: Some(self.iter().map(|s| s.to_doc_value()).collect()),
        })
    }
}

impl<T: ToDocValue> ToDocValue for Option<T> {
    fn to_doc_value(&self) -> Value {
        match self {
            Some(v) => v.to_doc_value(),
            None => Value::NullValue(()),
        }
    }
}

/// Convert a Firestore Value back to a Rust value.
pub trait FromDocValue: Sized {
    fn from_doc_value(value: &Value) -> Option<Self>;
}

impl FromDocValue for String {
    fn from_doc_value(value: &Value) -> Option<Self> {
        match value {
            Value::StringValue(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromDocValue for i64 {
    fn from_doc_value(value: &Value) -> Option<Self> {
        match value {
            Value::IntegerValue(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromDocValue for u32 {
    fn from_doc_value(value: &Value) -> Option<Self> {
        i64::from_doc_value(value).and_then(|v| u32::try_from(v).ok())
    }
}

impl FromDocValue for u64 {
    fn from_doc_value(value: &Value) -> Option<Self> {
        i64::from_doc_value(value).and_then(|v| u64::try_from(v).ok())
    }
}

impl FromDocValue for f64 {
    fn from_doc_value(value: &Value) -> Option<Self> {
        match value {
            Value::DoubleValue(v) => Some(*v),
            Value::IntegerValue(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromDocValue for bool {
    fn from_doc_value(value: &Value) -> Option<Self> {
        match value {
            Value::BooleanValue(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromDocValue for DateTime<Utc> {
    fn from_doc_value(value: &Value) -> Option<Self> {
        match value {
            Value::TimestampValue(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }
}

impl FromDocValue for Vec<String> {
    fn from_doc_value(value: &Value) -> Option<Self> {
        match value {
            Value::ArrayValue(arr) => Some(
                arr.values
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(String::from_doc_value)
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// Read a typed field from a document, tolerating absence.
pub fn read_field<T: FromDocValue>(doc: &Document, key: &str) -> Option<T> {
    doc.field(key).and_then(T::from_doc_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        let value = now.to_doc_value();
        let back = DateTime::<Utc>::from_doc_value(&value).unwrap();
        assert!((now - back).num_milliseconds().abs() < 1);
    }

    #[test]
    fn test_integer_is_string_on_the_wire() {
        let v = 42i64.to_doc_value();
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["integerValue"], "42");
    }

    #[test]
    fn test_doc_id_from_resource_name() {
        let doc = Document {
            name: Some("projects/p/databases/(default)/documents/scripts/abc".to_string()),
            fields: None,
            create_time: None,
            update_time: None,
        };
        assert_eq!(doc.doc_id(), Some("abc"));
    }

    #[test]
    fn test_composite_filter_shape() {
        let f = Filter::and(vec![
            Filter::eq("status", Value::StringValue("queued".into())),
            Filter::eq("requestHash", Value::StringValue("h".into())),
        ]);
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["compositeFilter"]["op"], "AND");
        assert_eq!(json["compositeFilter"]["filters"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_query_where_key_is_reserved_word() {
        let q = StructuredQuery::collection("jobs")
            .with_filter(Filter::eq("status", Value::StringValue("queued".into())));
        let json = serde_json::to_value(&q).unwrap();
        assert!(json.get("where").is_some());
    }
}
