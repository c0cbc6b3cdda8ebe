//! Single-field filtering for `get_many`.
//!
//! A [`Filter`] is a `(field, value, operator)` triple. The value arrives
//! as text (typically a query-string parameter) and is coerced against the
//! JSON type of the stored field before comparing. Strings that both parse
//! as RFC 3339 timestamps compare as instants, so `created_on` and
//! `modify_on` order correctly whatever their fractional-second precision.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::CrudError;

/// Comparison kinds understood by filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Substring of a string field, or element of an array field.
    Contains,
    /// Field is present and truthy; the value is ignored.
    Exists,
    Lt,
    Le,
    #[default]
    Eq,
    Ne,
    Ge,
    Gt,
}

impl FilterOp {
    /// Every operator, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Contains,
        Self::Exists,
        Self::Lt,
        Self::Le,
        Self::Eq,
        Self::Ne,
        Self::Ge,
        Self::Gt,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Exists => "exists",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Ge => "ge",
            Self::Gt => "gt",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = CrudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == key)
            .ok_or_else(|| CrudError::invalid_operator(s))
    }
}

/// Selects records whose `field` compares to `value` under `op`.
///
/// # Examples
///
/// ```
/// use fastcrud::{Filter, FilterOp};
/// use serde_json::json;
///
/// let filter = Filter::new("age", "30", FilterOp::Ge);
/// assert!(filter.matches(&json!({"age": 42})));
/// assert!(!filter.matches(&json!({"age": 7})));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub value: String,
    #[serde(default, rename = "opr")]
    pub op: FilterOp,
}

impl Filter {
    #[must_use]
    pub fn new(field: impl Into<String>, value: impl Into<String>, op: FilterOp) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            op,
        }
    }

    /// Equality filter.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, value, FilterOp::Eq)
    }

    /// Evaluates the filter against a record serialized as a JSON object.
    #[must_use]
    pub fn matches(&self, record: &Json) -> bool {
        let field = record.get(&self.field);
        match self.op {
            FilterOp::Exists => field.is_some_and(truthy),
            FilterOp::Contains => field.is_some_and(|f| contains(f, &self.value)),
            FilterOp::Eq => field.is_some_and(|f| compare(f, &self.value) == Some(Ordering::Equal)),
            // A missing or incomparable field is "not equal".
            FilterOp::Ne => field.map_or(true, |f| compare(f, &self.value) != Some(Ordering::Equal)),
            FilterOp::Lt => ordered(field, &self.value, Ordering::is_lt),
            FilterOp::Le => ordered(field, &self.value, Ordering::is_le),
            FilterOp::Ge => ordered(field, &self.value, Ordering::is_ge),
            FilterOp::Gt => ordered(field, &self.value, Ordering::is_gt),
        }
    }
}

fn ordered(field: Option<&Json>, value: &str, accept: fn(Ordering) -> bool) -> bool {
    field.and_then(|f| compare(f, value)).is_some_and(accept)
}

/// Compares a stored JSON value with query text coerced to the same type.
fn compare(field: &Json, value: &str) -> Option<Ordering> {
    match field {
        Json::Number(n) => {
            let lhs = n.as_f64()?;
            let rhs = value.trim().parse::<f64>().ok()?;
            lhs.partial_cmp(&rhs)
        }
        Json::String(s) => match (parse_instant(s), parse_instant(value)) {
            (Some(lhs), Some(rhs)) => Some(lhs.cmp(&rhs)),
            _ => Some(s.as_str().cmp(value)),
        },
        Json::Bool(b) => {
            let rhs = value.trim().parse::<bool>().ok()?;
            Some(b.cmp(&rhs))
        }
        Json::Null => None,
        Json::Array(_) | Json::Object(_) => {
            let rhs: Json = serde_json::from_str(value).ok()?;
            (field == &rhs).then_some(Ordering::Equal)
        }
    }
}

fn parse_instant(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text.trim()).ok()
}

fn contains(field: &Json, value: &str) -> bool {
    match field {
        Json::String(s) => s.contains(value),
        Json::Array(items) => items
            .iter()
            .any(|item| compare(item, value) == Some(Ordering::Equal)),
        _ => false,
    }
}

fn truthy(value: &Json) -> bool {
    match value {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Json::String(s) => !s.is_empty(),
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_operator() {
        assert_eq!("eq".parse::<FilterOp>().unwrap(), FilterOp::Eq);
        assert_eq!(" GE ".parse::<FilterOp>().unwrap(), FilterOp::Ge);
        let err = "like".parse::<FilterOp>().unwrap_err();
        assert!(err.is_invalid_operator());
        assert!(err.to_string().contains("like"));
    }

    #[test]
    fn test_operator_serde_names() {
        assert_eq!(serde_json::to_string(&FilterOp::Contains).unwrap(), "\"contains\"");
        let op: FilterOp = serde_json::from_str("\"ne\"").unwrap();
        assert_eq!(op, FilterOp::Ne);
    }

    #[test]
    fn test_eq_coerces_to_field_type() {
        let record = json!({"name": "a", "age": 30, "active": true});
        assert!(Filter::eq("name", "a").matches(&record));
        assert!(Filter::eq("age", "30").matches(&record));
        assert!(Filter::eq("age", "30.0").matches(&record));
        assert!(Filter::eq("active", "true").matches(&record));
        assert!(!Filter::eq("age", "thirty").matches(&record));
        assert!(!Filter::eq("missing", "a").matches(&record));
    }

    #[test]
    fn test_ne_matches_missing_field() {
        let record = json!({"name": "a"});
        assert!(Filter::new("name", "b", FilterOp::Ne).matches(&record));
        assert!(!Filter::new("name", "a", FilterOp::Ne).matches(&record));
        assert!(Filter::new("other", "a", FilterOp::Ne).matches(&record));
    }

    #[test]
    fn test_ordering_operators() {
        let record = json!({"age": 30, "name": "m", "none": null});
        assert!(Filter::new("age", "31", FilterOp::Lt).matches(&record));
        assert!(Filter::new("age", "30", FilterOp::Le).matches(&record));
        assert!(Filter::new("age", "30", FilterOp::Ge).matches(&record));
        assert!(!Filter::new("age", "30", FilterOp::Gt).matches(&record));
        assert!(Filter::new("name", "a", FilterOp::Gt).matches(&record));
        assert!(!Filter::new("none", "1", FilterOp::Lt).matches(&record));
        assert!(!Filter::new("missing", "1", FilterOp::Ge).matches(&record));
    }

    #[test]
    fn test_contains() {
        let record = json!({"title": "hello world", "tags": ["x", "y"], "n": 5});
        assert!(Filter::new("title", "lo wo", FilterOp::Contains).matches(&record));
        assert!(Filter::new("tags", "y", FilterOp::Contains).matches(&record));
        assert!(!Filter::new("tags", "z", FilterOp::Contains).matches(&record));
        assert!(!Filter::new("n", "5", FilterOp::Contains).matches(&record));
    }

    #[test]
    fn test_exists_uses_truthiness() {
        let record = json!({"a": 1, "b": 0, "c": "", "d": [], "e": null, "f": false, "g": "x"});
        let exists = |field: &str| Filter::new(field, "", FilterOp::Exists).matches(&record);
        assert!(exists("a"));
        assert!(!exists("b"));
        assert!(!exists("c"));
        assert!(!exists("d"));
        assert!(!exists("e"));
        assert!(!exists("f"));
        assert!(exists("g"));
        assert!(!exists("missing"));
    }

    #[test]
    fn test_filter_deserializes_from_query_shape() {
        let filter: Filter = serde_json::from_value(json!({"field": "name", "value": "a"})).unwrap();
        assert_eq!(filter.op, FilterOp::Eq);
        let filter: Filter =
            serde_json::from_value(json!({"field": "n", "value": "1", "opr": "gt"})).unwrap();
        assert_eq!(filter.op, FilterOp::Gt);
    }

    #[test]
    fn test_timestamps_compare_as_instants() {
        // Serialized with and without a fractional part; text order is wrong here.
        let record = json!({"at": "2024-01-01T00:00:00.500Z"});
        assert!(Filter::new("at", "2024-01-01T00:00:00Z", FilterOp::Gt).matches(&record));
        assert!(!Filter::new("at", "2024-01-01T00:00:00Z", FilterOp::Lt).matches(&record));
        assert!(Filter::new("at", "2024-01-01T00:00:01Z", FilterOp::Lt).matches(&record));
        assert!(Filter::eq("at", "2024-01-01T00:00:00.5+00:00").matches(&record));
        assert!(Filter::new("at", "2024-01-01T01:00:00.500+01:00", FilterOp::Le).matches(&record));
    }

    #[test]
    fn test_non_timestamp_strings_compare_as_text() {
        let record = json!({"at": "2024-01-01T00:00:00Z", "name": "b"});
        assert!(Filter::new("at", "2024-01-01", FilterOp::Gt).matches(&record));
        assert!(Filter::new("name", "2024-01-01T00:00:00Z", FilterOp::Gt).matches(&record));
    }
}
