//! Record identity, timestamps, and the caller's schema contract.
//!
//! Every stored item is a [`Record`]: a time-ordered identifier, a creation
//! timestamp, a last-modified timestamp, and the caller's own fields
//! flattened into the same JSON object.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CrudError, CrudResult, ValidationError};

/// Globally unique, time-ordered record identifier.
///
/// Identifiers are UUID v7, so sorting by id sorts by creation time.
///
/// # Examples
///
/// ```
/// use fastcrud::RecordId;
///
/// let a = RecordId::new();
/// let b = RecordId::new();
/// assert!(a < b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Creates a new time-ordered record ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Creates a nil record ID (for testing or sentinel values).
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| ValidationError::InvalidRecord {
                reason: format!("invalid record id '{s}': {e}"),
            })
    }
}

impl From<Uuid> for RecordId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<RecordId> for Uuid {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

/// Schema contract for the caller-defined part of a record.
///
/// # Examples
///
/// ```
/// use fastcrud::{CrudModel, ValidationError};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Note {
///     title: String,
/// }
///
/// impl CrudModel for Note {
///     const NAME: &'static str = "Note";
///
///     fn validate(&self) -> Result<(), ValidationError> {
///         if self.title.is_empty() {
///             return Err(ValidationError::MissingField { field: "title".into() });
///         }
///         Ok(())
///     }
/// }
///
/// assert_eq!(Note::collection(), "note");
/// ```
pub trait CrudModel: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Type name; lowercased it becomes the route prefix and collection name.
    const NAME: &'static str;

    /// Checks field-level constraints. Called on every record before it is stored.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    #[must_use]
    fn collection() -> String {
        Self::NAME.to_lowercase()
    }
}

/// Schemaless model: any JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(pub serde_json::Map<String, serde_json::Value>);

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }
}

impl CrudModel for Document {
    const NAME: &'static str = "Document";
}

/// Field names owned by [`Record`] rather than by the model.
pub const UID_FIELD: &str = "uid";
pub const CREATED_FIELD: &str = "created_on";
pub const MODIFIED_FIELD: &str = "modify_on";

/// A stored item: identity, timestamps, and the model's fields.
///
/// Missing `uid`, `created_on` or `modify_on` are filled in on
/// deserialization; both timestamps share the same instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "IncomingRecord<T>")]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct Record<T> {
    pub uid: RecordId,
    pub created_on: DateTime<Utc>,
    pub modify_on: DateTime<Utc>,
    #[serde(flatten)]
    pub data: T,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct IncomingRecord<T> {
    uid: Option<RecordId>,
    created_on: Option<DateTime<Utc>>,
    modify_on: Option<DateTime<Utc>>,
    #[serde(flatten)]
    data: T,
}

impl<T> From<IncomingRecord<T>> for Record<T> {
    fn from(raw: IncomingRecord<T>) -> Self {
        let now = Utc::now();
        Self {
            uid: raw.uid.unwrap_or_default(),
            created_on: raw.created_on.unwrap_or(now),
            modify_on: raw.modify_on.unwrap_or(now),
            data: raw.data,
        }
    }
}

/// Returns a modification time strictly after `prev`.
///
/// `modify_on` never moves backwards, even if the wall clock does.
#[must_use]
pub fn next_modified(prev: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > prev {
        now
    } else {
        prev + Duration::microseconds(1)
    }
}

impl<T: CrudModel> Record<T> {
    /// Creates a record with a fresh identifier.
    #[must_use]
    pub fn new(data: T) -> Self {
        Self::with_id(RecordId::new(), data)
    }

    /// Creates a record with a caller-chosen identifier.
    #[must_use]
    pub fn with_id(uid: RecordId, data: T) -> Self {
        let now = Utc::now();
        Self {
            uid,
            created_on: now,
            modify_on: now,
            data,
        }
    }

    /// Runs the model's validation hook.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.data.validate()
    }

    /// The record as a JSON object, including `uid` and both timestamps.
    pub fn to_json(&self) -> CrudResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Full replacement of `self` by `incoming`.
    ///
    /// The identifier and creation time stay with `self`; `modify_on` is
    /// refreshed.
    #[must_use]
    pub fn replaced_by(&self, incoming: Self) -> Self {
        Self {
            uid: self.uid,
            created_on: self.created_on,
            modify_on: next_modified(self.modify_on),
            data: incoming.data,
        }
    }

    /// Shallow merge of `patch` into `self`.
    ///
    /// Each supplied top-level field replaces the stored value. `uid`,
    /// `created_on` and `modify_on` in the patch are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the merged object no longer fits the model.
    pub fn merged(&self, patch: &Patch) -> CrudResult<Self> {
        let serde_json::Value::Object(mut fields) = self.to_json()? else {
            return Err(CrudError::Serialization {
                message: format!("record {} did not serialize to an object", self.uid),
            });
        };

        for (key, value) in patch.fields() {
            if key == UID_FIELD || key == CREATED_FIELD || key == MODIFIED_FIELD {
                continue;
            }
            fields.insert(key.clone(), value.clone());
        }

        let mut merged: Self = serde_json::from_value(serde_json::Value::Object(fields))
            .map_err(|e| ValidationError::InvalidRecord {
                reason: e.to_string(),
            })?;
        merged.uid = self.uid;
        merged.created_on = self.created_on;
        merged.modify_on = next_modified(self.modify_on);
        merged.validate()?;
        Ok(merged)
    }
}

/// A partial record: the top-level fields to change.
///
/// # Examples
///
/// ```
/// use fastcrud::Patch;
///
/// let patch = Patch::new().set("name", "b");
/// assert_eq!(patch.len(), 1);
/// assert!(patch.uid().unwrap().is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(serde_json::Map<String, serde_json::Value>);

impl Patch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The target identifier carried in the body, if any.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `uid` is present but not a UUID string.
    pub fn uid(&self) -> CrudResult<Option<RecordId>> {
        match self.0.get(UID_FIELD) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.parse()?)),
            Some(other) => Err(ValidationError::InvalidRecord {
                reason: format!("uid must be a string, got {other}"),
            }
            .into()),
        }
    }

    /// Reads the patch as a complete new record stored at `uid`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if required model fields are missing.
    pub fn into_record<T: CrudModel>(self, uid: RecordId) -> CrudResult<Record<T>> {
        let mut fields = self.0;
        fields.insert(UID_FIELD.to_string(), serde_json::Value::String(uid.to_string()));
        let record: Record<T> = serde_json::from_value(serde_json::Value::Object(fields))
            .map_err(|e| ValidationError::InvalidRecord {
                reason: e.to_string(),
            })?;
        record.validate()?;
        Ok(record)
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Patch {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }
}
