//! Document addressing and the wire format of `commit` writes
//!
//! Firestore's REST API wraps every field in a typed value
//! (`{"doubleValue": 12.0}`) and expresses update/merge/set through the
//! presence of an update mask and an `exists` precondition on each write.

use crate::error::{FirestoreError, FirestoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A typed Firestore field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[serde(rename = "doubleValue")]
    Double(f64),
    #[serde(rename = "stringValue")]
    String(String),
    #[serde(rename = "booleanValue")]
    Boolean(bool),
    /// int64 travels as a decimal string
    #[serde(rename = "integerValue")]
    Integer(String),
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Double(f64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v.to_string())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Field name to value, ordered for stable masks and request bodies
pub type Fields = BTreeMap<String, Value>;

/// Path of a document relative to the database's `documents` root
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    segments: Vec<String>,
}

impl DocumentPath {
    /// Build from alternating collection/document segments.
    ///
    /// Rejects empty segments, segments containing `/`, and odd-length paths
    /// (which address collections, not documents).
    pub fn new<I, S>(segments: I) -> FirestoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();

        if segments.is_empty() || segments.len() % 2 != 0 {
            return Err(FirestoreError::InvalidPath(format!(
                "expected collection/document pairs, got {} segment(s)",
                segments.len()
            )));
        }

        if let Some(bad) = segments
            .iter()
            .find(|s| s.is_empty() || s.contains('/') || *s == "." || *s == "..")
        {
            return Err(FirestoreError::InvalidPath(format!("bad segment {bad:?}")));
        }

        Ok(Self { segments })
    }

    /// Path of a document inside a sub-collection of this one
    pub fn child(&self, collection: &str, id: &str) -> FirestoreResult<Self> {
        let mut segments = self.segments.clone();
        segments.push(collection.to_string());
        segments.push(id.to_string());
        Self::new(segments)
    }

    /// Last segment (the document id)
    #[must_use]
    pub fn id(&self) -> &str {
        self.segments.last().map_or("", String::as_str)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// How a write treats an existing or absent document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Partial update; fails with NOT_FOUND when the document is absent
    Update,
    /// Partial update that creates the document when absent
    Merge,
    /// Full overwrite
    Set,
}

/// One document write, before it is bound to a database
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentWrite {
    pub path: DocumentPath,
    pub mode: WriteMode,
    pub fields: Fields,
    /// Fields set to the commit time by the server
    pub server_timestamps: Vec<String>,
}

impl DocumentWrite {
    pub fn new(path: DocumentPath, mode: WriteMode, fields: Fields) -> Self {
        Self {
            path,
            mode,
            fields,
            server_timestamps: Vec::new(),
        }
    }

    /// Also stamp `field` with the server's request time
    #[must_use]
    pub fn with_server_timestamp(mut self, field: impl Into<String>) -> Self {
        self.server_timestamps.push(field.into());
        self
    }

    pub(crate) fn to_wire(&self, documents_root: &str) -> WireWrite {
        let update_mask = match self.mode {
            WriteMode::Update | WriteMode::Merge => Some(DocumentMask {
                field_paths: self.fields.keys().cloned().collect(),
            }),
            WriteMode::Set => None,
        };

        let current_document = match self.mode {
            WriteMode::Update => Some(Precondition { exists: true }),
            WriteMode::Merge | WriteMode::Set => None,
        };

        WireWrite {
            update: WireDocument {
                name: format!("{documents_root}/{}", self.path),
                fields: self.fields.clone(),
            },
            update_mask,
            update_transforms: self
                .server_timestamps
                .iter()
                .map(|field| FieldTransform {
                    field_path: field.clone(),
                    set_to_server_value: ServerValue::RequestTime,
                })
                .collect(),
            current_document,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CommitRequest {
    pub writes: Vec<WireWrite>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireWrite {
    update: WireDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    update_mask: Option<DocumentMask>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    update_transforms: Vec<FieldTransform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_document: Option<Precondition>,
}

#[derive(Debug, Serialize)]
struct WireDocument {
    name: String,
    fields: Fields,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentMask {
    field_paths: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldTransform {
    field_path: String,
    set_to_server_value: ServerValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum ServerValue {
    RequestTime,
}

#[derive(Debug, Serialize)]
struct Precondition {
    exists: bool,
}

/// Response of the `commit` RPC
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    #[serde(default)]
    pub write_results: Vec<WriteResult>,
    pub commit_time: Option<String>,
}

/// Per-write outcome
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    pub update_time: Option<String>,
}
