//! Submitted records (contact messages, portfolio enquiries, diary entries).
//!
//! Every collection shares one record shape and one store; what differs is
//! its [`CollectionSpec`]: the route it is served under, the fields it
//! accepts, and whether listing it needs an admin session.

pub mod store;
pub mod validate;

pub use store::{ListOrder, RecordStore, SqliteRecordStore};
pub use validate::{validate_fields, ValidationError};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a field value is checked beyond presence and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Email,
}

/// One accepted field of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Maximum length in characters, after trimming.
    pub max_len: usize,
    #[serde(default)]
    pub kind: FieldKind,
}

fn default_required() -> bool {
    true
}

impl FieldRule {
    pub fn required(name: &str, max_len: usize) -> Self {
        Self {
            name: name.to_string(),
            required: true,
            max_len,
            kind: FieldKind::Text,
        }
    }

    pub fn optional(name: &str, max_len: usize) -> Self {
        Self {
            required: false,
            ..Self::required(name, max_len)
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }
}

/// A record collection and the rules its submissions must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    /// Route prefix, e.g. `/contacts`.
    pub path: String,
    pub fields: Vec<FieldRule>,
    #[serde(default = "default_required")]
    pub list_requires_auth: bool,
    /// Keep only the newest N records after each insert.
    #[serde(default)]
    pub max_records: Option<usize>,
}

impl CollectionSpec {
    /// Structural sanity checks, run at startup.
    pub fn check(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("Collection name cannot be empty");
        }
        let segment = self.path.strip_prefix('/').unwrap_or_default();
        if segment.is_empty()
            || !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '/')
            || segment.ends_with('/')
        {
            bail!(
                "Collection {} has invalid path {:?} (expected e.g. \"/contacts\")",
                self.name,
                self.path
            );
        }
        if self.fields.is_empty() {
            bail!("Collection {} declares no fields", self.name);
        }
        if !self.fields.iter().any(|f| f.required) {
            bail!("Collection {} needs at least one required field", self.name);
        }
        for (i, field) in self.fields.iter().enumerate() {
            if field.name.trim().is_empty() || field.max_len == 0 {
                bail!("Collection {} has an invalid field rule at #{i}", self.name);
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                bail!("Collection {} declares field {} twice", self.name, field.name);
            }
        }
        if self.max_records == Some(0) {
            bail!("Collection {}: max_records must be at least 1", self.name);
        }
        Ok(())
    }
}

/// A stored submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub collection: String,
    pub fields: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Client address the submission came from.
    #[serde(default)]
    pub origin: String,
}

impl Record {
    pub fn new(collection: &str, fields: BTreeMap<String, String>, origin: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            collection: collection.to_string(),
            fields,
            created_at: Utc::now(),
            updated_at: None,
            origin: origin.to_string(),
        }
    }
}
