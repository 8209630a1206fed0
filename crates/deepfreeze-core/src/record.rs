//! Tagged status-store documents.
//!
//! Every persisted document carries a `doctype` discriminator. Documents are
//! validated against their record type at the store boundary, so malformed
//! data fails at deserialization instead of propagating.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};
use crate::repository::Repository;
use crate::settings::{Settings, SETTINGS_ID};
use crate::thaw_request::ThawRequest;

/// Discriminator of a status-store document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Repository,
    ThawRequest,
    Settings,
}

impl DocType {
    /// Returns the persisted `doctype` value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::ThawRequest => "thaw_request",
            Self::Settings => "settings",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repository" => Ok(Self::Repository),
            "thaw_request" => Ok(Self::ThawRequest),
            "settings" => Ok(Self::Settings),
            _ => Err(CoreError::DeserializationError(format!(
                "unknown doctype `{s}`"
            ))),
        }
    }
}

/// A status-store document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "doctype", rename_all = "snake_case")]
pub enum StatusRecord {
    Repository(Repository),
    ThawRequest(ThawRequest),
    Settings(Settings),
}

impl StatusRecord {
    /// Document id: repository name, request id, or the settings id.
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Self::Repository(repo) => repo.name.clone(),
            Self::ThawRequest(request) => request.request_id.to_string(),
            Self::Settings(_) => SETTINGS_ID.to_string(),
        }
    }

    /// The record's discriminator.
    #[must_use]
    pub const fn doctype(&self) -> DocType {
        match self {
            Self::Repository(_) => DocType::Repository,
            Self::ThawRequest(_) => DocType::ThawRequest,
            Self::Settings(_) => DocType::Settings,
        }
    }

    /// Serializes into a JSON document including `doctype`.
    pub fn to_document(&self) -> CoreResult<Value> {
        serde_json::to_value(self).map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    /// Validates and parses a stored JSON document.
    pub fn from_document(id: &str, document: Value) -> CoreResult<Self> {
        serde_json::from_value(document).map_err(|e| {
            CoreError::DeserializationError(format!("document `{id}` is malformed: {e}"))
        })
    }

    /// Merges `patch` into this record and re-validates the result.
    ///
    /// The `doctype` field cannot be changed by a patch.
    pub fn merged(&self, patch: &Map<String, Value>) -> CoreResult<Self> {
        let id = self.id();
        let mut document = self.to_document()?;
        let Value::Object(fields) = &mut document else {
            return Err(CoreError::internal("record did not serialize to an object"));
        };
        for (key, value) in patch {
            if key == "doctype" {
                continue;
            }
            fields.insert(key.clone(), value.clone());
        }
        let merged = Self::from_document(&id, document)?;
        if merged.id() != id {
            return Err(CoreError::ValidationError(format!(
                "patch would change the id of `{id}`"
            )));
        }
        Ok(merged)
    }

    /// Unwraps a repository record.
    pub fn into_repository(self) -> CoreResult<Repository> {
        match self {
            Self::Repository(repo) => Ok(repo),
            other => Err(wrong_doctype(&other, DocType::Repository)),
        }
    }

    /// Unwraps a thaw request record.
    pub fn into_thaw_request(self) -> CoreResult<ThawRequest> {
        match self {
            Self::ThawRequest(request) => Ok(request),
            other => Err(wrong_doctype(&other, DocType::ThawRequest)),
        }
    }

    /// Unwraps a settings record.
    pub fn into_settings(self) -> CoreResult<Settings> {
        match self {
            Self::Settings(settings) => Ok(settings),
            other => Err(wrong_doctype(&other, DocType::Settings)),
        }
    }
}

fn wrong_doctype(record: &StatusRecord, expected: DocType) -> CoreError {
    CoreError::DeserializationError(format!(
        "document `{}` is a {}, expected {}",
        record.id(),
        record.doctype(),
        expected
    ))
}
