use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{
    fmt,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Clone, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdDraft {
    pub title: String,
    pub description: String,
    #[serde(deserialize_with = "string_or_number")]
    pub price: String,
    #[serde(deserialize_with = "string_or_number")]
    pub category_id: String,
    #[serde(default)]
    pub images: Vec<PathBuf>,
}

/// One account and the ads to publish under it.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadRecord {
    #[serde(rename = "user")]
    pub account: Account,
    #[serde(default)]
    pub ads: Vec<AdDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ListingId(String);

impl ListingId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

/// Outcome of one successful publish.
#[derive(Debug, Serialize, Clone)]
pub struct PublishReport {
    pub listing_id: ListingId,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("cannot read records file {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("invalid records file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

pub async fn load_records(path: &Path) -> Result<Vec<UploadRecord>, RecordsError> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|err| RecordsError::Read {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    parse_records(&raw).map_err(|err| RecordsError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

pub fn parse_records(raw: &[u8]) -> Result<Vec<UploadRecord>, serde_json::Error> {
    serde_json::from_slice(raw)
}

// Older record files carry price and category as integers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(value) => value,
        Raw::Int(value) => value.to_string(),
        Raw::Float(value) => value.to_string(),
    })
}
