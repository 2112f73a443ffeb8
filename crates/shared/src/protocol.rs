//! Wire payloads exchanged with the storage backend and the relay endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::RelayTarget;

/// Successful response of the storage single-shot upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadObjectResponse {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Error body returned by the storage backend. Older deployments send the
/// status code as a string, newer ones as a number.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageErrorBody {
    #[serde(default)]
    pub status_code: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StorageErrorBody {
    pub fn status(&self) -> Option<u16> {
        match self.status_code.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn describe(&self) -> Option<String> {
        self.message
            .clone()
            .filter(|m| !m.is_empty())
            .or_else(|| self.error.clone().filter(|e| !e.is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortBy {
    pub column: String,
    pub order: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListObjectsRequest {
    pub prefix: String,
    pub limit: u32,
    pub offset: u32,
    pub sort_by: SortBy,
}

impl Default for ListObjectsRequest {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            limit: 100,
            offset: 0,
            sort_by: SortBy {
                column: "name".into(),
                order: "asc".into(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMetadata {
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

/// One entry of the storage listing. Folder placeholders carry no id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListedObject {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<ObjectMetadata>,
}

/// JSON reply of the relay endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Relay configuration row as stored by the configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfigRow {
    pub api_id: String,
    pub api_hash: String,
    pub server_url: String,
}

impl From<RelayConfigRow> for RelayTarget {
    fn from(row: RelayConfigRow) -> Self {
        Self {
            api_id: row.api_id,
            api_hash: row.api_hash,
            server_url: row.server_url,
        }
    }
}
