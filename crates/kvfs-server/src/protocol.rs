//! Docker volume plugin protocol messages.
//!
//! Every endpoint takes the same request shape and answers with the same
//! response shape; fields an endpoint does not use are omitted.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use kvfs_kernel::VolumeInfo;

/// Plugin subsystem implemented by this daemon.
pub const IMPLEMENTS: &str = "VolumeDriver";

/// Volumes live on this host only.
pub const SCOPE_LOCAL: &str = "local";

/// Request body of every `VolumeDriver.*` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeRequest {
    pub name: String,
    /// Create-time options (`-o key=value`). Docker sends `null` when empty.
    #[serde(deserialize_with = "null_as_empty")]
    pub opts: HashMap<String, String>,
    /// Consumer ID on Mount and Unmount.
    #[serde(rename = "ID")]
    pub id: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

/// A volume as reported by Get and List.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    pub name: String,
    pub mountpoint: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub status: HashMap<String, serde_json::Value>,
}

impl From<VolumeInfo> for Volume {
    fn from(info: VolumeInfo) -> Self {
        let mut status = HashMap::new();
        status.insert("usage".to_string(), serde_json::Value::from(info.usage));
        Self {
            name: info.name,
            mountpoint: info.mountpoint.display().to_string(),
            status,
        }
    }
}

/// Response body of every `VolumeDriver.*` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeResponse {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mountpoint: String,
    /// Empty on success.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub err: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<Volume>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

impl VolumeResponse {
    pub fn error(err: impl ToString) -> Self {
        Self {
            err: err.to_string(),
            ..Self::default()
        }
    }

    pub fn mountpoint(path: &std::path::Path) -> Self {
        Self {
            mountpoint: path.display().to_string(),
            ..Self::default()
        }
    }

    pub fn volume(info: VolumeInfo) -> Self {
        Self {
            volume: Some(info.into()),
            ..Self::default()
        }
    }

    pub fn volumes(infos: Vec<VolumeInfo>) -> Self {
        Self {
            volumes: Some(infos.into_iter().map(Volume::from).collect()),
            ..Self::default()
        }
    }

    pub fn capabilities() -> Self {
        Self {
            capabilities: Some(Capabilities {
                scope: SCOPE_LOCAL.to_string(),
            }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capabilities {
    pub scope: String,
}

/// Response to `Plugin.Activate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    pub implements: Vec<String>,
}

impl Default for ActivateResponse {
    fn default() -> Self {
        Self {
            implements: vec![IMPLEMENTS.to_string()],
        }
    }
}
