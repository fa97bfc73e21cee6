//! Loading definition and run-task documents from files or URLs.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{DeployError, Result};
use crate::models::{RunTaskRequest, TaskDefinitionDocument};

/// File looked up when a definition path names a directory.
pub const DEFINITION_FILENAME: &str = "rollout.json";

static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*)://(.*)$").unwrap());

/// Where a document lives once its location string is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    Http(String),
}

impl Location {
    pub fn parse(location: &str) -> Result<Self> {
        let Some(caps) = SCHEME_RE.captures(location) else {
            return Ok(Self::File(PathBuf::from(location)));
        };
        match caps[1].to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File(PathBuf::from(&caps[2]))),
            "http" | "https" => Ok(Self::Http(location.to_string())),
            other => Err(DeployError::document(
                location,
                format!("unsupported scheme '{other}'"),
            )),
        }
    }
}

/// Read a local path, a `file://` URI or an `http(s)://` URL.
pub async fn read_file_or_uri(location: &str) -> Result<Vec<u8>> {
    match Location::parse(location)? {
        Location::File(path) => tokio::fs::read(&path)
            .await
            .map_err(|e| DeployError::document(location, e.to_string())),
        Location::Http(url) => {
            tracing::debug!(%url, "fetching document");
            let response = reqwest::get(&url)
                .await
                .map_err(|e| DeployError::document(location, e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(DeployError::document(location, format!("HTTP {status}")));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| DeployError::document(location, e.to_string()))?;
            Ok(bytes.to_vec())
        }
    }
}

/// Load a task-definition document; a directory resolves to its `rollout.json`.
pub async fn load_definition(location: &str) -> Result<TaskDefinitionDocument> {
    let location = resolve_definition_path(location)?;
    let bytes = read_file_or_uri(&location).await?;
    TaskDefinitionDocument::from_slice(&bytes).map_err(|e| match e {
        DeployError::Json(e) => DeployError::document(&location, e.to_string()),
        other => other,
    })
}

/// Load run-task input: `cluster`, `taskDefinition`, `count` and pass-through fields.
pub async fn load_run_task(location: &str) -> Result<RunTaskRequest> {
    let bytes = read_file_or_uri(location).await?;
    serde_json::from_slice(&bytes).map_err(|e| DeployError::document(location, e.to_string()))
}

fn resolve_definition_path(location: &str) -> Result<String> {
    match Location::parse(location)? {
        Location::File(path) if path.is_dir() => {
            Ok(join_display(&path, DEFINITION_FILENAME))
        }
        _ => Ok(location.to_string()),
    }
}

fn join_display(dir: &Path, file: &str) -> String {
    dir.join(file).to_string_lossy().into_owned()
}
