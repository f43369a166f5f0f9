//! Model store collaborator
//!
//! The store owns model bytes and deployment metadata. The core only reads
//! from it through [`ModelStore`]; [`InMemoryModelStore`] is the in-process
//! implementation used by the server and by tests, and also carries the
//! upload/deploy/undeploy registry operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Deployment state of a model name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    NotUploaded,
    Uploaded,
    Deployed,
}

/// Errors reported by a model store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Model '{0}' does not exist")]
    NotFound(String),

    #[error("Model store unavailable: {0}")]
    Unavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Store IO error: {0}")]
    Io(String),
}

impl StoreError {
    /// Get the error code for programmatic handling
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "STORE_NOT_FOUND",
            Self::Unavailable(_) => "STORE_UNAVAILABLE",
            Self::Conflict(_) => "STORE_CONFLICT",
            Self::InvalidRequest(_) => "STORE_INVALID_REQUEST",
            Self::Io(_) => "STORE_IO",
        }
    }
}

/// Read interface the core consumes
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Deployment status of `name`; `StoreError::NotFound` if the name is unknown
    async fn model_status(&self, name: &str) -> Result<DeploymentStatus, StoreError>;

    /// Bytes of the deployed version of `name`
    async fn fetch_model_bytes(&self, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Cheap reachability probe
    async fn ping(&self) -> bool;

    /// Every stored model version
    async fn list_models(&self) -> Result<Vec<ModelRecord>, StoreError>;
}

/// Metadata for one stored model version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub name: String,
    pub version: u32,
    pub status: DeploymentStatus,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
    pub deployed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct StoredVersion {
    record: ModelRecord,
    bytes: Arc<Vec<u8>>,
}

/// In-process model store with versioned uploads and a single deployed
/// version per model name
#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    models: RwLock<HashMap<String, Vec<StoredVersion>>>,
    unreachable: AtomicBool,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new version of `name` with status `Uploaded`, returning its record
    pub fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<ModelRecord, StoreError> {
        self.insert_version(name, bytes, false)
    }

    /// Store a new version of `name` and deploy it immediately
    pub fn upload_and_deploy(&self, name: &str, bytes: Vec<u8>) -> Result<ModelRecord, StoreError> {
        {
            let models = self.models.read();
            if let Some(versions) = models.get(name) {
                if versions.iter().any(|v| v.record.status == DeploymentStatus::Deployed) {
                    return Err(StoreError::Conflict(format!(
                        "Another version of '{}' is already deployed",
                        name
                    )));
                }
            }
        }
        self.insert_version(name, bytes, true)
    }

    fn insert_version(&self, name: &str, bytes: Vec<u8>, deploy: bool) -> Result<ModelRecord, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidRequest("model name must be non-empty".to_string()));
        }

        let mut models = self.models.write();
        let versions = models.entry(name.to_string()).or_default();
        if deploy && versions.iter().any(|v| v.record.status == DeploymentStatus::Deployed) {
            return Err(StoreError::Conflict(format!(
                "Another version of '{}' is already deployed",
                name
            )));
        }

        let version = versions.iter().map(|v| v.record.version).max().unwrap_or(0) + 1;
        let now = Utc::now();
        let record = ModelRecord {
            name: name.to_string(),
            version,
            status: if deploy { DeploymentStatus::Deployed } else { DeploymentStatus::Uploaded },
            size_bytes: bytes.len() as u64,
            uploaded_at: now,
            deployed_at: deploy.then_some(now),
        };
        versions.push(StoredVersion {
            record: record.clone(),
            bytes: Arc::new(bytes),
        });

        info!(model = %name, version, deployed = deploy, "Stored model version");
        Ok(record)
    }

    /// Mark `version` of `name` as deployed
    pub fn deploy(&self, name: &str, version: u32) -> Result<ModelRecord, StoreError> {
        let mut models = self.models.write();
        let versions = models
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        if let Some(deployed) = versions
            .iter()
            .find(|v| v.record.status == DeploymentStatus::Deployed)
        {
            return Err(StoreError::Conflict(if deployed.record.version == version {
                format!("Version {} of '{}' is already deployed", version, name)
            } else {
                format!("Another version of '{}' is already deployed", name)
            }));
        }

        let target = versions
            .iter_mut()
            .find(|v| v.record.version == version)
            .ok_or_else(|| StoreError::NotFound(format!("{} (version {})", name, version)))?;
        target.record.status = DeploymentStatus::Deployed;
        target.record.deployed_at = Some(Utc::now());

        info!(model = %name, version, "Deployed model");
        Ok(target.record.clone())
    }

    /// Revert a deployed version of `name` to `Uploaded`
    pub fn undeploy(&self, name: &str, version: u32) -> Result<ModelRecord, StoreError> {
        let mut models = self.models.write();
        let target = models
            .get_mut(name)
            .and_then(|versions| versions.iter_mut().find(|v| v.record.version == version))
            .ok_or_else(|| StoreError::NotFound(format!("{} (version {})", name, version)))?;

        if target.record.status != DeploymentStatus::Deployed {
            return Err(StoreError::Conflict(format!(
                "Version {} of '{}' is not deployed",
                version, name
            )));
        }
        target.record.status = DeploymentStatus::Uploaded;

        info!(model = %name, version, "Undeployed model");
        Ok(target.record.clone())
    }

    /// Remove every version of `name`
    pub fn delete(&self, name: &str) -> Result<usize, StoreError> {
        let removed = self
            .models
            .write()
            .remove(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        info!(model = %name, versions = removed.len(), "Deleted model");
        Ok(removed.len())
    }

    /// Simulate a store outage (`false`) or recovery (`true`)
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Upload and deploy every regular file in `dir`, named by file stem
    pub async fn seed_from_dir(&self, dir: &Path) -> Result<usize, StoreError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", dir.display(), e)))?;

        let mut seeded = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!(path = %path.display(), "Skipping model file with non UTF-8 name");
                continue;
            };
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| StoreError::Io(format!("{}: {}", path.display(), e)))?;
            debug!(model = %name, bytes = bytes.len(), "Seeding model from disk");
            self.upload_and_deploy(name, bytes)?;
            seeded += 1;
        }

        info!(dir = %dir.display(), seeded, "Seeded model store");
        Ok(seeded)
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("model store is unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn model_status(&self, name: &str) -> Result<DeploymentStatus, StoreError> {
        self.check_reachable()?;
        let models = self.models.read();
        let versions = match models.get(name) {
            Some(versions) if !versions.is_empty() => versions,
            _ => return Err(StoreError::NotFound(name.to_string())),
        };
        if versions.iter().any(|v| v.record.status == DeploymentStatus::Deployed) {
            Ok(DeploymentStatus::Deployed)
        } else {
            Ok(DeploymentStatus::Uploaded)
        }
    }

    async fn fetch_model_bytes(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        self.check_reachable()?;
        let models = self.models.read();
        let versions = models
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        versions
            .iter()
            .find(|v| v.record.status == DeploymentStatus::Deployed)
            .map(|v| v.bytes.as_ref().clone())
            .ok_or_else(|| StoreError::Conflict(format!("Model '{}' has no deployed version", name)))
    }

    async fn ping(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }

    async fn list_models(&self) -> Result<Vec<ModelRecord>, StoreError> {
        self.check_reachable()?;
        let models = self.models.read();
        let mut records: Vec<ModelRecord> = models
            .values()
            .flat_map(|versions| versions.iter().map(|v| v.record.clone()))
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then(a.version.cmp(&b.version)));
        Ok(records)
    }
}
