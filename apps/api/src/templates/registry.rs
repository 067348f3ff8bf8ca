//! Template registry: the persisted JSON document listing installed templates.
//!
//! Every operation reads the document from disk, so there is no cache to go
//! stale across requests. Writers (`upsert`, `remove`, `toggle_active`, `save`)
//! are serialized through a single async lock to rule out lost updates.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::templates::manifest::TemplateManifest;

pub const REGISTRY_FILE: &str = "registry.json";
pub const REGISTRY_FORMAT_VERSION: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry document {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode registry: {0}")]
    Encode(serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRegistryEntry {
    #[serde(flatten)]
    pub manifest: TemplateManifest,
    pub manifest_path: String,
    pub entry_path: String,
    pub is_active: bool,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TemplateRegistryEntry {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRegistry {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub templates: Vec<TemplateRegistryEntry>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self {
            version: REGISTRY_FORMAT_VERSION.to_string(),
            last_updated: Utc::now(),
            templates: Vec::new(),
        }
    }
}

impl TemplateRegistry {
    pub fn get(&self, id: &str) -> Option<&TemplateRegistryEntry> {
        self.templates.iter().find(|t| t.id() == id)
    }
}

/// File-backed store owning all registry mutations.
pub struct TemplateRegistryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TemplateRegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the registry, returning an empty one when the file does not exist.
    pub async fn load(&self) -> Result<TemplateRegistry, RegistryError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No registry at {}, starting empty", self.path.display());
                return Ok(TemplateRegistry::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|source| RegistryError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Overwrites the document, stamping `last_updated`.
    pub async fn save(&self, registry: &mut TemplateRegistry) -> Result<(), RegistryError> {
        let _writer = self.write_lock.lock().await;
        self.write(registry).await
    }

    /// Inserts or replaces the entry for `manifest.id`.
    ///
    /// A replaced entry keeps only its original `uploaded_at` and is active
    /// again; `updated_at` always moves strictly forward.
    pub async fn upsert(
        &self,
        manifest: &TemplateManifest,
        manifest_path: String,
        entry_path: String,
    ) -> Result<TemplateRegistryEntry, RegistryError> {
        let _writer = self.write_lock.lock().await;
        let mut registry = self.load().await?;
        let now = Utc::now();

        let position = registry.templates.iter().position(|t| t.id() == manifest.id);
        let entry = match position {
            Some(index) => {
                let existing = &mut registry.templates[index];
                *existing = TemplateRegistryEntry {
                    manifest: manifest.clone(),
                    manifest_path,
                    entry_path,
                    is_active: true,
                    uploaded_at: existing.uploaded_at,
                    updated_at: strictly_after(existing.updated_at, now),
                };
                info!("Updated registry entry for template {}", manifest.id);
                existing.clone()
            }
            None => {
                let entry = TemplateRegistryEntry {
                    manifest: manifest.clone(),
                    manifest_path,
                    entry_path,
                    is_active: true,
                    uploaded_at: now,
                    updated_at: now,
                };
                registry.templates.push(entry.clone());
                info!("Added registry entry for template {}", manifest.id);
                entry
            }
        };

        self.write(&mut registry).await?;
        Ok(entry)
    }

    /// Removes the entry for `id`, returning it if it was present.
    pub async fn remove(&self, id: &str) -> Result<Option<TemplateRegistryEntry>, RegistryError> {
        let _writer = self.write_lock.lock().await;
        let mut registry = self.load().await?;
        let Some(index) = registry.templates.iter().position(|t| t.id() == id) else {
            return Ok(None);
        };
        let removed = registry.templates.remove(index);
        self.write(&mut registry).await?;
        info!("Removed registry entry for template {id}");
        Ok(Some(removed))
    }

    /// Flips the active flag of `id` under the writer lock.
    pub async fn toggle_active(
        &self,
        id: &str,
    ) -> Result<Option<TemplateRegistryEntry>, RegistryError> {
        let _writer = self.write_lock.lock().await;
        let mut registry = self.load().await?;
        let Some(entry) = registry.templates.iter_mut().find(|t| t.id() == id) else {
            return Ok(None);
        };
        entry.is_active = !entry.is_active;
        entry.updated_at = strictly_after(entry.updated_at, Utc::now());
        let updated = entry.clone();
        self.write(&mut registry).await?;
        Ok(Some(updated))
    }

    pub async fn list_active(&self) -> Result<Vec<TemplateRegistryEntry>, RegistryError> {
        Ok(self
            .load()
            .await?
            .templates
            .into_iter()
            .filter(|t| t.is_active)
            .collect())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<TemplateRegistryEntry>, RegistryError> {
        Ok(self.load().await?.get(id).cloned())
    }

    /// Callers must hold `write_lock`.
    async fn write(&self, registry: &mut TemplateRegistry) -> Result<(), RegistryError> {
        registry.last_updated = Utc::now();
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(registry).map_err(RegistryError::Encode)?;

        // Write-then-rename so readers never observe a half-written document.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn strictly_after(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}
