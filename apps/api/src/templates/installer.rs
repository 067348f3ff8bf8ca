//! Template archive installer.
//!
//! Install pipeline:
//! 1. open the archive with random access and locate `manifest.json`
//! 2. validate the manifest and confirm the declared entry file is present
//! 3. extract everything into a staging directory under the templates root
//! 4. swap the staging directory in for `templates/<id>` (previous install kept aside)
//! 5. re-validate manifest and entry file from their installed location
//! 6. upsert the registry entry
//!
//! A failure after step 4 restores the previous installation, so readers never
//! see a half-installed template. Installs and removals hold a single writer
//! lock from extraction through the registry write, and run on their own task
//! so a dropped caller cannot interrupt them midway.

use std::collections::BTreeSet;
use std::fs;
use std::io::{Read, Seek};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;
use zip::ZipArchive;

use crate::templates::manifest::{self, ManifestError, TemplateManifest, MANIFEST_FILE};
use crate::templates::registry::{RegistryError, TemplateRegistryEntry, TemplateRegistryStore};

/// Archive tooling on macOS adds this folder; it is never template content.
const MACOS_METADATA_DIR: &str = "__MACOSX/";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("unreadable template archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("manifest.json not found at the archive root")]
    ManifestNotFound,

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("entry file '{0}' declared in manifest is not in the archive")]
    EntryFileMissing(String),

    #[error("archive entry '{0}' escapes the template directory")]
    UnsafeEntryPath(String),

    #[error("manifest failed validation after extraction: {0}")]
    PostExtractionValidationFailed(String),

    #[error("entry file '{0}' is not reachable after extraction")]
    EntryFileUnreachable(String),

    #[error("template '{0}' is not installed")]
    TemplateNotFound(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("filesystem error during install: {0}")]
    Io(#[from] std::io::Error),

    #[error("install task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl InstallError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            InstallError::Archive(_) => "INVALID_ARCHIVE",
            InstallError::ManifestNotFound => "MANIFEST_NOT_FOUND",
            InstallError::Manifest(ManifestError::Malformed(_)) => "MALFORMED_MANIFEST",
            InstallError::Manifest(ManifestError::Incomplete { .. }) => "INCOMPLETE_MANIFEST",
            InstallError::Manifest(ManifestError::Invalid(_)) => "INVALID_MANIFEST",
            InstallError::EntryFileMissing(_) => "ENTRY_FILE_MISSING",
            InstallError::UnsafeEntryPath(_) => "UNSAFE_ENTRY_PATH",
            InstallError::PostExtractionValidationFailed(_) => "POST_EXTRACTION_VALIDATION_FAILED",
            InstallError::EntryFileUnreachable(_) => "ENTRY_FILE_UNREACHABLE",
            InstallError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            InstallError::Registry(_) | InstallError::Io(_) | InstallError::Task(_) => {
                "INSTALL_FAILED"
            }
        }
    }

    /// True when the archive or request itself is at fault rather than the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            InstallError::Registry(_) | InstallError::Io(_) | InstallError::Task(_)
        )
    }
}

/// Extracted template swapped into its final directory, awaiting verification.
struct PendingInstall {
    manifest: TemplateManifest,
    /// Entry file path relative to the template directory.
    entry_rel: String,
    final_dir: PathBuf,
    /// Previous installation moved aside, restored on rollback.
    previous: Option<PathBuf>,
}

impl PendingInstall {
    async fn commit(self) {
        if let Some(previous) = self.previous {
            if let Err(e) = tokio::fs::remove_dir_all(&previous).await {
                warn!(
                    "Failed to remove previous install {}: {e}",
                    previous.display()
                );
            }
        }
    }

    async fn rollback(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.final_dir).await {
            warn!(
                "Failed to remove rejected install {}: {e}",
                self.final_dir.display()
            );
        }
        if let Some(previous) = self.previous {
            if let Err(e) = tokio::fs::rename(&previous, &self.final_dir).await {
                warn!(
                    "Failed to restore previous install of {}: {e}",
                    self.manifest.id
                );
            }
        }
    }
}

/// Installs and removes templates under a web-served directory.
///
/// Every install and uninstall runs on its own task, so a caller that goes
/// away mid-request (a dropped connection) never leaves a half-applied change.
#[derive(Clone)]
pub struct TemplateInstaller {
    inner: Arc<InstallerInner>,
}

struct InstallerInner {
    templates_dir: PathBuf,
    /// URL prefix under which `templates_dir` is served, e.g. `/templates`.
    public_prefix: String,
    registry: Arc<TemplateRegistryStore>,
    writer: Mutex<()>,
}

impl TemplateInstaller {
    pub fn new(
        templates_dir: impl Into<PathBuf>,
        public_prefix: impl Into<String>,
        registry: Arc<TemplateRegistryStore>,
    ) -> Self {
        Self {
            inner: Arc::new(InstallerInner {
                templates_dir: templates_dir.into(),
                public_prefix: public_prefix.into().trim_end_matches('/').to_string(),
                registry,
                writer: Mutex::new(()),
            }),
        }
    }

    pub fn template_dir(&self, id: &str) -> PathBuf {
        self.inner.templates_dir.join(id)
    }

    /// Installs (or reinstalls) the template contained in `archive`.
    pub async fn install<R>(&self, archive: R) -> Result<TemplateRegistryEntry, InstallError>
    where
        R: Read + Seek + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.install(archive).await }).await?
    }

    /// Removes a template's registry entry and installed files.
    pub async fn uninstall(&self, id: &str) -> Result<Option<TemplateRegistryEntry>, InstallError> {
        if !manifest::is_valid_template_id(id) {
            return Err(InstallError::TemplateNotFound(id.to_string()));
        }
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        tokio::spawn(async move { inner.uninstall(&id).await }).await?
    }
}

impl InstallerInner {
    async fn install<R>(&self, archive: R) -> Result<TemplateRegistryEntry, InstallError>
    where
        R: Read + Seek + Send + 'static,
    {
        let _writer = self.writer.lock().await;

        let templates_dir = self.templates_dir.clone();
        let pending =
            tokio::task::spawn_blocking(move || extract_and_swap(archive, &templates_dir))
                .await??;

        match self.finish_install(&pending).await {
            Ok(entry) => {
                pending.commit().await;
                info!(
                    "Installed template {} v{}",
                    entry.manifest.id, entry.manifest.version
                );
                Ok(entry)
            }
            Err(e) => {
                warn!("Rolling back install of {}: {e}", pending.manifest.id);
                pending.rollback().await;
                Err(e)
            }
        }
    }

    /// Moves the directory aside before touching the registry so a registry
    /// failure can put the files back.
    async fn uninstall(&self, id: &str) -> Result<Option<TemplateRegistryEntry>, InstallError> {
        let _writer = self.writer.lock().await;

        let dir = self.templates_dir.join(id);
        let aside = self
            .templates_dir
            .join(format!(".removed-{id}-{}", Uuid::new_v4().simple()));
        let moved = match tokio::fs::rename(&dir, &aside).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        let removed = match self.registry.remove(id).await {
            Ok(removed) => removed,
            Err(e) => {
                if moved {
                    if let Err(restore) = tokio::fs::rename(&aside, &dir).await {
                        warn!("Failed to restore files of template {id}: {restore}");
                    }
                }
                return Err(e.into());
            }
        };

        if moved {
            if let Err(e) = tokio::fs::remove_dir_all(&aside).await {
                warn!("Failed to remove files of template {id}: {e}");
            }
        } else if removed.is_none() {
            return Err(InstallError::TemplateNotFound(id.to_string()));
        }
        info!("Uninstalled template {id}");
        Ok(removed)
    }

    async fn finish_install(
        &self,
        pending: &PendingInstall,
    ) -> Result<TemplateRegistryEntry, InstallError> {
        let manifest_bytes = tokio::fs::read(pending.final_dir.join(MANIFEST_FILE))
            .await
            .map_err(|e| InstallError::PostExtractionValidationFailed(e.to_string()))?;
        let extracted = manifest::validate(&manifest_bytes)
            .map_err(|e| InstallError::PostExtractionValidationFailed(e.to_string()))?;
        if extracted != pending.manifest {
            return Err(InstallError::PostExtractionValidationFailed(
                "extracted manifest differs from the archive manifest".to_string(),
            ));
        }

        let entry_on_disk = tokio::fs::metadata(pending.final_dir.join(&pending.entry_rel))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !entry_on_disk {
            return Err(InstallError::EntryFileUnreachable(pending.entry_rel.clone()));
        }

        let id = &pending.manifest.id;
        let manifest_path = format!("{}/{id}/{MANIFEST_FILE}", self.public_prefix);
        let entry_path = format!("{}/{id}/{}", self.public_prefix, pending.entry_rel);
        Ok(self
            .registry
            .upsert(&pending.manifest, manifest_path, entry_path)
            .await?)
    }
}

/// Blocking half of the install: inspect, extract into staging, swap into place.
fn extract_and_swap<R: Read + Seek>(
    archive: R,
    templates_dir: &Path,
) -> Result<PendingInstall, InstallError> {
    let mut archive = ZipArchive::new(archive)?;
    let names: Vec<String> = archive
        .file_names()
        .filter(|n| !n.starts_with(MACOS_METADATA_DIR))
        .map(str::to_owned)
        .collect();

    let root = locate_manifest_root(&names).ok_or(InstallError::ManifestNotFound)?;

    let mut manifest_bytes = Vec::new();
    archive
        .by_name(&format!("{root}{MANIFEST_FILE}"))?
        .read_to_end(&mut manifest_bytes)?;
    let manifest = manifest::validate(&manifest_bytes)?;

    let entry_rel = locate_entry_file(&names, &root, &manifest.entry_file)
        .ok_or_else(|| InstallError::EntryFileMissing(manifest.entry_file.clone()))?;

    fs::create_dir_all(templates_dir)?;
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(templates_dir)?;
    extract_all(&mut archive, &root, staging.path())?;

    let final_dir = templates_dir.join(&manifest.id);
    let previous = if final_dir.exists() {
        let aside = templates_dir.join(format!(".previous-{}-{}", manifest.id, Uuid::new_v4()));
        fs::rename(&final_dir, &aside)?;
        Some(aside)
    } else {
        None
    };

    if let Err(e) = fs::rename(staging.path(), &final_dir) {
        if let Some(previous) = &previous {
            if let Err(restore) = fs::rename(previous, &final_dir) {
                warn!("Failed to restore previous install of {}: {restore}", manifest.id);
            }
        }
        return Err(e.into());
    }
    // `staging` now points at a moved directory; dropping it is a no-op.
    drop(staging);

    Ok(PendingInstall {
        manifest,
        entry_rel,
        final_dir,
        previous,
    })
}

/// Returns the path prefix (`""` or `"<dir>/"`) holding `manifest.json`.
///
/// The manifest must sit at the archive root, or inside the archive's lone
/// top-level directory.
fn locate_manifest_root(names: &[String]) -> Option<String> {
    if names.iter().any(|n| n == MANIFEST_FILE) {
        return Some(String::new());
    }

    let top_level: BTreeSet<&str> = names
        .iter()
        .filter_map(|n| n.split('/').next())
        .filter(|head| !head.is_empty())
        .collect();
    let only_dir = match top_level.into_iter().collect::<Vec<_>>().as_slice() {
        [single] => *single,
        _ => return None,
    };

    let candidate = format!("{only_dir}/{MANIFEST_FILE}");
    names
        .iter()
        .any(|n| *n == candidate)
        .then(|| format!("{only_dir}/"))
}

/// Finds the archive entry for `entry_file`, returning its path relative to
/// the template root. Exact matches win; otherwise a suffix match directly
/// beneath one top-level directory is accepted.
fn locate_entry_file(names: &[String], root: &str, entry_file: &str) -> Option<String> {
    let exact = format!("{root}{entry_file}");
    if names.iter().any(|n| *n == exact) {
        return Some(entry_file.to_string());
    }

    let suffix = format!("/{entry_file}");
    names
        .iter()
        .filter_map(|n| n.strip_prefix(root))
        .find(|rel| {
            rel.strip_suffix(suffix.as_str())
                .is_some_and(|head| !head.is_empty() && !head.contains('/'))
        })
        .map(str::to_owned)
}

fn extract_all<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    root: &str,
    target: &Path,
) -> Result<(), InstallError> {
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        if entry.is_dir() || name.starts_with(MACOS_METADATA_DIR) {
            continue;
        }
        let Some(relative) = name.strip_prefix(root) else {
            continue;
        };

        let relative = sanitize_relative_path(relative)
            .ok_or_else(|| InstallError::UnsafeEntryPath(name.clone()))?;
        let out_path = target.join(relative);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

fn sanitize_relative_path(path: &str) -> Option<PathBuf> {
    let candidate = Path::new(path);
    if candidate.is_absolute() || path.contains('\\') {
        return None;
    }
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!clean.as_os_str().is_empty()).then_some(clean)
}
