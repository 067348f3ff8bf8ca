//! Template manifest contract.
//!
//! Every uploaded template archive carries a `manifest.json` describing the
//! template's identity and the entry file the client-side loader resolves
//! first. Validation is pure: bytes in, manifest or error out.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "manifest.json";

const MAX_ID_LEN: usize = 64;

/// Source extensions the loader accepts as a template entry point.
const ENTRY_EXTENSIONS: &[&str] = &["tsx", "jsx", "ts", "js"];

#[derive(Debug, Error, PartialEq)]
pub enum ManifestError {
    #[error("malformed manifest: {0}")]
    Malformed(String),

    #[error("incomplete manifest: missing required field(s) {}", .missing.join(", "))]
    Incomplete { missing: Vec<&'static str> },

    #[error("invalid manifest: {0}")]
    Invalid(String),
}

/// A validated template descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub thumbnail: String,
    /// Normalized relative path, `/`-separated.
    pub entry_file: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub is_premium: bool,
}

/// Wire shape of `manifest.json`; every field optional so missing ones can be
/// reported together instead of failing on the first.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    category: Option<String>,
    thumbnail: Option<String>,
    entry_file: Option<String>,
    features: Option<Vec<String>>,
    is_premium: Option<bool>,
}

/// Parses and checks a manifest document.
pub fn validate(bytes: &[u8]) -> Result<TemplateManifest, ManifestError> {
    let raw: RawManifest =
        serde_json::from_slice(bytes).map_err(|e| ManifestError::Malformed(e.to_string()))?;

    let mut missing = Vec::new();
    let mut required = |field: &'static str, value: Option<String>| -> String {
        match value.map(|v| v.trim().to_string()) {
            Some(v) if !v.is_empty() => v,
            _ => {
                missing.push(field);
                String::new()
            }
        }
    };

    let id = required("id", raw.id);
    let name = required("name", raw.name);
    let version = required("version", raw.version);
    let category = required("category", raw.category);
    let entry_file = required("entryFile", raw.entry_file);

    if !missing.is_empty() {
        return Err(ManifestError::Incomplete { missing });
    }

    if !is_valid_template_id(&id) {
        return Err(ManifestError::Invalid(format!(
            "template id '{id}' must be a lowercase slug of at most {MAX_ID_LEN} characters"
        )));
    }

    let entry_file = normalize_entry_file(&entry_file)?;

    Ok(TemplateManifest {
        id,
        name,
        version,
        description: raw.description.unwrap_or_default(),
        category,
        thumbnail: raw.thumbnail.unwrap_or_default(),
        entry_file,
        features: raw.features.unwrap_or_default(),
        is_premium: raw.is_premium.unwrap_or(false),
    })
}

/// Template ids name directories under the public templates root, so they are
/// restricted to `[a-z0-9][a-z0-9_-]*`.
pub fn is_valid_template_id(id: &str) -> bool {
    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    id.len() <= MAX_ID_LEN
        && (first.is_ascii_lowercase() || first.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn normalize_entry_file(entry_file: &str) -> Result<String, ManifestError> {
    let path = Path::new(entry_file);
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(ManifestError::Invalid(format!(
                    "entryFile '{entry_file}' must be a relative path inside the archive"
                )))
            }
        }
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension {
        Some(ext) if ENTRY_EXTENSIONS.contains(&ext.as_str()) && !parts.is_empty() => {
            Ok(parts.join("/"))
        }
        _ => Err(ManifestError::Invalid(format!(
            "entryFile '{entry_file}' must be a {} source file",
            ENTRY_EXTENSIONS.join("/")
        ))),
    }
}
