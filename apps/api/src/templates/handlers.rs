use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::state::AppState;
use crate::templates::catalog::TemplateRow;
use crate::templates::installer::InstallError;
use crate::templates::registry::{TemplateRegistry, TemplateRegistryEntry};

const UPLOAD_FIELD: &str = "template";

/// Content types browsers and CLI tools send for `.zip` files.
const ZIP_CONTENT_TYPES: &[&str] = &[
    "application/zip",
    "application/x-zip-compressed",
    "application/x-zip",
];

#[derive(Serialize)]
pub struct InstalledTemplate {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: String,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub template: InstalledTemplate,
}

#[derive(Serialize)]
pub struct AdminListResponse {
    pub database: Vec<TemplateRow>,
    pub registry: TemplateRegistry,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize)]
pub struct ToggleResponse {
    pub success: bool,
    pub template: TemplateRegistryEntry,
}

#[derive(Serialize)]
pub struct TemplateListResponse {
    pub templates: Vec<TemplateRegistryEntry>,
}

#[derive(Serialize)]
pub struct TemplateResponse {
    pub template: TemplateRegistryEntry,
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Template archive exceeds the upload limit".to_string())
    } else {
        AppError::Validation(format!("Invalid multipart body: {}", e.body_text()))
    }
}

/// Streams the `template` field into a named temp file under the uploads dir.
async fn receive_upload(
    state: &AppState,
    multipart: &mut Multipart,
) -> Result<NamedTempFile, AppError> {
    let max = state.config.max_template_upload_bytes;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default();
        if !ZIP_CONTENT_TYPES.contains(&content_type) {
            return Err(AppError::Validation(format!(
                "Only ZIP archives are accepted, got '{content_type}'"
            )));
        }

        let uploads_dir = state.config.template_uploads_dir();
        tokio::fs::create_dir_all(&uploads_dir)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
        let temp = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix("template-")
                .suffix(".zip")
                .tempfile_in(uploads_dir)
        })
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .map_err(|e| AppError::Internal(e.into()))?;

        let mut out = tokio::fs::File::from_std(
            temp.reopen().map_err(|e| AppError::Internal(e.into()))?,
        );
        let mut received = 0usize;
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            received += chunk.len();
            if received > max {
                return Err(AppError::PayloadTooLarge(format!(
                    "Template archive exceeds {max} bytes"
                )));
            }
            out.write_all(&chunk)
                .await
                .map_err(|e| AppError::Internal(e.into()))?;
        }
        out.flush().await.map_err(|e| AppError::Internal(e.into()))?;

        if received == 0 {
            return Err(AppError::Validation("Template archive is empty".to_string()));
        }
        debug!("Received template upload ({received} bytes)");
        return Ok(temp);
    }

    Err(AppError::Validation(format!(
        "Missing '{UPLOAD_FIELD}' file field"
    )))
}

/// POST /api/admin/templates/upload
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let upload = receive_upload(&state, &mut multipart).await?;
    let archive = upload.reopen().map_err(|e| AppError::Internal(e.into()))?;

    let installed = state.installer.install(archive).await;
    if let Err(e) = upload.close() {
        warn!("Failed to remove uploaded template archive: {e}");
    }
    let entry = installed?;

    state
        .catalog
        .record_install(&entry)
        .await
        .map_err(AppError::Internal)?;

    let manifest = entry.manifest;
    Ok(Json(UploadResponse {
        success: true,
        message: format!("Template '{}' installed successfully", manifest.name),
        template: InstalledTemplate {
            id: manifest.id,
            name: manifest.name,
            version: manifest.version,
            category: manifest.category,
        },
    }))
}

/// GET /api/admin/templates
pub async fn handle_admin_list(
    State(state): State<AppState>,
) -> Result<Json<AdminListResponse>, AppError> {
    let database = state.catalog.list().await.map_err(AppError::Internal)?;
    let registry = state.registry.load().await?;
    Ok(Json(AdminListResponse { database, registry }))
}

/// DELETE /api/admin/templates/:templateId
pub async fn handle_delete(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    // Files and registry first; the catalog row only goes once they are gone.
    let uninstalled = match state.installer.uninstall(&template_id).await {
        Ok(_) => true,
        Err(InstallError::TemplateNotFound(_)) => false,
        Err(e) => return Err(e.into()),
    };

    let row_deleted = state
        .catalog
        .delete(&template_id)
        .await
        .map_err(AppError::Internal)?;

    if !uninstalled {
        if !row_deleted {
            return Err(InstallError::TemplateNotFound(template_id).into());
        }
        warn!("Template {template_id} had a catalog row but no installed files");
    }

    Ok(Json(MessageResponse {
        success: true,
        message: format!("Template '{template_id}' deleted successfully"),
    }))
}

/// PATCH /api/admin/templates/:templateId/toggle
pub async fn handle_toggle(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> Result<Json<ToggleResponse>, AppError> {
    let template = state
        .registry
        .toggle_active(&template_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Template '{template_id}' not found")))?;

    let row = state
        .catalog
        .set_active(&template_id, template.is_active)
        .await
        .map_err(AppError::Internal)?;
    if row.is_none() {
        debug!("Template {template_id} has no catalog row to toggle");
    }

    info!(
        "Template {template_id} is now {}",
        if template.is_active { "active" } else { "inactive" }
    );
    Ok(Json(ToggleResponse {
        success: true,
        template,
    }))
}

/// GET /api/templates
pub async fn handle_list_active(
    State(state): State<AppState>,
) -> Result<Json<TemplateListResponse>, AppError> {
    let templates = state.registry.list_active().await?;
    Ok(Json(TemplateListResponse { templates }))
}

/// GET /api/templates/:templateId
pub async fn handle_get_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> Result<Json<TemplateResponse>, AppError> {
    let template = state
        .registry
        .get_by_id(&template_id)
        .await?
        .filter(|t| t.is_active)
        .ok_or_else(|| AppError::NotFound(format!("Template '{template_id}' not found")))?;
    Ok(Json(TemplateResponse { template }))
}
