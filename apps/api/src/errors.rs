use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::portfolio::packager::PackageError;
use crate::portfolio::synthesizer::SynthesisError;
use crate::templates::installer::InstallError;
use crate::templates::registry::RegistryError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Template install failed: {0}")]
    Install(#[from] InstallError),

    #[error("Portfolio synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Packaging failed: {0}")]
    Package(#[from] PackageError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut detail = None;
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::InvalidBody(rejection) => (
                rejection.status(),
                "INVALID_REQUEST_BODY",
                rejection.body_text(),
            ),
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg.clone())
            }
            AppError::Install(e) if e.is_client_error() => {
                tracing::warn!("Rejected template upload: {e}");
                let status = match e {
                    InstallError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::BAD_REQUEST,
                };
                detail = Some(e.to_string());
                (status, e.code(), "Template installation failed".to_string())
            }
            AppError::Install(e) => {
                tracing::error!("Template install error: {e}");
                detail = Some(e.to_string());
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    e.code(),
                    "Template installation failed".to_string(),
                )
            }
            AppError::Synthesis(SynthesisError::TemplateNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "TEMPLATE_NOT_FOUND",
                format!("Template '{id}' not found"),
            ),
            AppError::Synthesis(e) => {
                tracing::error!("Synthesis error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SYNTHESIS_ERROR",
                    "Failed to generate portfolio code".to_string(),
                )
            }
            AppError::Package(PackageError::DownloadFileNotFound(_)) => (
                StatusCode::NOT_FOUND,
                "DOWNLOAD_FILE_NOT_FOUND",
                "File not found or already downloaded".to_string(),
            ),
            AppError::Package(PackageError::InvalidFileName(_)) => (
                StatusCode::BAD_REQUEST,
                "INVALID_FILE_NAME",
                "Invalid download file name".to_string(),
            ),
            AppError::Package(e) => {
                tracing::error!("Packaging error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ARCHIVE_WRITE_ERROR",
                    "Failed to prepare portfolio download".to_string(),
                )
            }
            AppError::Registry(e) => {
                tracing::error!("Registry error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "REGISTRY_ERROR",
                    "Template registry is unavailable".to_string(),
                )
            }
            AppError::Llm(msg) => {
                tracing::error!("LLM error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "LLM_ERROR",
                    "An AI processing error occurred".to_string(),
                )
            }
            AppError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                msg.clone(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let mut body = json!({
            "success": false,
            "message": message,
            "error": code,
        });
        if let Some(detail) = detail {
            body["detail"] = json!(detail);
        }

        (status, Json(body)).into_response()
    }
}
