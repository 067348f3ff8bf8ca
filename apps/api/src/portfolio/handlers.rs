use std::collections::BTreeMap;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AppError;
use crate::portfolio::models::{null_as_default, PortfolioTemplateData};
use crate::portfolio::packager::DownloadStore;
use crate::portfolio::resume_parser::{extract_resume_text, parse_resume};
use crate::portfolio::synthesizer::project_slug;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCodeRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub portfolio_data: PortfolioTemplateData,
    #[serde(default, deserialize_with = "null_as_default")]
    pub template_id: String,
}

#[derive(Serialize)]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCodeResponse {
    pub success: bool,
    pub download_url: String,
    pub file_name: String,
    pub template: TemplateSummary,
}

#[derive(Serialize)]
pub struct CodeViewResponse {
    pub success: bool,
    pub structure: BTreeMap<String, String>,
    pub folders: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResumeResponse {
    pub success: bool,
    pub portfolio_data: PortfolioTemplateData,
}

fn require_template_id(req: &GenerateCodeRequest) -> Result<&str, AppError> {
    let id = req.template_id.trim();
    if id.is_empty() {
        return Err(AppError::Validation("templateId is required".to_string()));
    }
    Ok(id)
}

/// POST /api/portfolio/generate-code
pub async fn handle_generate_code(
    State(state): State<AppState>,
    payload: Result<Json<GenerateCodeRequest>, JsonRejection>,
) -> Result<Json<GenerateCodeResponse>, AppError> {
    let Json(req) = payload?;
    let template_id = require_template_id(&req)?;
    let (template, tree) = state
        .synthesizer
        .synthesize(&req.portfolio_data, template_id)
        .await?;

    let file_name = DownloadStore::archive_name(&project_slug(&req.portfolio_data.personal.name));
    state.downloads.pack(tree, &file_name).await?;
    info!(
        "Generated portfolio {file_name} from template {}",
        template.manifest.id
    );

    Ok(Json(GenerateCodeResponse {
        success: true,
        download_url: format!("/api/portfolio/download/{file_name}"),
        file_name,
        template: TemplateSummary {
            id: template.manifest.id,
            name: template.manifest.name,
        },
    }))
}

/// GET /api/portfolio/download/:fileName
/// The archive is deleted once the response body has been sent or dropped.
pub async fn handle_download(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Response, AppError> {
    let claimed = state.downloads.claim(&file_name).await?;
    info!("Serving portfolio download {}", claimed.file_name);

    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", claimed.file_name),
        ),
        (header::CONTENT_LENGTH, claimed.len.to_string()),
    ];
    let body = Body::from_stream(claimed.into_stream());
    Ok((headers, body).into_response())
}

/// POST /api/portfolio/code-view
/// Same tree as generate-code, returned inline instead of packed.
pub async fn handle_code_view(
    State(state): State<AppState>,
    payload: Result<Json<GenerateCodeRequest>, JsonRejection>,
) -> Result<Json<CodeViewResponse>, AppError> {
    let Json(req) = payload?;
    let template_id = require_template_id(&req)?;
    let (_, tree) = state
        .synthesizer
        .synthesize(&req.portfolio_data, template_id)
        .await?;

    let folders = tree.folders();
    Ok(Json(CodeViewResponse {
        success: true,
        structure: tree.into_map(),
        folders,
    }))
}

/// POST /api/portfolio/parse-resume
/// Multipart: a `resume` file (PDF or text) or a `resumeText` field.
pub async fn handle_parse_resume(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ParseResumeResponse>, AppError> {
    let llm = state
        .llm
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("Resume parsing is not configured".to_string()))?;

    let mut text = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("resume") => {
                let content_type = field.content_type().map(str::to_string);
                let file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read resume: {e}")))?;
                text = Some(extract_resume_text(
                    &bytes,
                    content_type.as_deref(),
                    file_name.as_deref(),
                )?);
            }
            Some("resumeText") => {
                text = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::Validation(format!("Failed to read resume: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let text = text.ok_or_else(|| {
        AppError::Validation("Provide a 'resume' file or 'resumeText' field".to_string())
    })?;
    let portfolio_data = parse_resume(&text, llm).await?;

    Ok(Json(ParseResumeResponse {
        success: true,
        portfolio_data,
    }))
}
