//! Resume → `PortfolioTemplateData`.
//!
//! Accepts plain text or a PDF, extracts the text, and asks the LLM for the
//! structured portfolio shape. The result is normalized before it is returned.

use tracing::info;

use crate::errors::AppError;
use crate::llm_client::LlmClient;
use crate::portfolio::models::PortfolioTemplateData;
use crate::portfolio::prompts::{RESUME_PARSE_PROMPT, RESUME_PARSE_SYSTEM};

/// Longer resumes are truncated; the tail is rarely portfolio material.
const MAX_RESUME_CHARS: usize = 24_000;

/// Extracts text from an uploaded resume file.
pub fn extract_resume_text(
    bytes: &[u8],
    content_type: Option<&str>,
    file_name: Option<&str>,
) -> Result<String, AppError> {
    let extension = file_name
        .and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    let is_pdf = content_type == Some("application/pdf") || extension.as_deref() == Some("pdf");
    let is_text = content_type.is_some_and(|t| t.starts_with("text/"))
        || matches!(extension.as_deref(), Some("txt" | "md"));

    if is_pdf {
        pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| AppError::Validation(format!("Could not read PDF resume: {e}")))
    } else if is_text {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| AppError::Validation("Resume text must be UTF-8".to_string()))
    } else {
        Err(AppError::Validation(
            "Resume must be a PDF or plain-text file".to_string(),
        ))
    }
}

/// Collapses whitespace runs and truncates to `MAX_RESUME_CHARS`.
pub fn prepare_resume_text(raw: &str) -> String {
    let mut lines = Vec::new();
    for line in raw.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }
    let text = lines.join("\n");
    match text.char_indices().nth(MAX_RESUME_CHARS) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}

pub async fn parse_resume(raw: &str, llm: &LlmClient) -> Result<PortfolioTemplateData, AppError> {
    let text = prepare_resume_text(raw);
    if text.is_empty() {
        return Err(AppError::Validation("Resume text is empty".to_string()));
    }

    let prompt = RESUME_PARSE_PROMPT.replace("{resume_text}", &text);
    let parsed: PortfolioTemplateData = llm
        .complete_json(&prompt, RESUME_PARSE_SYSTEM)
        .await
        .map_err(|e| AppError::Llm(format!("Failed to parse resume: {e}")))?;

    let data = parsed.normalized();
    info!(
        "Parsed resume: {} skills, {} projects, {} roles",
        data.skills.len(),
        data.projects.len(),
        data.experience.len()
    );
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_collapses_whitespace_and_blank_lines() {
        let raw = "  Ada   Lovelace \n\n\n\tEngineer\t at  Babbage & Co\n   \n";
        assert_eq!(prepare_resume_text(raw), "Ada Lovelace\nEngineer at Babbage & Co");
    }

    #[test]
    fn test_prepare_truncates_on_char_boundary() {
        let raw = "é".repeat(MAX_RESUME_CHARS + 10);
        let prepared = prepare_resume_text(&raw);
        assert_eq!(prepared.chars().count(), MAX_RESUME_CHARS);
    }

    #[test]
    fn test_extract_plain_text() {
        let text = extract_resume_text(b"Ada Lovelace", Some("text/plain"), None).unwrap();
        assert_eq!(text, "Ada Lovelace");
        let text = extract_resume_text(b"Ada", None, Some("resume.MD")).unwrap();
        assert_eq!(text, "Ada");
    }

    #[test]
    fn test_extract_rejects_unknown_types() {
        let err = extract_resume_text(b"\x00\x01", Some("image/png"), Some("cv.png")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_extract_rejects_broken_pdf() {
        let err = extract_resume_text(b"not a pdf", Some("application/pdf"), None).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_prompt_embeds_resume() {
        let prompt = RESUME_PARSE_PROMPT.replace("{resume_text}", "Ada Lovelace");
        assert!(prompt.ends_with("RESUME:\nAda Lovelace"));
        assert!(prompt.contains("\"githubUrl\""));
    }
}
