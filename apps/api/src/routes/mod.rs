pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::services::ServeDir;

use crate::portfolio::handlers as portfolio;
use crate::state::{AppState, TEMPLATES_PUBLIC_PREFIX};
use crate::templates::handlers as templates;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;
const RESUME_UPLOAD_LIMIT_BYTES: usize = 10 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.config.max_template_upload_bytes + MULTIPART_OVERHEAD_BYTES;
    let templates_dir = state.config.templates_dir();

    Router::new()
        .route("/health", get(health::health_handler))
        // Template administration
        .route(
            "/api/admin/templates/upload",
            post(templates::handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/admin/templates", get(templates::handle_admin_list))
        .route(
            "/api/admin/templates/:template_id",
            delete(templates::handle_delete),
        )
        .route(
            "/api/admin/templates/:template_id/toggle",
            patch(templates::handle_toggle),
        )
        // Public template catalog
        .route("/api/templates", get(templates::handle_list_active))
        .route(
            "/api/templates/:template_id",
            get(templates::handle_get_template),
        )
        // Portfolio generation
        .route(
            "/api/portfolio/generate-code",
            post(portfolio::handle_generate_code),
        )
        .route(
            "/api/portfolio/download/:file_name",
            get(portfolio::handle_download),
        )
        .route("/api/portfolio/code-view", post(portfolio::handle_code_view))
        .route(
            "/api/portfolio/parse-resume",
            post(portfolio::handle_parse_resume)
                .layer(DefaultBodyLimit::max(RESUME_UPLOAD_LIMIT_BYTES)),
        )
        .nest_service(TEMPLATES_PUBLIC_PREFIX, ServeDir::new(templates_dir))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::templates::catalog::InMemoryTemplateCatalog;
    use crate::templates::test_support::{manifest_json, ZipFixture};

    const BOUNDARY: &str = "portfolio-test-boundary";

    struct TestApp {
        router: Router,
        state: AppState,
        _root: tempfile::TempDir,
    }

    impl TestApp {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let state = AppState::new(
                Config::for_root(root.path()),
                Arc::new(InMemoryTemplateCatalog::default()),
                None,
            );
            Self {
                router: build_router(state.clone()),
                state,
                _root: root,
            }
        }

        async fn send(&self, request: Request<Body>) -> Response {
            self.router.clone().oneshot(request).await.unwrap()
        }

        async fn upload(&self, content_type: &str, archive: &[u8]) -> (StatusCode, Value) {
            let mut body = Vec::new();
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\n\
                     Content-Disposition: form-data; name=\"template\"; filename=\"template.zip\"\r\n\
                     Content-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(archive);
            body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

            let request = Request::builder()
                .method(Method::POST)
                .uri("/api/admin/templates/upload")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .unwrap();
            json_of(self.send(request).await).await
        }

        async fn json(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let builder = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            json_of(self.send(request).await).await
        }

        async fn get_raw(&self, uri: &str) -> Response {
            self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
        }

        async fn install_modern_minimal(&self) {
            let archive = ZipFixture::new()
                .file("manifest.json", manifest_json("modern-minimal", "index.tsx"))
                .file("index.tsx", "export default function Template() { return null; }")
                .build();
            let (status, body) = self.upload("application/zip", &archive).await;
            assert_eq!(status, StatusCode::OK, "{body}");
        }
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn json_of(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = body_bytes(response).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn generate_body(template_id: &str) -> Value {
        json!({
            "portfolioData": {
                "personal": {"name": "Ada Lovelace", "title": "Engineer"},
                "skills": ["Rust", "TypeScript"]
            },
            "templateId": template_id
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new();
        let (status, body) = app.json(Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_modern_minimal_upload_is_listed() {
        let app = TestApp::new();
        app.install_modern_minimal().await;

        let (status, body) = app.json(Method::GET, "/api/templates", None).await;
        assert_eq!(status, StatusCode::OK);
        let templates = body["templates"].as_array().unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0]["id"], "modern-minimal");
        assert_eq!(templates[0]["isActive"], true);
        assert_eq!(templates[0]["entryPath"], "/templates/modern-minimal/index.tsx");

        let (status, body) = app.json(Method::GET, "/api/admin/templates", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"][0]["id"], "modern-minimal");
        assert_eq!(body["registry"]["templates"][0]["version"], "1.0.0");
    }

    #[tokio::test]
    async fn test_upload_response_shape() {
        let app = TestApp::new();
        let archive = ZipFixture::new()
            .file("manifest.json", manifest_json("modern-minimal", "index.tsx"))
            .file("index.tsx", "export default () => null;")
            .build();
        let (status, body) = app.upload("application/x-zip-compressed", &archive).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(
            body["template"],
            json!({
                "id": "modern-minimal",
                "name": "Modern Minimal",
                "version": "1.0.0",
                "category": "professional"
            })
        );
    }

    #[tokio::test]
    async fn test_installed_entry_file_is_served() {
        let app = TestApp::new();
        app.install_modern_minimal().await;

        let response = app.get_raw("/templates/modern-minimal/index.tsx").await;
        assert_eq!(response.status(), StatusCode::OK);
        let source = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(source.contains("export default function Template"));
    }

    #[tokio::test]
    async fn test_upload_rejects_non_zip_mime() {
        let app = TestApp::new();
        let (status, body) = app.upload("text/plain", b"hello").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_upload_without_manifest_is_rejected() {
        let app = TestApp::new();
        let archive = ZipFixture::new()
            .file("index.tsx", "export default () => null;")
            .build();
        let (status, body) = app.upload("application/zip", &archive).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "MANIFEST_NOT_FOUND");
        assert!(body["detail"].is_string());

        let (_, body) = app.json(Method::GET, "/api/templates", None).await;
        assert!(body["templates"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_rejected() {
        let app = TestApp::new();
        let oversized = vec![0u8; 1024 * 1024 + 1];
        let (status, body) = app.upload("application/zip", &oversized).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "PAYLOAD_TOO_LARGE");
    }

    #[tokio::test]
    async fn test_generate_then_download_once() {
        let app = TestApp::new();
        app.install_modern_minimal().await;

        let (status, body) = app
            .json(
                Method::POST,
                "/api/portfolio/generate-code",
                Some(generate_body("modern-minimal")),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["success"], true);
        assert_eq!(body["template"]["id"], "modern-minimal");
        assert_eq!(body["template"]["name"], "Modern Minimal");
        let file_name = body["fileName"].as_str().unwrap().to_string();
        assert!(file_name.starts_with("ada-lovelace-portfolio-"));
        let download_url = body["downloadUrl"].as_str().unwrap().to_string();
        assert_eq!(download_url, format!("/api/portfolio/download/{file_name}"));

        let response = app.get_raw(&download_url).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        let bytes = body_bytes(response).await;

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut app_tsx = String::new();
        archive
            .by_name("src/App.tsx")
            .unwrap()
            .read_to_string(&mut app_tsx)
            .unwrap();
        assert!(app_tsx.contains("modern-minimal"));
        assert!(archive.by_name("package.json").is_ok());

        let (status, body) = app.json(Method::GET, &download_url, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "DOWNLOAD_FILE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_generate_for_unknown_template_is_not_found() {
        let app = TestApp::new();
        let (status, body) = app
            .json(
                Method::POST,
                "/api/portfolio/generate-code",
                Some(generate_body("does-not-exist")),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "TEMPLATE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_generate_requires_template_id() {
        let app = TestApp::new();
        let (status, _) = app
            .json(
                Method::POST,
                "/api/portfolio/generate-code",
                Some(json!({"portfolioData": {}})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_download_rejects_unsafe_file_names() {
        let app = TestApp::new();
        for name in ["x..zip", "..%2Fregistry.zip", ".hidden.zip", "archive.tar"] {
            let (status, body) = app
                .json(Method::GET, &format!("/api/portfolio/download/{name}"), None)
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{name}");
            assert_eq!(body["error"], "INVALID_FILE_NAME", "{name}");
        }
    }

    #[tokio::test]
    async fn test_generate_with_very_long_name() {
        let app = TestApp::new();
        app.install_modern_minimal().await;

        let body = json!({
            "portfolioData": {"personal": {"name": "Maria ".repeat(20)}},
            "templateId": "modern-minimal"
        });
        let (status, body) = app
            .json(Method::POST, "/api/portfolio/generate-code", Some(body))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let file_name = body["fileName"].as_str().unwrap();
        assert!(file_name.starts_with("maria-maria-"));
        assert!(file_name.len() <= 128);

        let response = app
            .get_raw(body["downloadUrl"].as_str().unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_generate_accepts_explicit_nulls() {
        let app = TestApp::new();
        app.install_modern_minimal().await;

        let body = json!({
            "portfolioData": {
                "personal": {"name": "Ada", "phone": null},
                "skills": null,
                "social": {"github": null}
            },
            "templateId": "modern-minimal"
        });
        let (status, body) = app
            .json(Method::POST, "/api/portfolio/code-view", Some(body))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body["structure"]["src/data/portfolioData.ts"]
            .as_str()
            .unwrap()
            .contains("\"name\": \"Ada\""));
    }

    #[tokio::test]
    async fn test_malformed_body_keeps_error_envelope() {
        let app = TestApp::new();
        let (status, body) = app
            .json(
                Method::POST,
                "/api/portfolio/generate-code",
                Some(json!({"portfolioData": {"skills": 5}, "templateId": "modern-minimal"})),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "INVALID_REQUEST_BODY");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_code_view_returns_tree() {
        let app = TestApp::new();
        app.install_modern_minimal().await;

        let (status, body) = app
            .json(
                Method::POST,
                "/api/portfolio/code-view",
                Some(generate_body("modern-minimal")),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["structure"]["package.json"].is_string());
        assert!(body["structure"]["src/data/portfolioData.ts"]
            .as_str()
            .unwrap()
            .contains("Ada Lovelace"));
        let folders: Vec<&str> = body["folders"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(folders.contains(&"src/components"));
    }

    #[tokio::test]
    async fn test_toggle_hides_template_from_users() {
        let app = TestApp::new();
        app.install_modern_minimal().await;

        let (status, body) = app
            .json(Method::PATCH, "/api/admin/templates/modern-minimal/toggle", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["template"]["isActive"], false);

        let (_, body) = app.json(Method::GET, "/api/templates", None).await;
        assert!(body["templates"].as_array().unwrap().is_empty());
        let (status, _) = app
            .json(Method::GET, "/api/templates/modern-minimal", None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app
            .json(
                Method::POST,
                "/api/portfolio/generate-code",
                Some(generate_body("modern-minimal")),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = app.json(Method::GET, "/api/admin/templates", None).await;
        assert_eq!(body["database"][0]["isActive"], false);

        let (_, body) = app
            .json(Method::PATCH, "/api/admin/templates/modern-minimal/toggle", None)
            .await;
        assert_eq!(body["template"]["isActive"], true);
    }

    #[tokio::test]
    async fn test_delete_removes_template() {
        let app = TestApp::new();
        app.install_modern_minimal().await;

        let (status, body) = app
            .json(Method::DELETE, "/api/admin/templates/modern-minimal", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _) = app
            .json(Method::GET, "/api/templates/modern-minimal", None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let response = app.get_raw("/templates/modern-minimal/index.tsx").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let (status, body) = app
            .json(Method::DELETE, "/api/admin/templates/modern-minimal", None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "TEMPLATE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_concurrent_toggles_are_not_lost() {
        let app = TestApp::new();
        app.install_modern_minimal().await;

        let toggles = (0..4).map(|_| {
            app.json(Method::PATCH, "/api/admin/templates/modern-minimal/toggle", None)
        });
        for (status, _) in futures_util::future::join_all(toggles).await {
            assert_eq!(status, StatusCode::OK);
        }

        let (_, body) = app
            .json(Method::GET, "/api/templates/modern-minimal", None)
            .await;
        assert_eq!(body["template"]["isActive"], true);
    }

    #[tokio::test]
    async fn test_failed_uninstall_keeps_catalog_row() {
        let app = TestApp::new();
        app.install_modern_minimal().await;
        tokio::fs::write(app.state.registry.path(), b"[oops")
            .await
            .unwrap();

        let (status, body) = app
            .json(Method::DELETE, "/api/admin/templates/modern-minimal", None)
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);

        let rows = app.state.catalog.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(app
            .state
            .installer
            .template_dir("modern-minimal")
            .join("index.tsx")
            .is_file());
    }

    #[tokio::test]
    async fn test_delete_clears_catalog_only_leftovers() {
        let app = TestApp::new();
        app.install_modern_minimal().await;
        app.state.installer.uninstall("modern-minimal").await.unwrap();
        assert_eq!(app.state.catalog.list().await.unwrap().len(), 1);

        let (status, body) = app
            .json(Method::DELETE, "/api/admin/templates/modern-minimal", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(app.state.catalog.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parse_resume_without_llm_is_unavailable() {
        let app = TestApp::new();
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"resumeText\"\r\n\r\n\
             Ada Lovelace\r\n--{BOUNDARY}--\r\n"
        );
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/portfolio/parse-resume")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, body) = json_of(app.send(request).await).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "SERVICE_UNAVAILABLE");
    }
}
