use std::sync::Arc;

use crate::config::Config;
use crate::llm_client::LlmClient;
use crate::portfolio::packager::DownloadStore;
use crate::portfolio::synthesizer::PortfolioSynthesizer;
use crate::templates::catalog::TemplateCatalog;
use crate::templates::installer::TemplateInstaller;
use crate::templates::registry::{TemplateRegistryStore, REGISTRY_FILE};

/// URL prefix under which installed templates are served.
pub const TEMPLATES_PUBLIC_PREFIX: &str = "/templates";

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<TemplateRegistryStore>,
    pub installer: Arc<TemplateInstaller>,
    /// Pluggable catalog. Postgres when `DATABASE_URL` is set, in-memory otherwise.
    pub catalog: Arc<dyn TemplateCatalog>,
    pub synthesizer: PortfolioSynthesizer,
    pub downloads: Arc<DownloadStore>,
    /// `None` when no API key is configured.
    pub llm: Option<LlmClient>,
}

impl AppState {
    pub fn new(config: Config, catalog: Arc<dyn TemplateCatalog>, llm: Option<LlmClient>) -> Self {
        let templates_dir = config.templates_dir();
        let registry = Arc::new(TemplateRegistryStore::new(templates_dir.join(REGISTRY_FILE)));
        let installer = Arc::new(TemplateInstaller::new(
            templates_dir,
            TEMPLATES_PUBLIC_PREFIX,
            registry.clone(),
        ));
        let synthesizer = PortfolioSynthesizer::new(registry.clone());
        let downloads = Arc::new(DownloadStore::new(config.downloads_dir()));

        Self {
            config,
            registry,
            installer,
            catalog,
            synthesizer,
            downloads,
            llm,
        }
    }
}
