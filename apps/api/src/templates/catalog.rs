//! Relational catalog of installed templates.
//!
//! The registry document stays the source of truth for what is installed;
//! the catalog mirrors each install so the admin listing can show database
//! state next to registry state. Postgres in production, in-memory when no
//! `DATABASE_URL` is configured.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tokio::sync::Mutex;

use crate::templates::registry::TemplateRegistryEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRow {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: String,
    pub is_premium: bool,
    pub is_active: bool,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TemplateRegistryEntry> for TemplateRow {
    fn from(entry: &TemplateRegistryEntry) -> Self {
        Self {
            id: entry.manifest.id.clone(),
            name: entry.manifest.name.clone(),
            version: entry.manifest.version.clone(),
            category: entry.manifest.category.clone(),
            is_premium: entry.manifest.is_premium,
            is_active: entry.is_active,
            uploaded_at: entry.uploaded_at,
            updated_at: entry.updated_at,
        }
    }
}

#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    /// Inserts or refreshes the row for a freshly installed template.
    async fn record_install(&self, entry: &TemplateRegistryEntry) -> Result<TemplateRow>;

    async fn list(&self) -> Result<Vec<TemplateRow>>;

    async fn set_active(&self, id: &str, is_active: bool) -> Result<Option<TemplateRow>>;

    /// Returns whether a row was deleted.
    async fn delete(&self, id: &str) -> Result<bool>;
}

pub struct PgTemplateCatalog {
    pool: PgPool,
}

impl PgTemplateCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateCatalog for PgTemplateCatalog {
    async fn record_install(&self, entry: &TemplateRegistryEntry) -> Result<TemplateRow> {
        let row = TemplateRow::from(entry);
        Ok(sqlx::query_as::<_, TemplateRow>(
            r#"
            INSERT INTO portfolio_templates
                (id, name, version, category, is_premium, is_active, uploaded_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                version = EXCLUDED.version,
                category = EXCLUDED.category,
                is_premium = EXCLUDED.is_premium,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.version)
        .bind(&row.category)
        .bind(row.is_premium)
        .bind(row.is_active)
        .bind(row.uploaded_at)
        .bind(row.updated_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn list(&self) -> Result<Vec<TemplateRow>> {
        Ok(sqlx::query_as::<_, TemplateRow>(
            "SELECT * FROM portfolio_templates ORDER BY uploaded_at DESC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn set_active(&self, id: &str, is_active: bool) -> Result<Option<TemplateRow>> {
        Ok(sqlx::query_as::<_, TemplateRow>(
            "UPDATE portfolio_templates SET is_active = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
        )
        .bind(is_active)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM portfolio_templates WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Default)]
pub struct InMemoryTemplateCatalog {
    rows: Mutex<BTreeMap<String, TemplateRow>>,
}

#[async_trait]
impl TemplateCatalog for InMemoryTemplateCatalog {
    async fn record_install(&self, entry: &TemplateRegistryEntry) -> Result<TemplateRow> {
        let row = TemplateRow::from(entry);
        self.rows.lock().await.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn list(&self) -> Result<Vec<TemplateRow>> {
        let mut rows: Vec<_> = self.rows.lock().await.values().cloned().collect();
        rows.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(rows)
    }

    async fn set_active(&self, id: &str, is_active: bool) -> Result<Option<TemplateRow>> {
        let mut rows = self.rows.lock().await;
        Ok(rows.get_mut(id).map(|row| {
            row.is_active = is_active;
            row.updated_at = Utc::now();
            row.clone()
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.rows.lock().await.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::manifest;

    fn entry(id: &str) -> TemplateRegistryEntry {
        let now = Utc::now();
        TemplateRegistryEntry {
            manifest: manifest::validate(
                format!(
                    r#"{{"id": "{id}", "name": "N", "version": "1.0.0",
                        "category": "creative", "entryFile": "index.tsx", "isPremium": true}}"#
                )
                .as_bytes(),
            )
            .unwrap(),
            manifest_path: format!("/templates/{id}/manifest.json"),
            entry_path: format!("/templates/{id}/index.tsx"),
            is_active: true,
            uploaded_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_mirrors_registry_entry() {
        let row = TemplateRow::from(&entry("creative-one"));
        assert_eq!(row.id, "creative-one");
        assert_eq!(row.category, "creative");
        assert!(row.is_premium);
        assert!(row.is_active);
    }

    #[tokio::test]
    async fn test_in_memory_catalog_lifecycle() {
        let catalog = InMemoryTemplateCatalog::default();
        catalog.record_install(&entry("a")).await.unwrap();
        catalog.record_install(&entry("a")).await.unwrap();
        assert_eq!(catalog.list().await.unwrap().len(), 1);

        let toggled = catalog.set_active("a", false).await.unwrap().unwrap();
        assert!(!toggled.is_active);
        assert!(catalog.set_active("missing", true).await.unwrap().is_none());

        assert!(catalog.delete("a").await.unwrap());
        assert!(!catalog.delete("a").await.unwrap());
        assert!(catalog.list().await.unwrap().is_empty());
    }
}
