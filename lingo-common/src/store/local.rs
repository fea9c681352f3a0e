//! Profile-local project store
//!
//! System of record for projects that have not been promoted. Whole
//! project records are stored keyed by id; every operation is atomic at the
//! single-record level.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::models::Project;
use crate::retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::{db, time, Result};

/// Durable key/value persistence of whole [`Project`] records
#[derive(Clone)]
pub struct ProjectStore {
    pool: SqlitePool,
    lock_wait_ms: u64,
}

impl ProjectStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    /// Open (or create) the store at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = db::init_local_database(db_path).await?;
        Ok(Self::new(pool))
    }

    pub fn with_lock_wait_ms(mut self, lock_wait_ms: u64) -> Self {
        self.lock_wait_ms = lock_wait_ms;
        self
    }

    /// Upsert; the stored copy gets `last_modified` = now and is returned
    pub async fn save(&self, project: &Project) -> Result<Project> {
        let mut stored = project.clone();
        stored.last_modified = time::now();

        // Serialize before touching the database
        let target_languages = serde_json::to_string(&stored.target_languages)?;
        let master_data = stored.master_data.to_json_string()?;
        let translations = serde_json::to_string(&*stored.translations)?;
        let last_modified = time::to_storage(&stored.last_modified);

        let pool = &self.pool;
        let record = &stored;
        let (target_languages, master_data, translations, last_modified) = (
            target_languages.as_str(),
            master_data.as_str(),
            translations.as_str(),
            last_modified.as_str(),
        );

        retry_on_lock("save_project", self.lock_wait_ms, || async move {
            sqlx::query(
                r#"
                INSERT INTO projects (
                    id, name, master_language, target_languages, master_data,
                    translations, last_modified, cloud_project_id, shared_version
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    master_language = excluded.master_language,
                    target_languages = excluded.target_languages,
                    master_data = excluded.master_data,
                    translations = excluded.translations,
                    last_modified = excluded.last_modified,
                    cloud_project_id = excluded.cloud_project_id,
                    shared_version = excluded.shared_version
                "#,
            )
            .bind(&record.id)
            .bind(&record.name)
            .bind(&record.master_language)
            .bind(target_languages)
            .bind(master_data)
            .bind(translations)
            .bind(last_modified)
            .bind(&record.cloud_project_id)
            .bind(record.shared_version)
            .execute(pool)
            .await?;
            Ok(())
        })
        .await?;

        tracing::debug!(project_id = %stored.id, "Saved project to local store");
        Ok(stored)
    }

    pub async fn load(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, master_language, target_languages, master_data,
                   translations, last_modified, cloud_project_id, shared_version
            FROM projects
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(project_from_row).transpose()
    }

    /// All stored projects, in no particular order
    pub async fn list(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, master_language, target_languages, master_data,
                   translations, last_modified, cloud_project_id, shared_version
            FROM projects
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(project_from_row).collect()
    }

    /// Returns true if a record was removed
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let pool = &self.pool;
        let removed = retry_on_lock("delete_project", self.lock_wait_ms, || async move {
            let result = sqlx::query("DELETE FROM projects WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await?;

        if removed {
            tracing::debug!(project_id = %id, "Deleted project from local store");
        }
        Ok(removed)
    }
}

fn project_from_row(row: &SqliteRow) -> Result<Project> {
    let target_languages: String = row.try_get("target_languages")?;
    let master_data: String = row.try_get("master_data")?;
    let translations: String = row.try_get("translations")?;
    let last_modified: String = row.try_get("last_modified")?;

    let mut project = Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        master_language: row.try_get("master_language")?,
        target_languages: serde_json::from_str(&target_languages)?,
        master_data: serde_json::from_str(&master_data)?,
        translations: serde_json::from_str(&translations)?,
        last_modified: time::from_storage(&last_modified)?,
        cloud_project_id: row.try_get("cloud_project_id")?,
        shared_version: row.try_get("shared_version")?,
    };
    project.normalize()?;
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    async fn store() -> (tempfile::TempDir, ProjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(&dir.path().join("projects.db")).await.unwrap();
        (dir, store)
    }

    fn sample() -> Project {
        let master = Document::parse(r#"{"nav": {"home": "Home", "back": "Back"}, "tags": ["x"]}"#)
            .unwrap();
        let mut project = Project::new("Website", "en", &["de", "fr"], master).unwrap();
        project
            .set_translation("de", "nav.home", Document::from("Startseite"))
            .unwrap();
        project
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let (_dir, store) = store().await;
        let project = sample();

        let saved = store.save(&project).await.unwrap();
        assert!(saved.last_modified >= project.last_modified);

        let loaded = store.load(&project.id).await.unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.leaf_paths().unwrap(), vec!["nav.home", "nav.back", "tags"]);
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let (_dir, store) = store().await;
        let mut project = sample();
        store.save(&project).await.unwrap();

        project.name = "Renamed".to_string();
        project
            .set_translation("fr", "nav.back", Document::from("Retour"))
            .unwrap();
        store.save(&project).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Renamed");
        assert_eq!(all[0].translation("fr", "nav.back"), Some(&Document::from("Retour")));
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let (_dir, store) = store().await;
        assert!(store.load("does-not-exist").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, store) = store().await;
        let project = sample();
        store.save(&project).await.unwrap();

        assert!(store.delete(&project.id).await.unwrap());
        assert!(!store.delete(&project.id).await.unwrap());
        assert!(store.load(&project.id).await.unwrap().is_none());
    }
}
