//! Shared multi-user store
//!
//! [`SharedStore`] is the boundary to the storage every collaborator sees:
//! a document table keyed by project id plus relational membership and
//! invite tables. Each method is one atomic remote call. The store is the
//! arbiter of write access: [`SharedStore::replace_project`] re-checks the
//! writer's role itself and never trusts the caller's check.
//!
//! [`SqliteSharedStore`] implements it over a SQLite database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;

use crate::document::Document;
use crate::models::{new_id, Identity, InviteCode, Membership, Project, Role, Translations};
use crate::retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::{db, time, Error, Result};

/// A project record in shared storage
#[derive(Debug, Clone, PartialEq)]
pub struct SharedProject {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub master_language: String,
    pub target_languages: Vec<String>,
    pub master_data: Document,
    pub translations: Arc<Translations>,
    /// Incremented on every replacement
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl SharedProject {
    /// Shared record carrying the content of `project`, owned by `owner_id`
    pub fn from_project(project: &Project, owner_id: &str) -> Self {
        Self {
            id: project
                .cloud_project_id
                .clone()
                .unwrap_or_else(|| project.id.clone()),
            owner_id: owner_id.to_string(),
            name: project.name.clone(),
            master_language: project.master_language.clone(),
            target_languages: project.target_languages.clone(),
            master_data: project.master_data.clone(),
            translations: Arc::clone(&project.translations),
            version: project.shared_version.unwrap_or(0),
            updated_at: project.last_modified,
        }
    }

    /// The unified shape used by editing sessions
    pub fn into_project(self) -> Result<Project> {
        let mut project = Project {
            id: self.id.clone(),
            name: self.name,
            master_language: self.master_language,
            target_languages: self.target_languages,
            master_data: self.master_data,
            translations: self.translations,
            last_modified: self.updated_at,
            cloud_project_id: Some(self.id),
            shared_version: Some(self.version),
        };
        project.normalize()?;
        Ok(project)
    }
}

/// Result of the atomic redeem step of a join
#[derive(Debug, Clone, PartialEq)]
pub enum RedeemOutcome {
    /// Counter incremented and membership created together
    Granted(Membership),
    /// `uses` changed since the invite was read; nothing was written
    Conflict,
    /// A membership for this user and project exists; nothing was written
    AlreadyMember,
}

/// Shared storage transport
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Create or refresh the caller's profile
    async fn upsert_profile(&self, identity: &Identity) -> Result<()>;

    async fn has_profile(&self, user_id: &str) -> Result<bool>;

    /// Insert a new project record (version 1)
    async fn create_project(&self, project: &SharedProject) -> Result<SharedProject>;

    async fn fetch_project(&self, id: &str) -> Result<Option<SharedProject>>;

    /// Whole-document replacement by `actor_id`
    ///
    /// Fails with `PermissionDenied` unless the actor is the owner or an
    /// editor, and with `VersionConflict` when `expected_version` is given
    /// and differs from the stored version.
    async fn replace_project(
        &self,
        actor_id: &str,
        project: &SharedProject,
        expected_version: Option<i64>,
    ) -> Result<SharedProject>;

    /// Projects the user owns or is a member of
    async fn projects_for_user(&self, user_id: &str) -> Result<Vec<SharedProject>>;

    async fn membership(&self, project_id: &str, user_id: &str) -> Result<Option<Membership>>;

    async fn list_members(&self, project_id: &str) -> Result<Vec<Membership>>;

    async fn remove_member(&self, project_id: &str, user_id: &str) -> Result<bool>;

    /// Store a new invite; false if the code is already taken
    async fn insert_invite(&self, invite: &InviteCode) -> Result<bool>;

    async fn find_invite(&self, code: &str) -> Result<Option<InviteCode>>;

    async fn code_exists(&self, code: &str) -> Result<bool>;

    async fn list_invites(&self, project_id: &str) -> Result<Vec<InviteCode>>;

    /// Delete an invite; granted memberships are untouched
    async fn delete_invite(&self, code: &str) -> Result<bool>;

    /// Atomically increment `uses` (only if still equal to `invite.uses`
    /// and below `max_uses`) and create the membership
    async fn redeem_invite(&self, invite: &InviteCode, user_id: &str) -> Result<RedeemOutcome>;
}

/// [`SharedStore`] over a SQLite database
#[derive(Clone)]
pub struct SqliteSharedStore {
    pool: SqlitePool,
    lock_wait_ms: u64,
}

const PROJECT_COLUMNS: &str = "id, owner_id, name, master_language, target_languages, \
                               master_data, translations, version, updated_at";

const INVITE_COLUMNS: &str =
    "code, project_id, role, max_uses, uses, expires_at, created_by, created_at";

impl SqliteSharedStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = db::init_shared_database(db_path).await?;
        Ok(Self::new(pool))
    }

    pub fn with_lock_wait_ms(mut self, lock_wait_ms: u64) -> Self {
        self.lock_wait_ms = lock_wait_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Explain why a guarded replacement touched no row
    async fn diagnose_rejected_write(
        &self,
        actor_id: &str,
        project_id: &str,
        expected_version: Option<i64>,
    ) -> Error {
        let current = match self.fetch_project(project_id).await {
            Ok(Some(current)) => current,
            Ok(None) => return Error::ProjectNotFound(project_id.to_string()),
            Err(e) => return e,
        };

        let is_editor = match self.membership(project_id, actor_id).await {
            Ok(membership) => membership.is_some_and(|m| m.role.can_edit()),
            Err(e) => return e,
        };
        if current.owner_id != actor_id && !is_editor {
            return Error::PermissionDenied(format!(
                "user {} may not modify project {}",
                actor_id, project_id
            ));
        }

        match expected_version {
            Some(expected) if expected != current.version => Error::VersionConflict {
                project_id: project_id.to_string(),
                expected,
                found: current.version,
            },
            _ => Error::StorageUnavailable(format!(
                "write to project {} was rejected, retry",
                project_id
            )),
        }
    }
}

#[async_trait]
impl SharedStore for SqliteSharedStore {
    async fn upsert_profile(&self, identity: &Identity) -> Result<()> {
        let pool = &self.pool;
        let created_at = time::to_storage(&time::now());
        let created_at = created_at.as_str();

        retry_on_lock("upsert_profile", self.lock_wait_ms, || async move {
            sqlx::query(
                r#"
                INSERT INTO profiles (user_id, email, name, created_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(user_id) DO UPDATE SET
                    email = COALESCE(excluded.email, profiles.email),
                    name = COALESCE(excluded.name, profiles.name)
                "#,
            )
            .bind(&identity.user_id)
            .bind(&identity.email)
            .bind(&identity.name)
            .bind(created_at)
            .execute(pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn has_profile(&self, user_id: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM profiles WHERE user_id = ?)")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn create_project(&self, project: &SharedProject) -> Result<SharedProject> {
        let mut created = project.clone();
        created.version = 1;
        created.updated_at = time::now();

        let target_languages = serde_json::to_string(&created.target_languages)?;
        let master_data = created.master_data.to_json_string()?;
        let translations = serde_json::to_string(&*created.translations)?;
        let stamp = time::to_storage(&created.updated_at);

        let pool = &self.pool;
        let record = &created;
        let (target_languages, master_data, translations, stamp) = (
            target_languages.as_str(),
            master_data.as_str(),
            translations.as_str(),
            stamp.as_str(),
        );

        retry_on_lock("create_shared_project", self.lock_wait_ms, || async move {
            sqlx::query(
                r#"
                INSERT INTO shared_projects (
                    id, owner_id, name, master_language, target_languages,
                    master_data, translations, version, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
                "#,
            )
            .bind(&record.id)
            .bind(&record.owner_id)
            .bind(&record.name)
            .bind(&record.master_language)
            .bind(target_languages)
            .bind(master_data)
            .bind(translations)
            .bind(stamp)
            .bind(stamp)
            .execute(pool)
            .await?;
            Ok(())
        })
        .await
        .map_err(|e| {
            if e.is_unique_violation() {
                Error::AlreadyPromoted(created.id.clone())
            } else {
                e
            }
        })?;

        Ok(created)
    }

    async fn fetch_project(&self, id: &str) -> Result<Option<SharedProject>> {
        let sql = format!("SELECT {} FROM shared_projects WHERE id = ?", PROJECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(shared_project_from_row).transpose()
    }

    async fn replace_project(
        &self,
        actor_id: &str,
        project: &SharedProject,
        expected_version: Option<i64>,
    ) -> Result<SharedProject> {
        let mut replaced = project.clone();
        replaced.updated_at = time::now();

        let target_languages = serde_json::to_string(&replaced.target_languages)?;
        let master_data = replaced.master_data.to_json_string()?;
        let translations = serde_json::to_string(&*replaced.translations)?;
        let stamp = time::to_storage(&replaced.updated_at);

        let pool = &self.pool;
        let record = &replaced;
        let (target_languages, master_data, translations, stamp) = (
            target_languages.as_str(),
            master_data.as_str(),
            translations.as_str(),
            stamp.as_str(),
        );

        // Role and version are checked by the same statement that writes
        let new_version: Option<i64> =
            retry_on_lock("replace_shared_project", self.lock_wait_ms, || async move {
                let version: Option<i64> = sqlx::query_scalar(
                    r#"
                    UPDATE shared_projects SET
                        name = ?,
                        master_language = ?,
                        target_languages = ?,
                        master_data = ?,
                        translations = ?,
                        version = version + 1,
                        updated_at = ?
                    WHERE id = ?
                      AND (
                        owner_id = ?
                        OR EXISTS (
                            SELECT 1 FROM memberships
                            WHERE memberships.project_id = shared_projects.id
                              AND memberships.user_id = ?
                              AND memberships.role = 'editor'
                        )
                      )
                      AND (? IS NULL OR version = ?)
                    RETURNING version
                    "#,
                )
                .bind(&record.name)
                .bind(&record.master_language)
                .bind(target_languages)
                .bind(master_data)
                .bind(translations)
                .bind(stamp)
                .bind(&record.id)
                .bind(actor_id)
                .bind(actor_id)
                .bind(expected_version)
                .bind(expected_version)
                .fetch_optional(pool)
                .await?;
                Ok(version)
            })
            .await?;

        match new_version {
            Some(version) => {
                replaced.version = version;
                Ok(replaced)
            }
            None => Err(self
                .diagnose_rejected_write(actor_id, &project.id, expected_version)
                .await),
        }
    }

    async fn projects_for_user(&self, user_id: &str) -> Result<Vec<SharedProject>> {
        let sql = format!(
            "SELECT {} FROM shared_projects \
             WHERE owner_id = ? \
                OR id IN (SELECT project_id FROM memberships WHERE user_id = ?)",
            PROJECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(shared_project_from_row).collect()
    }

    async fn membership(&self, project_id: &str, user_id: &str) -> Result<Option<Membership>> {
        let row = sqlx::query(
            "SELECT id, project_id, user_id, role, created_at FROM memberships \
             WHERE project_id = ? AND user_id = ?",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(membership_from_row).transpose()
    }

    async fn list_members(&self, project_id: &str) -> Result<Vec<Membership>> {
        let rows = sqlx::query(
            "SELECT id, project_id, user_id, role, created_at FROM memberships \
             WHERE project_id = ? ORDER BY created_at",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(membership_from_row).collect()
    }

    async fn remove_member(&self, project_id: &str, user_id: &str) -> Result<bool> {
        let pool = &self.pool;
        retry_on_lock("remove_member", self.lock_wait_ms, || async move {
            let result = sqlx::query("DELETE FROM memberships WHERE project_id = ? AND user_id = ?")
                .bind(project_id)
                .bind(user_id)
                .execute(pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn insert_invite(&self, invite: &InviteCode) -> Result<bool> {
        let pool = &self.pool;
        let expires_at = invite.expires_at.as_ref().map(time::to_storage);
        let created_at = time::to_storage(&invite.created_at);
        let (expires_at, created_at) = (expires_at.as_deref(), created_at.as_str());

        retry_on_lock("insert_invite", self.lock_wait_ms, || async move {
            let result = sqlx::query(
                r#"
                INSERT INTO invite_codes (
                    code, project_id, role, max_uses, uses, expires_at, created_by, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(code) DO NOTHING
                "#,
            )
            .bind(&invite.code)
            .bind(&invite.project_id)
            .bind(invite.role.as_str())
            .bind(invite.max_uses.map(i64::from))
            .bind(i64::from(invite.uses))
            .bind(expires_at)
            .bind(&invite.created_by_id)
            .bind(created_at)
            .execute(pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn find_invite(&self, code: &str) -> Result<Option<InviteCode>> {
        let sql = format!("SELECT {} FROM invite_codes WHERE code = ?", INVITE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(invite_from_row).transpose()
    }

    async fn code_exists(&self, code: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM invite_codes WHERE code = ?)")
                .bind(code)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn list_invites(&self, project_id: &str) -> Result<Vec<InviteCode>> {
        let sql = format!(
            "SELECT {} FROM invite_codes WHERE project_id = ? ORDER BY created_at",
            INVITE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(invite_from_row).collect()
    }

    async fn delete_invite(&self, code: &str) -> Result<bool> {
        let pool = &self.pool;
        retry_on_lock("delete_invite", self.lock_wait_ms, || async move {
            let result = sqlx::query("DELETE FROM invite_codes WHERE code = ?")
                .bind(code)
                .execute(pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn redeem_invite(&self, invite: &InviteCode, user_id: &str) -> Result<RedeemOutcome> {
        let pool = &self.pool;

        retry_on_lock("redeem_invite", self.lock_wait_ms, || async move {
            let membership = Membership {
                id: new_id(),
                project_id: invite.project_id.clone(),
                user_id: user_id.to_string(),
                role: invite.role,
                created_at: time::now(),
            };

            let mut tx = pool.begin().await?;

            // Write first so the transaction takes the write lock up front
            let bumped = sqlx::query(
                r#"
                UPDATE invite_codes SET uses = uses + 1
                WHERE code = ?
                  AND uses = ?
                  AND (max_uses IS NULL OR uses < max_uses)
                "#,
            )
            .bind(&invite.code)
            .bind(i64::from(invite.uses))
            .execute(&mut *tx)
            .await?;

            if bumped.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(RedeemOutcome::Conflict);
            }

            let inserted = sqlx::query(
                r#"
                INSERT INTO memberships (id, project_id, user_id, role, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(project_id, user_id) DO NOTHING
                "#,
            )
            .bind(&membership.id)
            .bind(&membership.project_id)
            .bind(&membership.user_id)
            .bind(membership.role.as_str())
            .bind(time::to_storage(&membership.created_at))
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(RedeemOutcome::AlreadyMember);
            }

            tx.commit().await?;
            Ok(RedeemOutcome::Granted(membership))
        })
        .await
    }
}

fn shared_project_from_row(row: &SqliteRow) -> Result<SharedProject> {
    let target_languages: String = row.try_get("target_languages")?;
    let master_data: String = row.try_get("master_data")?;
    let translations: String = row.try_get("translations")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(SharedProject {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        master_language: row.try_get("master_language")?,
        target_languages: serde_json::from_str(&target_languages)?,
        master_data: serde_json::from_str(&master_data)?,
        translations: serde_json::from_str(&translations)?,
        version: row.try_get("version")?,
        updated_at: time::from_storage(&updated_at)?,
    })
}

fn membership_from_row(row: &SqliteRow) -> Result<Membership> {
    let role: String = row.try_get("role")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(Membership {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        user_id: row.try_get("user_id")?,
        role: role.parse::<Role>()?,
        created_at: time::from_storage(&created_at)?,
    })
}

fn invite_from_row(row: &SqliteRow) -> Result<InviteCode> {
    let role: String = row.try_get("role")?;
    let max_uses: Option<i64> = row.try_get("max_uses")?;
    let uses: i64 = row.try_get("uses")?;
    let expires_at: Option<String> = row.try_get("expires_at")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(InviteCode {
        code: row.try_get("code")?,
        project_id: row.try_get("project_id")?,
        role: role.parse::<Role>()?,
        max_uses: max_uses.map(|n| n.clamp(0, u32::MAX as i64) as u32),
        uses: uses.clamp(0, u32::MAX as i64) as u32,
        expires_at: expires_at.as_deref().map(time::from_storage).transpose()?,
        created_by_id: row.try_get("created_by")?,
        created_at: time::from_storage(&created_at)?,
    })
}
