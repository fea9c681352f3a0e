//! Dual-store synchronization
//!
//! A project is either local-only (the [`ProjectStore`] is its system of
//! record) or promoted (shared storage is authoritative and the local store
//! keeps a working copy). Promotion happens once and is never reversed.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::{Identity, Project, Role};
use crate::store::{ProjectStore, SharedProject, SharedStore};
use crate::{Error, Result};

/// What happens when two sessions write the same shared project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Whole-document replacement; the later write wins
    #[default]
    LastWriterWins,
    /// Writes carry the version they were derived from and fail with
    /// `VersionConflict` when shared storage has moved on
    RejectStale,
}

/// Which store a project should be opened from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectRef {
    Local(String),
    Shared(String),
}

/// A project opened for editing with the caller's resolved role
#[derive(Debug, Clone, PartialEq)]
pub struct EditingSession {
    pub project: Project,
    pub role: Role,
}

impl EditingSession {
    pub fn can_edit(&self) -> bool {
        self.role.can_edit()
    }
}

/// Decides which store is authoritative and keeps both in step
#[derive(Clone)]
pub struct DualStoreSync {
    local: ProjectStore,
    shared: Arc<dyn SharedStore>,
    policy: ConflictPolicy,
}

impl DualStoreSync {
    pub fn new(local: ProjectStore, shared: Arc<dyn SharedStore>) -> Self {
        Self {
            local,
            shared,
            policy: ConflictPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    pub fn local(&self) -> &ProjectStore {
        &self.local
    }

    pub fn shared(&self) -> &Arc<dyn SharedStore> {
        &self.shared
    }

    /// Move a local project into shared storage, owned by `identity`
    ///
    /// The local record is removed once the shared record exists. A failed
    /// local delete is logged and repaired on the next load.
    pub async fn promote(&self, identity: &Identity, project: &Project) -> Result<Project> {
        if project.is_promoted() {
            return Err(Error::AlreadyPromoted(project.id.clone()));
        }
        if !identity.has_profile() {
            return Err(Error::PromotionDenied(format!(
                "user {} has no established profile",
                identity.user_id
            )));
        }

        // A local record left behind after an earlier promotion
        if let Some(existing) = self.shared.fetch_project(&project.id).await? {
            if existing.owner_id != identity.user_id {
                return Err(Error::AlreadyPromoted(project.id.clone()));
            }
            info!(project_id = %existing.id, "Project already in shared storage, dropping local copy");
            self.drop_local_copy(&project.id).await;
            return existing.into_project();
        }

        self.shared.upsert_profile(identity).await?;
        let created = self
            .shared
            .create_project(&SharedProject::from_project(project, &identity.user_id))
            .await?;
        self.drop_local_copy(&project.id).await;

        info!(project_id = %created.id, owner = %identity.user_id, "Promoted project to shared storage");
        created.into_project()
    }

    async fn drop_local_copy(&self, id: &str) {
        if let Err(e) = self.local.delete(id).await {
            warn!(
                project_id = %id,
                error = %e,
                "Promoted project but failed to remove local copy"
            );
        }
    }

    /// Save `project`, returning the stored copy
    ///
    /// The local store is always written. Shared storage is written only for
    /// promoted projects and non-viewer roles. On error the caller still
    /// holds its unsaved `project`.
    pub async fn persist(&self, identity: &Identity, project: &Project, role: Role) -> Result<Project> {
        let stored = self.local.save(project).await?;

        let Some(cloud_id) = stored.cloud_project_id.clone() else {
            return Ok(stored);
        };
        if !role.can_edit() {
            debug!(project_id = %cloud_id, "Viewer edit kept local only");
            return Ok(stored);
        }

        let expected_version = match self.policy {
            ConflictPolicy::LastWriterWins => None,
            ConflictPolicy::RejectStale => stored.shared_version,
        };
        // Replacement never rewrites the recorded owner
        let record = SharedProject::from_project(&stored, &identity.user_id);
        let replaced = self
            .shared
            .replace_project(&identity.user_id, &record, expected_version)
            .await?;

        let mut synced = stored;
        synced.shared_version = Some(replaced.version);
        let synced = self.local.save(&synced).await?;
        debug!(project_id = %cloud_id, version = replaced.version, "Persisted project to shared storage");
        Ok(synced)
    }

    /// Open a project and resolve the caller's role on it
    pub async fn load_for_editing(
        &self,
        identity: &Identity,
        reference: ProjectRef,
    ) -> Result<EditingSession> {
        match reference {
            ProjectRef::Shared(id) => self.load_shared(identity, &id).await,
            ProjectRef::Local(id) => {
                let project = self
                    .local
                    .load(&id)
                    .await?
                    .ok_or_else(|| Error::ProjectNotFound(id.clone()))?;

                if let Some(cloud_id) = &project.cloud_project_id {
                    return self.load_shared(identity, cloud_id).await;
                }

                // Leftover of a promotion whose local delete did not happen
                match self.shared.fetch_project(&id).await {
                    Ok(Some(_)) => {
                        info!(project_id = %id, "Removing stale local copy of promoted project");
                        self.local.delete(&id).await?;
                        self.load_shared(identity, &id).await
                    }
                    Ok(None) => Ok(EditingSession {
                        project,
                        role: Role::Owner,
                    }),
                    Err(e) => {
                        warn!(project_id = %id, error = %e, "Shared storage unreachable, opening local copy");
                        Ok(EditingSession {
                            project,
                            role: Role::Owner,
                        })
                    }
                }
            }
        }
    }

    async fn load_shared(&self, identity: &Identity, id: &str) -> Result<EditingSession> {
        let record = self
            .shared
            .fetch_project(id)
            .await?
            .ok_or_else(|| Error::ProjectNotFound(id.to_string()))?;

        let role = if record.owner_id == identity.user_id {
            Role::Owner
        } else {
            match self.shared.membership(id, &identity.user_id).await? {
                Some(membership) => membership.role,
                None => {
                    warn!(
                        project_id = %id,
                        user = %identity.user_id,
                        "Caller is neither owner nor member, opening read-only"
                    );
                    Role::Viewer
                }
            }
        };

        Ok(EditingSession {
            project: record.into_project()?,
            role,
        })
    }

    /// Local-only projects plus every shared project the caller can open
    ///
    /// A shared record hides any local record with the same id.
    pub async fn list_projects(&self, identity: &Identity) -> Result<Vec<Project>> {
        let shared = self.shared.projects_for_user(&identity.user_id).await?;
        let shared_ids: HashSet<String> = shared.iter().map(|p| p.id.clone()).collect();

        let mut projects = shared
            .into_iter()
            .map(SharedProject::into_project)
            .collect::<Result<Vec<_>>>()?;

        for project in self.local.list().await? {
            let cloud_id = project.cloud_project_id.as_deref().unwrap_or(&project.id);
            if !shared_ids.contains(cloud_id) && !shared_ids.contains(&project.id) {
                projects.push(project);
            }
        }
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::store::SqliteSharedStore;

    async fn sync() -> (tempfile::TempDir, DualStoreSync) {
        let dir = tempfile::tempdir().unwrap();
        let local = ProjectStore::open(&dir.path().join("projects.db")).await.unwrap();
        let shared = SqliteSharedStore::open(&dir.path().join("shared.db")).await.unwrap();
        (dir, DualStoreSync::new(local, Arc::new(shared)))
    }

    fn owner() -> Identity {
        Identity::new("owner").with_profile(Some("owner@example.com".into()), None)
    }

    fn project() -> Project {
        let master = Document::parse(r#"{"title": "Title"}"#).unwrap();
        Project::new("Docs", "en", &["de"], master).unwrap()
    }

    #[test]
    fn test_conflict_policy_serde_names() {
        let json = serde_json::to_string(&ConflictPolicy::RejectStale).unwrap();
        assert_eq!(json, "\"reject_stale\"");
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::LastWriterWins);
    }

    #[tokio::test]
    async fn test_local_project_opens_as_owner() {
        let (_dir, sync) = sync().await;
        let project = project();
        sync.persist(&owner(), &project, Role::Owner).await.unwrap();

        let session = sync
            .load_for_editing(&owner(), ProjectRef::Local(project.id.clone()))
            .await
            .unwrap();
        assert_eq!(session.role, Role::Owner);
        assert!(!session.project.is_promoted());
    }

    #[tokio::test]
    async fn test_promote_moves_record() {
        let (_dir, sync) = sync().await;
        let project = project();
        sync.local().save(&project).await.unwrap();

        let promoted = sync.promote(&owner(), &project).await.unwrap();
        assert_eq!(promoted.cloud_project_id.as_deref(), Some(project.id.as_str()));
        assert_eq!(promoted.shared_version, Some(1));
        assert!(sync.local().load(&project.id).await.unwrap().is_none());

        let err = sync.promote(&owner(), &promoted).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyPromoted(_)));
    }

    #[tokio::test]
    async fn test_persist_promoted_bumps_shared_version() {
        let (_dir, sync) = sync().await;
        let mut project = sync.promote(&owner(), &project()).await.unwrap();
        project.set_translation("de", "title", Document::from("Titel")).unwrap();

        let stored = sync.persist(&owner(), &project, Role::Owner).await.unwrap();
        assert_eq!(stored.shared_version, Some(2));

        let shared = sync.shared().fetch_project(&project.id).await.unwrap().unwrap();
        assert_eq!(shared.version, 2);
        assert_eq!(shared.owner_id, "owner");
    }

    #[tokio::test]
    async fn test_unknown_local_project() {
        let (_dir, sync) = sync().await;
        let err = sync
            .load_for_editing(&owner(), ProjectRef::Local("nope".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProjectNotFound(_)));
    }
}
