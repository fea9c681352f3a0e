//! Invite codes and joining shared projects
//!
//! An owner hands out short codes; anyone holding one can attach
//! themselves to the project with the code's role. The uses counter and
//! the new membership are written together by
//! [`SharedStore::redeem_invite`], so a code limited to N uses never
//! grants more than N memberships however many joins race.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{Identity, InviteCode, Membership, Role};
use crate::store::{RedeemOutcome, SharedProject, SharedStore};
use crate::{time, Error, Result};

/// Code characters; 0/O and 1/I are left out
pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LENGTH: usize = 8;
pub const MAX_GENERATION_ATTEMPTS: usize = 10;
pub const MAX_JOIN_ATTEMPTS: usize = 10;

/// One random candidate code
pub fn random_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Canonical form of user-typed input
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Clone)]
pub struct MembershipProtocol {
    shared: Arc<dyn SharedStore>,
}

impl MembershipProtocol {
    pub fn new(shared: Arc<dyn SharedStore>) -> Self {
        Self { shared }
    }

    /// A code not currently present in shared storage
    pub async fn generate_code(&self) -> Result<String> {
        self.generate_code_with(random_code).await
    }

    /// [`generate_code`](Self::generate_code) with a caller-supplied candidate source
    pub async fn generate_code_with<F>(&self, mut next: F) -> Result<String>
    where
        F: FnMut() -> String + Send,
    {
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let candidate = next();
            if !self.shared.code_exists(&candidate).await? {
                return Ok(candidate);
            }
            debug!(attempt, "Invite code collision, drawing again");
        }
        Err(Error::CodeSpaceExhausted {
            attempts: MAX_GENERATION_ATTEMPTS,
        })
    }

    /// Owner creates an invite granting `role`
    pub async fn create_invite(
        &self,
        identity: &Identity,
        project_id: &str,
        role: Role,
        max_uses: Option<u32>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<InviteCode> {
        self.create_invite_with(identity, project_id, role, max_uses, expires_at, random_code)
            .await
    }

    /// [`create_invite`](Self::create_invite) with a caller-supplied candidate source
    ///
    /// A candidate taken between the existence check and the insert counts
    /// as a collision against the same attempt budget.
    pub async fn create_invite_with<F>(
        &self,
        identity: &Identity,
        project_id: &str,
        role: Role,
        max_uses: Option<u32>,
        expires_at: Option<DateTime<Utc>>,
        mut next: F,
    ) -> Result<InviteCode>
    where
        F: FnMut() -> String + Send,
    {
        if role == Role::Owner {
            return Err(Error::InvalidInput(
                "invites can grant editor or viewer only".to_string(),
            ));
        }
        if max_uses == Some(0) {
            return Err(Error::InvalidInput("max uses must be at least 1".to_string()));
        }
        self.require_owner(identity, project_id).await?;

        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let candidate = next();
            if self.shared.code_exists(&candidate).await? {
                debug!(attempt, "Invite code collision, drawing again");
                continue;
            }

            let invite = InviteCode {
                code: candidate,
                project_id: project_id.to_string(),
                role,
                max_uses,
                uses: 0,
                expires_at,
                created_by_id: identity.user_id.clone(),
                created_at: time::now(),
            };
            if self.shared.insert_invite(&invite).await? {
                info!(project_id, role = %role, "Created invite code");
                return Ok(invite);
            }
            debug!(attempt, "Invite code taken concurrently, drawing again");
        }
        Err(Error::CodeSpaceExhausted {
            attempts: MAX_GENERATION_ATTEMPTS,
        })
    }

    /// Owner deletes a code; memberships it granted remain
    pub async fn delete_invite(&self, identity: &Identity, code: &str) -> Result<()> {
        let code = normalize_code(code);
        let invite = self
            .shared
            .find_invite(&code)
            .await?
            .ok_or_else(|| Error::InvalidCode(code.clone()))?;
        self.require_owner(identity, &invite.project_id).await?;
        self.shared.delete_invite(&code).await?;
        info!(project_id = %invite.project_id, "Deleted invite code");
        Ok(())
    }

    pub async fn list_invites(&self, identity: &Identity, project_id: &str) -> Result<Vec<InviteCode>> {
        self.require_owner(identity, project_id).await?;
        self.shared.list_invites(project_id).await
    }

    /// Members of a project; visible to the owner and its members
    pub async fn list_members(&self, identity: &Identity, project_id: &str) -> Result<Vec<Membership>> {
        let project = self.fetch(project_id).await?;
        if project.owner_id != identity.user_id
            && self.shared.membership(project_id, &identity.user_id).await?.is_none()
        {
            return Err(Error::PermissionDenied(format!(
                "user {} cannot see members of project {}",
                identity.user_id, project_id
            )));
        }
        self.shared.list_members(project_id).await
    }

    /// Owner revokes a membership
    pub async fn remove_member(&self, identity: &Identity, project_id: &str, user_id: &str) -> Result<bool> {
        let project = self.require_owner(identity, project_id).await?;
        if project.owner_id == user_id {
            return Err(Error::InvalidInput(
                "the owner cannot be removed from a project".to_string(),
            ));
        }
        let removed = self.shared.remove_member(project_id, user_id).await?;
        if removed {
            info!(project_id, user = user_id, "Removed member");
        }
        Ok(removed)
    }

    /// Attach `identity` to the project behind `code`
    pub async fn join(&self, identity: &Identity, code: &str) -> Result<Membership> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(Error::InvalidCode(code));
        }

        for attempt in 1..=MAX_JOIN_ATTEMPTS {
            let invite = self
                .shared
                .find_invite(&code)
                .await?
                .ok_or_else(|| Error::InvalidCode(code.clone()))?;
            let project = self
                .shared
                .fetch_project(&invite.project_id)
                .await?
                .ok_or_else(|| Error::InvalidCode(code.clone()))?;

            if project.owner_id == identity.user_id {
                return Err(Error::AlreadyOwner(project.id));
            }
            if invite.is_expired(time::now()) {
                return Err(Error::CodeExpired(code));
            }
            if invite.is_exhausted() {
                return Err(Error::CodeExhausted(code));
            }
            if self
                .shared
                .membership(&project.id, &identity.user_id)
                .await?
                .is_some()
            {
                return Err(Error::AlreadyMember(project.id));
            }

            match self.shared.redeem_invite(&invite, &identity.user_id).await? {
                RedeemOutcome::Granted(membership) => {
                    info!(
                        project_id = %membership.project_id,
                        user = %membership.user_id,
                        role = %membership.role,
                        "Joined project"
                    );
                    return Ok(membership);
                }
                RedeemOutcome::AlreadyMember => return Err(Error::AlreadyMember(project.id)),
                RedeemOutcome::Conflict => {
                    debug!(attempt, "Invite changed concurrently, re-reading");
                }
            }
        }

        Err(Error::StorageUnavailable(format!(
            "join with code {} did not settle after {} attempts",
            code, MAX_JOIN_ATTEMPTS
        )))
    }

    async fn fetch(&self, project_id: &str) -> Result<SharedProject> {
        self.shared
            .fetch_project(project_id)
            .await?
            .ok_or_else(|| Error::ProjectNotFound(project_id.to_string()))
    }

    async fn require_owner(&self, identity: &Identity, project_id: &str) -> Result<SharedProject> {
        let project = self.fetch(project_id).await?;
        if project.owner_id != identity.user_id {
            return Err(Error::PermissionDenied(format!(
                "only the owner of project {} may manage it",
                project_id
            )));
        }
        Ok(project)
    }
}
