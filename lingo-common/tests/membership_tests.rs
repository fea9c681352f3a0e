//! Invite codes and the join protocol against a SQLite shared store

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use lingo_common::document::Document;
use lingo_common::membership::{normalize_code, MembershipProtocol, MAX_GENERATION_ATTEMPTS};
use lingo_common::models::{Identity, InviteCode, Project, Role};
use lingo_common::store::{RedeemOutcome, SharedProject, SharedStore, SqliteSharedStore};
use lingo_common::{time, Error, Membership, Result};

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<SqliteSharedStore>,
    protocol: MembershipProtocol,
    project_id: String,
}

fn owner() -> Identity {
    Identity::new("owner").with_profile(None, Some("Owner".into()))
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteSharedStore::open(&dir.path().join("shared.db"))
            .await
            .unwrap(),
    );
    store.upsert_profile(&owner()).await.unwrap();

    let master = Document::parse(r#"{"hello": "Hello"}"#).unwrap();
    let project = Project::new("Shared", "en", &["de"], master).unwrap();
    let created = store
        .create_project(&SharedProject::from_project(&project, "owner"))
        .await
        .unwrap();

    Fixture {
        _dir: dir,
        protocol: MembershipProtocol::new(store.clone()),
        store,
        project_id: created.id,
    }
}

#[tokio::test]
async fn test_join_grants_invite_role() {
    let fx = fixture().await;
    let invite = fx
        .protocol
        .create_invite(&owner(), &fx.project_id, Role::Editor, Some(3), None)
        .await
        .unwrap();

    // Codes are accepted regardless of case and surrounding whitespace
    let typed = format!("  {}  ", invite.code.to_lowercase());
    let membership = fx.protocol.join(&Identity::new("alice"), &typed).await.unwrap();
    assert_eq!(membership.role, Role::Editor);
    assert_eq!(membership.project_id, fx.project_id);

    let stored = fx.store.find_invite(&invite.code).await.unwrap().unwrap();
    assert_eq!(stored.uses, 1);
}

#[tokio::test]
async fn test_concurrent_joins_respect_max_uses() {
    let fx = fixture().await;
    let invite = fx
        .protocol
        .create_invite(&owner(), &fx.project_id, Role::Viewer, Some(1), None)
        .await
        .unwrap();

    let alice = Identity::new("alice");
    let bob = Identity::new("bob");
    let (a, b) = tokio::join!(
        fx.protocol.join(&alice, &invite.code),
        fx.protocol.join(&bob, &invite.code)
    );

    let granted = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(granted, 1);
    let err = a.err().or(b.err()).unwrap();
    assert!(matches!(err, Error::CodeExhausted(_)), "unexpected {:?}", err);

    let members = fx.store.list_members(&fx.project_id).await.unwrap();
    assert_eq!(members.len(), 1);
    let stored = fx.store.find_invite(&invite.code).await.unwrap().unwrap();
    assert_eq!(stored.uses, 1);
}

#[tokio::test]
async fn test_owner_join_is_already_owner_even_for_dead_codes() {
    let fx = fixture().await;
    let invite = fx
        .protocol
        .create_invite(&owner(), &fx.project_id, Role::Editor, Some(1), None)
        .await
        .unwrap();
    fx.protocol.join(&Identity::new("alice"), &invite.code).await.unwrap();

    // Exhausted
    let err = fx.protocol.join(&owner(), &invite.code).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyOwner(_)));

    // Expired
    let expired = fx
        .protocol
        .create_invite(
            &owner(),
            &fx.project_id,
            Role::Viewer,
            None,
            Some(time::now() - Duration::hours(1)),
        )
        .await
        .unwrap();
    let err = fx.protocol.join(&owner(), &expired.code).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyOwner(_)));
}

#[tokio::test]
async fn test_join_failures_are_distinct() {
    let fx = fixture().await;
    let alice = Identity::new("alice");

    let err = fx.protocol.join(&alice, "NOSUCHCD").await.unwrap_err();
    assert!(matches!(err, Error::InvalidCode(_)));
    assert_eq!(err.kind(), "invalid_code");

    let expired = fx
        .protocol
        .create_invite(
            &owner(),
            &fx.project_id,
            Role::Viewer,
            None,
            Some(time::now() - Duration::minutes(5)),
        )
        .await
        .unwrap();
    let err = fx.protocol.join(&alice, &expired.code).await.unwrap_err();
    assert!(matches!(err, Error::CodeExpired(_)));

    let open = fx
        .protocol
        .create_invite(&owner(), &fx.project_id, Role::Viewer, None, None)
        .await
        .unwrap();
    fx.protocol.join(&alice, &open.code).await.unwrap();

    // Any second code for the same project refuses a duplicate membership
    let another = fx
        .protocol
        .create_invite(&owner(), &fx.project_id, Role::Editor, None, None)
        .await
        .unwrap();
    let err = fx.protocol.join(&alice, &another.code).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyMember(_)));
    let stored = fx.store.find_invite(&another.code).await.unwrap().unwrap();
    assert_eq!(stored.uses, 0);
}

#[tokio::test]
async fn test_deleting_invite_keeps_memberships() {
    let fx = fixture().await;
    let invite = fx
        .protocol
        .create_invite(&owner(), &fx.project_id, Role::Editor, None, None)
        .await
        .unwrap();
    fx.protocol.join(&Identity::new("alice"), &invite.code).await.unwrap();

    fx.protocol.delete_invite(&owner(), &invite.code).await.unwrap();
    assert!(fx
        .protocol
        .list_invites(&owner(), &fx.project_id)
        .await
        .unwrap()
        .is_empty());

    let members = fx
        .protocol
        .list_members(&Identity::new("alice"), &fx.project_id)
        .await
        .unwrap();
    assert_eq!(members.len(), 1);

    let err = fx.protocol.join(&Identity::new("bob"), &invite.code).await.unwrap_err();
    assert!(matches!(err, Error::InvalidCode(_)));
}

#[tokio::test]
async fn test_only_owner_manages_invites_and_members() {
    let fx = fixture().await;
    let alice = Identity::new("alice");

    let err = fx
        .protocol
        .create_invite(&alice, &fx.project_id, Role::Editor, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));

    let err = fx
        .protocol
        .create_invite(&owner(), &fx.project_id, Role::Owner, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = fx
        .protocol
        .create_invite(&owner(), &fx.project_id, Role::Editor, Some(0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let invite = fx
        .protocol
        .create_invite(&owner(), &fx.project_id, Role::Editor, None, None)
        .await
        .unwrap();
    fx.protocol.join(&alice, &invite.code).await.unwrap();

    let err = fx
        .protocol
        .remove_member(&alice, &fx.project_id, "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
    let err = fx
        .protocol
        .remove_member(&owner(), &fx.project_id, "owner")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    assert!(fx.protocol.remove_member(&owner(), &fx.project_id, "alice").await.unwrap());
    let err = fx
        .protocol
        .list_members(&alice, &fx.project_id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
}

#[tokio::test]
async fn test_generate_code_gives_up_after_repeated_collisions() {
    let fx = fixture().await;
    let taken = InviteCode {
        code: "AAAAAAAA".to_string(),
        project_id: fx.project_id.clone(),
        role: Role::Viewer,
        max_uses: None,
        uses: 0,
        expires_at: None,
        created_by_id: "owner".to_string(),
        created_at: time::now(),
    };
    fx.store.insert_invite(&taken).await.unwrap();

    let mut draws = 0;
    let err = fx
        .protocol
        .generate_code_with(|| {
            draws += 1;
            "AAAAAAAA".to_string()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CodeSpaceExhausted { attempts } if attempts == MAX_GENERATION_ATTEMPTS));
    assert_eq!(draws, MAX_GENERATION_ATTEMPTS);

    let mut candidates = vec!["BBBBBBBB", "AAAAAAAA"];
    let code = fx
        .protocol
        .generate_code_with(|| candidates.pop().unwrap().to_string())
        .await
        .unwrap();
    assert_eq!(code, "BBBBBBBB");
    assert_eq!(normalize_code(" bbbbbbbb "), code);
}

/// Shared store whose existence check never sees a code, as when another
/// writer inserts the same code between the check and the insert
struct BlindExistenceCheck(Arc<SqliteSharedStore>);

#[async_trait]
impl SharedStore for BlindExistenceCheck {
    async fn upsert_profile(&self, identity: &Identity) -> Result<()> {
        self.0.upsert_profile(identity).await
    }

    async fn has_profile(&self, user_id: &str) -> Result<bool> {
        self.0.has_profile(user_id).await
    }

    async fn create_project(&self, project: &SharedProject) -> Result<SharedProject> {
        self.0.create_project(project).await
    }

    async fn fetch_project(&self, id: &str) -> Result<Option<SharedProject>> {
        self.0.fetch_project(id).await
    }

    async fn replace_project(
        &self,
        actor_id: &str,
        project: &SharedProject,
        expected_version: Option<i64>,
    ) -> Result<SharedProject> {
        self.0.replace_project(actor_id, project, expected_version).await
    }

    async fn projects_for_user(&self, user_id: &str) -> Result<Vec<SharedProject>> {
        self.0.projects_for_user(user_id).await
    }

    async fn membership(&self, project_id: &str, user_id: &str) -> Result<Option<Membership>> {
        self.0.membership(project_id, user_id).await
    }

    async fn list_members(&self, project_id: &str) -> Result<Vec<Membership>> {
        self.0.list_members(project_id).await
    }

    async fn remove_member(&self, project_id: &str, user_id: &str) -> Result<bool> {
        self.0.remove_member(project_id, user_id).await
    }

    async fn insert_invite(&self, invite: &InviteCode) -> Result<bool> {
        self.0.insert_invite(invite).await
    }

    async fn find_invite(&self, code: &str) -> Result<Option<InviteCode>> {
        self.0.find_invite(code).await
    }

    async fn code_exists(&self, _code: &str) -> Result<bool> {
        Ok(false)
    }

    async fn list_invites(&self, project_id: &str) -> Result<Vec<InviteCode>> {
        self.0.list_invites(project_id).await
    }

    async fn delete_invite(&self, code: &str) -> Result<bool> {
        self.0.delete_invite(code).await
    }

    async fn redeem_invite(&self, invite: &InviteCode, user_id: &str) -> Result<RedeemOutcome> {
        self.0.redeem_invite(invite, user_id).await
    }
}

async fn taken_code(fx: &Fixture, code: &str) {
    let taken = InviteCode {
        code: code.to_string(),
        project_id: fx.project_id.clone(),
        role: Role::Viewer,
        max_uses: None,
        uses: 0,
        expires_at: None,
        created_by_id: "owner".to_string(),
        created_at: time::now(),
    };
    assert!(fx.store.insert_invite(&taken).await.unwrap());
}

#[tokio::test]
async fn test_create_invite_draws_again_when_insert_loses_race() {
    let fx = fixture().await;
    taken_code(&fx, "AAAAAAAA").await;
    let protocol = MembershipProtocol::new(Arc::new(BlindExistenceCheck(fx.store.clone())));

    let mut candidates = vec!["BBBBBBBB", "AAAAAAAA"];
    let invite = protocol
        .create_invite_with(&owner(), &fx.project_id, Role::Editor, Some(2), None, || {
            candidates.pop().unwrap().to_string()
        })
        .await
        .unwrap();
    assert_eq!(invite.code, "BBBBBBBB");

    // The earlier holder of the code is untouched
    let kept = fx.store.find_invite("AAAAAAAA").await.unwrap().unwrap();
    assert_eq!(kept.role, Role::Viewer);
    let created = fx.store.find_invite("BBBBBBBB").await.unwrap().unwrap();
    assert_eq!(created.role, Role::Editor);
    assert_eq!(created.max_uses, Some(2));
}

#[tokio::test]
async fn test_create_invite_race_shares_attempt_budget() {
    let fx = fixture().await;
    taken_code(&fx, "AAAAAAAA").await;
    let protocol = MembershipProtocol::new(Arc::new(BlindExistenceCheck(fx.store.clone())));

    let mut draws = 0;
    let err = protocol
        .create_invite_with(&owner(), &fx.project_id, Role::Editor, None, None, || {
            draws += 1;
            "AAAAAAAA".to_string()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CodeSpaceExhausted { attempts } if attempts == MAX_GENERATION_ATTEMPTS));
    assert_eq!(err.kind(), "code_space_exhausted");
    assert_eq!(draws, MAX_GENERATION_ATTEMPTS);
    assert_eq!(fx.store.list_invites(&fx.project_id).await.unwrap().len(), 1);
}
