//! Project, membership and invite models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::document::Document;
use crate::keypath::{self, KeyNode};
use crate::{Error, Result};

/// Language code -> translated document
pub type Translations = BTreeMap<String, Document>;

/// Fresh random identifier for projects and memberships
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Trim and lower-case a language code
pub fn normalize_language(code: &str) -> Result<String> {
    let code = code.trim().to_lowercase();
    if code.is_empty() || code.contains(char::is_whitespace) {
        return Err(Error::InvalidInput(format!("invalid language code '{}'", code)));
    }
    Ok(code)
}

/// A localization project: master document plus one partial document per
/// target language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub master_language: String,
    pub target_languages: Vec<String>,
    pub master_data: Document,
    pub translations: Arc<Translations>,
    pub last_modified: DateTime<Utc>,
    /// Present once the project lives in shared storage
    #[serde(default)]
    pub cloud_project_id: Option<String>,
    /// Shared record version this copy was derived from
    #[serde(default)]
    pub shared_version: Option<i64>,
}

impl Project {
    /// Create a local-only project with a fresh id
    pub fn new(
        name: impl Into<String>,
        master_language: &str,
        target_languages: &[&str],
        master_data: Document,
    ) -> Result<Self> {
        if !master_data.is_object() {
            return Err(Error::InvalidDocument(format!(
                "master document must be an object, found {}",
                master_data.type_name()
            )));
        }

        let mut project = Self {
            id: new_id(),
            name: name.into(),
            master_language: normalize_language(master_language)?,
            target_languages: Vec::new(),
            master_data,
            translations: Arc::new(Translations::new()),
            last_modified: crate::time::now(),
            cloud_project_id: None,
            shared_version: None,
        };
        for code in target_languages {
            project.add_target_language(code)?;
        }
        Ok(project)
    }

    pub fn is_promoted(&self) -> bool {
        self.cloud_project_id.is_some()
    }

    /// Re-establish language invariants on data read from storage
    pub fn normalize(&mut self) -> Result<()> {
        let mut seen = Vec::with_capacity(self.target_languages.len());
        for code in &self.target_languages {
            let code = normalize_language(code)?;
            if !seen.contains(&code) {
                seen.push(code);
            }
        }

        let mut translations = Translations::new();
        for (code, doc) in self.translations.iter() {
            translations.insert(normalize_language(code)?, doc.clone());
        }
        for code in &seen {
            translations
                .entry(code.clone())
                .or_insert_with(Document::empty_object);
        }

        self.master_language = normalize_language(&self.master_language)?;
        self.target_languages = seen;
        self.translations = Arc::new(translations);
        Ok(())
    }

    /// Add a target language with an empty translation document
    ///
    /// Returns false if the language was already a target.
    pub fn add_target_language(&mut self, code: &str) -> Result<bool> {
        let code = normalize_language(code)?;
        if self.target_languages.contains(&code) {
            return Ok(false);
        }
        let mut translations = Translations::clone(&self.translations);
        translations
            .entry(code.clone())
            .or_insert_with(Document::empty_object);
        self.target_languages.push(code);
        self.translations = Arc::new(translations);
        Ok(true)
    }

    /// Remove a target language together with its translations
    pub fn remove_target_language(&mut self, code: &str) -> Result<bool> {
        let code = normalize_language(code)?;
        let Some(idx) = self.target_languages.iter().position(|c| *c == code) else {
            return Ok(false);
        };
        self.target_languages.remove(idx);
        let mut translations = Translations::clone(&self.translations);
        translations.remove(&code);
        self.translations = Arc::new(translations);
        Ok(true)
    }

    /// Install a value in the master document
    pub fn set_master_value(&mut self, path: &str, value: Document) {
        self.master_data = keypath::set(&self.master_data, path, value);
    }

    /// Install a translated value; replaces the translations map so its
    /// identity changes
    pub fn set_translation(&mut self, lang: &str, path: &str, value: Document) -> Result<()> {
        let lang = normalize_language(lang)?;
        if !self.target_languages.contains(&lang) {
            return Err(Error::InvalidInput(format!(
                "'{}' is not a target language of project {}",
                lang, self.id
            )));
        }
        let mut translations = Translations::clone(&self.translations);
        let current = translations
            .get(&lang)
            .cloned()
            .unwrap_or_else(Document::empty_object);
        translations.insert(lang, keypath::set(&current, path, value));
        self.translations = Arc::new(translations);
        Ok(())
    }

    pub fn translation(&self, lang: &str, path: &str) -> Option<&Document> {
        self.translations
            .get(lang)
            .and_then(|doc| keypath::get(doc, path))
    }

    pub fn master_value(&self, path: &str) -> Option<&Document> {
        keypath::get(&self.master_data, path)
    }

    /// Leaf key paths of the master document
    pub fn leaf_paths(&self) -> Result<Vec<String>> {
        keypath::flatten(&self.master_data)
    }

    /// Key tree of the master document
    pub fn key_tree(&self) -> Result<Vec<KeyNode>> {
        Ok(keypath::build_tree(&self.leaf_paths()?))
    }
}

/// Role of an identity on a shared project
///
/// Ordered by rights: `Viewer < Editor < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Editor,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Owner => "owner",
        }
    }

    /// Owners and editors may change project content
    pub fn can_edit(&self) -> bool {
        *self >= Role::Editor
    }

    pub fn can_manage_invites(&self) -> bool {
        *self == Role::Owner
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "editor" => Ok(Role::Editor),
            "owner" => Ok(Role::Owner),
            other => Err(Error::InvalidInput(format!("unknown role '{}'", other))),
        }
    }
}

/// A granted role of one user on one project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of an invite code at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Active,
    Expired,
    Exhausted,
}

/// Shareable token granting a role on a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteCode {
    pub code: String,
    pub project_id: String,
    pub role: Role,
    pub max_uses: Option<u32>,
    pub uses: u32,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by_id: String,
    pub created_at: DateTime<Utc>,
}

impl InviteCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.uses >= max)
    }

    /// Expiry is reported before exhaustion
    pub fn status(&self, now: DateTime<Utc>) -> InviteStatus {
        if self.is_expired(now) {
            InviteStatus::Expired
        } else if self.is_exhausted() {
            InviteStatus::Exhausted
        } else {
            InviteStatus::Active
        }
    }
}

/// Caller identity, passed explicitly into every shared-storage operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    /// A verified profile exists; shared writes require it
    #[serde(default)]
    pub profile_established: bool,
}

impl Identity {
    /// Identity without an established profile
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            name: None,
            profile_established: false,
        }
    }

    pub fn with_profile(mut self, email: Option<String>, name: Option<String>) -> Self {
        self.email = email;
        self.name = name;
        self.profile_established = true;
        self
    }

    pub fn has_profile(&self) -> bool {
        self.profile_established
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn master() -> Document {
        Document::parse(r#"{"greeting": {"hello": "Hello"}}"#).unwrap()
    }

    #[test]
    fn test_new_project_normalizes_languages() {
        let project = Project::new("App", "EN", &["DE", " fr ", "de"], master()).unwrap();
        assert_eq!(project.master_language, "en");
        assert_eq!(project.target_languages, vec!["de", "fr"]);
        assert_eq!(project.translations.len(), 2);
        assert_eq!(project.translations.get("de"), Some(&Document::empty_object()));
    }

    #[test]
    fn test_new_project_rejects_non_object_master() {
        let err = Project::new("App", "en", &[], Document::from("text")).unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));
    }

    #[test]
    fn test_set_translation_replaces_map_identity() {
        let mut project = Project::new("App", "en", &["de"], master()).unwrap();
        let before = Arc::clone(&project.translations);
        project
            .set_translation("de", "greeting.hello", Document::from("Hallo"))
            .unwrap();
        assert!(!Arc::ptr_eq(&before, &project.translations));
        assert_eq!(
            project.translation("de", "greeting.hello"),
            Some(&Document::from("Hallo"))
        );
        assert!(before.get("de").and_then(|d| d.as_object()).unwrap().is_empty());
    }

    #[test]
    fn test_set_translation_requires_target_language() {
        let mut project = Project::new("App", "en", &["de"], master()).unwrap();
        let err = project
            .set_translation("fr", "greeting.hello", Document::from("Bonjour"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_remove_target_language_drops_translations() {
        let mut project = Project::new("App", "en", &["de", "fr"], master()).unwrap();
        assert!(project.remove_target_language("DE").unwrap());
        assert!(!project.remove_target_language("de").unwrap());
        assert_eq!(project.target_languages, vec!["fr"]);
        assert!(project.translations.get("de").is_none());
    }

    #[test]
    fn test_normalize_fills_missing_translation_entries() {
        let mut project = Project::new("App", "en", &[], master()).unwrap();
        project.target_languages = vec!["IT".to_string(), "it".to_string()];
        project.normalize().unwrap();
        assert_eq!(project.target_languages, vec!["it"]);
        assert!(project.translations.contains_key("it"));
    }

    #[test]
    fn test_role_ordering_and_rights() {
        assert!(Role::Owner > Role::Editor);
        assert!(Role::Editor > Role::Viewer);
        assert!(Role::Owner.can_edit());
        assert!(Role::Editor.can_edit());
        assert!(!Role::Viewer.can_edit());
        assert!(Role::Owner.can_manage_invites());
        assert!(!Role::Editor.can_manage_invites());
        assert_eq!("Editor".parse::<Role>().unwrap(), Role::Editor);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_invite_status() {
        let now = crate::time::now();
        let mut invite = InviteCode {
            code: "ABCD2345".to_string(),
            project_id: "p".to_string(),
            role: Role::Editor,
            max_uses: Some(2),
            uses: 1,
            expires_at: Some(now + Duration::hours(1)),
            created_by_id: "owner".to_string(),
            created_at: now,
        };
        assert_eq!(invite.status(now), InviteStatus::Active);
        invite.uses = 2;
        assert_eq!(invite.status(now), InviteStatus::Exhausted);
        assert_eq!(invite.status(now + Duration::hours(2)), InviteStatus::Expired);
        invite.max_uses = None;
        invite.expires_at = None;
        assert_eq!(invite.status(now + Duration::days(365)), InviteStatus::Active);
    }

    #[test]
    fn test_project_json_uses_camel_case() {
        let project = Project::new("App", "en", &["de"], master()).unwrap();
        let json = serde_json::to_value(&project).unwrap();
        assert!(json.get("masterLanguage").is_some());
        assert!(json.get("targetLanguages").is_some());
        assert!(json["translations"]["de"].is_object());
    }
}
