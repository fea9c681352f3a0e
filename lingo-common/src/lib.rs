//! # Lingo Common Library
//!
//! Core of the lingo localization editor:
//! - Key path model over nested JSON documents
//! - Translation completeness statistics
//! - Local and shared project storage
//! - Promotion and synchronization between the two stores
//! - Invite codes and project membership
//! - Configuration loading

pub mod completeness;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod keypath;
pub mod membership;
pub mod models;
pub mod retry;
pub mod store;
pub mod sync;
pub mod time;
pub mod translate;

pub use completeness::{compute_stats, LeafStatus, Stats, StatsCache};
pub use document::Document;
pub use error::{Error, Result};
pub use keypath::KeyNode;
pub use membership::MembershipProtocol;
pub use models::{Identity, InviteCode, Membership, Project, Role};
pub use store::{ProjectStore, SharedStore, SqliteSharedStore};
pub use sync::{ConflictPolicy, DualStoreSync, EditingSession, ProjectRef};
