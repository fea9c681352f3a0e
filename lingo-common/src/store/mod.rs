//! Project persistence: the profile-local store and the shared store

pub mod local;
pub mod shared;

pub use local::ProjectStore;
pub use shared::{RedeemOutcome, SharedProject, SharedStore, SqliteSharedStore};
