//! Database initialisation for the local and shared stores

pub mod init;

pub use init::*;
