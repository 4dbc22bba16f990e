//! Storage utilities for the session token and status snapshots

pub mod keyring;
pub mod status_snapshot;

// Re-export commonly used items
pub use keyring::SecureStorage;
