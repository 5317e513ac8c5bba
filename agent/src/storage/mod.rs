//! Persistent agent state and settings

pub mod layout;
pub mod reboot;
pub mod revisions;
pub mod settings;
