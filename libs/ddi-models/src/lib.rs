//! DDI wire models
//!
//! JSON shapes exchanged with the update server over the Direct Device
//! Integration API.

pub mod models;

pub use models::*;
