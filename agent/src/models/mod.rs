//! Domain models

pub mod action;
pub mod deployment;
