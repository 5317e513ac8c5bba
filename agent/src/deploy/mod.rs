//! Deployment module

pub mod command;
pub mod container;
pub mod notify;
pub mod ostree;
pub mod processor;
pub mod systemd;
