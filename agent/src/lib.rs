//! FullMetalUpdate Agent Library
//!
//! Update orchestration for devices managed through a hawkBit server.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod identity;
pub mod logs;
pub mod models;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod workers;
