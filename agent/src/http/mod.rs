//! Update server client

pub mod client;
pub mod ddi;
