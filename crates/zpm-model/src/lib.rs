//! Data model shared by the process manager, its process variants and its consumers.
//!
//! Everything in this crate is plain data: commands that describe work, the
//! messages a running process produces and the results a finished job reports.
mod domain;
pub use domain::*;
