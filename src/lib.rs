//! Resumable chunked upload coordinator.
//!
//! Clients initialize an upload session, stage chunks one at a time (in any
//! order), and finally commit the staged blocks into the target object.
//! An interrupted client can query its session and resume from the chunks
//! it has not yet staged.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
