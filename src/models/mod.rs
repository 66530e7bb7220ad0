//! Core data model for the chunked upload service.
//!
//! The only durable entity is the upload session; everything else the
//! service reports is a projection of it.

pub mod session;
