//! Service layer: the staging coordinator and the two capabilities it
//! consumes, the session store and the blob backend.

pub mod blob_backend;
pub mod coordinator;
pub mod session_store;
