//! Core types for the HTTP policy pipeline.
//!
//! This crate provides the vocabulary shared by the pipeline (`http-pipeline`)
//! and by anything that plugs into it (transports, policies, test doubles).
//! It has no async runtime dependency.
//!
//! ## Modules
//!
//! - [`error`]: Error classification and body errors
//! - [`position`]: Policy insertion positions
//! - [`body`]: Replayable request bodies, response bodies, and the wire body

mod body;
mod error;
mod position;

pub use body::*;
pub use error::*;
pub use position::*;
