//! rag-core - Core types and traits for the hybrid retrieval engine
//!
//! This crate provides the domain types, collaborator traits, configuration,
//! shared tokenizer and error handling used throughout the workspace.

pub mod config;
pub mod error;
pub mod text;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{RagError, Result};
pub use traits::*;
pub use types::*;
