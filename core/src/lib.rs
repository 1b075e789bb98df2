//! # Courier Core
//!
//! Core domain layer for the Courier backend.
//! This crate contains domain entities, the token session services, store
//! interfaces with their in-memory implementations, and error types that
//! form the foundation of the application architecture.

pub mod domain;
pub mod errors;
pub mod repositories;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::*;
pub use errors::*;
pub use repositories::*;
pub use services::*;
