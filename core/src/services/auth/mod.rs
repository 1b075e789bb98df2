//! Authentication service module
//!
//! Checks credentials against a [`UserDirectory`](crate::repositories::UserDirectory)
//! and opens, refreshes and closes token sessions.

mod service;


pub use service::{AuthService, LoginOutcome};
