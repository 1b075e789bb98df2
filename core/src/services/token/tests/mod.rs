//! Tests for the token service

mod service_tests;
mod store_failure_tests;
