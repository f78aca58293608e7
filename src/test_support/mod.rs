//! Shared helpers for in-crate tests.

// One copy, shared with the integration tests.
#[allow(dead_code)]
#[path = "../../tests/support/socket_guard.rs"]
pub mod socket_guard;
