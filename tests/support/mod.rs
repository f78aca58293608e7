//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod servers;
pub mod socket_guard;
