//! Integration tests entry point
//!
//! This file serves as the entry point for all integration tests.
//! It includes the integration_tests module which contains:
//! - Content generation across providers, cache and templates
//! - Video jobs end to end with a fake encoder
//! - Post publication and restart recovery
//! - Resilience probing and persisted statistics

mod common;
mod integration_tests;
