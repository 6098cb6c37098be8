//! Integration tests module
//!
//! End-to-end scenarios driven through [`reelforge::app::AppContext`], the
//! same entry point the CLI and the health server use.

pub mod content_test;
pub mod jobs_test;
pub mod posts_test;
pub mod resilience_test;
