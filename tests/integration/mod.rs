//! Integration tests for activity-guard
//!
//! Every test builds its components on one shared store, the way separate
//! service instances would see the same backend.

pub mod circuit_breaker_test;
pub mod rate_limit_test;
pub mod redis_store_test;
