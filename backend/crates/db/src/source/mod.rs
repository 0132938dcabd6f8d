pub mod filters;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod models;
pub mod pg_repository;
pub mod repositories;
