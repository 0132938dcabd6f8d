//! Incremental batch synchronization engine.
//!
//! An [`IntegrationManager`](manager::IntegrationManager) runs an ordered list
//! of bulk jobs, expires caches, then runs incremental jobs. Each incremental
//! job pages through its source with a [`WatermarkCursor`], translates every
//! batch and pushes it to the destination before advancing.
//!
//! [`WatermarkCursor`]: tradesync_db::sync::models::WatermarkCursor

pub mod bulk;
pub mod incremental;
pub mod job;
pub mod manager;
pub mod push;
pub mod registry;
pub mod runner;
pub mod translate;
pub mod uom;

#[cfg(test)]
pub(crate) mod testing;
