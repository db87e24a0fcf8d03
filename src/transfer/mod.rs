//! File transfer: single-transfer engine, concurrent batch manager, and the
//! checksum-keyed cache that lets repeated batches skip the network.

pub mod cache;
pub mod engine;
pub mod manager;

pub use cache::{CacheEntry, CacheStats, TransferCache};
pub use engine::TransferEngine;
pub use manager::{BatchHandle, TransferManager};
