//! Shared building blocks: errors, exchange types, quantization and snapshots

pub mod errors;
pub mod quantity;
pub mod snapshot;
pub mod traits;
pub mod types;
