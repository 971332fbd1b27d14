#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

/// The occupancy bitmap and probe arithmetic behind every table.
pub mod bucket_index;
mod config;
mod diagnostics;
mod hash_map;
mod native;
mod storage;

pub use bucket_index::Bucket;
#[cfg(any(feature = "std", feature = "foldhash"))]
pub use config::DefaultHashBuilder;
pub use config::Verification;
pub use hash_map::HashMap;
pub use hash_map::Keys;
pub use hash_map::Values;
#[cfg(any(test, feature = "stats"))]
pub use native::DebugStats;
pub use native::Index;
pub use native::IntoIter;
pub use native::Iter;
