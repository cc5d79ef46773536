//! vgfb Memory Management
//!
//! Page-aligned pixel storage for virtual framebuffers.
//! Every backing store is a single mimalloc allocation sized for one
//! resolution and shared by reference count between the device and
//! its live mappings.

mod stats;
mod store;

pub use stats::{MemoryStats, StatsSnapshot};
pub use store::{
    page_align, AllocationError, BackingStore, StoreAllocator, StoreConfig, StoreLayout,
    PAGE_SIZE,
};
