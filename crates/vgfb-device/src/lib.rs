//! vgfb Device Engine
//!
//! Implements the virtual framebuffer device with:
//! - Deferred buffer swaps that never free memory a mapping still uses
//! - Reference-counted mappings and device lifetime
//! - A cancellable wait for resize completion
//! - An explicit registry owning device ids and shared memory accounting

mod config;
mod device;
mod draw;
mod error;
mod geometry;
mod mapping;
mod mode;
mod refcount;
mod registry;
mod signal;

pub use config::{ConfigError, DeviceConfig, RegistryConfig};
pub use device::{Device, DeviceId, ResizeState, RunState, PALETTE_SIZE};
pub use draw::{pack_color, Rect, Rop};
pub use error::{DeviceError, Result};
pub use geometry::{Geometry, Resolution, SUPPORTED_DEPTHS};
pub use mapping::MappingHandle;
pub use mode::{Mode, UnknownMode};
pub use refcount::{RefCount, RefCountError};
pub use registry::{DeviceHandle, DeviceRegistry};
pub use signal::{CancelToken, ResizeSignal};
