//! Device modes.
//!
//! A mode decides whether a device has screen memory at all and how
//! reads and writes reach it. The set is closed; a device picks one at
//! creation time and may switch while quiescent.

use crate::device::DeviceId;
use crate::error::{DeviceError, Result};
use crate::geometry::Geometry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;
use vgfb_memory::{BackingStore, StoreAllocator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// No screen memory: reads return zeros, writes are discarded,
    /// mapping is refused
    None,
    /// Screen memory backed by a page-aligned store
    #[default]
    Normal,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Normal => "normal",
        }
    }

    /// Whether this mode keeps a backing store.
    pub fn has_memory(self) -> bool {
        matches!(self, Self::Normal)
    }

    pub(crate) fn create(self, device: DeviceId) {
        debug!(device_id = %device, mode = self.name(), "Mode created");
    }

    /// Allocate screen memory for `geometry`.
    pub(crate) fn reallocate(
        self,
        allocator: &StoreAllocator,
        geometry: &Geometry,
    ) -> Result<Option<Arc<BackingStore>>> {
        match self {
            Self::None => Ok(None),
            Self::Normal => {
                let store = allocator.allocate(
                    geometry.width,
                    geometry.height,
                    geometry.bytes_per_pixel(),
                )?;
                Ok(Some(store))
            }
        }
    }

    /// Give up the device's reference to a store. The memory itself
    /// lives on while any mapping still holds it.
    pub(crate) fn free(self, device: DeviceId, slot: &mut Option<Arc<BackingStore>>) {
        if let Some(store) = slot.take() {
            debug!(
                device_id = %device,
                store_id = store.id(),
                still_mapped = Arc::strong_count(&store) > 1,
                "Releasing device reference to screen memory"
            );
        }
    }

    pub(crate) fn destroy(self, device: DeviceId) {
        debug!(device_id = %device, mode = self.name(), "Mode destroyed");
    }

    pub(crate) fn read(
        self,
        store: Option<&BackingStore>,
        geometry: &Geometry,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<usize> {
        match self {
            Self::None => {
                let count = clip(geometry.visible_length(), offset, buf.len());
                buf[..count].fill(0);
                Ok(count)
            }
            Self::Normal => {
                let store = store.ok_or(DeviceError::NoScreenMemory)?;
                Ok(store.read_at(offset, buf))
            }
        }
    }

    pub(crate) fn write(
        self,
        store: Option<&BackingStore>,
        geometry: &Geometry,
        offset: usize,
        buf: &[u8],
    ) -> Result<usize> {
        match self {
            Self::None => Ok(clip(geometry.visible_length(), offset, buf.len())),
            Self::Normal => {
                let store = store.ok_or(DeviceError::NoScreenMemory)?;
                Ok(store.write_at(offset, buf))
            }
        }
    }
}

fn clip(len: usize, offset: usize, count: usize) -> usize {
    if offset >= len {
        0
    } else {
        count.min(len - offset)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when parsing an unknown mode name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown mode \"{0}\"")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "normal" => Ok(Self::Normal),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}
