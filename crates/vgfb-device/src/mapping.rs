//! Live mappings of screen memory.

use crate::device::{Device, DeviceId};
use std::sync::Arc;
use vgfb_memory::{BackingStore, StoreLayout};

/// One live mapping of a device's screen memory.
///
/// The handle keeps both the store it was created against and the device
/// alive. Dropping it (or calling [`MappingHandle::unmap`]) releases the
/// mapping; releasing the last one lets a pending resize take effect.
pub struct MappingHandle {
    device: Arc<Device>,
    store: Arc<BackingStore>,
}

impl MappingHandle {
    pub(crate) fn new(device: Arc<Device>, store: Arc<BackingStore>) -> Self {
        Self { device, store }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device.id()
    }

    pub fn store_id(&self) -> u64 {
        self.store.id()
    }

    /// Layout of the mapped store. It never changes for the lifetime of
    /// the handle, even if the device is resized.
    pub fn layout(&self) -> &StoreLayout {
        self.store.layout()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.store.read_at(offset, buf)
    }

    pub fn write(&self, offset: usize, buf: &[u8]) -> usize {
        self.store.write_at(offset, buf)
    }

    /// Run `f` over the mapped pixels.
    ///
    /// Only the mapped store is locked, and only while `f` runs. Device
    /// control calls (resize, geometry queries, mapping) may be made from
    /// `f`; device reads, writes and drawing on this store may not.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.store.with_pixels(f)
    }

    /// Base address of the mapping, valid while this handle lives.
    pub fn as_ptr(&self) -> *mut u8 {
        self.store.as_ptr()
    }

    /// Tear the mapping down.
    pub fn unmap(self) {}
}

impl Drop for MappingHandle {
    fn drop(&mut self) {
        self.device.release_mapping(self.store.id());
    }
}

impl std::fmt::Debug for MappingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingHandle")
            .field("device", &self.device.id())
            .field("store", &self.store.id())
            .field("len", &self.store.len())
            .finish()
    }
}
