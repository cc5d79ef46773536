//! Device registry - owns device ids, the device table and the shared
//! memory accounting.

use crate::config::{ConfigError, RegistryConfig};
use crate::device::{Device, DeviceId, ResizeState, RunState};
use crate::draw::{Rect, Rop};
use crate::error::{DeviceError, Result};
use crate::geometry::{Geometry, Resolution};
use crate::mapping::MappingHandle;
use crate::mode::Mode;
use crate::signal::CancelToken;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use vgfb_memory::{MemoryStats, StoreAllocator};

struct RegistryInner {
    config: RegistryConfig,
    /// Devices that have not been torn down yet
    devices: Mutex<HashMap<DeviceId, Arc<Device>>>,
    next_id: AtomicU64,
    allocator: StoreAllocator,
    shut_down: AtomicBool,
}

impl RegistryInner {
    fn devices(&self) -> MutexGuard<'_, HashMap<DeviceId, Arc<Device>>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns every device and the allocator they share.
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

impl DeviceRegistry {
    /// Create a registry. Nothing is allocated until a device is opened.
    pub fn new(config: RegistryConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        info!(
            max_devices = config.max_devices,
            memory_budget = config.memory_budget,
            "Initializing device registry"
        );

        let allocator = StoreAllocator::new(config.store_config(), Arc::new(MemoryStats::new()));
        Ok(Self {
            inner: Arc::new(RegistryInner {
                config,
                devices: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                allocator,
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Open a new device with the registry's device configuration.
    pub fn open_device(&self) -> Result<DeviceHandle> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(DeviceError::NoDevice);
        }

        let mut devices = self.inner.devices();
        if devices.len() >= self.inner.config.max_devices {
            warn!(
                open = devices.len(),
                max_devices = self.inner.config.max_devices,
                "Device limit reached"
            );
            return Err(DeviceError::Busy("device limit reached"));
        }

        let id = DeviceId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let registry = Arc::downgrade(&self.inner);
        let device = Device::open_with_hook(
            id,
            self.inner.config.device.clone(),
            self.inner.allocator.clone(),
            Some(Box::new(move |id| unregister(&registry, id))),
        )?;

        devices.insert(id, Arc::clone(&device));
        debug!(device_id = %id, open = devices.len(), "Registered device");
        Ok(DeviceHandle { device })
    }

    /// Close a device. It stays registered until its last mapping is gone.
    pub fn close_device(&self, handle: DeviceHandle) {
        handle.close();
    }

    /// Look up a registered device.
    pub fn get(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.inner.devices().get(&id).cloned()
    }

    /// Get all registered device IDs, sorted.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self.inner.devices().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Get the number of registered devices.
    pub fn device_count(&self) -> usize {
        self.inner.devices().len()
    }

    /// Screen memory accounting shared by every device.
    pub fn stats(&self) -> &Arc<MemoryStats> {
        self.inner.allocator.stats()
    }

    /// Close every device and refuse new ones.
    ///
    /// Devices with live mappings stay registered until those mappings are
    /// released.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(
            open = self.device_count(),
            peak_memory = %MemoryStats::format_bytes(self.stats().peak()),
            "Shutting down device registry"
        );

        let devices: Vec<_> = self.inner.devices().values().cloned().collect();
        for device in devices {
            device.close();
        }
    }
}

fn unregister(registry: &Weak<RegistryInner>, id: DeviceId) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    let mut devices = registry.devices();
    if devices.remove(&id).is_some() {
        debug!(device_id = %id, open = devices.len(), "Unregistered device");
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The owner's reference to an open device. Dropping it closes the device.
pub struct DeviceHandle {
    device: Arc<Device>,
}

impl DeviceHandle {
    pub fn id(&self) -> DeviceId {
        self.device.id()
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        self.device.read(offset, buf)
    }

    pub fn write(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        self.device.write(offset, buf)
    }

    pub fn set_resolution(&self, width: u32, height: u32) -> Result<()> {
        self.device.set_resolution(Resolution::new(width, height))
    }

    pub fn set_screen_info(&self, resolution: Resolution, bits_per_pixel: u32) -> Result<()> {
        self.device.set_screen_info(resolution, bits_per_pixel)
    }

    pub fn map_memory(&self) -> Result<MappingHandle> {
        self.device.map_memory()
    }

    pub fn unmap_memory(&self, mapping: MappingHandle) {
        mapping.unmap();
    }

    pub fn wait_for_resize(&self, cancel: &CancelToken) -> Result<()> {
        self.device.wait_for_resize(cancel)
    }

    pub fn wait_for_resize_timeout(&self, cancel: &CancelToken, timeout: Duration) -> Result<()> {
        self.device.wait_for_resize_timeout(cancel, timeout)
    }

    pub fn query_geometry(&self) -> Result<Geometry> {
        self.device.query_geometry()
    }

    pub fn pan(&self, x_offset: u32, y_offset: u32) -> Result<()> {
        self.device.pan(x_offset, y_offset)
    }

    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        self.device.set_mode(mode)
    }

    pub fn fill_rect(&self, rect: Rect, color: u32, rop: Rop) -> Result<()> {
        self.device.fill_rect(rect, color, rop)
    }

    pub fn copy_area(&self, src_x: u32, src_y: u32, dst: Rect) -> Result<()> {
        self.device.copy_area(src_x, src_y, dst)
    }

    pub fn set_color_register(
        &self,
        regno: usize,
        red: u32,
        green: u32,
        blue: u32,
        alpha: u32,
    ) -> Result<()> {
        self.device.set_color_register(regno, red, green, blue, alpha)
    }

    pub fn resize_state(&self) -> ResizeState {
        self.device.resize_state()
    }

    pub fn run_state(&self) -> RunState {
        self.device.run_state()
    }

    pub fn live_mappings(&self) -> u64 {
        self.device.live_mappings()
    }

    /// Close the device.
    pub fn close(self) {}
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.device.close();
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DeviceHandle").field(&self.device.id()).finish()
    }
}
