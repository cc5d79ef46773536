//! The framebuffer device and its resize state machine.
//!
//! A resize allocates a new store and parks it as *pending*. The pending
//! store replaces the current one only while no mapping is live: right
//! away if the device is quiescent, otherwise when the last mapping is
//! released. Memory a mapping can still reach is never freed.

use crate::config::DeviceConfig;
use crate::draw::{self, Rect, Rop};
use crate::error::{DeviceError, Result};
use crate::geometry::{Geometry, Resolution};
use crate::mapping::MappingHandle;
use crate::mode::Mode;
use crate::refcount::{RefCount, RefCountError};
use crate::signal::{CancelToken, ResizeSignal};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use vgfb_memory::{BackingStore, StoreAllocator};

/// Number of pseudo palette entries
pub const PALETTE_SIZE: usize = 256;

/// Unique identifier for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId(pub u64);

impl DeviceId {
    /// Create a new device ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vgfb{}", self.0)
    }
}

/// Whether a resize is waiting for mappings to go away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResizeState {
    Stable,
    ResizePending,
}

/// Lifecycle of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    /// Open and accepting requests
    Running,
    /// Closed by its owner; kept alive only by live mappings
    Suspended,
    /// Torn down
    Removed,
}

pub(crate) type DestroyHook = Box<dyn FnOnce(DeviceId) + Send>;

struct DeviceState {
    run: RunState,
    mode: Mode,
    geometry: Geometry,
    current: Option<Arc<BackingStore>>,
    pending: Option<Arc<BackingStore>>,
    palette: [u32; PALETTE_SIZE],
}

impl DeviceState {
    fn ensure_running(&self) -> Result<()> {
        match self.run {
            RunState::Running => Ok(()),
            RunState::Suspended => Err(DeviceError::NotRunning),
            RunState::Removed => Err(DeviceError::NoDevice),
        }
    }
}

/// A virtual framebuffer device.
pub struct Device {
    id: DeviceId,
    config: DeviceConfig,
    allocator: StoreAllocator,
    /// Serialises every state change
    state: Mutex<DeviceState>,
    /// Mappings of the current store; only changed with `state` held
    live_mappings: RefCount,
    /// One for the owner, plus one while any mapping is live
    open_refs: RefCount,
    signal: ResizeSignal,
    on_destroy: Mutex<Option<DestroyHook>>,
}

impl Device {
    /// Open a device at the configured initial resolution.
    pub fn open(
        id: DeviceId,
        config: DeviceConfig,
        allocator: StoreAllocator,
    ) -> Result<Arc<Self>> {
        Self::open_with_hook(id, config, allocator, None)
    }

    pub(crate) fn open_with_hook(
        id: DeviceId,
        config: DeviceConfig,
        allocator: StoreAllocator,
        on_destroy: Option<DestroyHook>,
    ) -> Result<Arc<Self>> {
        config
            .validate()
            .map_err(|e| DeviceError::InvalidGeometry(e.to_string()))?;
        let geometry = Geometry::compute(
            config.initial_resolution,
            config.bits_per_pixel,
            config.refresh_rate,
        )?;

        let mode = config.mode;
        mode.create(id);
        let current = match mode.reallocate(&allocator, &geometry) {
            Ok(store) => store,
            Err(e) => {
                warn!(device_id = %id, error = %e, "Failed to allocate initial screen memory");
                mode.destroy(id);
                return Err(e);
            }
        };

        info!(
            device_id = %id,
            resolution = %geometry.resolution(),
            bpp = geometry.bits_per_pixel,
            mode = %mode,
            "Device opened"
        );

        Ok(Arc::new(Self {
            id,
            config,
            allocator,
            state: Mutex::new(DeviceState {
                run: RunState::Running,
                mode,
                geometry,
                current,
                pending: None,
                palette: [0; PALETTE_SIZE],
            }),
            live_mappings: RefCount::new(0),
            open_refs: RefCount::new(1),
            signal: ResizeSignal::new(),
            on_destroy: Mutex::new(on_destroy),
        }))
    }

    fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn run_state(&self) -> RunState {
        self.lock_state().run
    }

    pub fn mode(&self) -> Mode {
        self.lock_state().mode
    }

    pub fn resize_state(&self) -> ResizeState {
        if self.lock_state().pending.is_some() {
            ResizeState::ResizePending
        } else {
            ResizeState::Stable
        }
    }

    /// Number of live mappings.
    pub fn live_mappings(&self) -> u64 {
        self.live_mappings.get()
    }

    /// Outstanding references keeping the device object alive.
    pub fn open_references(&self) -> u64 {
        self.open_refs.get()
    }

    /// Current geometry. Never reflects a resize that has not been
    /// promoted yet.
    pub fn query_geometry(&self) -> Result<Geometry> {
        let state = self.lock_state();
        state.ensure_running()?;
        Ok(state.geometry)
    }

    /// Resize the visible surface, keeping the pixel depth of the most
    /// recent request.
    pub fn set_resolution(&self, resolution: Resolution) -> Result<()> {
        let mut state = self.lock_state();
        state.ensure_running()?;
        let bits_per_pixel = match &state.pending {
            Some(store) => store.layout().bytes_per_pixel * 8,
            None => state.geometry.bits_per_pixel,
        };
        self.request_resize(&mut state, resolution, bits_per_pixel)
    }

    /// Request a new resolution and pixel depth.
    ///
    /// Returns once the request is accepted. The new geometry is visible
    /// after promotion; use [`Device::wait_for_resize`] to block until then.
    pub fn set_screen_info(&self, resolution: Resolution, bits_per_pixel: u32) -> Result<()> {
        let mut state = self.lock_state();
        state.ensure_running()?;
        self.request_resize(&mut state, resolution, bits_per_pixel)
    }

    fn request_resize(
        &self,
        state: &mut DeviceState,
        resolution: Resolution,
        bits_per_pixel: u32,
    ) -> Result<()> {
        let requested = Geometry::compute(resolution, bits_per_pixel, self.config.refresh_rate)
            .inspect_err(|e| {
                warn!(
                    device_id = %self.id,
                    resolution = %resolution,
                    bpp = bits_per_pixel,
                    error = %e,
                    "Rejected resize"
                );
            })?;

        let target = match &state.pending {
            Some(store) => Geometry::from_layout(store.layout(), self.config.refresh_rate),
            None => state.geometry,
        };
        if target.matches(resolution, bits_per_pixel) {
            debug!(device_id = %self.id, resolution = %resolution, "Resize already targeted");
            return Ok(());
        }

        if state.geometry.matches(resolution, bits_per_pixel) {
            // Back to where we are: drop the pending store instead of swapping
            let mode = state.mode;
            mode.free(self.id, &mut state.pending);
            self.signal.raise();
            info!(device_id = %self.id, resolution = %resolution, "Pending resize cancelled");
            return Ok(());
        }

        if !state.mode.has_memory() {
            state.geometry = requested;
            self.signal.raise();
            info!(device_id = %self.id, resolution = %resolution, "Resized without screen memory");
            return Ok(());
        }

        let store = state
            .mode
            .reallocate(&self.allocator, &requested)
            .inspect_err(|e| {
                warn!(
                    device_id = %self.id,
                    resolution = %resolution,
                    error = %e,
                    "Failed to allocate screen memory"
                );
            })?;

        if let Some(superseded) = state.pending.take() {
            debug!(device_id = %self.id, store_id = superseded.id(), "Dropping superseded store");
        }
        state.pending = store;
        self.signal.reset();

        let live = self.live_mappings.get();
        debug!(
            device_id = %self.id,
            resolution = %resolution,
            live_mappings = live,
            "Resize pending"
        );
        if live == 0 {
            self.promote(state);
        }
        Ok(())
    }

    /// Swap the pending store in. Caller holds the state lock and has
    /// checked that no mapping is live.
    fn promote(&self, state: &mut DeviceState) {
        let Some(next) = state.pending.take() else {
            return;
        };

        state.geometry = Geometry::from_layout(next.layout(), self.config.refresh_rate);
        let mut previous = state.current.replace(next);
        state.mode.free(self.id, &mut previous);

        info!(
            device_id = %self.id,
            resolution = %state.geometry.resolution(),
            bpp = state.geometry.bits_per_pixel,
            "Resize promoted"
        );
        self.signal.raise();
    }

    /// Block until no resize is in flight.
    pub fn wait_for_resize(&self, cancel: &CancelToken) -> Result<()> {
        self.signal.wait(cancel, None)
    }

    /// Like [`Device::wait_for_resize`], giving up after `timeout`.
    pub fn wait_for_resize_timeout(&self, cancel: &CancelToken, timeout: Duration) -> Result<()> {
        self.signal.wait(cancel, Some(timeout))
    }

    /// Map the current screen memory.
    pub fn map_memory(self: &Arc<Self>) -> Result<MappingHandle> {
        let state = self.lock_state();
        state.ensure_running()?;
        let store = state.current.clone().ok_or(DeviceError::NoScreenMemory)?;

        let live = self
            .live_mappings
            .acquire()
            .map_err(|_| DeviceError::Busy("mapping count would overflow"))?;
        if live == 1 && self.open_refs.acquire().is_err() {
            if let Err(err) = self.live_mappings.release() {
                self.invariant_violation("mapping", err);
            }
            return Err(DeviceError::Busy("device reference count would overflow"));
        }

        debug!(
            device_id = %self.id,
            store_id = store.id(),
            live_mappings = live,
            "Mapped screen memory"
        );
        drop(state);
        Ok(MappingHandle::new(Arc::clone(self), store))
    }

    pub(crate) fn release_mapping(&self, store_id: u64) {
        let remaining = {
            let mut state = self.lock_state();
            let remaining = match self.live_mappings.release() {
                Ok(remaining) => remaining,
                Err(err) => {
                    drop(state);
                    self.invariant_violation("mapping", err);
                }
            };
            debug!(
                device_id = %self.id,
                store_id,
                live_mappings = remaining,
                "Unmapped screen memory"
            );

            if remaining == 0 && state.pending.is_some() {
                self.promote(&mut state);
            }
            remaining
        };

        if remaining == 0 {
            self.release_open_ref();
        }
    }

    /// Close the owner's reference. Live mappings keep the device object
    /// and their memory alive until they are released.
    pub fn close(&self) {
        {
            let mut state = self.lock_state();
            if state.run != RunState::Running {
                return;
            }
            state.run = RunState::Suspended;
            let mode = state.mode;
            mode.free(self.id, &mut state.pending);
            mode.free(self.id, &mut state.current);
            self.signal.close();
            info!(device_id = %self.id, live_mappings = self.live_mappings.get(), "Device closed");
        }
        self.release_open_ref();
    }

    fn release_open_ref(&self) {
        match self.open_refs.release() {
            Ok(0) => self.destroy(),
            Ok(_) => {}
            Err(err) => self.invariant_violation("open reference", err),
        }
    }

    fn destroy(&self) {
        let hook = {
            let mut state = self.lock_state();
            state.run = RunState::Removed;
            let mode = state.mode;
            mode.free(self.id, &mut state.pending);
            mode.free(self.id, &mut state.current);
            mode.destroy(self.id);
            self.signal.close();
            self.on_destroy
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
        };

        info!(device_id = %self.id, "Device destroyed");
        if let Some(hook) = hook {
            hook(self.id);
        }
    }

    fn invariant_violation(&self, counter: &str, err: RefCountError) -> ! {
        error!(device_id = %self.id, counter, error = %err, "Invariant violation");
        panic!("invariant violation on {}: {} count: {}", self.id, counter, err);
    }

    /// Switch modes. Refused while memory is mapped or a resize is pending.
    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        let mut state = self.lock_state();
        state.ensure_running()?;
        if state.mode == mode {
            return Ok(());
        }
        if self.live_mappings.get() > 0 {
            return Err(DeviceError::Busy("screen memory is mapped"));
        }
        if state.pending.is_some() {
            return Err(DeviceError::Busy("resize in progress"));
        }

        let current = mode.reallocate(&self.allocator, &state.geometry)?;
        let previous = state.mode;
        previous.free(self.id, &mut state.current);
        previous.destroy(self.id);
        mode.create(self.id);
        state.mode = mode;
        state.current = current;

        info!(device_id = %self.id, from = %previous, to = %mode, "Mode changed");
        Ok(())
    }

    /// Resolve the screen memory for a transfer.
    ///
    /// The transfer itself runs after the device lock is dropped, holding
    /// only the store's access lock. The returned reference keeps the store
    /// alive even if a promotion replaces it meanwhile.
    fn screen(&self) -> Result<(Mode, Geometry, Option<Arc<BackingStore>>)> {
        let state = self.lock_state();
        state.ensure_running()?;
        Ok((state.mode, state.geometry, state.current.clone()))
    }

    /// Read from screen memory at `offset`. Returns 0 at or past the end.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let (mode, geometry, store) = self.screen()?;
        mode.read(store.as_deref(), &geometry, offset, buf)
    }

    /// Write to screen memory at `offset`, truncating at the end.
    pub fn write(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        let (mode, geometry, store) = self.screen()?;
        mode.write(store.as_deref(), &geometry, offset, buf)
    }

    pub fn pan(&self, x_offset: u32, y_offset: u32) -> Result<()> {
        let mut state = self.lock_state();
        state.ensure_running()?;
        state.geometry.pan(x_offset, y_offset).inspect_err(|e| {
            warn!(device_id = %self.id, x_offset, y_offset, error = %e, "Rejected pan");
        })
    }

    pub fn fill_rect(&self, rect: Rect, color: u32, rop: Rop) -> Result<()> {
        let (_, geometry, store) = self.screen()?;
        if let Some(store) = store {
            store.with_pixels(|pixels| draw::fill_rect(pixels, &geometry, rect, color, rop));
        }
        Ok(())
    }

    pub fn copy_area(&self, src_x: u32, src_y: u32, dst: Rect) -> Result<()> {
        let (_, geometry, store) = self.screen()?;
        if let Some(store) = store {
            store.with_pixels(|pixels| draw::copy_area(pixels, &geometry, src_x, src_y, dst));
        }
        Ok(())
    }

    /// Set one pseudo palette entry.
    pub fn set_color_register(
        &self,
        regno: usize,
        red: u32,
        green: u32,
        blue: u32,
        alpha: u32,
    ) -> Result<()> {
        let mut state = self.lock_state();
        state.ensure_running()?;
        let entry = state.palette.get_mut(regno).ok_or_else(|| {
            DeviceError::InvalidGeometry(format!("color register {} out of range", regno))
        })?;
        *entry = draw::pack_color(red, green, blue, alpha);
        Ok(())
    }

    pub fn palette_entry(&self, regno: usize) -> Option<u32> {
        self.lock_state().palette.get(regno).copied()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("live_mappings", &self.live_mappings.get())
            .field("open_refs", &self.open_refs.get())
            .finish()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        debug!(device_id = %self.id, "Dropping device");
    }
}
