//! Backing store allocation using mimalloc.

use crate::stats::MemoryStats;
use serde::Serialize;
use std::alloc::{GlobalAlloc, Layout};
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// Allocation granularity of a backing store.
pub const PAGE_SIZE: usize = 4096;

/// Round `len` up to the next page boundary.
pub fn page_align(len: usize) -> Option<usize> {
    len.checked_add(PAGE_SIZE - 1).map(|len| len & !(PAGE_SIZE - 1))
}

/// Errors from the store allocator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("Store dimensions must be non-zero (got {width}x{height})")]
    ZeroSized { width: u32, height: u32 },

    #[error("Store size overflows for {width}x{height} at {bytes_per_pixel} bytes per pixel")]
    SizeOverflow {
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    },

    #[error("Out of memory: requested {requested} bytes with {in_use} of {budget} in use")]
    OutOfMemory {
        requested: usize,
        in_use: usize,
        budget: usize,
    },
}

/// Size and shape of one backing store.
///
/// The virtual height is twice the visible height so the surface can be
/// panned vertically between two frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreLayout {
    pub width: u32,
    pub height: u32,
    pub virtual_width: u32,
    pub virtual_height: u32,
    pub bytes_per_pixel: u32,
    /// Bytes per row of the virtual surface
    pub stride: usize,
    /// Bytes of pixel data (`stride * virtual_height`)
    pub data_len: usize,
    /// Bytes actually allocated (`data_len` rounded up to a page)
    pub alloc_len: usize,
}

impl StoreLayout {
    /// Compute the layout for a surface of `width` x `height` pixels.
    pub fn compute(width: u32, height: u32, bytes_per_pixel: u32) -> Result<Self, AllocationError> {
        if width == 0 || height == 0 || bytes_per_pixel == 0 {
            return Err(AllocationError::ZeroSized { width, height });
        }

        let overflow = || AllocationError::SizeOverflow {
            width,
            height,
            bytes_per_pixel,
        };

        let virtual_width = width;
        let virtual_height = height.checked_mul(2).ok_or_else(overflow)?;
        let stride = (virtual_width as usize)
            .checked_mul(bytes_per_pixel as usize)
            .ok_or_else(overflow)?;
        let data_len = stride
            .checked_mul(virtual_height as usize)
            .ok_or_else(overflow)?;
        let alloc_len = page_align(data_len).ok_or_else(overflow)?;

        Ok(Self {
            width,
            height,
            virtual_width,
            virtual_height,
            bytes_per_pixel,
            stride,
            data_len,
            alloc_len,
        })
    }
}

/// Configuration for the store allocator
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Upper bound on bytes held by all live stores together
    pub memory_budget: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            memory_budget: 256 * 1024 * 1024, // 256 MB
        }
    }
}

/// One page-aligned, zero-initialised allocation of pixel memory.
///
/// Stores are handed out as `Arc<BackingStore>`: the memory is released
/// exactly once, when the last owner drops its reference. Byte access goes
/// through [`BackingStore::with_pixels`], which holds the store's access
/// lock only for the duration of the closure.
pub struct BackingStore {
    id: u64,
    layout: StoreLayout,
    alloc_layout: Layout,
    base: NonNull<u8>,
    /// Serialises access to the bytes behind `base`
    access: Mutex<()>,
    stats: Arc<MemoryStats>,
}

// `base` is owned by the store and only dereferenced with `access` held.
unsafe impl Send for BackingStore {}
unsafe impl Sync for BackingStore {}

impl BackingStore {
    /// Store identifier, unique per allocator.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Bytes of addressable pixel data.
    pub fn len(&self) -> usize {
        self.layout.data_len
    }

    pub fn is_empty(&self) -> bool {
        self.layout.data_len == 0
    }

    /// Bytes reserved for this store, page aligned.
    pub fn alloc_len(&self) -> usize {
        self.layout.alloc_len
    }

    /// Run `f` with exclusive access to the pixel bytes.
    ///
    /// The access lock is released when `f` returns, so the view cannot
    /// outlive the call. `f` must not re-enter this store.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let _access = self.access.lock().unwrap_or_else(PoisonError::into_inner);
        let pixels =
            unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.layout.data_len) };
        f(pixels)
    }

    /// Base address of the allocation.
    ///
    /// Valid for `alloc_len()` bytes for as long as the caller holds a
    /// reference to this store.
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Copy bytes starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes copied, which is zero when `offset`
    /// is at or past the end.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.with_pixels(|pixels| {
            if offset >= pixels.len() {
                return 0;
            }
            let count = buf.len().min(pixels.len() - offset);
            buf[..count].copy_from_slice(&pixels[offset..offset + count]);
            count
        })
    }

    /// Copy `buf` into the store starting at `offset`, truncating at the end.
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        self.with_pixels(|pixels| {
            if offset >= pixels.len() {
                return 0;
            }
            let count = buf.len().min(pixels.len() - offset);
            pixels[offset..offset + count].copy_from_slice(&buf[..count]);
            count
        })
    }
}

impl std::fmt::Debug for BackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackingStore")
            .field("id", &self.id)
            .field("layout", &self.layout)
            .finish()
    }
}

impl Drop for BackingStore {
    fn drop(&mut self) {
        debug!(
            store_id = self.id,
            bytes = self.layout.alloc_len,
            "Freeing screen memory"
        );

        unsafe {
            mimalloc::MiMalloc.dealloc(self.base.as_ptr(), self.alloc_layout);
        }
        self.stats.record_free(self.layout.alloc_len);
    }
}

/// Hands out backing stores and accounts for them in a shared
/// [`MemoryStats`].
#[derive(Debug, Clone)]
pub struct StoreAllocator {
    config: StoreConfig,
    stats: Arc<MemoryStats>,
    next_id: Arc<AtomicU64>,
}

impl StoreAllocator {
    pub fn new(config: StoreConfig, stats: Arc<MemoryStats>) -> Self {
        Self {
            config,
            stats,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create an allocator with the default budget and fresh statistics.
    pub fn with_defaults() -> Self {
        Self::new(StoreConfig::default(), Arc::new(MemoryStats::new()))
    }

    pub fn stats(&self) -> &Arc<MemoryStats> {
        &self.stats
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Allocate a zeroed store for a `width` x `height` surface.
    ///
    /// Fails without side effects if the layout is invalid, the budget
    /// would be exceeded, or the system allocator comes back empty.
    pub fn allocate(
        &self,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    ) -> Result<Arc<BackingStore>, AllocationError> {
        let layout = StoreLayout::compute(width, height, bytes_per_pixel)?;
        let alloc_layout = Layout::from_size_align(layout.alloc_len, PAGE_SIZE).map_err(|_| {
            AllocationError::SizeOverflow {
                width,
                height,
                bytes_per_pixel,
            }
        })?;

        let out_of_memory = |stats: &MemoryStats| AllocationError::OutOfMemory {
            requested: layout.alloc_len,
            in_use: stats.total(),
            budget: self.config.memory_budget,
        };

        if !self.stats.try_reserve(layout.alloc_len, self.config.memory_budget) {
            warn!(
                requested = layout.alloc_len,
                in_use = self.stats.total(),
                budget = self.config.memory_budget,
                "Screen memory budget exceeded, rejecting allocation"
            );
            return Err(out_of_memory(&self.stats));
        }

        let ptr = unsafe { mimalloc::MiMalloc.alloc_zeroed(alloc_layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            self.stats.record_free(layout.alloc_len);
            warn!(requested = layout.alloc_len, "Screen memory allocation failed");
            return Err(out_of_memory(&self.stats));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            store_id = id,
            width,
            height,
            bytes = layout.alloc_len,
            "Allocated screen memory"
        );

        Ok(Arc::new(BackingStore {
            id,
            layout,
            alloc_layout,
            base: ptr,
            access: Mutex::new(()),
            stats: Arc::clone(&self.stats),
        }))
    }
}
