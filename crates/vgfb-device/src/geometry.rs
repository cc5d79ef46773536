//! Screen geometry derived from a resolution and pixel depth.

use crate::error::{DeviceError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use vgfb_memory::StoreLayout;

/// Pixel depths a device accepts, in bits per pixel.
pub const SUPPORTED_DEPTHS: [u32; 2] = [24, 32];

/// Visible size of the surface in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Check a requested resolution and depth before anything is allocated.
pub fn validate(resolution: Resolution, bits_per_pixel: u32) -> Result<()> {
    if resolution.width == 0 || resolution.height == 0 {
        return Err(DeviceError::InvalidGeometry(format!(
            "resolution {} has a zero dimension",
            resolution
        )));
    }
    if !SUPPORTED_DEPTHS.contains(&bits_per_pixel) {
        return Err(DeviceError::InvalidGeometry(format!(
            "unsupported pixel depth {} bpp",
            bits_per_pixel
        )));
    }
    Ok(())
}

/// Everything a client can learn about the surface layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub virtual_width: u32,
    pub virtual_height: u32,
    pub bits_per_pixel: u32,
    /// Bytes per row
    pub stride: usize,
    /// Bytes of pixel data
    pub total_length: usize,
    /// Vertical pan granularity in rows
    pub pan_step: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    /// Pixel clock in picoseconds
    pub pixclock: u64,
}

impl Geometry {
    /// Geometry of a freshly promoted store. Pan offsets start at zero.
    pub fn from_layout(layout: &StoreLayout, refresh_rate: u32) -> Self {
        Self {
            width: layout.width,
            height: layout.height,
            virtual_width: layout.virtual_width,
            virtual_height: layout.virtual_height,
            bits_per_pixel: layout.bytes_per_pixel * 8,
            stride: layout.stride,
            total_length: layout.data_len,
            pan_step: layout.virtual_height - layout.height,
            x_offset: 0,
            y_offset: 0,
            pixclock: pixclock(layout.width, layout.height, refresh_rate),
        }
    }

    /// Validate and compute the geometry for a resolution without
    /// allocating anything.
    pub fn compute(resolution: Resolution, bits_per_pixel: u32, refresh_rate: u32) -> Result<Self> {
        validate(resolution, bits_per_pixel)?;
        let layout = StoreLayout::compute(resolution.width, resolution.height, bits_per_pixel / 8)?;
        Ok(Self::from_layout(&layout, refresh_rate))
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.bits_per_pixel / 8
    }

    /// Bytes covered by the visible part of the surface.
    pub fn visible_length(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel() as usize
    }

    pub fn matches(&self, resolution: Resolution, bits_per_pixel: u32) -> bool {
        self.resolution() == resolution && self.bits_per_pixel == bits_per_pixel
    }

    /// Move the visible window inside the virtual surface.
    pub fn pan(&mut self, x_offset: u32, y_offset: u32) -> Result<()> {
        if x_offset > self.virtual_width - self.width {
            return Err(DeviceError::InvalidGeometry(format!(
                "x offset {} exceeds {}",
                x_offset,
                self.virtual_width - self.width
            )));
        }
        if y_offset > self.virtual_height - self.height {
            return Err(DeviceError::InvalidGeometry(format!(
                "y offset {} exceeds {}",
                y_offset,
                self.virtual_height - self.height
            )));
        }
        self.x_offset = x_offset;
        self.y_offset = y_offset;
        Ok(())
    }
}

fn pixclock(width: u32, height: u32, refresh_rate: u32) -> u64 {
    1_000_000_000_000u64 / u64::from(width) / u64::from(height) / u64::from(refresh_rate.max(1))
}
