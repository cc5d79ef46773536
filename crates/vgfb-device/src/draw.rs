//! Fill and copy primitives on 32 bpp surfaces.

use crate::geometry::Geometry;
use serde::{Deserialize, Serialize};

/// Raster operation for [`fill_rect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rop {
    #[default]
    Copy,
    Xor,
}

/// Rectangle in virtual-surface pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clip to a `bounds_w` x `bounds_h` area. Returns `None` if nothing
    /// is left.
    fn clip(self, bounds_w: u32, bounds_h: u32) -> Option<Self> {
        if self.width == 0 || self.height == 0 || self.x >= bounds_w || self.y >= bounds_h {
            return None;
        }
        Some(Self {
            width: self.width.min(bounds_w - self.x),
            height: self.height.min(bounds_h - self.y),
            ..self
        })
    }
}

/// Pack a color the way the pseudo palette stores it (R in the low byte).
pub fn pack_color(red: u32, green: u32, blue: u32, alpha: u32) -> u32 {
    (red & 0xff) | ((green & 0xff) << 8) | ((blue & 0xff) << 16) | ((alpha & 0xff) << 24)
}

const BYTES_PER_PIXEL: usize = 4;

fn pixel_offset(geometry: &Geometry, x: u32, y: u32) -> usize {
    (y as usize * geometry.virtual_width as usize + x as usize) * BYTES_PER_PIXEL
}

/// Fill `rect` with `color`, clipped to the virtual surface.
pub(crate) fn fill_rect(pixels: &mut [u8], geometry: &Geometry, rect: Rect, color: u32, rop: Rop) {
    if geometry.bits_per_pixel != 32 {
        return;
    }
    let Some(rect) = rect.clip(geometry.virtual_width, geometry.virtual_height) else {
        return;
    };

    let row_bytes = rect.width as usize * BYTES_PER_PIXEL;
    for row in 0..rect.height {
        let start = pixel_offset(geometry, rect.x, rect.y + row);
        let Some(line) = pixels.get_mut(start..start + row_bytes) else {
            return;
        };
        for px in line.chunks_exact_mut(BYTES_PER_PIXEL) {
            let value = match rop {
                Rop::Copy => color,
                Rop::Xor => u32::from_le_bytes([px[0], px[1], px[2], px[3]]) ^ color,
            };
            px.copy_from_slice(&value.to_le_bytes());
        }
    }
}

/// Copy the area at (`src_x`, `src_y`) onto `dst`. Overlapping areas are
/// handled.
pub(crate) fn copy_area(pixels: &mut [u8], geometry: &Geometry, src_x: u32, src_y: u32, dst: Rect) {
    if geometry.bits_per_pixel != 32 {
        return;
    }
    let Some(dst) = dst.clip(geometry.virtual_width, geometry.virtual_height) else {
        return;
    };
    let Some(src) = Rect::new(src_x, src_y, dst.width, dst.height)
        .clip(geometry.virtual_width, geometry.virtual_height)
    else {
        return;
    };

    let width = dst.width.min(src.width);
    let height = dst.height.min(src.height);
    let row_bytes = width as usize * BYTES_PER_PIXEL;

    let copy_row = |pixels: &mut [u8], row: u32| {
        let from = pixel_offset(geometry, src.x, src.y + row);
        let to = pixel_offset(geometry, dst.x, dst.y + row);
        if from + row_bytes <= pixels.len() && to + row_bytes <= pixels.len() {
            pixels.copy_within(from..from + row_bytes, to);
        }
    };

    // Walk rows away from the overlap
    if dst.y > src.y {
        for row in (0..height).rev() {
            copy_row(pixels, row);
        }
    } else {
        for row in 0..height {
            copy_row(pixels, row);
        }
    }
}
