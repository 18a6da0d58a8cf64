//! Packed RGBA frames and the conversion from a backend's row layout.
use std::slice::ChunksExact;

use rayon::iter::ParallelIterator;
use rayon::slice::ParallelSliceMut;

use crate::native::{BYTES_PER_PIXEL, Geometry};

/// Used To Handle Frame Packing Errors
#[derive(thiserror::Error, Eq, PartialEq, Clone, Copy, Debug)]
pub enum Error {
    /// The backend handed out fewer bytes than its geometry promises.
    #[error("Native buffer holds {actual} bytes but the geometry needs {expected}")]
    BufferTooSmall { expected: usize, actual: usize },
}

/// A captured image: `height` rows of `width` pixels, 4 bytes each in R, G, B, A order, without
/// any row padding. Alpha is always 255.
///
/// Frames own their pixels, so they stay valid after the session that produced them refreshes,
/// closes or is dropped.
#[derive(Eq, PartialEq, Clone, Debug)]
pub struct Frame {
    width: u32,
    height: u32,
    buffer: Vec<u8>,
}

impl Frame {
    /// Copies the rows of a native buffer described by `geometry` into a new frame and marks
    /// every pixel fully opaque.
    ///
    /// `geometry` must satisfy [`Geometry::is_valid`].
    pub(crate) fn from_native(native: &[u8], geometry: Geometry) -> Result<Self, Error> {
        let mut buffer = strip_padding(native, geometry)?;
        force_opaque(&mut buffer, geometry.row_len());

        Ok(Self { width: geometry.width(), height: geometry.height(), buffer })
    }

    /// Get The Width Of The Frame
    #[inline]
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Get The Height Of The Frame
    #[inline]
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Get The Packed Pixel Data
    #[inline]
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume The Frame And Get The Packed Pixel Data
    #[inline]
    #[must_use]
    pub fn into_raw(self) -> Vec<u8> {
        self.buffer
    }

    /// Get The Pixel At (`x`, `y`), `None` When Out Of Bounds
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }

        let index = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let pixel = self.buffer.get(index..index + BYTES_PER_PIXEL)?;

        Some([pixel[0], pixel[1], pixel[2], pixel[3]])
    }

    /// Iterate Over The Rows Of The Frame, Top To Bottom
    #[inline]
    pub fn rows(&self) -> ChunksExact<'_, u8> {
        self.buffer.chunks_exact(self.width as usize * BYTES_PER_PIXEL)
    }
}

/// Keeps the first `width * 4` bytes of each of the `height` native rows and drops the padding.
fn strip_padding(native: &[u8], geometry: Geometry) -> Result<Vec<u8>, Error> {
    let expected = geometry.min_buffer_len();
    if native.len() < expected {
        return Err(Error::BufferTooSmall { expected, actual: native.len() });
    }

    let row_len = geometry.row_len();
    let stride = geometry.stride();

    let mut packed = Vec::with_capacity(geometry.frame_len());
    for row in 0..geometry.height() as usize {
        let start = row * stride;
        let pixels = &native[start..start + row_len];
        debug_assert_eq!(pixels.len(), row_len);

        packed.extend_from_slice(pixels);
    }
    assert_eq!(packed.len(), geometry.frame_len());

    Ok(packed)
}

/// Set The Alpha Byte Of Every Pixel To 255
fn force_opaque(packed: &mut [u8], row_len: usize) {
    packed.par_chunks_mut(row_len).for_each(|row| {
        for pixel in row.chunks_exact_mut(BYTES_PER_PIXEL) {
            pixel[3] = u8::MAX;
        }
    });
}
