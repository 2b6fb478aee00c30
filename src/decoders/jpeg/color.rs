#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::decoders::jpeg::component::ImageComponent;
use crate::decoders::jpeg::simd::scalar::ycbcr_to_rgba;
use crate::decoders::jpeg::simd::ColorOps;

/// Sampling-factor label of the 4:2:0 layout with the batched fast path.
pub const LABEL_420: u32 = 0x221111;

/// Packs each component's `(h, v)` factors into one nibble pair, first component in the
/// highest position.
pub fn sampling_label(components: &[ImageComponent]) -> u32 {
    components.iter().fold(0u32, |label, component| {
        (label << 8)
            | (u32::from(component.horizontal_sampling_factor) << 4)
            | u32::from(component.vertical_sampling_factor)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorTransform {
    Grayscale,
    YCbCr,
    /// Components already hold R, G and B.
    Rgb,
}

/// Reconstructed samples of one component, addressed through its reindex tables.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub samples: &'a [u8],
    pub x_offsets: &'a [u32],
    pub y_offsets: &'a [u32],
}

impl Plane<'_> {
    #[inline(always)]
    fn sample(&self, x: usize, row_offset: u32) -> u8 {
        self.samples[(row_offset + self.x_offsets[x]) as usize]
    }

    /// `len` contiguous samples starting at output pixel `(x, y)`. Only valid where the
    /// tables are known to be contiguous, which the 4:2:0 path guarantees by stepping
    /// in 8 pixel groups.
    #[inline(always)]
    fn run(&self, x: usize, row_offset: u32, len: usize) -> &[u8] {
        let start = (row_offset + self.x_offsets[x]) as usize;
        &self.samples[start..start + len]
    }
}

pub struct ColorConverter<'a> {
    planes: Vec<Plane<'a>>,
    transform: ColorTransform,
    label: u32,
    padded_width: usize,
    ops: ColorOps,
}

impl<'a> ColorConverter<'a> {
    /// # Parameters
    /// - `planes`: one plane per component, in frame order
    /// - `padded_width`: MCU-aligned width every reindex table covers
    pub fn new(planes: Vec<Plane<'a>>, transform: ColorTransform, label: u32, padded_width: usize, ops: ColorOps) -> Self {
        ColorConverter {
            planes,
            transform,
            label,
            padded_width,
            ops,
        }
    }

    /// Converts the first `height` rows at the padded width into RGBA.
    pub fn convert(&self, height: usize) -> Vec<u8> {
        let stride = self.padded_width * 4;
        let mut rgba = vec![0u8; stride * height];

        #[cfg(feature = "rayon")]
        rgba.par_chunks_mut(stride)
            .enumerate()
            .for_each(|(y, row)| self.convert_row(y, row));

        #[cfg(not(feature = "rayon"))]
        rgba.chunks_mut(stride)
            .enumerate()
            .for_each(|(y, row)| self.convert_row(y, row));

        rgba
    }

    fn convert_row(&self, y: usize, row: &mut [u8]) {
        match self.transform {
            ColorTransform::Grayscale => {
                let plane = &self.planes[0];
                let offset = plane.y_offsets[y];
                for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                    let value = plane.sample(x, offset);
                    pixel.copy_from_slice(&[value, value, value, 255]);
                }
            }
            ColorTransform::Rgb => {
                let offsets = [
                    self.planes[0].y_offsets[y],
                    self.planes[1].y_offsets[y],
                    self.planes[2].y_offsets[y],
                ];
                for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                    pixel.copy_from_slice(&[
                        self.planes[0].sample(x, offsets[0]),
                        self.planes[1].sample(x, offsets[1]),
                        self.planes[2].sample(x, offsets[2]),
                        255,
                    ]);
                }
            }
            ColorTransform::YCbCr if self.label == LABEL_420 => self.convert_row_420(y, row),
            ColorTransform::YCbCr => {
                let [luma, cb, cr] = [&self.planes[0], &self.planes[1], &self.planes[2]];
                let offsets = [luma.y_offsets[y], cb.y_offsets[y], cr.y_offsets[y]];
                for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                    pixel.copy_from_slice(&ycbcr_to_rgba(
                        luma.sample(x, offsets[0]),
                        cb.sample(x, offsets[1]),
                        cr.sample(x, offsets[2]),
                    ));
                }
            }
        }
    }

    /// 4:2:0 rows in groups of 8 pixels. The padded width is a multiple of 16, and an
    /// 8 pixel group starting at a multiple of 8 covers 8 contiguous luma samples and 4
    /// contiguous chroma samples of a single block.
    fn convert_row_420(&self, y: usize, row: &mut [u8]) {
        let [luma, cb, cr] = [&self.planes[0], &self.planes[1], &self.planes[2]];
        let offsets = [luma.y_offsets[y], cb.y_offsets[y], cr.y_offsets[y]];

        for (group, pixels) in row.chunks_exact_mut(32).enumerate() {
            let x = group * 8;
            (self.ops.ycbcr_420_8px)(
                luma.run(x, offsets[0], 8),
                cb.run(x, offsets[1], 4),
                cr.run(x, offsets[2], 4),
                pixels,
            );
        }
    }
}

/// Copies the top-left `width` x `height` pixels out of a padded RGBA buffer.
pub fn crop(padded: &[u8], padded_width: usize, width: usize, height: usize) -> Vec<u8> {
    if padded_width == width {
        return padded[..width * height * 4].to_vec();
    }

    let mut pixels = Vec::with_capacity(width * height * 4);
    for row in padded.chunks_exact(padded_width * 4).take(height) {
        pixels.extend_from_slice(&row[..width * 4]);
    }

    pixels
}
