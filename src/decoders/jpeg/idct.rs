use std::f32::consts::{FRAC_1_SQRT_2, PI};
use std::sync::OnceLock;

use crate::decoders::jpeg::ZIGZAG_MAP;

type CosineMask = [f32; 64];

/// One 8x8 spatial pattern per zig-zag frequency index.
///
/// `mask[z][y * 8 + x] = C(u) C(v) / 4 * cos((2x + 1) u pi / 16) * cos((2y + 1) v pi / 16)`
/// where `(u, v)` is the natural position of zig-zag index `z` and `C(0) = 1 / sqrt(2)`.
pub fn cosine_masks() -> &'static [CosineMask; 64] {
    static MASKS: OnceLock<Box<[CosineMask; 64]>> = OnceLock::new();

    MASKS.get_or_init(|| {
        let mut masks = Box::new([[0f32; 64]; 64]);

        for (z, mask) in masks.iter_mut().enumerate() {
            let natural = ZIGZAG_MAP[z] as usize;
            let u = natural % 8;
            let v = natural / 8;
            let cu = if u == 0 { FRAC_1_SQRT_2 } else { 1.0 };
            let cv = if v == 0 { FRAC_1_SQRT_2 } else { 1.0 };

            for y in 0..8 {
                for x in 0..8 {
                    let horizontal = ((2 * x + 1) as f32 * u as f32 * PI / 16.0).cos();
                    let vertical = ((2 * y + 1) as f32 * v as f32 * PI / 16.0).cos();
                    mask[y * 8 + x] = cu * cv / 4.0 * horizontal * vertical;
                }
            }
        }

        masks
    })
}

/// Dequantizes one block of zig-zag ordered coefficients and writes its 64 level-shifted
/// samples (row-major) into `output`.
///
/// Only non-zero coefficients contribute; each scales its cosine mask into the
/// accumulator.
#[inline]
pub fn idct_block(coefficients: &[i32], quantization: &[u16; 64], output: &mut [u8]) {
    let masks = cosine_masks();
    let mut accumulator = [0f32; 64];

    for (z, &coefficient) in coefficients.iter().enumerate().take(64) {
        if coefficient == 0 {
            continue;
        }

        let value = coefficient as f32 * f32::from(quantization[z]);
        for (acc, &basis) in accumulator.iter_mut().zip(masks[z].iter()) {
            *acc += value * basis;
        }
    }

    for (sample, &acc) in output.iter_mut().zip(accumulator.iter()) {
        *sample = (acc + 128.0).round().clamp(0.0, 255.0) as u8;
    }
}

/// Reconstructs a full row of blocks. `coefficients` and `samples` hold the same number
/// of blocks, 64 values each, in block order.
pub fn reconstruct_row(coefficients: &[i32], quantization: &[u16; 64], samples: &mut [u8]) {
    for (block, output) in coefficients.chunks_exact(64).zip(samples.chunks_exact_mut(64)) {
        idct_block(block, quantization, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_dc_block() {
        let mut coefficients = [0i32; 64];
        coefficients[0] = 80;
        let quantization = [1u16; 64];
        let mut output = [0u8; 64];

        idct_block(&coefficients, &quantization, &mut output);

        // 80 * (1/sqrt(2))^2 / 4 = 10
        assert!(output.iter().all(|&s| s == 138));
    }

    #[test]
    fn test_quantization_is_applied() {
        let mut coefficients = [0i32; 64];
        coefficients[0] = -16;
        let mut quantization = [1u16; 64];
        quantization[0] = 4;
        let mut output = [0u8; 64];

        idct_block(&coefficients, &quantization, &mut output);

        assert!(output.iter().all(|&s| s == 120));
    }

    #[test]
    fn test_output_is_clamped() {
        let mut coefficients = [0i32; 64];
        coefficients[0] = 4000;
        let mut output = [0u8; 64];

        idct_block(&coefficients, &[1; 64], &mut output);
        assert!(output.iter().all(|&s| s == 255));

        coefficients[0] = -4000;
        idct_block(&coefficients, &[1; 64], &mut output);
        assert!(output.iter().all(|&s| s == 0));

        coefficients[0] = 1 << 28;
        idct_block(&coefficients, &[u16::MAX; 64], &mut output);
        assert!(output.iter().all(|&s| s == 255));
    }

    #[test]
    fn test_first_horizontal_frequency() {
        // Zig-zag index 1 is (u = 1, v = 0): samples vary along x only, decreasing.
        let mut coefficients = [0i32; 64];
        coefficients[1] = 100;
        let mut output = [0u8; 64];

        idct_block(&coefficients, &[1; 64], &mut output);

        for y in 0..8 {
            assert_eq!(&output[y * 8..y * 8 + 8], &output[0..8]);
        }
        for x in 0..7 {
            assert!(output[x] > output[x + 1]);
        }
        // Antisymmetric around the block centre.
        assert_eq!(i32::from(output[0]) + i32::from(output[7]), 256);
    }
}
