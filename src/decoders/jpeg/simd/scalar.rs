//! Reference color conversion.

/// Fixed-point precision of the conversion matrix. 14 bits keep every coefficient
/// inside an `i16`, which the SSE2 kernel relies on.
pub const SCALE_BITS: i32 = 14;
pub const ONE_HALF: i32 = 1 << (SCALE_BITS - 1);

pub const CR_TO_R: i32 = 22970; // 1.402 * 2^14
pub const CB_TO_G: i32 = 5638; // 0.344136 * 2^14
pub const CR_TO_G: i32 = 11700; // 0.714136 * 2^14
pub const CB_TO_B: i32 = 29032; // 1.772 * 2^14

#[cfg(not(feature = "float-color"))]
#[inline(always)]
pub fn ycbcr_to_rgba(y: u8, cb: u8, cr: u8) -> [u8; 4] {
    let y = i32::from(y);
    let cb = i32::from(cb) - 128;
    let cr = i32::from(cr) - 128;

    let r = y + ((CR_TO_R * cr + ONE_HALF) >> SCALE_BITS);
    let g = y - ((CB_TO_G * cb + CR_TO_G * cr + ONE_HALF) >> SCALE_BITS);
    let b = y + ((CB_TO_B * cb + ONE_HALF) >> SCALE_BITS);

    [clamp(r), clamp(g), clamp(b), 255]
}

#[cfg(feature = "float-color")]
#[inline(always)]
pub fn ycbcr_to_rgba(y: u8, cb: u8, cr: u8) -> [u8; 4] {
    let y = f32::from(y);
    let cb = f32::from(cb) - 128.0;
    let cr = f32::from(cr) - 128.0;

    let r = y + 1.402 * cr;
    let g = y - 0.344136 * cb - 0.714136 * cr;
    let b = y + 1.772 * cb;

    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
        255,
    ]
}

#[inline(always)]
fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

pub fn ycbcr_420_8px(y: &[u8], cb: &[u8], cr: &[u8], out: &mut [u8]) {
    for (i, pixel) in out[..32].chunks_exact_mut(4).enumerate() {
        pixel.copy_from_slice(&ycbcr_to_rgba(y[i], cb[i / 2], cr[i / 2]));
    }
}
