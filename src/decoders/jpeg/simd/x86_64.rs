//! SSE2 color conversion.
//!
//! Uses `pmaddwd` on interleaved (Cb, Cr) pairs so every matrix row is one
//! multiply-add, with the same 14-bit constants and rounding as the scalar path.

use std::arch::x86_64::*;

use super::scalar::{CB_TO_B, CB_TO_G, CR_TO_G, CR_TO_R, ONE_HALF, SCALE_BITS};

/// Packs a (Cb, Cr) coefficient pair into one `pmaddwd` lane.
const fn pair(cb: i32, cr: i32) -> i32 {
    ((cr as i16 as u16 as i32) << 16) | (cb as i16 as u16 as i32)
}

pub fn ycbcr_420_8px(y: &[u8], cb: &[u8], cr: &[u8], out: &mut [u8]) {
    assert!(y.len() >= 8 && cb.len() >= 4 && cr.len() >= 4 && out.len() >= 32);

    // SAFETY: the dispatcher only hands out this kernel after detecting SSE2, and the
    // slice lengths were checked above.
    unsafe { ycbcr_420_8px_sse2(y, cb, cr, out) }
}

/// Loads 4 chroma samples, duplicates each one and removes the 128 bias.
#[inline]
unsafe fn widen_chroma(samples: &[u8]) -> __m128i {
    let packed = _mm_cvtsi32_si128(i32::from_le_bytes([samples[0], samples[1], samples[2], samples[3]]));
    let doubled = _mm_unpacklo_epi8(packed, packed);
    _mm_sub_epi16(_mm_unpacklo_epi8(doubled, _mm_setzero_si128()), _mm_set1_epi16(128))
}

/// One matrix row for 8 pixels: `(coefficients . (cb, cr) + 0.5) >> 14`.
#[inline]
unsafe fn matrix_term(pairs_lo: __m128i, pairs_hi: __m128i, coefficients: i32) -> __m128i {
    let coefficients = _mm_set1_epi32(coefficients);
    let half = _mm_set1_epi32(ONE_HALF);

    let lo = _mm_srai_epi32(_mm_add_epi32(_mm_madd_epi16(pairs_lo, coefficients), half), SCALE_BITS);
    let hi = _mm_srai_epi32(_mm_add_epi32(_mm_madd_epi16(pairs_hi, coefficients), half), SCALE_BITS);

    _mm_packs_epi32(lo, hi)
}

#[target_feature(enable = "sse2")]
unsafe fn ycbcr_420_8px_sse2(y: &[u8], cb: &[u8], cr: &[u8], out: &mut [u8]) {
    let luma = _mm_unpacklo_epi8(_mm_loadl_epi64(y.as_ptr() as *const __m128i), _mm_setzero_si128());

    let cb = widen_chroma(cb);
    let cr = widen_chroma(cr);
    let pairs_lo = _mm_unpacklo_epi16(cb, cr);
    let pairs_hi = _mm_unpackhi_epi16(cb, cr);

    let r = _mm_add_epi16(luma, matrix_term(pairs_lo, pairs_hi, pair(0, CR_TO_R)));
    let g = _mm_sub_epi16(luma, matrix_term(pairs_lo, pairs_hi, pair(CB_TO_G, CR_TO_G)));
    let b = _mm_add_epi16(luma, matrix_term(pairs_lo, pairs_hi, pair(CB_TO_B, 0)));

    let r = _mm_packus_epi16(r, r);
    let g = _mm_packus_epi16(g, g);
    let b = _mm_packus_epi16(b, b);
    let a = _mm_set1_epi8(-1);

    let rg = _mm_unpacklo_epi8(r, g);
    let ba = _mm_unpacklo_epi8(b, a);

    _mm_storeu_si128(out.as_mut_ptr() as *mut __m128i, _mm_unpacklo_epi16(rg, ba));
    _mm_storeu_si128(out.as_mut_ptr().add(16) as *mut __m128i, _mm_unpackhi_epi16(rg, ba));
}
