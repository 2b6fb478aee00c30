//! Color conversion kernels with runtime dispatch.
//!
//! The scalar kernels are the reference; x86_64 builds select SSE2 versions at
//! runtime. Both produce identical bytes.

pub mod scalar;

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

/// Converts 8 pixels of a 4:2:0 row: 8 luma samples and the 4 Cb / Cr samples they
/// share horizontally, into 32 RGBA bytes.
pub type YCbCr420Fn = fn(&[u8], &[u8], &[u8], &mut [u8]);

/// Kernel table, resolved once per decode.
#[derive(Clone, Copy)]
pub struct ColorOps {
    pub ycbcr_420_8px: YCbCr420Fn,
    pub name: &'static str,
}

impl ColorOps {
    /// Picks the fastest kernels the CPU supports.
    pub fn detect() -> Self {
        #[cfg(all(target_arch = "x86_64", not(feature = "float-color")))]
        {
            if is_x86_feature_detected!("sse2") {
                return ColorOps {
                    ycbcr_420_8px: x86_64::ycbcr_420_8px,
                    name: "sse2",
                };
            }
        }

        Self::scalar()
    }

    pub fn scalar() -> Self {
        ColorOps {
            ycbcr_420_8px: scalar::ycbcr_420_8px,
            name: "scalar",
        }
    }
}

impl std::fmt::Debug for ColorOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorOps").field("name", &self.name).finish()
    }
}
