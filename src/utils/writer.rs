use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use webp::Encoder;

use crate::utils::error::{VexelError, VexelResult};
use crate::utils::image::Image;

pub struct Writer {}

impl Writer {
    /// Binary PPM (P6). Alpha is dropped.
    pub fn write_ppm<P: AsRef<Path>>(output_path: P, image: &Image) -> VexelResult<()> {
        Writer::validate_pixel_count(image)?;

        let mut file = BufWriter::new(File::create(output_path)?);

        file.write_all(b"P6\n")?;
        file.write_all(format!("{} {}\n", image.width(), image.height()).as_bytes())?;
        file.write_all(b"255\n")?;
        file.write_all(&image.as_rgb8())?;
        file.flush()?;

        Ok(())
    }

    /// PAM (P7) keeping the image's own channel layout.
    pub fn write_pam<P: AsRef<Path>>(output_path: P, image: &Image) -> VexelResult<()> {
        Writer::validate_pixel_count(image)?;

        let mut file = BufWriter::new(File::create(output_path)?);

        file.write_all(b"P7\n")?;
        file.write_all(format!("WIDTH {}\n", image.width()).as_bytes())?;
        file.write_all(format!("HEIGHT {}\n", image.height()).as_bytes())?;

        if image.has_alpha() {
            file.write_all(b"DEPTH 4\nMAXVAL 255\nTUPLTYPE RGB_ALPHA\nENDHDR\n")?;
        } else {
            file.write_all(b"DEPTH 3\nMAXVAL 255\nTUPLTYPE RGB\nENDHDR\n")?;
        }

        file.write_all(image.pixels())?;
        file.flush()?;

        Ok(())
    }

    /// Lossless WebP.
    pub fn write_webp<P: AsRef<Path>>(output_path: P, image: &Image) -> VexelResult<()> {
        Writer::validate_pixel_count(image)?;

        let encoder = if image.has_alpha() {
            Encoder::from_rgba(image.pixels(), image.width(), image.height())
        } else {
            Encoder::from_rgb(image.pixels(), image.width(), image.height())
        };

        let webp_data = encoder.encode_lossless();

        let mut file = File::create(output_path)?;
        file.write_all(&webp_data)?;

        Ok(())
    }

    fn validate_pixel_count(image: &Image) -> VexelResult<()> {
        let channels = image.pixel_format().channels();
        let expected_size = image.width() as usize * image.height() as usize * channels;
        let actual_size = image.pixels().len();

        if expected_size != actual_size {
            return Err(VexelError::CorruptSegment(format!(
                "Invalid pixel data size for {}x{} image with {} channels: expected {} bytes, got {}",
                image.width(),
                image.height(),
                channels,
                expected_size,
                actual_size
            )));
        }

        Ok(())
    }
}
