fn drop_transparency_channel(pixels: &[u8]) -> Vec<u8> {
    pixels.chunks_exact(4).flat_map(|chunk| [chunk[0], chunk[1], chunk[2]]).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    RGB8,
    RGBA8,
}

impl PixelFormat {
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::RGB8 => 3,
            PixelFormat::RGBA8 => 4,
        }
    }
}

/// Decoded image: true dimensions and an owned, row-major pixel buffer.
#[derive(Debug, Clone)]
pub struct Image {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    pixels: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat, pixels: Vec<u8>) -> Image {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * pixel_format.channels());

        Image {
            width,
            height,
            pixel_format,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn has_alpha(&self) -> bool {
        self.pixel_format == PixelFormat::RGBA8
    }

    pub fn as_rgb8(&self) -> Vec<u8> {
        match self.pixel_format {
            PixelFormat::RGB8 => self.pixels.clone(),
            PixelFormat::RGBA8 => drop_transparency_channel(&self.pixels),
        }
    }
}
