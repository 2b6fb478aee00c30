mod decoders;
mod utils;

pub use decoders::jpeg::huffman::HuffmanTable;
pub use decoders::jpeg::marker::JpegMarker;
pub use decoders::jpeg::{
    AdobeHeader, ComponentInfo, DecoderOptions, JfifHeader, JpegDecoder, JpegMode, ParserState, QuantizationTable,
    ScanComponent, ScanInfo,
};
pub use utils::error::{VexelError, VexelResult};
pub use utils::image::{Image, PixelFormat};
pub use utils::info::JpegInfo;
pub use utils::logger::Logger;
pub use utils::writer::Writer;

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Owns the bytes of one JPEG file and decodes them on demand.
#[derive(Debug, Clone)]
pub struct Vexel {
    data: Vec<u8>,
    options: DecoderOptions,
}

impl Vexel {
    pub fn open<P: AsRef<Path>>(path: P) -> VexelResult<Vexel> {
        let path = path.as_ref();

        let data = fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => VexelError::FileNotFound(path.to_path_buf()),
            _ => VexelError::Io(e),
        })?;

        Vexel::from_bytes(data)
    }

    /// # Returns
    /// - `VexelError::UnsupportedFormat` if the data does not start with a JPEG SOI marker
    pub fn from_bytes(data: Vec<u8>) -> VexelResult<Vexel> {
        Vexel::check_format(&data)?;

        Ok(Vexel {
            data,
            options: DecoderOptions::default(),
        })
    }

    pub fn with_options(mut self, options: DecoderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> DecoderOptions {
        self.options
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn decode(&self) -> VexelResult<Image> {
        JpegDecoder::with_options(&self.data, self.options).decode()
    }

    pub fn info(&self) -> VexelResult<JpegInfo> {
        JpegDecoder::with_options(&self.data, self.options).read_info()
    }

    fn check_format(header: &[u8]) -> VexelResult<()> {
        if header.starts_with(&[0xFF, 0xD8]) {
            return Ok(());
        }

        let format = if header.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
            "PNG"
        } else if header.starts_with(b"GIF87a") || header.starts_with(b"GIF89a") {
            "GIF"
        } else if header.starts_with(b"BM") {
            "BMP"
        } else if header.starts_with(b"RIFF") {
            "RIFF/WebP"
        } else {
            "unknown"
        };

        Err(VexelError::UnsupportedFormat(format!("Not a JPEG stream ({} data)", format)))
    }
}

/// Decodes a JPEG held in memory with default options.
pub fn decode(data: &[u8]) -> VexelResult<Image> {
    JpegDecoder::new(data).decode()
}
