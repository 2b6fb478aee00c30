pub mod block;
pub mod color;
pub mod component;
pub mod huffman;
pub mod idct;
pub mod marker;
pub mod scheduler;
pub mod simd;

#[cfg(test)]
pub(crate) mod test_encoder;

use std::fmt::{Debug, Formatter};

use crate::decoders::jpeg::block::BlockDecoder;
use crate::decoders::jpeg::color::{crop, sampling_label, ColorConverter, ColorTransform, Plane};
use crate::decoders::jpeg::component::{band_mask, FrameGeometry, ImageComponent, FULL_COVERAGE};
use crate::decoders::jpeg::huffman::HuffmanTable;
use crate::decoders::jpeg::marker::JpegMarker;
use crate::decoders::jpeg::scheduler::ScanScheduler;
use crate::decoders::jpeg::simd::ColorOps;
use crate::utils::bitreader::BitReader;
use crate::utils::error::{VexelError, VexelResult};
use crate::utils::image::{Image, PixelFormat};
use crate::utils::info::JpegInfo;
use crate::utils::traits::SafeAccess;
use crate::{log_debug, log_warn};

/// Zig-zag index -> natural (row-major) index within an 8x8 block.
#[rustfmt::skip]
pub(crate) const ZIGZAG_MAP: [u8; 64] = [
    0,  1,  8, 16,  9,  2,  3, 10,
    17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpegMode {
    Baseline,
    ExtendedSequential,
    Progressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Before the frame header.
    Initial,
    /// Frame header read, no scan yet.
    InFrame,
    /// At least one scan decoded.
    InScan,
    Done,
}

#[derive(Debug, Clone)]
pub struct QuantizationTable {
    pub id: u8,
    /// 0 for 8-bit entries, 1 for 16-bit entries.
    pub precision: u8,
    /// Zig-zag order, like the coefficients it scales.
    pub table: [u16; 64],
}

#[derive(Debug, Clone)]
pub struct JfifHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub density_units: u8,
    pub x_density: u16,
    pub y_density: u16,
    pub thumbnail_width: u8,
    pub thumbnail_height: u8,
}

#[derive(Debug, Clone)]
pub struct AdobeHeader {
    pub version: u16,
    pub flags0: u16,
    pub flags1: u16,
    /// 0: RGB or CMYK, 1: YCbCr, 2: YCCK.
    pub transform: u8,
}

#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub id: u8,
    pub horizontal_sampling_factor: u8,
    pub vertical_sampling_factor: u8,
    pub quantization_table_id: u8,
}

/// Binding of a frame component to the Huffman tables one scan uses for it.
#[derive(Debug, Clone, Copy)]
pub struct ScanComponent {
    pub component_index: usize,
    pub component_id: u8,
    pub dc_table_selector: u8,
    pub ac_table_selector: u8,
}

#[derive(Debug, Clone)]
pub struct ScanInfo {
    pub components: Vec<ScanComponent>,
    pub start_spectral: u8,
    pub end_spectral: u8,
    pub successive_high: u8,
    pub successive_low: u8,
    /// Bytes of entropy-coded data following the scan header, restart markers included.
    pub data_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Reconstruct channels on worker threads while later rows are still being decoded.
    pub parallel_reconstruction: bool,
    /// Use SIMD color conversion kernels when the CPU has them.
    pub simd: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        DecoderOptions {
            parallel_reconstruction: true,
            simd: true,
        }
    }
}

impl DecoderOptions {
    pub fn parallel_reconstruction(mut self, enabled: bool) -> Self {
        self.parallel_reconstruction = enabled;
        self
    }

    pub fn simd(mut self, enabled: bool) -> Self {
        self.simd = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanKind {
    Sequential,
    DcFirst,
    DcRefine,
    AcFirst,
    AcRefine,
}

/// Block routine of one scan component, with the tables it needs.
#[derive(Clone, Copy)]
enum BlockCoder<'t> {
    Sequential {
        dc: &'t HuffmanTable,
        ac: &'t HuffmanTable,
    },
    DcFirst {
        dc: &'t HuffmanTable,
    },
    DcRefine,
    AcFirst {
        ac: &'t HuffmanTable,
    },
    AcRefine {
        ac: &'t HuffmanTable,
    },
}

impl BlockCoder<'_> {
    #[inline]
    fn decode(
        &self,
        reader: &mut BitReader,
        blocks: &mut BlockDecoder,
        block: &mut [i32],
        predictor: &mut i32,
        scan: &ScanInfo,
    ) -> VexelResult<()> {
        let (ss, se, al) = (scan.start_spectral, scan.end_spectral, scan.successive_low);

        match *self {
            BlockCoder::Sequential { dc, ac } => blocks.decode_baseline(reader, dc, ac, block, predictor),
            BlockCoder::DcFirst { dc } => blocks.decode_dc_first(reader, dc, block, predictor, al),
            BlockCoder::DcRefine => blocks.decode_dc_refine(reader, block, al),
            BlockCoder::AcFirst { ac } => blocks.decode_ac_first(reader, ac, block, ss, se, al),
            BlockCoder::AcRefine { ac } => blocks.decode_ac_refine(reader, ac, block, ss, se, al),
        }
    }
}

/// Tracks restart intervals while a scan is decoded.
struct RestartState {
    interval: usize,
    mcus: usize,
    expected: u8,
}

impl RestartState {
    fn new(interval: u16) -> Self {
        RestartState {
            interval: interval as usize,
            mcus: 0,
            expected: 0,
        }
    }

    /// Called before every MCU. At interval boundaries consumes the `RSTn` marker and
    /// resets DC predictors and the end-of-band run.
    fn before_mcu(&mut self, reader: &mut BitReader, blocks: &mut BlockDecoder, predictors: &mut [i32; 3]) {
        if self.interval > 0 && self.mcus > 0 && self.mcus % self.interval == 0 {
            match reader.restart() {
                Some(n) if n == self.expected => {}
                Some(n) => {
                    log_warn!("Expected RST{} marker, found RST{}", self.expected, n);
                    self.expected = n;
                }
                None => log_warn!("Missing RST{} marker after {} MCUs", self.expected, self.mcus),
            }

            self.expected = (self.expected + 1) % 8;
            blocks.reset();
            *predictors = [0; 3];
        }

        self.mcus += 1;
    }
}

fn read_u16(payload: &[u8], offset: usize) -> VexelResult<u16> {
    let bytes = payload.get_range_safe(offset..offset + 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn table<'t>(tables: &'t [Option<HuffmanTable>; 4], selector: u8, class: &str) -> VexelResult<&'t HuffmanTable> {
    tables[selector as usize]
        .as_ref()
        .ok_or_else(|| VexelError::corrupt(format!("{} Huffman table {} is not defined", class, selector)))
}

pub struct JpegDecoder<'a> {
    data: &'a [u8],
    position: usize,
    state: ParserState,
    options: DecoderOptions,
    mode: JpegMode,
    width: u32,
    height: u32,
    precision: u8,
    quantization_tables: [Option<QuantizationTable>; 4],
    dc_tables: [Option<HuffmanTable>; 4],
    ac_tables: [Option<HuffmanTable>; 4],
    components: Vec<ImageComponent>,
    geometry: Option<FrameGeometry>,
    restart_interval: u16,
    jfif_header: Option<JfifHeader>,
    adobe_header: Option<AdobeHeader>,
    comments: Vec<String>,
    scans: Vec<ScanInfo>,
    scheduler: Option<ScanScheduler>,
}

impl Debug for JpegDecoder<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JpegDecoder")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("components", &self.components.len())
            .field("scans", &self.scans.len())
            .field("options", &self.options)
            .finish()
    }
}

impl<'a> JpegDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_options(data, DecoderOptions::default())
    }

    pub fn with_options(data: &'a [u8], options: DecoderOptions) -> Self {
        JpegDecoder {
            data,
            position: 0,
            state: ParserState::Initial,
            options,
            mode: JpegMode::Baseline,
            width: 0,
            height: 0,
            precision: 0,
            quantization_tables: Default::default(),
            dc_tables: Default::default(),
            ac_tables: Default::default(),
            components: Vec::new(),
            geometry: None,
            restart_interval: 0,
            jfif_header: None,
            adobe_header: None,
            comments: Vec::new(),
            scans: Vec::new(),
            scheduler: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mode(&self) -> JpegMode {
        self.mode
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn options(&self) -> DecoderOptions {
        self.options
    }

    /// Snapshot of everything parsed so far.
    pub fn info(&self) -> JpegInfo {
        let (padded_width, padded_height) = self.geometry.map_or((0, 0), |g| g.padded_dimensions());

        JpegInfo {
            width: self.width,
            height: self.height,
            padded_width: padded_width as u32,
            padded_height: padded_height as u32,
            precision: self.precision,
            mode: self.mode,
            components: self
                .components
                .iter()
                .map(|c| ComponentInfo {
                    id: c.id,
                    horizontal_sampling_factor: c.horizontal_sampling_factor,
                    vertical_sampling_factor: c.vertical_sampling_factor,
                    quantization_table_id: c.quantization_table_id,
                })
                .collect(),
            quantization_tables: self.quantization_tables.iter().flatten().cloned().collect(),
            huffman_tables: self.dc_tables.iter().chain(self.ac_tables.iter()).flatten().cloned().collect(),
            scans: self.scans.clone(),
            restart_interval: self.restart_interval,
            jfif_header: self.jfif_header.clone(),
            adobe_header: self.adobe_header.clone(),
            comments: self.comments.clone(),
        }
    }

    /// Parses every segment without decoding entropy-coded data.
    pub fn read_info(&mut self) -> VexelResult<JpegInfo> {
        self.parse(false)?;
        Ok(self.info())
    }

    /// Decodes the image into RGBA8 pixels at its true dimensions.
    pub fn decode(&mut self) -> VexelResult<Image> {
        self.parse(true)?;

        log_debug!("Dimensions: {}x{}", self.width, self.height);
        log_debug!("Mode: {:?}", self.mode);
        log_debug!("Number of scans: {}", self.scans.len());
        log_debug!("Restart interval: {}", self.restart_interval);
        log_debug!(
            "Sampling factors: {}",
            self.components
                .iter()
                .map(|c| format!("{}x{}", c.horizontal_sampling_factor, c.vertical_sampling_factor))
                .collect::<Vec<String>>()
                .join(", ")
        );

        let geometry = self.geometry.ok_or_else(|| VexelError::corrupt("No frame header found"))?;
        let scheduler = self
            .scheduler
            .take()
            .unwrap_or_else(|| ScanScheduler::new(self.components.len(), false));
        let samples = scheduler.finish(&mut self.components)?;

        let transform = self.color_transform();
        let ops = if self.options.simd {
            ColorOps::detect()
        } else {
            ColorOps::scalar()
        };
        log_debug!("Converting {:?} with {} kernels", transform, ops.name);

        let (aligned_width, _) = geometry.mcu_aligned_dimensions();
        let planes = self
            .components
            .iter()
            .zip(samples.iter())
            .map(|(component, samples)| Plane {
                samples,
                x_offsets: component.x_offsets(),
                y_offsets: component.y_offsets(),
            })
            .collect();

        let converter = ColorConverter::new(
            planes,
            transform,
            sampling_label(&self.components),
            aligned_width,
            ops,
        );

        let width = self.width as usize;
        let height = self.height as usize;
        let padded = converter.convert(height);
        let pixels = crop(&padded, aligned_width, width, height);

        Ok(Image::new(self.width, self.height, PixelFormat::RGBA8, pixels))
    }

    fn parse(&mut self, decode_scans: bool) -> VexelResult<()> {
        if self.position != 0 {
            *self = Self::with_options(self.data, self.options);
        }

        if !self.data.starts_with(&[0xFF, 0xD8]) {
            return Err(VexelError::corrupt("Missing SOI marker"));
        }
        self.position = 2;

        while self.state != ParserState::Done {
            let Some(marker) = self.next_marker() else {
                match self.state {
                    ParserState::Initial => return Err(VexelError::corrupt("No frame header before end of data")),
                    ParserState::InFrame => return Err(VexelError::corrupt("No scan before end of data")),
                    _ => {
                        log_warn!("Missing EOI marker");
                        self.state = ParserState::Done;
                    }
                }
                break;
            };

            log_debug!("Found marker: {:?}", marker);

            match marker {
                JpegMarker::SOI => return Err(VexelError::corrupt("Unexpected SOI marker")),
                JpegMarker::EOI => {
                    if self.state != ParserState::InScan {
                        return Err(VexelError::corrupt("EOI marker before any scan"));
                    }
                    self.state = ParserState::Done;
                }
                JpegMarker::RST(n) => log_warn!("Ignoring RST{} marker outside of a scan", n),
                JpegMarker::TEM => {}
                JpegMarker::SOF(0) => self.read_start_of_frame(JpegMode::Baseline)?,
                JpegMarker::SOF(1) => self.read_start_of_frame(JpegMode::ExtendedSequential)?,
                JpegMarker::SOF(2) => self.read_start_of_frame(JpegMode::Progressive)?,
                JpegMarker::DQT => self.read_quantization_table()?,
                JpegMarker::DHT => self.read_huffman_table()?,
                JpegMarker::DRI => self.read_restart_interval()?,
                JpegMarker::APP(0) => self.read_app0_jfif()?,
                JpegMarker::APP(14) => self.read_app14_adobe()?,
                JpegMarker::APP(n) => {
                    let payload = self.read_segment()?;
                    log_debug!("Skipping APP{} segment of {} bytes", n, payload.len());
                }
                JpegMarker::COM => self.read_com()?,
                JpegMarker::SOS => self.read_start_of_scan(decode_scans)?,
                other => return Err(VexelError::UnsupportedMarker(other)),
            }
        }

        Ok(())
    }

    /// Moves past the next marker, skipping fill bytes and anything that is not a marker.
    fn next_marker(&mut self) -> Option<JpegMarker> {
        let data = self.data;
        let mut skipped = 0;

        loop {
            while self.position < data.len() && data[self.position] != 0xFF {
                self.position += 1;
                skipped += 1;
            }
            while self.position < data.len() && data[self.position] == 0xFF {
                self.position += 1;
            }

            let &code = data.get(self.position)?;
            self.position += 1;

            if let Some(marker) = JpegMarker::from_code(code) {
                if skipped > 0 {
                    log_warn!("Skipped {} bytes before marker {:?}", skipped, marker);
                }
                return Some(marker);
            }

            skipped += 2;
        }
    }

    /// Reads a length-prefixed segment and returns its payload, length field excluded.
    fn read_segment(&mut self) -> VexelResult<&'a [u8]> {
        let data = self.data;
        let length = read_u16(data, self.position)? as usize;

        if length < 2 {
            return Err(VexelError::corrupt(format!("Segment length {} is too short", length)));
        }

        let end = self.position + length;
        if end > data.len() {
            return Err(VexelError::corrupt(format!(
                "Segment of {} bytes at offset {} runs past the end of data",
                length, self.position
            )));
        }

        let payload = &data[self.position + 2..end];
        self.position = end;

        Ok(payload)
    }

    fn read_com(&mut self) -> VexelResult<()> {
        let payload = self.read_segment()?;
        self.comments.push(String::from_utf8_lossy(payload).to_string());

        Ok(())
    }

    fn read_app0_jfif(&mut self) -> VexelResult<()> {
        let payload = self.read_segment()?;

        if !payload.starts_with(b"JFIF\0") {
            log_debug!("APP0 segment without JFIF identifier, skipping");
            return Ok(());
        }

        if payload.len() < 14 {
            log_warn!("JFIF segment too short: {} bytes", payload.len());
            return Ok(());
        }

        let header = JfifHeader {
            version_major: payload[5],
            version_minor: payload[6],
            density_units: payload[7],
            x_density: read_u16(payload, 8)?,
            y_density: read_u16(payload, 10)?,
            thumbnail_width: payload[12],
            thumbnail_height: payload[13],
        };

        let thumbnail_size = 3 * header.thumbnail_width as usize * header.thumbnail_height as usize;
        if payload.len() != 14 + thumbnail_size {
            log_warn!(
                "Invalid JFIF segment length, expected {}, got {}",
                16 + thumbnail_size,
                payload.len() + 2
            );
        }

        self.jfif_header = Some(header);

        Ok(())
    }

    fn read_app14_adobe(&mut self) -> VexelResult<()> {
        let payload = self.read_segment()?;

        if !payload.starts_with(b"Adobe") || payload.len() < 12 {
            log_debug!("APP14 segment without Adobe header, skipping");
            return Ok(());
        }

        self.adobe_header = Some(AdobeHeader {
            version: read_u16(payload, 5)?,
            flags0: read_u16(payload, 7)?,
            flags1: read_u16(payload, 9)?,
            transform: payload[11],
        });

        Ok(())
    }

    fn read_restart_interval(&mut self) -> VexelResult<()> {
        let payload = self.read_segment()?;
        self.restart_interval = read_u16(payload, 0)?;

        log_debug!("Restart interval: {}", self.restart_interval);

        Ok(())
    }

    fn read_quantization_table(&mut self) -> VexelResult<()> {
        let payload = self.read_segment()?;
        let mut offset = 0;

        while offset < payload.len() {
            let spec = payload[offset];
            let precision = spec >> 4;
            let id = spec & 0x0F;
            offset += 1;

            if id > 3 {
                return Err(VexelError::corrupt(format!("Invalid quantization table id: {}", id)));
            }

            let mut table = [0u16; 64];
            match precision {
                0 => {
                    let values = payload.get_range_safe(offset..offset + 64)?;
                    for (entry, &value) in table.iter_mut().zip(values) {
                        *entry = u16::from(value);
                    }
                    offset += 64;
                }
                1 => {
                    let values = payload.get_range_safe(offset..offset + 128)?;
                    for (entry, pair) in table.iter_mut().zip(values.chunks_exact(2)) {
                        *entry = u16::from_be_bytes([pair[0], pair[1]]);
                    }
                    offset += 128;
                }
                _ => {
                    return Err(VexelError::corrupt(format!(
                        "Invalid quantization table precision: {}",
                        precision
                    )))
                }
            }

            if table.contains(&0) {
                log_warn!("Quantization table {} contains zero entries", id);
            }

            log_debug!("Quantization table {} ({}-bit)", id, if precision == 0 { 8 } else { 16 });
            self.quantization_tables[id as usize] = Some(QuantizationTable { id, precision, table });
        }

        Ok(())
    }

    fn read_huffman_table(&mut self) -> VexelResult<()> {
        let payload = self.read_segment()?;
        let mut offset = 0;

        while offset < payload.len() {
            let spec = payload[offset];
            let class = spec >> 4;
            let id = spec & 0x0F;

            if class > 1 || id > 3 {
                return Err(VexelError::corrupt(format!(
                    "Invalid Huffman table class/id: {}/{}",
                    class, id
                )));
            }

            let mut counts = [0u8; 16];
            counts.copy_from_slice(payload.get_range_safe(offset + 1..offset + 17)?);
            offset += 17;

            let total: usize = counts.iter().map(|&c| c as usize).sum();
            let symbols = payload.get_range_safe(offset..offset + total)?.to_vec();
            offset += total;

            let table = HuffmanTable::new(id, class, counts, symbols)?;
            log_debug!(
                "Huffman table {}/{}: {} symbols, longest code {} bits",
                class,
                id,
                total,
                table.max_code_length()
            );

            if class == 0 {
                self.dc_tables[id as usize] = Some(table);
            } else {
                self.ac_tables[id as usize] = Some(table);
            }
        }

        Ok(())
    }

    fn read_start_of_frame(&mut self, mode: JpegMode) -> VexelResult<()> {
        let payload = self.read_segment()?;

        if self.state != ParserState::Initial {
            return Err(VexelError::corrupt("Multiple frame headers"));
        }

        let precision = *payload.get_safe(0)?;
        if precision != 8 {
            return Err(VexelError::UnsupportedPrecision(precision));
        }

        let height = read_u16(payload, 1)?;
        let width = read_u16(payload, 3)?;
        let count = *payload.get_safe(5)? as usize;

        if width == 0 || height == 0 {
            return Err(VexelError::corrupt(format!("Invalid image dimensions: {}x{}", width, height)));
        }

        match count {
            1 | 3 => {}
            2 | 4 => {
                return Err(VexelError::UnsupportedColorspace(format!(
                    "{} color components",
                    count
                )))
            }
            _ => return Err(VexelError::corrupt(format!("Invalid number of components: {}", count))),
        }

        if payload.len() != 6 + 3 * count {
            log_warn!(
                "Invalid SOF segment length, expected {}, got {}",
                8 + 3 * count,
                payload.len() + 2
            );
        }

        let mut specs: Vec<(u8, u8, u8, u8)> = Vec::with_capacity(count);
        for spec in payload.get_range_safe(6..6 + 3 * count)?.chunks_exact(3) {
            let (id, h, v, tq) = (spec[0], spec[1] >> 4, spec[1] & 0x0F, spec[2]);

            if !(1..=4).contains(&h) || !(1..=4).contains(&v) {
                return Err(VexelError::corrupt(format!(
                    "Invalid sampling factors {}x{} for component {}",
                    h, v, id
                )));
            }
            if tq > 3 {
                return Err(VexelError::corrupt(format!(
                    "Invalid quantization table id {} for component {}",
                    tq, id
                )));
            }
            if specs.iter().any(|s| s.0 == id) {
                return Err(VexelError::corrupt(format!("Duplicate component id {}", id)));
            }

            specs.push((id, h, v, tq));
        }

        let max_h = specs.iter().map(|s| s.1).max().unwrap_or(1);
        let max_v = specs.iter().map(|s| s.2).max().unwrap_or(1);
        let geometry = FrameGeometry::new(u32::from(width), u32::from(height), max_h, max_v);

        self.components = specs
            .iter()
            .map(|&(id, h, v, tq)| ImageComponent::new(id, h, v, tq, &geometry))
            .collect();

        self.mode = mode;
        self.precision = precision;
        self.width = u32::from(width);
        self.height = u32::from(height);
        self.geometry = Some(geometry);
        self.state = ParserState::InFrame;

        log_debug!(
            "Frame {:?}: {}x{} (padded {:?}), {} components, {}x{} MCUs",
            mode,
            width,
            height,
            geometry.padded_dimensions(),
            count,
            geometry.mcu_columns,
            geometry.mcu_rows
        );
        for component in &self.components {
            log_debug!("Component {}: {} blocks", component.id, component.block_count());
        }

        Ok(())
    }

    fn read_start_of_scan(&mut self, decode_scans: bool) -> VexelResult<()> {
        let payload = self.read_segment()?;

        if self.state == ParserState::Initial {
            return Err(VexelError::corrupt("SOS marker before SOF"));
        }

        let mut scan = self.parse_scan_header(payload)?;

        let start = self.position;
        let end = self.find_scan_end(start);
        scan.data_length = end - start;

        log_debug!(
            "Scan: components {:?}, Ss={} Se={} Ah={} Al={}, {} bytes",
            scan.components.iter().map(|c| c.component_id).collect::<Vec<u8>>(),
            scan.start_spectral,
            scan.end_spectral,
            scan.successive_high,
            scan.successive_low,
            scan.data_length
        );

        if decode_scans {
            let data = self.data;
            let mut scheduler = match self.scheduler.take() {
                Some(scheduler) => scheduler,
                None => ScanScheduler::new(self.components.len(), self.options.parallel_reconstruction),
            };

            let result = self.decode_scan(&scan, &data[start..end], &mut scheduler);
            self.scheduler = Some(scheduler);
            result?;
        }

        self.position = end;
        self.scans.push(scan);
        self.state = ParserState::InScan;

        Ok(())
    }

    fn parse_scan_header(&self, payload: &[u8]) -> VexelResult<ScanInfo> {
        let count = *payload.get_safe(0)? as usize;
        if !(1..=3).contains(&count) {
            return Err(VexelError::corrupt(format!("Invalid number of scan components: {}", count)));
        }

        let selectors = payload.get_range_safe(1..1 + 2 * count)?;
        let parameters = payload.get_range_safe(1 + 2 * count..4 + 2 * count)?;

        let mut components: Vec<ScanComponent> = Vec::with_capacity(count);
        for selector in selectors.chunks_exact(2) {
            let id = selector[0];
            let component_index = self
                .components
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| VexelError::corrupt(format!("Scan references unknown component {}", id)))?;

            if components.iter().any(|c| c.component_index == component_index) {
                return Err(VexelError::corrupt(format!("Component {} appears twice in one scan", id)));
            }

            let (dc, ac) = (selector[1] >> 4, selector[1] & 0x0F);
            if dc > 3 || ac > 3 {
                return Err(VexelError::corrupt(format!(
                    "Invalid Huffman table selectors {}/{} for component {}",
                    dc, ac, id
                )));
            }

            components.push(ScanComponent {
                component_index,
                component_id: id,
                dc_table_selector: dc,
                ac_table_selector: ac,
            });
        }

        if count > 1 {
            let blocks: usize = components
                .iter()
                .map(|c| {
                    let component = &self.components[c.component_index];
                    component.horizontal_sampling_factor as usize * component.vertical_sampling_factor as usize
                })
                .sum();
            if blocks > 10 {
                return Err(VexelError::corrupt(format!("Interleaved MCU of {} blocks exceeds 10", blocks)));
            }
        }

        let mut scan = ScanInfo {
            components,
            start_spectral: parameters[0],
            end_spectral: parameters[1],
            successive_high: parameters[2] >> 4,
            successive_low: parameters[2] & 0x0F,
            data_length: 0,
        };

        match self.mode {
            JpegMode::Baseline | JpegMode::ExtendedSequential => {
                if (scan.start_spectral, scan.end_spectral, scan.successive_high, scan.successive_low) != (0, 63, 0, 0) {
                    log_warn!(
                        "Sequential scan with Ss={} Se={} Ah={} Al={}, decoding the full band",
                        scan.start_spectral,
                        scan.end_spectral,
                        scan.successive_high,
                        scan.successive_low
                    );
                    scan.start_spectral = 0;
                    scan.end_spectral = 63;
                    scan.successive_high = 0;
                    scan.successive_low = 0;
                }
            }
            JpegMode::Progressive => {
                if scan.end_spectral > 63 || scan.start_spectral > scan.end_spectral {
                    return Err(VexelError::corrupt(format!(
                        "Invalid spectral selection {}..{}",
                        scan.start_spectral, scan.end_spectral
                    )));
                }
                if scan.start_spectral == 0 && scan.end_spectral != 0 {
                    return Err(VexelError::corrupt("Progressive DC scan includes AC coefficients"));
                }
                if scan.start_spectral > 0 && count != 1 {
                    return Err(VexelError::corrupt("Progressive AC scan with more than one component"));
                }
                if scan.successive_high > 13 || scan.successive_low > 13 {
                    return Err(VexelError::corrupt(format!(
                        "Invalid successive approximation Ah={} Al={}",
                        scan.successive_high, scan.successive_low
                    )));
                }
            }
        }

        Ok(scan)
    }

    /// Offset of the first marker after `start` that ends the entropy-coded data. Stuffed
    /// bytes and restart markers belong to the scan.
    fn find_scan_end(&self, start: usize) -> usize {
        let data = self.data;
        let mut i = start;

        while i < data.len() {
            if data[i] != 0xFF {
                i += 1;
                continue;
            }

            let mut j = i + 1;
            while j < data.len() && data[j] == 0xFF {
                j += 1;
            }

            match data.get(j) {
                Some(&code) if code == 0x00 || (0xD0..=0xD7).contains(&code) => i = j + 1,
                _ => return i,
            }
        }

        data.len()
    }

    fn scan_kind(&self, scan: &ScanInfo) -> ScanKind {
        match self.mode {
            JpegMode::Progressive => match (scan.start_spectral, scan.successive_high) {
                (0, 0) => ScanKind::DcFirst,
                (0, _) => ScanKind::DcRefine,
                (_, 0) => ScanKind::AcFirst,
                _ => ScanKind::AcRefine,
            },
            _ => ScanKind::Sequential,
        }
    }

    fn decode_scan(&mut self, scan: &ScanInfo, entropy: &[u8], scheduler: &mut ScanScheduler) -> VexelResult<()> {
        let kind = self.scan_kind(scan);
        let band = band_mask(scan.start_spectral, scan.end_spectral);
        let geometry = self.geometry.ok_or_else(|| VexelError::corrupt("SOS marker before SOF"))?;

        if scan.successive_high > 0 || scan.successive_low > 0 {
            if scheduler.is_enabled() {
                log_debug!("Successive approximation scan, no further reconstruction workers");
            }
            scheduler.disable();
        }

        for sc in &scan.components {
            let component = &mut self.components[sc.component_index];

            if scheduler.watermark(sc.component_index) > 0 {
                return Err(VexelError::corrupt(format!(
                    "Component {} appears in a scan after its rows were reconstructed",
                    component.id
                )));
            }

            if component.quantization.is_none() {
                let id = component.quantization_table_id;
                let table = self.quantization_tables[id as usize].as_ref().ok_or_else(|| {
                    VexelError::corrupt(format!("Quantization table {} is not defined", id))
                })?;
                component.quantization = Some(table.table);
            }

            match kind {
                ScanKind::Sequential => component.coverage = FULL_COVERAGE,
                ScanKind::DcFirst | ScanKind::AcFirst => {
                    if component.coverage & band != 0 {
                        log_warn!("Component {} receives spectral positions it already has", component.id);
                    }
                    component.coverage |= band;
                }
                ScanKind::DcRefine | ScanKind::AcRefine => {
                    if component.coverage & band != band {
                        return Err(VexelError::corrupt(format!(
                            "Refinement scan for component {} before its first pass",
                            component.id
                        )));
                    }
                }
            }
        }

        let mut coders = Vec::with_capacity(scan.components.len());
        for sc in &scan.components {
            let coder = match kind {
                ScanKind::Sequential => BlockCoder::Sequential {
                    dc: table(&self.dc_tables, sc.dc_table_selector, "DC")?,
                    ac: table(&self.ac_tables, sc.ac_table_selector, "AC")?,
                },
                ScanKind::DcFirst => BlockCoder::DcFirst {
                    dc: table(&self.dc_tables, sc.dc_table_selector, "DC")?,
                },
                ScanKind::DcRefine => BlockCoder::DcRefine,
                ScanKind::AcFirst => BlockCoder::AcFirst {
                    ac: table(&self.ac_tables, sc.ac_table_selector, "AC")?,
                },
                ScanKind::AcRefine => BlockCoder::AcRefine {
                    ac: table(&self.ac_tables, sc.ac_table_selector, "AC")?,
                },
            };
            coders.push(coder);
        }

        let components = &mut self.components;
        let mut reader = BitReader::jpeg(entropy);
        let mut blocks = BlockDecoder::new();
        let mut predictors = [0i32; 3];
        let mut restarts = RestartState::new(self.restart_interval);

        if let [sc] = scan.components.as_slice() {
            // Non-interleaved: one block per MCU, covering only the component's own area.
            let index = sc.component_index;
            let component = &mut components[index];

            for by in 0..component.scan_block_rows {
                for bx in 0..component.scan_blocks_per_line {
                    restarts.before_mcu(&mut reader, &mut blocks, &mut predictors);
                    coders[0].decode(&mut reader, &mut blocks, component.block_mut(bx, by), &mut predictors[0], scan)?;
                }

                if component.is_complete() {
                    scheduler.publish(index, component, by + 1)?;
                }
            }
        } else {
            for my in 0..geometry.mcu_rows {
                for mx in 0..geometry.mcu_columns {
                    restarts.before_mcu(&mut reader, &mut blocks, &mut predictors);

                    for (k, sc) in scan.components.iter().enumerate() {
                        let component = &mut components[sc.component_index];
                        let h = component.horizontal_sampling_factor as usize;
                        let v = component.vertical_sampling_factor as usize;

                        for y in 0..v {
                            for x in 0..h {
                                let block = component.block_mut(mx * h + x, my * v + y);
                                coders[k].decode(&mut reader, &mut blocks, block, &mut predictors[k], scan)?;
                            }
                        }
                    }
                }

                for sc in &scan.components {
                    let component = &mut components[sc.component_index];
                    if component.is_complete() {
                        let upto = (my + 1) * component.vertical_sampling_factor as usize;
                        scheduler.publish(sc.component_index, component, upto)?;
                    }
                }
            }
        }

        for sc in &scan.components {
            let component = &mut components[sc.component_index];
            if component.is_complete() {
                let rows = component.block_rows;
                scheduler.publish(sc.component_index, component, rows)?;
            }
        }

        Ok(())
    }

    fn color_transform(&self) -> ColorTransform {
        if self.components.len() == 1 {
            return ColorTransform::Grayscale;
        }

        if let Some(adobe) = &self.adobe_header {
            return if adobe.transform == 0 {
                ColorTransform::Rgb
            } else {
                ColorTransform::YCbCr
            };
        }

        let ids: Vec<u8> = self.components.iter().map(|c| c.id).collect();
        if self.jfif_header.is_none() && ids == b"RGB" {
            return ColorTransform::Rgb;
        }

        ColorTransform::YCbCr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::jpeg::test_encoder::{segment, Script, TestImage};

    const LAYOUTS: [&[(u8, u8)]; 5] = [
        &[(1, 1)],
        &[(1, 1), (1, 1), (1, 1)],
        &[(2, 2), (1, 1), (1, 1)],
        &[(2, 1), (1, 1), (1, 1)],
        &[(1, 2), (1, 1), (1, 1)],
    ];

    fn single_threaded() -> DecoderOptions {
        DecoderOptions::default().parallel_reconstruction(false)
    }

    fn flat(factors: &[(u8, u8)], width: u16, height: u16, dc: &[i32]) -> TestImage {
        let mut image = TestImage::new(width, height, factors);
        image.quant_tables = vec![[1; 64], [1; 64]];

        for (component, &value) in image.components.iter_mut().zip(dc) {
            for block in component.blocks.iter_mut() {
                block[0] = value;
            }
        }

        image
    }

    fn find(data: &[u8], marker: u8) -> usize {
        data.windows(2).position(|w| w == [0xFF, marker]).unwrap()
    }

    #[test]
    fn test_flat_dc_block() -> Result<(), Box<dyn std::error::Error>> {
        let data = flat(&[(1, 1)], 8, 8, &[80]).encode(Script::Baseline);
        let image = JpegDecoder::new(&data).decode()?;

        assert_eq!((image.width(), image.height()), (8, 8));
        assert_eq!(image.pixel_format(), PixelFormat::RGBA8);
        assert_eq!(image.pixels().len(), 8 * 8 * 4);
        // 80 * 1/8 + 128
        assert!(image.pixels().chunks_exact(4).all(|p| p == [138, 138, 138, 255]));

        Ok(())
    }

    #[test]
    fn test_flat_color_in_every_layout() -> Result<(), Box<dyn std::error::Error>> {
        for factors in &LAYOUTS[1..] {
            let data = flat(factors, 20, 12, &[80, 0, 80]).encode(Script::Baseline);
            let image = JpegDecoder::new(&data).decode()?;

            assert_eq!(image.pixels().len(), 20 * 12 * 4);
            assert!(
                image.pixels().chunks_exact(4).all(|p| p == [152, 131, 138, 255]),
                "layout {:?}",
                factors
            );
        }

        Ok(())
    }

    #[test]
    fn test_progressive_matches_baseline() -> Result<(), Box<dyn std::error::Error>> {
        for (seed, factors) in LAYOUTS.iter().enumerate() {
            let image = TestImage::random(35, 21, factors, seed as u64);
            let baseline = JpegDecoder::new(&image.encode(Script::Baseline)).decode()?;

            for script in [Script::SpectralSelection, Script::SuccessiveApproximation] {
                let progressive = JpegDecoder::new(&image.encode(script)).decode()?;
                assert_eq!((progressive.width(), progressive.height()), (35, 21));
                assert!(
                    progressive.pixels() == baseline.pixels(),
                    "{:?} differs from baseline for layout {:?}",
                    script,
                    factors
                );
            }
        }

        Ok(())
    }

    #[test]
    fn test_threaded_matches_single_threaded() -> Result<(), Box<dyn std::error::Error>> {
        for (seed, factors) in LAYOUTS.iter().enumerate() {
            let image = TestImage::random(50, 41, factors, 100 + seed as u64);

            for script in [Script::Baseline, Script::SpectralSelection, Script::SuccessiveApproximation] {
                let data = image.encode(script);
                let threaded = JpegDecoder::new(&data).decode()?;
                let inline = JpegDecoder::with_options(&data, single_threaded()).decode()?;

                assert!(
                    threaded.pixels() == inline.pixels(),
                    "{:?} differs between threaded and single-threaded for layout {:?}",
                    script,
                    factors
                );
            }
        }

        Ok(())
    }

    #[test]
    fn test_scalar_color_matches_simd() -> Result<(), Box<dyn std::error::Error>> {
        let data = TestImage::random(48, 32, LAYOUTS[2], 7).encode(Script::Baseline);

        let simd = JpegDecoder::new(&data).decode()?;
        let scalar = JpegDecoder::with_options(&data, DecoderOptions::default().simd(false)).decode()?;

        assert!(simd.pixels() == scalar.pixels());

        Ok(())
    }

    #[test]
    fn test_restart_intervals() -> Result<(), Box<dyn std::error::Error>> {
        for factors in [LAYOUTS[0], LAYOUTS[2]] {
            let mut image = TestImage::random(45, 30, factors, 11);
            let reference = JpegDecoder::new(&image.encode(Script::Baseline)).decode()?;

            image.restart_interval = 2;
            for script in [Script::Baseline, Script::SpectralSelection, Script::SuccessiveApproximation] {
                let data = image.encode(script);
                assert!(data.windows(2).any(|w| w == [0xFF, 0xD1]));

                let decoded = JpegDecoder::new(&data).decode()?;
                assert!(decoded.pixels() == reference.pixels(), "{:?} with restarts", script);
            }
        }

        Ok(())
    }

    #[test]
    fn test_adobe_rgb_passthrough() -> Result<(), Box<dyn std::error::Error>> {
        let encoded = flat(&[(1, 1), (1, 1), (1, 1)], 8, 8, &[80, 0, -80]).encode(Script::Baseline);

        let mut data = vec![0xFF, 0xD8];
        segment(&mut data, 0xEE, b"Adobe\x00\x64\x00\x00\x00\x00\x00");
        data.extend_from_slice(&encoded[2..]);

        let image = JpegDecoder::new(&data).decode()?;
        assert!(image.pixels().chunks_exact(4).all(|p| p == [138, 128, 118, 255]));

        Ok(())
    }

    #[test]
    fn test_missing_eoi_is_tolerated() -> Result<(), Box<dyn std::error::Error>> {
        let data = TestImage::random(16, 16, LAYOUTS[1], 3).encode(Script::Baseline);

        let complete = JpegDecoder::new(&data).decode()?;
        let truncated = JpegDecoder::new(&data[..data.len() - 2]).decode()?;

        assert!(complete.pixels() == truncated.pixels());

        Ok(())
    }

    #[test]
    fn test_read_info() -> Result<(), Box<dyn std::error::Error>> {
        let mut image = TestImage::random(33, 17, LAYOUTS[2], 5);
        image.restart_interval = 4;
        let data = image.encode(Script::SpectralSelection);

        let info = JpegDecoder::new(&data).read_info()?;

        assert_eq!((info.width, info.height, info.precision), (33, 17, 8));
        assert_eq!((info.padded_width, info.padded_height), (40, 24));
        assert_eq!(info.mode, JpegMode::Progressive);
        assert_eq!(info.components.len(), 3);
        assert_eq!(info.components[0].horizontal_sampling_factor, 2);
        assert_eq!(info.scans.len(), 1 + 3 * 2);
        assert!(info.scans.iter().all(|s| s.data_length > 0));
        assert_eq!(info.scans[1].start_spectral, 1);
        assert_eq!(info.scans[1].end_spectral, 5);
        assert_eq!(info.quantization_tables.len(), 2);
        assert_eq!(info.huffman_tables.len(), 2);
        assert_eq!(info.restart_interval, 4);
        assert_eq!(info.comments, vec!["vexel test stream".to_string()]);
        assert_eq!(info.jfif_header.as_ref().map(|h| h.version_minor), Some(2));

        Ok(())
    }

    #[test]
    fn test_unsupported_precision() {
        let mut data = TestImage::random(8, 8, LAYOUTS[0], 1).encode(Script::Baseline);
        let sof = find(&data, 0xC0);
        data[sof + 4] = 12;

        let result = JpegDecoder::new(&data).decode();
        assert!(matches!(result, Err(VexelError::UnsupportedPrecision(12))));
    }

    #[test]
    fn test_unsupported_component_counts() {
        for factors in [&[(1, 1), (1, 1)][..], &[(1, 1), (1, 1), (1, 1), (1, 1)][..]] {
            let data = TestImage::new(8, 8, factors).encode(Script::Baseline);
            let result = JpegDecoder::new(&data).decode();
            assert!(matches!(result, Err(VexelError::UnsupportedColorspace(_))));
        }
    }

    #[test]
    fn test_unsupported_frame_types() {
        for code in [0xC3u8, 0xC9, 0xCB] {
            let mut data = TestImage::new(8, 8, LAYOUTS[0]).encode(Script::Baseline);
            let sof = find(&data, 0xC0);
            data[sof + 1] = code;

            let result = JpegDecoder::new(&data).decode();
            assert!(
                matches!(result, Err(VexelError::UnsupportedMarker(JpegMarker::SOF(n))) if n == code - 0xC0),
                "{:?}",
                result
            );
        }
    }

    #[test]
    fn test_structural_errors() {
        // No SOI
        let result = JpegDecoder::new(&[0x00, 0x01, 0x02]).decode();
        assert!(matches!(result, Err(VexelError::CorruptSegment(_))));

        // SOS before SOF
        let mut data = vec![0xFF, 0xD8];
        segment(&mut data, 0xDA, &[1, 1, 0x00, 0, 63, 0]);
        let result = JpegDecoder::new(&data).decode();
        assert!(matches!(result, Err(VexelError::CorruptSegment(_))));

        // Segment longer than the data
        let data = [0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x43, 0x00, 0x01];
        let result = JpegDecoder::new(&data).decode();
        assert!(matches!(result, Err(VexelError::CorruptSegment(_))));

        // DHT turned into an APP segment: the scan has no tables
        let mut data = TestImage::new(8, 8, LAYOUTS[0]).encode(Script::Baseline);
        let dht = find(&data, 0xC4);
        data[dht + 1] = 0xE5;
        let result = JpegDecoder::new(&data).decode();
        assert!(matches!(result, Err(VexelError::CorruptSegment(_))));

        // Second frame header
        let image = TestImage::new(8, 8, LAYOUTS[0]).encode(Script::Baseline);
        let sof = find(&image, 0xC0);
        let length = u16::from_be_bytes([image[sof + 2], image[sof + 3]]) as usize;
        let mut data = image[..sof + 2 + length].to_vec();
        data.extend_from_slice(&image[sof..]);
        let result = JpegDecoder::new(&data).decode();
        assert!(matches!(result, Err(VexelError::CorruptSegment(_))));
    }

    #[test]
    fn test_growing_dc_is_rejected() {
        let mut image = TestImage::new(320, 8, LAYOUTS[0]);
        image.quant_tables = vec![[255; 64], [255; 64]];
        for (k, block) in image.components[0].blocks.iter_mut().enumerate() {
            block[0] = (k as i32 + 1) * 2047;
        }
        let data = image.encode(Script::Baseline);

        for options in [DecoderOptions::default(), single_threaded()] {
            let result = JpegDecoder::with_options(&data, options).decode();
            assert!(matches!(result, Err(VexelError::CorruptSegment(_))), "{:?}", result);
        }
    }

    #[test]
    fn test_truncated_entropy_data() {
        let data = TestImage::random(64, 64, LAYOUTS[0], 9).encode(Script::Baseline);
        let sos = find(&data, 0xDA);
        let cut = sos + (data.len() - sos) / 2;

        let result = JpegDecoder::new(&data[..cut]).decode();
        assert!(matches!(result, Err(VexelError::BitstreamUnderflow { .. })), "{:?}", result);
    }

    #[test]
    fn test_decoder_is_reusable() -> Result<(), Box<dyn std::error::Error>> {
        let data = TestImage::random(24, 24, LAYOUTS[3], 4).encode(Script::Baseline);
        let mut decoder = JpegDecoder::new(&data);

        let info = decoder.read_info()?;
        let first = decoder.decode()?;
        let second = decoder.decode()?;

        assert_eq!(info.width, 24);
        assert_eq!(decoder.state(), ParserState::Done);
        assert!(first.pixels() == second.pixels());

        Ok(())
    }
}
