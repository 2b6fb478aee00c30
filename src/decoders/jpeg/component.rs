/// Coverage bitmap value once all 64 spectral positions have been seen.
pub const FULL_COVERAGE: u64 = u64::MAX;

/// Bitmap of the spectral positions `ss..=se`.
pub fn band_mask(ss: u8, se: u8) -> u64 {
    let width = u32::from(se - ss) + 1;
    let band = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
    band << ss
}

/// Frame-wide block geometry, fixed at SOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub max_horizontal_sampling: u8,
    pub max_vertical_sampling: u8,
    pub mcu_columns: usize,
    pub mcu_rows: usize,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32, max_horizontal_sampling: u8, max_vertical_sampling: u8) -> Self {
        let mcu_width = 8 * max_horizontal_sampling as usize;
        let mcu_height = 8 * max_vertical_sampling as usize;

        FrameGeometry {
            width,
            height,
            max_horizontal_sampling,
            max_vertical_sampling,
            mcu_columns: (width as usize).div_ceil(mcu_width),
            mcu_rows: (height as usize).div_ceil(mcu_height),
        }
    }

    /// Dimensions rounded up to a multiple of 8.
    pub fn padded_dimensions(&self) -> (usize, usize) {
        (
            (self.width as usize).div_ceil(8) * 8,
            (self.height as usize).div_ceil(8) * 8,
        )
    }

    /// Dimensions rounded up to whole MCUs.
    pub fn mcu_aligned_dimensions(&self) -> (usize, usize) {
        (
            self.mcu_columns * 8 * self.max_horizontal_sampling as usize,
            self.mcu_rows * 8 * self.max_vertical_sampling as usize,
        )
    }
}

/// One color component of the frame, with its coefficient storage and the tables that
/// map output pixels back to its samples.
#[derive(Debug)]
pub struct ImageComponent {
    pub id: u8,
    pub horizontal_sampling_factor: u8,
    pub vertical_sampling_factor: u8,
    pub quantization_table_id: u8,
    /// Blocks per block row, MCU padded.
    pub blocks_per_line: usize,
    /// Block rows, MCU padded.
    pub block_rows: usize,
    /// Blocks covered by a scan containing only this component.
    pub scan_blocks_per_line: usize,
    pub scan_block_rows: usize,
    /// Zig-zag ordered coefficients, one buffer per block row. Emptied once the row is
    /// handed to a reconstruction worker.
    pub rows: Vec<Vec<i32>>,
    /// Spectral positions delivered by first-pass scans so far.
    pub coverage: u64,
    /// Quantization table in effect when the component was first scanned.
    pub quantization: Option<[u16; 64]>,
    /// Output column -> sample offset inside a block row.
    x_offsets: Vec<u32>,
    /// Output row -> offset of the sample row.
    y_offsets: Vec<u32>,
}

impl ImageComponent {
    pub fn new(
        id: u8,
        horizontal_sampling_factor: u8,
        vertical_sampling_factor: u8,
        quantization_table_id: u8,
        geometry: &FrameGeometry,
    ) -> Self {
        let h = horizontal_sampling_factor as usize;
        let v = vertical_sampling_factor as usize;
        let max_h = geometry.max_horizontal_sampling as usize;
        let max_v = geometry.max_vertical_sampling as usize;

        let blocks_per_line = geometry.mcu_columns * h;
        let block_rows = geometry.mcu_rows * v;

        let component_width = (geometry.width as usize * h).div_ceil(max_h);
        let component_height = (geometry.height as usize * v).div_ceil(max_v);

        let (aligned_width, aligned_height) = geometry.mcu_aligned_dimensions();
        let row_stride = blocks_per_line * 64;

        let x_offsets = (0..aligned_width)
            .map(|x| {
                let sx = x * h / max_h;
                ((sx / 8) * 64 + sx % 8) as u32
            })
            .collect();

        let y_offsets = (0..aligned_height)
            .map(|y| {
                let sy = y * v / max_v;
                ((sy / 8) * row_stride + (sy % 8) * 8) as u32
            })
            .collect();

        ImageComponent {
            id,
            horizontal_sampling_factor,
            vertical_sampling_factor,
            quantization_table_id,
            blocks_per_line,
            block_rows,
            scan_blocks_per_line: component_width.div_ceil(8),
            scan_block_rows: component_height.div_ceil(8),
            rows: vec![vec![0; row_stride]; block_rows],
            coverage: 0,
            quantization: None,
            x_offsets,
            y_offsets,
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks_per_line * self.block_rows
    }

    /// Samples in one block row of the output buffer.
    pub fn row_stride(&self) -> usize {
        self.blocks_per_line * 64
    }

    pub fn is_complete(&self) -> bool {
        self.coverage == FULL_COVERAGE
    }

    #[inline(always)]
    pub fn block_mut(&mut self, block_x: usize, block_y: usize) -> &mut [i32] {
        let start = block_x * 64;
        &mut self.rows[block_y][start..start + 64]
    }

    pub fn x_offsets(&self) -> &[u32] {
        &self.x_offsets
    }

    pub fn y_offsets(&self) -> &[u32] {
        &self.y_offsets
    }
}
