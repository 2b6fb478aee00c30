//! Minimal JPEG writer for tests. Encodes given quantized coefficients, so the decoder
//! can be checked against streams whose content is known exactly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy)]
pub enum Script {
    Baseline,
    /// Progressive with spectral selection only.
    SpectralSelection,
    /// Progressive with successive approximation of DC and AC.
    SuccessiveApproximation,
}

#[derive(Debug, Clone)]
pub struct TestComponent {
    pub id: u8,
    pub h: u8,
    pub v: u8,
    pub tq: u8,
    pub blocks_per_line: usize,
    pub block_rows: usize,
    pub scan_blocks_per_line: usize,
    pub scan_block_rows: usize,
    /// Zig-zag ordered quantized coefficients, row-major over the MCU-padded blocks.
    pub blocks: Vec<[i32; 64]>,
}

#[derive(Debug, Clone)]
pub struct TestImage {
    pub width: u16,
    pub height: u16,
    pub precision: u8,
    pub quant_tables: Vec<[u16; 64]>,
    pub components: Vec<TestComponent>,
    pub restart_interval: u16,
    pub mcu_columns: usize,
    pub mcu_rows: usize,
}

impl TestImage {
    /// Image with all-zero coefficients and the given `(h, v)` factors per component.
    pub fn new(width: u16, height: u16, factors: &[(u8, u8)]) -> Self {
        let max_h = factors.iter().map(|f| f.0).max().unwrap_or(1) as usize;
        let max_v = factors.iter().map(|f| f.1).max().unwrap_or(1) as usize;
        let mcu_columns = (width as usize + 8 * max_h - 1) / (8 * max_h);
        let mcu_rows = (height as usize + 8 * max_v - 1) / (8 * max_v);

        let components = factors
            .iter()
            .enumerate()
            .map(|(i, &(h, v))| {
                let blocks_per_line = mcu_columns * h as usize;
                let block_rows = mcu_rows * v as usize;
                let samples_wide = (width as usize * h as usize + max_h - 1) / max_h;
                let samples_high = (height as usize * v as usize + max_v - 1) / max_v;

                TestComponent {
                    id: i as u8 + 1,
                    h,
                    v,
                    tq: if i == 0 { 0 } else { 1 },
                    blocks_per_line,
                    block_rows,
                    scan_blocks_per_line: (samples_wide + 7) / 8,
                    scan_block_rows: (samples_high + 7) / 8,
                    blocks: vec![[0; 64]; blocks_per_line * block_rows],
                }
            })
            .collect();

        let mut luma = [0u16; 64];
        let mut chroma = [0u16; 64];
        for z in 0..64 {
            luma[z] = 1 + z as u16 / 4;
            chroma[z] = 2 + z as u16 / 3;
        }

        TestImage {
            width,
            height,
            precision: 8,
            quant_tables: vec![luma, chroma],
            components,
            restart_interval: 0,
            mcu_columns,
            mcu_rows,
        }
    }

    /// Fills every block a non-interleaved scan would cover with sparse random
    /// coefficients. MCU padding blocks outside that area stay zero.
    pub fn random(width: u16, height: u16, factors: &[(u8, u8)], seed: u64) -> Self {
        let mut image = Self::new(width, height, factors);
        let mut rng = StdRng::seed_from_u64(seed);

        for component in &mut image.components {
            for by in 0..component.scan_block_rows {
                for bx in 0..component.scan_blocks_per_line {
                    let block = &mut component.blocks[by * component.blocks_per_line + bx];
                    block[0] = rng.random_range(-60..=60);
                    for (z, coefficient) in block.iter_mut().enumerate().skip(1) {
                        let chance = if z < 10 { 0.5 } else { 0.1 };
                        if rng.random_bool(chance) {
                            let magnitude = rng.random_range(1..=if z < 10 { 40 } else { 12 });
                            *coefficient = if rng.random_bool(0.5) { magnitude } else { -magnitude };
                        }
                    }
                }
            }
        }

        image
    }

    pub fn encode(&self, script: Script) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];

        segment(&mut out, 0xE0, b"JFIF\0\x01\x02\x00\x00\x01\x00\x01\x00\x00");
        segment(&mut out, 0xFE, b"vexel test stream");

        for (id, table) in self.quant_tables.iter().enumerate() {
            let mut payload = vec![id as u8];
            payload.extend(table.iter().map(|&q| q as u8));
            segment(&mut out, 0xDB, &payload);
        }

        let sof = match script {
            Script::Baseline => 0xC0,
            _ => 0xC2,
        };
        let mut frame = vec![self.precision];
        frame.extend_from_slice(&self.height.to_be_bytes());
        frame.extend_from_slice(&self.width.to_be_bytes());
        frame.push(self.components.len() as u8);
        for c in &self.components {
            frame.extend_from_slice(&[c.id, (c.h << 4) | c.v, c.tq]);
        }
        segment(&mut out, sof, &frame);

        let mut dht = vec![0x00];
        dht.extend(dc_counts());
        dht.extend(0..12u8);
        dht.push(0x10);
        dht.extend(ac_counts());
        dht.extend(0..255u8);
        segment(&mut out, 0xC4, &dht);

        if self.restart_interval > 0 {
            segment(&mut out, 0xDD, &self.restart_interval.to_be_bytes());
        }

        let all: Vec<usize> = (0..self.components.len()).collect();
        match script {
            Script::Baseline => self.scan(&mut out, &all, 0, 63, 0, 0, true),
            Script::SpectralSelection => {
                self.scan(&mut out, &all, 0, 0, 0, 0, false);
                for c in 0..self.components.len() {
                    self.scan(&mut out, &[c], 1, 5, 0, 0, false);
                    self.scan(&mut out, &[c], 6, 63, 0, 0, false);
                }
            }
            Script::SuccessiveApproximation => {
                self.scan(&mut out, &all, 0, 0, 0, 1, false);
                for c in 0..self.components.len() {
                    self.scan(&mut out, &[c], 1, 5, 0, 2, false);
                    self.scan(&mut out, &[c], 6, 63, 0, 1, false);
                }
                self.scan(&mut out, &all, 0, 0, 1, 0, false);
                for c in 0..self.components.len() {
                    self.scan(&mut out, &[c], 1, 5, 2, 1, false);
                    self.scan(&mut out, &[c], 1, 5, 1, 0, false);
                    self.scan(&mut out, &[c], 6, 63, 1, 0, false);
                }
            }
        }

        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn scan(&self, out: &mut Vec<u8>, components: &[usize], ss: u8, se: u8, ah: u8, al: u8, baseline: bool) {
        let mut header = vec![components.len() as u8];
        for &c in components {
            header.extend_from_slice(&[self.components[c].id, 0x00]);
        }
        header.extend_from_slice(&[ss, se, (ah << 4) | al]);
        segment(out, 0xDA, &header);

        let mut encoder = ScanEncoder {
            writer: BitWriter::default(),
            predictors: [0; 4],
            eob_run: 0,
            pending_bits: Vec::new(),
        };

        let mut blocks: Vec<(usize, usize)> = Vec::new();
        let mut mcus: Vec<Vec<(usize, usize)>> = Vec::new();

        if components.len() == 1 {
            let c = &self.components[components[0]];
            for by in 0..c.scan_block_rows {
                for bx in 0..c.scan_blocks_per_line {
                    mcus.push(vec![(0, by * c.blocks_per_line + bx)]);
                }
            }
        } else {
            for my in 0..self.mcu_rows {
                for mx in 0..self.mcu_columns {
                    blocks.clear();
                    for (k, &ci) in components.iter().enumerate() {
                        let c = &self.components[ci];
                        for v in 0..c.v as usize {
                            for h in 0..c.h as usize {
                                let bx = mx * c.h as usize + h;
                                let by = my * c.v as usize + v;
                                blocks.push((k, by * c.blocks_per_line + bx));
                            }
                        }
                    }
                    mcus.push(blocks.clone());
                }
            }
        }

        let interval = self.restart_interval as usize;
        for (m, mcu) in mcus.iter().enumerate() {
            if interval > 0 && m > 0 && m % interval == 0 {
                encoder.flush_eob_run();
                encoder.writer.pad();
                encoder.writer.bytes.extend_from_slice(&[0xFF, 0xD0 + ((m / interval - 1) % 8) as u8]);
                encoder.predictors = [0; 4];
            }

            for &(k, index) in mcu {
                let block = &self.components[components[k]].blocks[index];
                if baseline {
                    encoder.dc_first(block, k, 0);
                    encoder.ac_first(block, 1, 63, 0, false);
                } else if ss == 0 && ah == 0 {
                    encoder.dc_first(block, k, al);
                } else if ss == 0 {
                    encoder.writer.put(((block[0] >> al) & 1) as u32, 1);
                } else if ah == 0 {
                    encoder.ac_first(block, ss, se, al, true);
                } else {
                    encoder.ac_refine(block, ss, se, al);
                }
            }
        }

        encoder.flush_eob_run();
        encoder.writer.pad();
        out.extend_from_slice(&encoder.writer.bytes);
    }
}

pub fn segment(out: &mut Vec<u8>, marker: u8, payload: &[u8]) {
    out.extend_from_slice(&[0xFF, marker]);
    out.extend_from_slice(&(payload.len() as u16 + 2).to_be_bytes());
    out.extend_from_slice(payload);
}

fn dc_counts() -> [u8; 16] {
    let mut counts = [0u8; 16];
    counts[3] = 12;
    counts
}

fn ac_counts() -> [u8; 16] {
    let mut counts = [0u8; 16];
    counts[7] = 255;
    counts
}

fn bit_length(value: u32) -> u32 {
    32 - value.leading_zeros()
}

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    acc: u32,
    count: u32,
}

impl BitWriter {
    fn put(&mut self, value: u32, length: u32) {
        for i in (0..length).rev() {
            self.acc = (self.acc << 1) | ((value >> i) & 1);
            self.count += 1;
            if self.count == 8 {
                let byte = self.acc as u8;
                self.bytes.push(byte);
                if byte == 0xFF {
                    self.bytes.push(0x00);
                }
                self.acc = 0;
                self.count = 0;
            }
        }
    }

    fn pad(&mut self) {
        while self.count != 0 {
            self.put(1, 1);
        }
    }
}

struct ScanEncoder {
    writer: BitWriter,
    predictors: [i32; 4],
    eob_run: u32,
    pending_bits: Vec<u32>,
}

impl ScanEncoder {
    fn dc_symbol(&mut self, size: u32) {
        self.writer.put(size, 4);
    }

    fn ac_symbol(&mut self, symbol: u32) {
        self.writer.put(symbol, 8);
    }

    fn magnitude(&mut self, value: i32, size: u32) {
        if size > 0 {
            let bits = if value < 0 { value - 1 } else { value };
            self.writer.put(bits as u32 & ((1 << size) - 1), size);
        }
    }

    fn dc_first(&mut self, block: &[i32; 64], k: usize, al: u8) {
        let value = block[0] >> al;
        let difference = value - self.predictors[k];
        self.predictors[k] = value;

        let size = bit_length(difference.unsigned_abs());
        self.dc_symbol(size);
        self.magnitude(difference, size);
    }

    fn flush_eob_run(&mut self) {
        if self.eob_run > 0 {
            let n = bit_length(self.eob_run) - 1;
            self.ac_symbol(n << 4);
            self.writer.put(self.eob_run & ((1 << n) - 1), n);
            self.eob_run = 0;

            for bit in std::mem::take(&mut self.pending_bits) {
                self.writer.put(bit, 1);
            }
        }
    }

    fn ac_first(&mut self, block: &[i32; 64], ss: u8, se: u8, al: u8, runs: bool) {
        let mut run = 0u32;

        for &coefficient in &block[ss as usize..=se as usize] {
            let value = if coefficient >= 0 {
                coefficient >> al
            } else {
                -((-coefficient) >> al)
            };

            if value == 0 {
                run += 1;
                continue;
            }

            self.flush_eob_run();
            while run > 15 {
                self.ac_symbol(0xF0);
                run -= 16;
            }

            let size = bit_length(value.unsigned_abs());
            self.ac_symbol((run << 4) | size);
            self.magnitude(value, size);
            run = 0;
        }

        if run > 0 {
            if runs {
                self.eob_run += 1;
                if self.eob_run == 0x7FFF {
                    self.flush_eob_run();
                }
            } else {
                self.ac_symbol(0x00);
            }
        }
    }

    fn ac_refine(&mut self, block: &[i32; 64], ss: u8, se: u8, al: u8) {
        let band = ss as usize..=se as usize;
        let mut absolute = [0u32; 64];
        let mut last_new = 0;

        for k in band.clone() {
            absolute[k] = block[k].unsigned_abs() >> al;
            if absolute[k] == 1 {
                last_new = k;
            }
        }

        let mut run = 0u32;
        let mut corrections: Vec<u32> = Vec::new();

        for k in band {
            let value = absolute[k];
            if value == 0 {
                run += 1;
                continue;
            }

            while run > 15 && k <= last_new {
                self.flush_eob_run();
                self.ac_symbol(0xF0);
                run -= 16;
                for bit in corrections.drain(..) {
                    self.writer.put(bit, 1);
                }
            }

            if value > 1 {
                corrections.push(value & 1);
                continue;
            }

            self.flush_eob_run();
            self.ac_symbol((run << 4) | 1);
            self.writer.put(if block[k] < 0 { 0 } else { 1 }, 1);
            for bit in corrections.drain(..) {
                self.writer.put(bit, 1);
            }
            run = 0;
        }

        if run > 0 || !corrections.is_empty() {
            self.eob_run += 1;
            self.pending_bits.append(&mut corrections);
            if self.eob_run == 0x7FFF || self.pending_bits.len() > 900 {
                self.flush_eob_run();
            }
        }
    }
}
