use crate::decoders::jpeg::huffman::HuffmanTable;
use crate::utils::bitreader::BitReader;
use crate::utils::error::{VexelError, VexelResult};

/// Largest DC magnitude, after the successive approximation shift, an 8-bit stream can carry.
const DC_LIMIT: i64 = 1 << 15;

/// Sign-extends a `size`-bit magnitude category value (F.2.2.1, "EXTEND").
#[inline(always)]
pub fn extend(value: u64, size: u8) -> i32 {
    if size == 0 {
        return 0;
    }

    let value = value as i32;
    if value < (1 << (size - 1)) {
        value - (1 << size) + 1
    } else {
        value
    }
}

#[inline(always)]
fn receive_extend(reader: &mut BitReader, size: u8) -> VexelResult<i32> {
    if size == 0 {
        return Ok(0);
    }
    let bits = reader.get_bits_advance(u32::from(size))?;
    Ok(extend(bits, size))
}

/// Entropy decoding of single 8x8 blocks. Coefficients are stored in zig-zag order.
///
/// Holds the end-of-band run shared by consecutive blocks of a scan. After a block that
/// read an EOBn symbol returns, `eob_run` is the number of following blocks that are
/// still covered by the run.
#[derive(Debug, Default)]
pub struct BlockDecoder {
    pub eob_run: u32,
}

impl BlockDecoder {
    pub fn new() -> Self {
        BlockDecoder { eob_run: 0 }
    }

    /// Clears the end-of-band run, at the start of a scan and at restart markers.
    pub fn reset(&mut self) {
        self.eob_run = 0;
    }

    /// Baseline / extended sequential block: DC difference plus AC coefficients 1..=63.
    pub fn decode_baseline(
        &mut self,
        reader: &mut BitReader,
        dc_table: &HuffmanTable,
        ac_table: &HuffmanTable,
        block: &mut [i32],
        dc_predictor: &mut i32,
    ) -> VexelResult<()> {
        self.decode_dc_first(reader, dc_table, block, dc_predictor, 0)?;
        self.decode_ac_first(reader, ac_table, block, 1, 63, 0)
    }

    /// First DC pass: decodes the difference category and adds the sign-extended
    /// difference to the running predictor, storing the result scaled by `2^al`.
    pub fn decode_dc_first(
        &mut self,
        reader: &mut BitReader,
        dc_table: &HuffmanTable,
        block: &mut [i32],
        dc_predictor: &mut i32,
        al: u8,
    ) -> VexelResult<()> {
        let size = dc_table.decode(reader)?;
        if size > 11 {
            return Err(VexelError::corrupt(format!("Invalid DC difference category: {}", size)));
        }

        let difference = receive_extend(reader, size)?;
        let value = i64::from(*dc_predictor) + i64::from(difference);
        let scaled = value << al;
        if !(-DC_LIMIT..=DC_LIMIT).contains(&scaled) {
            return Err(VexelError::corrupt(format!("DC coefficient {} out of range", scaled)));
        }

        *dc_predictor = value as i32;
        block[0] = scaled as i32;

        Ok(())
    }

    /// DC refinement pass: one raw bit per block.
    pub fn decode_dc_refine(&mut self, reader: &mut BitReader, block: &mut [i32], al: u8) -> VexelResult<()> {
        if reader.read_bit()? {
            block[0] |= 1 << al;
        }

        Ok(())
    }

    /// First AC pass over the spectral band `ss..=se`. Baseline blocks use the
    /// full band with `al = 0`.
    pub fn decode_ac_first(
        &mut self,
        reader: &mut BitReader,
        ac_table: &HuffmanTable,
        block: &mut [i32],
        ss: u8,
        se: u8,
        al: u8,
    ) -> VexelResult<()> {
        if self.eob_run > 0 {
            self.eob_run -= 1;
            return Ok(());
        }

        let mut k = ss as usize;
        let se = se as usize;

        while k <= se {
            let symbol = ac_table.decode(reader)?;
            let run = symbol >> 4;
            let size = symbol & 0x0F;

            if size == 0 {
                if run == 15 {
                    // ZRL
                    k += 16;
                    continue;
                }

                self.eob_run = (1 << run) + read_run_bits(reader, run)?;
                // This block is the first one of the run.
                self.eob_run -= 1;
                break;
            }

            if size > 10 {
                return Err(VexelError::corrupt(format!("Invalid AC coefficient category: {}", size)));
            }

            k += run as usize;
            if k > se {
                return Err(VexelError::corrupt(format!(
                    "AC run exceeds the spectral band (position {}, band end {})",
                    k, se
                )));
            }

            block[k] = receive_extend(reader, size)?.wrapping_shl(u32::from(al));
            k += 1;
        }

        Ok(())
    }

    /// AC refinement pass over `ss..=se` (G.1.2.3).
    ///
    /// Coefficients that are already non-zero receive one correction bit each; newly
    /// significant coefficients are placed at the position reached after skipping `run`
    /// zero-history coefficients.
    pub fn decode_ac_refine(
        &mut self,
        reader: &mut BitReader,
        ac_table: &HuffmanTable,
        block: &mut [i32],
        ss: u8,
        se: u8,
        al: u8,
    ) -> VexelResult<()> {
        let positive = 1i32 << al;
        let negative = -1i32 << al;
        let se = se as usize;
        let mut k = ss as usize;

        if self.eob_run == 0 {
            while k <= se {
                let symbol = ac_table.decode(reader)?;
                let mut run = i32::from(symbol >> 4);
                let size = symbol & 0x0F;
                let mut value = 0;

                if size == 0 {
                    if run != 15 {
                        self.eob_run = (1 << run) + read_run_bits(reader, run as u8)?;
                        break;
                    }
                    // ZRL: skip 16 zero-history coefficients, refining the rest on the way.
                } else {
                    if size != 1 {
                        return Err(VexelError::corrupt(format!(
                            "Invalid refinement coefficient category: {}",
                            size
                        )));
                    }
                    value = if reader.read_bit()? { positive } else { negative };
                }

                while k <= se {
                    let coefficient = &mut block[k];
                    if *coefficient != 0 {
                        refine(reader, coefficient, positive, negative)?;
                    } else {
                        if run == 0 {
                            if value != 0 {
                                *coefficient = value;
                            }
                            k += 1;
                            break;
                        }
                        run -= 1;
                    }
                    k += 1;
                }
            }
        }

        if self.eob_run > 0 {
            while k <= se {
                let coefficient = &mut block[k];
                if *coefficient != 0 {
                    refine(reader, coefficient, positive, negative)?;
                }
                k += 1;
            }
            self.eob_run -= 1;
        }

        Ok(())
    }
}

#[inline(always)]
fn refine(reader: &mut BitReader, coefficient: &mut i32, positive: i32, negative: i32) -> VexelResult<()> {
    if reader.read_bit()? && (*coefficient & positive) == 0 {
        *coefficient += if *coefficient >= 0 { positive } else { negative };
    }
    Ok(())
}

#[inline(always)]
fn read_run_bits(reader: &mut BitReader, n: u8) -> VexelResult<u32> {
    if n == 0 {
        return Ok(0);
    }
    Ok(reader.get_bits_advance(u32::from(n))? as u32)
}
