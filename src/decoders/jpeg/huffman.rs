use crate::utils::bitreader::BitReader;
use crate::utils::error::{VexelError, VexelResult};

#[derive(Debug, Clone, Copy, Default)]
struct LookupEntry {
    symbol: u8,
    // 0 marks a bit pattern no code maps to
    length: u8,
}

/// Canonical Huffman table with a dense lookup on the next `max_code_length` bits.
#[derive(Debug, Clone)]
pub struct HuffmanTable {
    pub id: u8,
    pub class: u8,
    pub counts: [u8; 16],
    pub symbols: Vec<u8>,
    max_code_length: u8,
    lookup: Vec<LookupEntry>,
}

impl HuffmanTable {
    /// Builds the table from a DHT definition.
    ///
    /// # Parameters
    /// - `counts`: number of codes of each length 1..=16
    /// - `symbols`: symbols ordered by ascending code length
    ///
    /// # Returns
    /// - `VexelError::CorruptSegment` if the symbol count does not match `counts`, or the
    ///   lengths describe more codes than fit (Kraft sum above one)
    pub fn new(id: u8, class: u8, counts: [u8; 16], symbols: Vec<u8>) -> VexelResult<HuffmanTable> {
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        if total != symbols.len() || total > 256 {
            return Err(VexelError::corrupt(format!(
                "Huffman table {}/{} declares {} symbols, got {}",
                class,
                id,
                total,
                symbols.len()
            )));
        }

        let max_code_length = counts.iter().rposition(|&c| c != 0).map_or(0, |i| i + 1) as u8;
        if max_code_length == 0 {
            return Err(VexelError::corrupt(format!("Huffman table {}/{} is empty", class, id)));
        }

        let mut lookup = vec![LookupEntry::default(); 1 << max_code_length];
        let mut code: u32 = 0;
        let mut k = 0;

        for length in 1..=max_code_length {
            for _ in 0..counts[length as usize - 1] {
                if code >= (1 << length) {
                    return Err(VexelError::corrupt(format!(
                        "Huffman table {}/{} has too many codes of length {}",
                        class, id, length
                    )));
                }

                let shift = max_code_length - length;
                let start = (code << shift) as usize;
                let end = ((code + 1) << shift) as usize;
                lookup[start..end].fill(LookupEntry {
                    symbol: symbols[k],
                    length,
                });

                code += 1;
                k += 1;
            }

            code <<= 1;
        }

        Ok(HuffmanTable {
            id,
            class,
            counts,
            symbols,
            max_code_length,
            lookup,
        })
    }

    pub fn max_code_length(&self) -> u8 {
        self.max_code_length
    }

    /// Returns `(symbol, code, length)` for every symbol in canonical order.
    pub fn codes(&self) -> Vec<(u8, u16, u8)> {
        let mut codes = Vec::with_capacity(self.symbols.len());
        let mut code: u32 = 0;
        let mut k = 0;

        for length in 1..=16u8 {
            for _ in 0..self.counts[length as usize - 1] {
                codes.push((self.symbols[k], code as u16, length));
                code += 1;
                k += 1;
            }
            code <<= 1;
        }

        codes
    }

    /// Decodes the next symbol.
    #[inline(always)]
    pub fn decode(&self, reader: &mut BitReader) -> VexelResult<u8> {
        let bits = reader.get_bits(u32::from(self.max_code_length));
        let entry = self.lookup[bits as usize];

        if entry.length == 0 {
            // Zero padding past the end of the data may not form a valid code.
            if reader.bits_buffered() < u32::from(self.max_code_length) {
                return Err(VexelError::BitstreamUnderflow {
                    requested: u32::from(self.max_code_length),
                    available: reader.bits_buffered(),
                });
            }

            return Err(VexelError::corrupt(format!(
                "Invalid Huffman code {:0width$b} for table {}/{}",
                bits,
                self.class,
                self.id,
                width = self.max_code_length as usize
            )));
        }

        reader.advance(u32::from(entry.length))?;

        Ok(entry.symbol)
    }
}
