use std::marker::PhantomData;

use crate::utils::error::{VexelError, VexelResult};

/// Largest number of bits a single peek may request. A refill always leaves at least
/// this many bits in the register unless the source is exhausted.
pub const MAX_PEEK_BITS: u32 = 57;

/// Bit ordering policy of a [`BitReader`].
///
/// The register is a 64-bit value with `bits` valid bits; the policy decides where
/// newly loaded bytes go and which end of the register holds the next bit.
pub trait BitOrder {
    /// Places `byte` into the register that already holds `bits` valid bits.
    fn push_byte(register: u64, bits: u32, byte: u8) -> u64;

    /// Returns the next `n` bits (1..=57) of the register without consuming them.
    fn peek(register: u64, n: u32) -> u64;

    /// Drops the next `n` bits (at most 63) from the register.
    fn consume(register: u64, n: u32) -> u64;
}

/// Most significant bit first. Used by JPEG entropy-coded data.
#[derive(Debug, Clone, Copy)]
pub struct MsbFirst;

/// Least significant bit first. Used by DEFLATE streams.
#[derive(Debug, Clone, Copy)]
pub struct LsbFirst;

impl BitOrder for MsbFirst {
    #[inline(always)]
    fn push_byte(register: u64, bits: u32, byte: u8) -> u64 {
        register | (u64::from(byte) << (56 - bits))
    }

    #[inline(always)]
    fn peek(register: u64, n: u32) -> u64 {
        register >> (64 - n)
    }

    #[inline(always)]
    fn consume(register: u64, n: u32) -> u64 {
        register << n
    }
}

impl BitOrder for LsbFirst {
    #[inline(always)]
    fn push_byte(register: u64, bits: u32, byte: u8) -> u64 {
        register | (u64::from(byte) << bits)
    }

    #[inline(always)]
    fn peek(register: u64, n: u32) -> u64 {
        register & ((1u64 << n) - 1)
    }

    #[inline(always)]
    fn consume(register: u64, n: u32) -> u64 {
        register >> n
    }
}

/// Bit cursor over a borrowed byte slice.
///
/// With destuffing enabled (JPEG entropy data) a `0xFF 0x00` pair yields a single `0xFF`
/// byte, and any other byte following `0xFF` is treated as a marker: refilling stops in
/// front of it and the missing bits read as zero.
#[derive(Debug)]
pub struct BitReader<'a, O: BitOrder = MsbFirst> {
    data: &'a [u8],
    position: usize,
    register: u64,
    bits: u32,
    destuff: bool,
    marker_reached: bool,
    order: PhantomData<O>,
}

impl<'a> BitReader<'a, MsbFirst> {
    /// Creates an MSB-first reader with JPEG byte destuffing enabled.
    pub fn jpeg(data: &'a [u8]) -> Self {
        let mut reader = Self::new(data);
        reader.destuff = true;
        reader
    }
}

impl<'a, O: BitOrder> BitReader<'a, O> {
    /// Creates a reader without destuffing.
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            position: 0,
            register: 0,
            bits: 0,
            destuff: false,
            marker_reached: false,
            order: PhantomData,
        }
    }

    /// Number of valid bits currently buffered in the register.
    pub fn bits_buffered(&self) -> u32 {
        self.bits
    }

    /// Byte offset of the next byte that has not been loaded into the register.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns `true` once refilling has stopped in front of a marker.
    pub fn marker_reached(&self) -> bool {
        self.marker_reached
    }

    /// Loads whole bytes until at least 57 bits are buffered or the source is exhausted.
    pub fn fill_buffer(&mut self) {
        while self.bits < MAX_PEEK_BITS && !self.marker_reached {
            let Some(&byte) = self.data.get(self.position) else {
                break;
            };

            if self.destuff && byte == 0xFF {
                match self.data.get(self.position + 1) {
                    Some(0x00) => self.position += 2,
                    Some(_) => {
                        self.marker_reached = true;
                        break;
                    }
                    None => {
                        self.position += 1;
                        break;
                    }
                }
            } else {
                self.position += 1;
            }

            self.register = O::push_byte(self.register, self.bits, byte);
            self.bits += 8;
        }
    }

    /// Peeks at the next `n` bits without consuming them.
    ///
    /// # Parameters
    /// - `n`: number of bits, 1..=57
    ///
    /// # Returns
    /// - The bits as an integer; bits past the end of the data read as zero
    #[inline(always)]
    pub fn get_bits(&mut self, n: u32) -> u64 {
        debug_assert!((1..=MAX_PEEK_BITS).contains(&n));

        if self.bits < n {
            self.fill_buffer();
        }

        O::peek(self.register, n)
    }

    /// Reads the next `n` bits and consumes them.
    ///
    /// # Parameters
    /// - `n`: number of bits, 1..=57
    ///
    /// # Returns
    /// - The bits as an integer
    /// - `VexelError::BitstreamUnderflow` if fewer than `n` bits are left in the data
    #[inline(always)]
    pub fn get_bits_advance(&mut self, n: u32) -> VexelResult<u64> {
        let value = self.get_bits(n);
        self.advance(n)?;
        Ok(value)
    }

    /// Reads a single bit.
    #[inline(always)]
    pub fn read_bit(&mut self) -> VexelResult<bool> {
        Ok(self.get_bits_advance(1)? == 1)
    }

    /// Consumes `n` already buffered bits.
    ///
    /// # Returns
    /// - `VexelError::BitstreamUnderflow` if `n` exceeds the buffered bit count
    #[inline(always)]
    pub fn advance(&mut self, n: u32) -> VexelResult<()> {
        if n > self.bits {
            return Err(VexelError::BitstreamUnderflow {
                requested: n,
                available: self.bits,
            });
        }

        self.register = if n == 64 { 0 } else { O::consume(self.register, n) };
        self.bits -= n;

        Ok(())
    }

    /// Skips `n` bits, refilling as often as needed.
    ///
    /// # Returns
    /// - `VexelError::BitstreamUnderflow` if the data ends before `n` bits were skipped
    pub fn skip(&mut self, mut n: u64) -> VexelResult<()> {
        while n > 0 {
            if self.bits == 0 {
                self.fill_buffer();
            }

            let step = n.min(u64::from(self.bits)) as u32;
            if step == 0 {
                return Err(VexelError::BitstreamUnderflow {
                    requested: n.min(u64::from(u32::MAX)) as u32,
                    available: 0,
                });
            }

            self.advance(step)?;
            n -= u64::from(step);
        }

        Ok(())
    }

    /// Drops the bits left over in the current byte.
    pub fn align_to_byte(&mut self) {
        let remainder = self.bits % 8;
        self.register = O::consume(self.register, remainder);
        self.bits -= remainder;
    }

    /// Discards everything buffered and consumes the next `RSTn` marker.
    ///
    /// Used at restart-interval boundaries. Returns the marker number (0..=7), or `None`
    /// if no restart marker follows.
    pub fn restart(&mut self) -> Option<u8> {
        self.register = 0;
        self.bits = 0;
        self.marker_reached = false;

        while self.position + 1 < self.data.len() {
            if self.data[self.position] == 0xFF {
                let code = self.data[self.position + 1];
                if (0xD0..=0xD7).contains(&code) {
                    self.position += 2;
                    return Some(code - 0xD0);
                }
                if code != 0x00 && code != 0xFF {
                    // Some other marker, leave it for the segment parser.
                    self.marker_reached = true;
                    return None;
                }
            }
            self.position += 1;
        }

        None
    }
}
