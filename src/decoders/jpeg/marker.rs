/// JPEG marker codes (the byte following `0xFF`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JpegMarker {
    // Start Of Frame markers. The number is the low nibble of the marker code:
    // 0 baseline, 1 extended sequential, 2 progressive, 3 lossless,
    // 5-7 differential (hierarchical), 9-11 and 13-15 arithmetic coded.
    SOF(u8),

    // Huffman table specification
    DHT, // Define Huffman table(s)

    // Arithmetic coding conditioning specification
    DAC, // Define arithmetic coding conditioning(s)

    // Restart interval termination
    RST(u8),

    // Other markers
    SOI, // Start of image
    EOI, // End of image
    SOS, // Start of scan
    DQT, // Define quantization table(s)
    DNL, // Define number of lines
    DRI, // Define restart interval
    DHP, // Define hierarchical progression
    EXP, // Expand reference component(s)

    // Application segments
    APP(u8),

    // JPEG extensions, 0xFFC8 is JPG(0xFF), 0xFFF0..=0xFFFD are JPG(0..=13)
    JPG(u8),

    COM, // Comment

    // Special markers
    TEM, // For temporary private use in arithmetic coding

    // Reserved marker
    RES(u8),
}

impl JpegMarker {
    /// Maps the byte following `0xFF` to a marker.
    ///
    /// # Returns
    /// - `None` for `0x00` (stuffed byte) and `0xFF` (fill byte)
    pub fn from_code(code: u8) -> Option<JpegMarker> {
        let marker = match code {
            0x00 | 0xFF => return None,
            0x01 => JpegMarker::TEM,
            0xC4 => JpegMarker::DHT,
            0xC8 => JpegMarker::JPG(0xFF),
            0xCC => JpegMarker::DAC,
            0xC0..=0xCF => JpegMarker::SOF(code - 0xC0),
            0xD0..=0xD7 => JpegMarker::RST(code - 0xD0),
            0xD8 => JpegMarker::SOI,
            0xD9 => JpegMarker::EOI,
            0xDA => JpegMarker::SOS,
            0xDB => JpegMarker::DQT,
            0xDC => JpegMarker::DNL,
            0xDD => JpegMarker::DRI,
            0xDE => JpegMarker::DHP,
            0xDF => JpegMarker::EXP,
            0xE0..=0xEF => JpegMarker::APP(code - 0xE0),
            0xF0..=0xFD => JpegMarker::JPG(code - 0xF0),
            0xFE => JpegMarker::COM,
            _ => JpegMarker::RES(code),
        };

        Some(marker)
    }

    pub fn to_u16(&self) -> u16 {
        let code = match *self {
            JpegMarker::SOF(n) => 0xC0 + n,
            JpegMarker::DHT => 0xC4,
            JpegMarker::DAC => 0xCC,
            JpegMarker::RST(n) => 0xD0 + n,
            JpegMarker::SOI => 0xD8,
            JpegMarker::EOI => 0xD9,
            JpegMarker::SOS => 0xDA,
            JpegMarker::DQT => 0xDB,
            JpegMarker::DNL => 0xDC,
            JpegMarker::DRI => 0xDD,
            JpegMarker::DHP => 0xDE,
            JpegMarker::EXP => 0xDF,
            JpegMarker::APP(n) => 0xE0 + n,
            JpegMarker::JPG(0xFF) => 0xC8,
            JpegMarker::JPG(n) => 0xF0 + n,
            JpegMarker::COM => 0xFE,
            JpegMarker::TEM => 0x01,
            JpegMarker::RES(code) => code,
        };

        0xFF00 | u16::from(code)
    }

    /// Markers that stand alone, without a length-prefixed segment.
    pub fn is_standalone(&self) -> bool {
        matches!(
            self,
            JpegMarker::SOI | JpegMarker::EOI | JpegMarker::RST(_) | JpegMarker::TEM
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_codes() {
        for code in 0x01..=0xFEu8 {
            if let Some(marker) = JpegMarker::from_code(code) {
                assert_eq!(marker.to_u16(), 0xFF00 | u16::from(code), "{:?}", marker);
            }
        }

        assert_eq!(JpegMarker::from_code(0xC2), Some(JpegMarker::SOF(2)));
        assert_eq!(JpegMarker::from_code(0xC4), Some(JpegMarker::DHT));
        assert_eq!(JpegMarker::from_code(0xD5), Some(JpegMarker::RST(5)));
        assert_eq!(JpegMarker::from_code(0xEE), Some(JpegMarker::APP(14)));
        assert_eq!(JpegMarker::from_code(0x00), None);
        assert_eq!(JpegMarker::from_code(0xFF), None);
    }
}
