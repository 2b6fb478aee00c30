use std::fmt::{Debug, Display, Formatter};

use crate::decoders::jpeg::huffman::HuffmanTable;
use crate::decoders::jpeg::{AdobeHeader, ComponentInfo, JfifHeader, JpegMode, QuantizationTable, ScanInfo};

fn print_matrix<T: Display>(f: &mut Formatter<'_>, values: &[T], width: usize) -> std::fmt::Result {
    if values.is_empty() {
        writeln!(f, "    []")?;
        return Ok(());
    }

    let str_values: Vec<String> = values.iter().map(|x| format!("{}", x)).collect();
    let max_width = str_values.iter().map(|s| s.len()).max().unwrap_or(0);

    for chunk in str_values.chunks(width) {
        write!(f, "   ")?;
        for value in chunk {
            write!(f, " {:>width$}", value, width = max_width)?;
        }
        writeln!(f)?;
    }

    Ok(())
}

/// Header-level description of a JPEG stream, as collected by `JpegDecoder::read_info`.
#[derive(Debug, Clone)]
pub struct JpegInfo {
    pub width: u32,
    pub height: u32,
    /// Dimensions rounded up to whole 8x8 blocks.
    pub padded_width: u32,
    pub padded_height: u32,
    pub precision: u8,
    pub mode: JpegMode,
    pub components: Vec<ComponentInfo>,
    pub quantization_tables: Vec<QuantizationTable>,
    pub huffman_tables: Vec<HuffmanTable>,
    pub scans: Vec<ScanInfo>,
    pub restart_interval: u16,
    pub jfif_header: Option<JfifHeader>,
    pub adobe_header: Option<AdobeHeader>,
    pub comments: Vec<String>,
}

impl Display for JpegInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Dimensions: {}x{}", self.width, self.height)?;
        writeln!(f, "Padded dimensions: {}x{}", self.padded_width, self.padded_height)?;
        writeln!(f, "Precision: {} bits", self.precision)?;
        writeln!(f, "Mode: {:?}", self.mode)?;
        writeln!(f, "Restart interval: {}", self.restart_interval)?;

        writeln!(f, "Components:")?;
        for component in &self.components {
            writeln!(
                f,
                "  ID {}: sampling {}x{}, quantization table {}",
                component.id,
                component.horizontal_sampling_factor,
                component.vertical_sampling_factor,
                component.quantization_table_id
            )?;
        }

        writeln!(f, "====================")?;

        for comment in &self.comments {
            writeln!(f, "Comment: {}", comment)?;
        }

        match &self.jfif_header {
            Some(jfif) => {
                writeln!(f, "JFIF header:")?;
                writeln!(f, "  Version: {}.{:02}", jfif.version_major, jfif.version_minor)?;
                writeln!(f, "  Density units: {}", jfif.density_units)?;
                writeln!(f, "  Density: {}x{}", jfif.x_density, jfif.y_density)?;
                writeln!(f, "  Thumbnail dimensions: {}x{}", jfif.thumbnail_width, jfif.thumbnail_height)?;
            }
            None => writeln!(f, "JFIF header: None")?,
        }

        match &self.adobe_header {
            Some(adobe) => {
                writeln!(f, "Adobe header:")?;
                writeln!(f, "  Version: {}", adobe.version)?;
                writeln!(f, "  Flags: {:#06x} {:#06x}", adobe.flags0, adobe.flags1)?;
                writeln!(f, "  Transform: {}", adobe.transform)?;
            }
            None => writeln!(f, "Adobe header: None")?,
        }

        writeln!(f, "====================")?;

        writeln!(f, "Quantization tables:")?;
        for table in &self.quantization_tables {
            writeln!(f, "  ID: {} ({}-bit)", table.id, if table.precision == 0 { 8 } else { 16 })?;
            print_matrix(f, &table.table, 8)?;
        }

        writeln!(f, "====================")?;

        writeln!(f, "Huffman tables:")?;
        for table in &self.huffman_tables {
            writeln!(
                f,
                "  {} table {}: {} symbols, longest code {} bits",
                if table.class == 0 { "DC" } else { "AC" },
                table.id,
                table.symbols.len(),
                table.max_code_length()
            )?;
            writeln!(f, "  Code counts:")?;
            print_matrix(f, &table.counts, 16)?;
        }

        writeln!(f, "====================")?;

        writeln!(f, "Scans:")?;
        for (i, scan) in self.scans.iter().enumerate() {
            writeln!(
                f,
                "  #{}: components {:?}, spectral {}..{}, approximation {}/{}, {} bytes",
                i,
                scan.components.iter().map(|c| c.component_id).collect::<Vec<u8>>(),
                scan.start_spectral,
                scan.end_spectral,
                scan.successive_high,
                scan.successive_low,
                scan.data_length
            )?;
        }

        Ok(())
    }
}
