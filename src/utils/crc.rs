/// CRC32 implementation specifically for MPEG-2 TS PSI tables
/// Based on ITU-T H.222.0 / ISO/IEC 13818-1
/// Polynomial: x32 + x26 + x23 + x22 + x16 + x12 + x11 + x10 + x8 + x7 + x5 + x4 + x2 + x + 1
/// Initial value: 0xFFFFFFFF
const CRC32_MPEG2: u32 = 0x04C11DB7;

/// MPEG-2 CRC32 calculator used for Transport Stream PSI table validation
///
/// Implements the CRC32 algorithm specified in ITU-T H.222.0 / ISO/IEC 13818-1
/// for validating Program Specific Information (PSI) tables in MPEG-2
/// Transport Streams. MSB-first, no final XOR.
pub struct Crc32Mpeg2 {
    /// Lookup table for fast CRC calculation
    table: [u32; 256],
}

impl Crc32Mpeg2 {
    /// Creates a new CRC32 calculator with pre-computed lookup table
    pub fn new() -> Self {
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = (i as u32) << 24;
            for _ in 0..8 {
                crc = if (crc & 0x80000000) != 0 {
                    (crc << 1) ^ CRC32_MPEG2
                } else {
                    crc << 1
                };
            }
            *entry = crc;
        }
        Self { table }
    }

    /// Calculates the CRC32 checksum for the given data
    pub fn calculate(&self, data: &[u8]) -> u32 {
        self.update(0xFFFFFFFF, data)
    }

    /// Folds more data into a running CRC value.
    ///
    /// Seed with `0xFFFFFFFF` for a fresh computation; used when a
    /// section is checksummed across discontiguous spans.
    pub fn update(&self, mut crc: u32, data: &[u8]) -> u32 {
        for &byte in data {
            let index = ((crc >> 24) ^ (byte as u32)) & 0xFF;
            crc = (crc << 8) ^ self.table[index as usize];
        }
        crc
    }
}

impl Default for Crc32Mpeg2 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_mpeg2_vector() {
        let crc = Crc32Mpeg2::new();

        // Test vector from STMicroelectronics community forum post
        let test_data = [0x01, 0x01];
        assert_eq!(crc.calculate(&test_data), 0xD66FB816);
    }

    #[test]
    fn test_crc32_streaming_matches_oneshot() {
        let crc = Crc32Mpeg2::new();
        let data: Vec<u8> = (0u8..=255).collect();
        let oneshot = crc.calculate(&data);
        let mut running = 0xFFFFFFFF;
        for chunk in data.chunks(7) {
            running = crc.update(running, chunk);
        }
        assert_eq!(running, oneshot);
    }

    #[test]
    fn test_crc32_pat_section() {
        let crc = Crc32Mpeg2::new();

        // A PAT section minus its CRC field
        let pat_data = [
            0x00, // Table ID (PAT)
            0xB0, // Section syntax indicator = 1, private bit = 0, reserved = 3
            0x0D, // Section length
            0x00, 0x01, // Transport stream ID
            0xC1, // Reserved = 3, version = 0, current/next = 1
            0x00, 0x00, // Section number, last section number
            0x00, 0x01, // Program number
            0xE1, 0x00, // Program map PID
        ];

        let computed = crc.calculate(&pat_data);
        assert_ne!(computed, 0);
        // A single flipped bit must change the checksum
        let mut corrupted = pat_data;
        corrupted[4] ^= 0x01;
        assert_ne!(crc.calculate(&corrupted), computed);
    }
}
