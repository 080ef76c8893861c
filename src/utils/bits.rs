use crate::error::{Result, TsError};
use bytes::{BufMut, BytesMut};

/// A bit-level reader for parsing binary data streams.
///
/// Operates strictly big-endian, matching the MPEG-TS/PSI wire format:
/// the first bit read is the most significant bit of the first byte.
///
/// Example:
/// ```
/// use tsio::utils::BitReader;
///
/// let data = [0b10110011];
/// let mut reader = BitReader::new(&data);
///
/// assert_eq!(reader.read_bit().unwrap(), true);    // 1
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011); // 011
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    /// Creates a new BitReader from a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Reads a single bit from the stream.
    /// Returns true for 1, false for 0.
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.byte_offset >= self.data.len() {
            return Err(TsError::UnexpectedEof { needed: 1, have: 0 });
        }

        let bit = (self.data[self.byte_offset] >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;

        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }

        Ok(bit == 1)
    }

    /// Reads n bits (n <= 64) and returns them as an unsigned integer.
    pub fn read_bits(&mut self, n: u32) -> Result<u64> {
        if n > 64 {
            return Err(TsError::InvalidData("too many bits requested".into()));
        }
        if (n as usize) > self.remaining_bits() {
            return Err(TsError::UnexpectedEof {
                needed: n as usize,
                have: self.remaining_bits(),
            });
        }

        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value)
    }

    /// Reads n whole bytes. The reader must be byte-aligned.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bit_offset != 0 {
            return Err(TsError::InvalidData(
                "byte read on unaligned bit reader".into(),
            ));
        }
        if self.byte_offset + n > self.data.len() {
            return Err(TsError::UnexpectedEof {
                needed: n * 8,
                have: self.remaining_bits(),
            });
        }
        let slice = &self.data[self.byte_offset..self.byte_offset + n];
        self.byte_offset += n;
        Ok(slice)
    }

    /// Reads all remaining whole bytes. The reader must be byte-aligned.
    pub fn read_remaining(&mut self) -> Result<&'a [u8]> {
        let n = self.data.len() - self.byte_offset.min(self.data.len());
        self.read_bytes(n)
    }

    /// Returns the next n bits without consuming them.
    pub fn peek_bits(&self, n: u32) -> Result<u64> {
        let mut copy = BitReader {
            data: self.data,
            byte_offset: self.byte_offset,
            bit_offset: self.bit_offset,
        };
        copy.read_bits(n)
    }

    /// Skips n bits in the stream.
    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        if (n as usize) > self.remaining_bits() {
            return Err(TsError::UnexpectedEof {
                needed: n as usize,
                have: self.remaining_bits(),
            });
        }
        let total = self.bit_offset as usize + n as usize;
        self.byte_offset += total / 8;
        self.bit_offset = (total % 8) as u8;
        Ok(())
    }

    /// Skips n whole bytes.
    pub fn skip_bytes(&mut self, n: usize) -> Result<()> {
        self.skip_bits((n * 8) as u32)
    }

    /// Returns the number of bits available to read.
    pub fn remaining_bits(&self) -> usize {
        if self.byte_offset >= self.data.len() {
            return 0;
        }
        (self.data.len() - self.byte_offset) * 8 - self.bit_offset as usize
    }

    /// Returns the number of whole bytes available to read.
    pub fn remaining_bytes(&self) -> usize {
        self.remaining_bits() / 8
    }

    /// Byte position of the reader within the underlying buffer.
    /// Only meaningful while byte-aligned.
    pub fn position(&self) -> usize {
        self.byte_offset
    }
}

/// A bit-level writer emitting into a `BytesMut`.
///
/// Mirror of [`BitReader`]: strictly big-endian bit order. Tracks the
/// total byte count written so section lengths can be computed before
/// the CRC is known.
pub struct BitWriter<'a> {
    buf: &'a mut BytesMut,
    current: u8,
    bit_offset: u8,
    bytes_written: usize,
}

impl<'a> BitWriter<'a> {
    /// Creates a new BitWriter appending to the given buffer.
    pub fn new(buf: &'a mut BytesMut) -> Self {
        BitWriter {
            buf,
            current: 0,
            bit_offset: 0,
            bytes_written: 0,
        }
    }

    /// Writes a single bit.
    pub fn write_bit(&mut self, bit: bool) {
        if bit {
            self.current |= 1 << (7 - self.bit_offset);
        }
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.buf.put_u8(self.current);
            self.current = 0;
            self.bit_offset = 0;
            self.bytes_written += 1;
        }
    }

    /// Writes the low n bits (n <= 64) of value, most significant first.
    pub fn write_bits(&mut self, value: u64, n: u32) {
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    /// Writes a byte slice. The writer must be byte-aligned.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.bit_offset != 0 {
            return Err(TsError::InvalidData(
                "byte write on unaligned bit writer".into(),
            ));
        }
        self.buf.extend_from_slice(bytes);
        self.bytes_written += bytes.len();
        Ok(())
    }

    /// Writes a single byte. The writer must be byte-aligned.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    /// Total whole bytes flushed into the buffer so far.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Whether the writer sits on a byte boundary.
    pub fn is_aligned(&self) -> bool {
        self.bit_offset == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_read_bits() {
        // Simple pattern within a byte
        let data = [0b10110011];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(5).unwrap(), 0b10011);

        // Cross-byte boundary
        let data = [0b10110011, 0b01011010];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(8).unwrap(), 0b10011010);

        // Reading a full byte
        let data = [0b11111111];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(8).unwrap(), 0b11111111);

        // Reading zero bits
        let data = [0b10101010];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(0).unwrap(), 0);

        // Error on too many bits
        let data = [0xFF];
        let mut reader = BitReader::new(&data);
        assert!(reader.read_bits(65).is_err());

        // Cross multiple byte boundaries
        let data = [0b10110011, 0b11001100, 0b10101010];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(20).unwrap(), 0b10110011110011001010);
    }

    #[test]
    fn test_read_bytes_and_skip() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bytes(2).unwrap(), &[0x01, 0x02]);
        reader.skip_bytes(1).unwrap();
        assert_eq!(reader.read_bytes(1).unwrap(), &[0x04]);
        assert_eq!(reader.remaining_bits(), 0);
        assert!(reader.read_bytes(1).is_err());

        // Unaligned byte read is rejected
        let mut reader = BitReader::new(&data);
        reader.read_bits(4).unwrap();
        assert!(reader.read_bytes(1).is_err());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let data = [0xAB, 0xCD];
        let reader = BitReader::new(&data);
        assert_eq!(reader.peek_bits(8).unwrap(), 0xAB);
        assert_eq!(reader.peek_bits(16).unwrap(), 0xABCD);
        assert_eq!(reader.remaining_bits(), 16);
    }

    #[test]
    fn test_eof_error_carries_counts() {
        let data = [0xFF];
        let mut reader = BitReader::new(&data);
        reader.read_bits(6).unwrap();
        match reader.read_bits(4) {
            Err(TsError::UnexpectedEof { needed, have }) => {
                assert_eq!(needed, 4);
                assert_eq!(have, 2);
            }
            other => panic!("expected UnexpectedEof, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_writer_basic() {
        let mut buf = BytesMut::new();
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bits(0b101, 3);
        writer.write_bits(0b10011, 5);
        writer.write_u8(0x42).unwrap();
        assert_eq!(writer.bytes_written(), 2);
        assert_eq!(&buf[..], &[0b10110011, 0x42]);
    }

    #[test]
    fn test_writer_rejects_unaligned_bytes() {
        let mut buf = BytesMut::new();
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bit(true);
        assert!(!writer.is_aligned());
        assert!(writer.write_bytes(&[0x00]).is_err());
    }

    #[quickcheck]
    fn prop_bits_round_trip(values: Vec<(u16, u8)>) -> bool {
        let fields: Vec<(u64, u32)> = values
            .into_iter()
            .map(|(v, n)| {
                let n = (n % 16) as u32 + 1;
                ((v as u64) & ((1 << n) - 1), n)
            })
            .collect();

        let mut buf = BytesMut::new();
        let mut writer = BitWriter::new(&mut buf);
        let mut total = 0u32;
        for &(v, n) in &fields {
            writer.write_bits(v, n);
            total += n;
        }
        // Pad to a byte boundary so every bit lands in the buffer
        writer.write_bits(0, (8 - total % 8) % 8);

        let mut reader = BitReader::new(&buf);
        fields
            .iter()
            .all(|&(v, n)| reader.read_bits(n).unwrap() == v)
    }

    #[quickcheck]
    fn prop_read_bits_matches_manual(data: Vec<u8>, n: u8) -> bool {
        if data.is_empty() {
            return true;
        }
        let n = (n % 32) as u32;
        let mut reader = BitReader::new(&data);
        match reader.read_bits(n) {
            Ok(result) => {
                let mut expected = 0u64;
                for i in 0..n as usize {
                    let byte_idx = i / 8;
                    let bit_idx = 7 - (i % 8);
                    let bit = (data[byte_idx] >> bit_idx) & 1;
                    expected |= (bit as u64) << (n as usize - 1 - i);
                }
                result == expected
            }
            Err(_) => (n as usize) > data.len() * 8,
        }
    }
}
