//! # Utility Functions and Types
//!
//! Common utilities used throughout the tsio library:
//!
//! - Bit-level reading and writing (big-endian, TS wire order)
//! - MPEG-2 CRC32 calculation and validation
//!
//! ## Bit Operations
//!
//! ```rust
//! use tsio::utils::BitReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = vec![0b10110011u8];
//! let mut reader = BitReader::new(&data);
//!
//! let value = reader.read_bits(3)?; // Reads first 3 bits (101)
//! assert_eq!(value, 0b101);
//! # Ok(())
//! # }
//! ```
//!
//! ## CRC Calculation
//!
//! ```rust
//! use tsio::utils::Crc32Mpeg2;
//!
//! # fn main() {
//! let crc = Crc32Mpeg2::new();
//! let checksum = crc.calculate(b"section bytes");
//! println!("CRC32: {:08x}", checksum);
//! # }
//! ```

/// Bit manipulation and bitstream reading/writing utilities
pub mod bits;

/// CRC calculation implementations
pub mod crc;

// Re-export commonly used types
pub use bits::{BitReader, BitWriter};
pub use crc::Crc32Mpeg2;
