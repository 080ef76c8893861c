#![doc(html_root_url = "https://docs.rs/tsio/0.1.0")]

//! # tsio - MPEG Transport Stream Toolkit
//!
//! `tsio` is a bidirectional MPEG transport stream codec: a pull-based
//! demuxer and a push-based muxer for the 188-byte packet container used
//! by broadcast and streaming systems, together with full PSI table
//! support (PAT/PMT/NIT/SDT/EIT/TOT), DVB descriptors, and PES handling.
//!
//! ## Features
//!
//! - **Demuxing**: reassemble PSI tables and PES packets per PID from
//!   any `AsyncRead`, with sync-loss recovery and cooperative
//!   cancellation for live sources
//! - **Muxing**: packetize payload units onto any `AsyncWrite`, with
//!   adaptation-field stuffing so elementary stream bytes are never
//!   padded
//! - **Bit-exact round trips**: integer-only 33+9-bit clock references,
//!   MPEG-2 CRC32 generation and validation
//!
//! ## Quick Start
//!
//! ```rust
//! use tsio::format::ts::{Packet, TS_PACKET_SIZE};
//!
//! # fn main() -> tsio::Result<()> {
//! let mut raw = [0xffu8; TS_PACKET_SIZE];
//! raw[0] = 0x47; // sync byte
//! raw[1] = 0x1f;
//! raw[2] = 0xff; // null PID
//! raw[3] = 0x10; // payload only
//!
//! let packet = Packet::parse(&raw)?;
//! assert_eq!(packet.header.pid, 0x1fff);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - `format::ts`: the transport stream codec itself
//! - `error`: [`TsError`] and the crate-wide [`Result`] alias
//! - `utils`: big-endian bit cursors and the MPEG-2 CRC32 engine

/// Error types and utilities
pub mod error;

/// Media format implementations
pub mod format;

/// Common utilities and helper functions
pub mod utils;

pub use error::{Result, TsError};
