//! # MPEG Transport Stream (TS) Implementation
//!
//! A bidirectional implementation of the MPEG transport stream container
//! (ISO/IEC 13818-1, plus the DVB service information tables of ETSI
//! EN 300 468):
//!
//! - TS packet parsing and generation, including adaptation fields
//! - Program Specific Information (PSI): PAT, PMT, NIT, SDT, EIT, TOT
//! - DVB descriptor sub-grammar with raw passthrough for unknown tags
//! - Packetized Elementary Stream (PES) handling with PTS/DTS
//! - MPEG-2 CRC32 validation and generation
//!
//! ## Demuxing
//!
//! ```rust,no_run
//! use tsio::format::ts::{Demuxer, DemuxerPayload};
//! use tokio::fs::File;
//!
//! #[tokio::main]
//! async fn main() -> tsio::Result<()> {
//!     let file = File::open("input.ts").await?;
//!     let mut demuxer = Demuxer::new(file);
//!
//!     while let Some(unit) = demuxer.next_data().await? {
//!         match unit.payload {
//!             DemuxerPayload::Pat(pat) => println!("{} programs", pat.entries.len()),
//!             DemuxerPayload::Pes(pes) => println!("PES on PID {:#06x}", unit.pid),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Muxing
//!
//! ```rust,no_run
//! use tsio::format::ts::{Muxer, MuxerData};
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() -> tsio::Result<()> {
//!     let mut muxer = Muxer::new(tokio::fs::File::create("out.ts").await?);
//!     muxer
//!         .write_data(&MuxerData {
//!             pid: 0x100,
//!             adaptation_field: None,
//!             payload: Bytes::from_static(b"pes bytes here"),
//!         })
//!         .await?;
//!     muxer.flush().await?;
//!     Ok(())
//! }
//! ```

/// TS demuxer: packets in, typed payload units out
pub mod demuxer;

/// Descriptor sub-grammar shared by PMT/SDT/EIT/NIT loops
pub mod descriptor;

/// TS muxer: payload units in, 188-byte packets out
pub mod muxer;

/// The 188-byte packet layer and adaptation fields
pub mod packet;

/// PES packet handling
pub mod pes;

/// PSI section grammar and the table payloads
pub mod psi;

/// Core TS types and constants
pub mod types;

// Re-export commonly used types and constants
pub use demuxer::{CancelHandle, Demuxer, DemuxerData, DemuxerPayload, PidKind};
pub use descriptor::Descriptor;
pub use muxer::{ElementaryStream, Muxer, MuxerData};
pub use packet::{AdaptationExtension, AdaptationField, Packet, PacketHeader};
pub use pes::{PesData, PesHeader};
pub use psi::{
    EitData, EitEvent, NitData, PatData, PatEntry, PmtData, PmtElementaryStream, PsiData,
    PsiSection, PsiSectionData, PsiSectionHeader, PsiSectionSyntax, SdtData, SdtService, TableType,
    TotData,
};
pub use types::{
    ClockReference, ProgramMap, StreamType, PID_EIT, PID_NIT, PID_NULL, PID_PAT, PID_SDT, PID_TOT,
    TS_PACKET_SIZE,
};
