use std::collections::HashMap;

// PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_NIT: u16 = 0x0010;
pub const PID_SDT: u16 = 0x0011;
pub const PID_EIT: u16 = 0x0012;
pub const PID_TOT: u16 = 0x0014;
pub const PID_NULL: u16 = 0x1fff;

// Constants
pub const SYNC_BYTE: u8 = 0x47;
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
pub const PTS_HZ: u64 = 90_000;
pub const PCR_HZ: u64 = 27_000_000;

/// Maximum value of a 33-bit PTS/PCR base.
pub const CLOCK_BASE_MAX: u64 = (1 << 33) - 1;

/// Elementary stream type from a PMT entry.
///
/// Unrecognized values are preserved verbatim so they can be forwarded
/// or logged by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Mpeg1Video,
    Mpeg2Video,
    Mpeg1Audio,
    Mpeg2Audio,
    PrivateSections,
    PrivateData,
    AdtsAac,
    LatmAac,
    H264,
    H265,
    Ac3,
    EAc3,
    Scte35,
    Unknown(u8),
}

impl StreamType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => StreamType::Mpeg1Video,
            0x02 => StreamType::Mpeg2Video,
            0x03 => StreamType::Mpeg1Audio,
            0x04 => StreamType::Mpeg2Audio,
            0x05 => StreamType::PrivateSections,
            0x06 => StreamType::PrivateData,
            0x0f => StreamType::AdtsAac,
            0x11 => StreamType::LatmAac,
            0x1b => StreamType::H264,
            0x24 => StreamType::H265,
            0x81 => StreamType::Ac3,
            0x86 => StreamType::Scte35,
            0x87 => StreamType::EAc3,
            other => StreamType::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            StreamType::Mpeg1Video => 0x01,
            StreamType::Mpeg2Video => 0x02,
            StreamType::Mpeg1Audio => 0x03,
            StreamType::Mpeg2Audio => 0x04,
            StreamType::PrivateSections => 0x05,
            StreamType::PrivateData => 0x06,
            StreamType::AdtsAac => 0x0f,
            StreamType::LatmAac => 0x11,
            StreamType::H264 => 0x1b,
            StreamType::H265 => 0x24,
            StreamType::Ac3 => 0x81,
            StreamType::Scte35 => 0x86,
            StreamType::EAc3 => 0x87,
            StreamType::Unknown(other) => other,
        }
    }

    pub fn is_video(self) -> bool {
        matches!(
            self,
            StreamType::Mpeg1Video | StreamType::Mpeg2Video | StreamType::H264 | StreamType::H265
        )
    }

    pub fn is_audio(self) -> bool {
        matches!(
            self,
            StreamType::Mpeg1Audio
                | StreamType::Mpeg2Audio
                | StreamType::AdtsAac
                | StreamType::LatmAac
                | StreamType::Ac3
                | StreamType::EAc3
        )
    }
}

/// A PCR/PTS/DTS clock reference: a 33-bit base counted at 90 kHz plus a
/// 9-bit extension counted at 27 MHz.
///
/// All conversions are exact integer arithmetic; no value ever passes
/// through a floating-point representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockReference {
    /// 33-bit base, 90 kHz units
    pub base: u64,
    /// 9-bit extension, 27 MHz units
    pub extension: u16,
}

impl ClockReference {
    pub fn new(base: u64, extension: u16) -> Self {
        Self {
            base: base & CLOCK_BASE_MAX,
            extension: extension & 0x1ff,
        }
    }

    /// A base-only reference, as carried by PTS/DTS fields.
    pub fn from_90khz(base: u64) -> Self {
        Self::new(base, 0)
    }

    /// Builds a reference from a 27 MHz tick count.
    pub fn from_27mhz(ticks: u64) -> Self {
        Self::new(ticks / 300, (ticks % 300) as u16)
    }

    /// The reference as 27 MHz ticks.
    pub fn as_27mhz(&self) -> u64 {
        self.base * 300 + self.extension as u64
    }

    /// Packs into the combined 42-bit wire representation
    /// (base in the high 33 bits, extension in the low 9).
    pub fn to_wire(&self) -> u64 {
        (self.base << 9) | self.extension as u64
    }

    /// Unpacks the combined 42-bit wire representation.
    pub fn from_wire(wire: u64) -> Self {
        Self {
            base: (wire >> 9) & CLOCK_BASE_MAX,
            extension: (wire & 0x1ff) as u16,
        }
    }

    /// Wall-clock duration since counter zero. Display helper only; the
    /// wire value stays integer end to end.
    pub fn as_duration(&self) -> std::time::Duration {
        let nanos = (self.as_27mhz() as u128) * 1_000_000_000 / PCR_HZ as u128;
        std::time::Duration::from_nanos(nanos as u64)
    }
}

/// Bidirectional mapping between program-map PIDs and program numbers.
///
/// Owned by the caller (the CLI layer): the demuxer exposes raw parsed
/// tables and this map is how a caller reconstructs PAT/PMT association
/// for reporting or re-muxing. Iteration follows insertion order.
#[derive(Debug, Default, Clone)]
pub struct ProgramMap {
    number_by_pid: HashMap<u16, u16>,
    pid_by_number: HashMap<u16, u16>,
    order: Vec<u16>,
}

impl ProgramMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or updates) the association pmt_pid <-> program_number.
    pub fn set(&mut self, pmt_pid: u16, program_number: u16) {
        if let Some(old) = self.number_by_pid.insert(pmt_pid, program_number) {
            // The old number may have been claimed by another PID since;
            // only drop the reverse entry while it still points here.
            if self.pid_by_number.get(&old) == Some(&pmt_pid) {
                self.pid_by_number.remove(&old);
            }
        } else {
            self.order.push(pmt_pid);
        }
        self.pid_by_number.insert(program_number, pmt_pid);
    }

    pub fn program_number(&self, pmt_pid: u16) -> Option<u16> {
        self.number_by_pid.get(&pmt_pid).copied()
    }

    pub fn pmt_pid(&self, program_number: u16) -> Option<u16> {
        self.pid_by_number.get(&program_number).copied()
    }

    pub fn is_pmt_pid(&self, pid: u16) -> bool {
        self.number_by_pid.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates (pmt_pid, program_number) pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.order
            .iter()
            .filter_map(move |pid| self.number_by_pid.get(pid).map(|n| (*pid, *n)))
    }
}
