use super::descriptor::{parse_descriptors, write_descriptors, Descriptor};
use super::types::{ProgramMap, StreamType};
use crate::error::{Result, TsError};
use crate::utils::{BitReader, Crc32Mpeg2};
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use std::time::Duration;

/// Table classification from the table id byte.
///
/// Unknown ids are not an error; a section with an unrecognized table id
/// is surfaced with only its table id set and parsing of the buffer
/// stops without aborting the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableType {
    Pat,
    Pmt,
    Nit,
    Sdt,
    Bat,
    Eit,
    Tdt,
    Rst,
    St,
    Tot,
    Dit,
    Sit,
    Null,
    Unknown,
}

impl TableType {
    pub fn from_table_id(id: u8) -> Self {
        match id {
            0x00 => TableType::Pat,
            0x02 => TableType::Pmt,
            0x40 | 0x41 => TableType::Nit,
            0x42 | 0x46 => TableType::Sdt,
            0x4a => TableType::Bat,
            0x4e..=0x6f => TableType::Eit,
            0x70 => TableType::Tdt,
            0x71 => TableType::Rst,
            0x72 => TableType::St,
            0x73 => TableType::Tot,
            0x7e => TableType::Dit,
            0x7f => TableType::Sit,
            0xff => TableType::Null,
            _ => TableType::Unknown,
        }
    }

    /// Whether sections of this type carry the 5-byte syntax header
    /// (table id extension, version, section numbers).
    pub fn has_syntax_header(self) -> bool {
        matches!(
            self,
            TableType::Pat
                | TableType::Pmt
                | TableType::Nit
                | TableType::Sdt
                | TableType::Bat
                | TableType::Eit
        )
    }

    /// Whether sections of this type end in a CRC32 trailer. Note TOT
    /// carries a CRC despite having no syntax header; TDT carries neither.
    pub fn has_crc32(self) -> bool {
        matches!(
            self,
            TableType::Pat
                | TableType::Pmt
                | TableType::Nit
                | TableType::Sdt
                | TableType::Bat
                | TableType::Eit
                | TableType::Tot
        )
    }
}

/// One PSI buffer: pointer field plus back-to-back sections.
#[derive(Debug, Clone, PartialEq)]
pub struct PsiData {
    pub pointer_field: usize,
    pub sections: Vec<PsiSection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PsiSection {
    pub header: PsiSectionHeader,
    pub syntax: Option<PsiSectionSyntax>,
    pub data: PsiSectionData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsiSectionHeader {
    pub table_id: u8,
    pub table_type: TableType,
    pub syntax_indicator: bool,
    pub private_bit: bool,
    /// Declared 12-bit length; recomputed on write.
    pub section_length: u16,
}

/// The 5-byte syntax header present on PAT/PMT/NIT/SDT/BAT/EIT sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsiSectionSyntax {
    pub table_id_extension: u16,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
}

impl PsiSectionSyntax {
    pub fn current(table_id_extension: u16, version: u8) -> Self {
        Self {
            table_id_extension,
            version,
            current_next: true,
            section_number: 0,
            last_section_number: 0,
        }
    }
}

/// Table-specific section payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PsiSectionData {
    Pat(PatData),
    Pmt(PmtData),
    Nit(NitData),
    Sdt(SdtData),
    Eit(EitData),
    Tot(TotData),
    /// Structurally known tables without a dedicated parser (BAT, RST,
    /// ST, DIT, SIT) and header-only unknown-id sections.
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatData {
    pub entries: Vec<PatEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    /// Set when program_number is 0
    pub network_pid: u16,
    pub program_map_pid: u16,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PmtData {
    pub pcr_pid: u16,
    pub program_descriptors: Vec<Descriptor>,
    pub streams: Vec<PmtElementaryStream>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PmtElementaryStream {
    pub stream_type: StreamType,
    pub elementary_pid: u16,
    pub descriptors: Vec<Descriptor>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NitData {
    pub network_descriptors: Vec<Descriptor>,
    pub transport_streams: Vec<NitTransportStream>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NitTransportStream {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub descriptors: Vec<Descriptor>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SdtData {
    pub original_network_id: u16,
    pub services: Vec<SdtService>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SdtService {
    pub service_id: u16,
    pub eit_schedule: bool,
    pub eit_present_following: bool,
    pub running_status: u8,
    pub free_ca_mode: bool,
    pub descriptors: Vec<Descriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EitData {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub segment_last_section_number: u8,
    pub last_table_id: u8,
    pub events: Vec<EitEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EitEvent {
    pub event_id: u16,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    pub running_status: u8,
    pub free_ca_mode: bool,
    pub descriptors: Vec<Descriptor>,
}

/// TOT payload; a TDT surfaces here too, with no descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct TotData {
    pub utc_time: DateTime<Utc>,
    pub descriptors: Vec<Descriptor>,
}

impl PatData {
    pub fn parse(r: &mut BitReader) -> Result<Self> {
        let mut entries = Vec::new();
        while r.remaining_bytes() >= 4 {
            let program_number = r.read_bits(16)? as u16;
            r.skip_bits(3)?;
            let pid = r.read_bits(13)? as u16;
            entries.push(PatEntry {
                program_number,
                network_pid: if program_number == 0 { pid } else { 0 },
                program_map_pid: if program_number != 0 { pid } else { 0 },
            });
        }
        Ok(Self { entries })
    }

    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        for entry in &self.entries {
            buf.put_u16(entry.program_number);
            if entry.program_number == 0 {
                buf.put_u16(entry.network_pid & 0x1fff | 7 << 13);
            } else {
                buf.put_u16(entry.program_map_pid & 0x1fff | 7 << 13);
            }
        }
        Ok(())
    }

    /// Builds PAT entries from a caller-owned program map, in its
    /// insertion order.
    pub fn from_program_map(map: &ProgramMap) -> Self {
        Self {
            entries: map
                .iter()
                .map(|(pid, number)| PatEntry {
                    program_number: number,
                    network_pid: 0,
                    program_map_pid: pid,
                })
                .collect(),
        }
    }
}

impl PmtData {
    pub fn parse(r: &mut BitReader) -> Result<Self> {
        r.skip_bits(3)?;
        let pcr_pid = r.read_bits(13)? as u16;
        r.skip_bits(4)?;
        let program_info_length = r.read_bits(12)? as usize;
        let program_descriptors = parse_descriptors(r, program_info_length)?;

        let mut streams = Vec::new();
        while r.remaining_bytes() >= 5 {
            let stream_type = StreamType::from_u8(r.read_bits(8)? as u8);
            r.skip_bits(3)?;
            let elementary_pid = r.read_bits(13)? as u16;
            r.skip_bits(4)?;
            let es_info_length = r.read_bits(12)? as usize;
            let descriptors = parse_descriptors(r, es_info_length)?;
            streams.push(PmtElementaryStream {
                stream_type,
                elementary_pid,
                descriptors,
            });
        }
        Ok(Self {
            pcr_pid,
            program_descriptors,
            streams,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u16(self.pcr_pid & 0x1fff | 7 << 13);

        let mut descs = BytesMut::new();
        let program_info_length = write_descriptors(&mut descs, &self.program_descriptors)?;
        buf.put_u16((program_info_length as u16) & 0x0fff | 0xf << 12);
        buf.extend_from_slice(&descs);

        for stream in &self.streams {
            buf.put_u8(stream.stream_type.to_u8());
            buf.put_u16(stream.elementary_pid & 0x1fff | 7 << 13);
            let mut descs = BytesMut::new();
            let es_info_length = write_descriptors(&mut descs, &stream.descriptors)?;
            buf.put_u16((es_info_length as u16) & 0x0fff | 0xf << 12);
            buf.extend_from_slice(&descs);
        }
        Ok(())
    }
}

impl NitData {
    pub fn parse(r: &mut BitReader) -> Result<Self> {
        r.skip_bits(4)?;
        let network_descriptors_length = r.read_bits(12)? as usize;
        let network_descriptors = parse_descriptors(r, network_descriptors_length)?;

        r.skip_bits(4)?;
        let loop_length = r.read_bits(12)? as usize;
        let mut lr = BitReader::new(r.read_bytes(loop_length)?);
        let mut transport_streams = Vec::new();
        while lr.remaining_bytes() >= 6 {
            let transport_stream_id = lr.read_bits(16)? as u16;
            let original_network_id = lr.read_bits(16)? as u16;
            lr.skip_bits(4)?;
            let descriptors_length = lr.read_bits(12)? as usize;
            let descriptors = parse_descriptors(&mut lr, descriptors_length)?;
            transport_streams.push(NitTransportStream {
                transport_stream_id,
                original_network_id,
                descriptors,
            });
        }
        Ok(Self {
            network_descriptors,
            transport_streams,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        let mut descs = BytesMut::new();
        let length = write_descriptors(&mut descs, &self.network_descriptors)?;
        buf.put_u16((length as u16) & 0x0fff | 0xf << 12);
        buf.extend_from_slice(&descs);

        let mut loop_buf = BytesMut::new();
        for ts in &self.transport_streams {
            loop_buf.put_u16(ts.transport_stream_id);
            loop_buf.put_u16(ts.original_network_id);
            let mut descs = BytesMut::new();
            let length = write_descriptors(&mut descs, &ts.descriptors)?;
            loop_buf.put_u16((length as u16) & 0x0fff | 0xf << 12);
            loop_buf.extend_from_slice(&descs);
        }
        buf.put_u16((loop_buf.len() as u16) & 0x0fff | 0xf << 12);
        buf.extend_from_slice(&loop_buf);
        Ok(())
    }
}

impl SdtData {
    pub fn parse(r: &mut BitReader) -> Result<Self> {
        let original_network_id = r.read_bits(16)? as u16;
        r.skip_bits(8)?;
        let mut services = Vec::new();
        while r.remaining_bytes() >= 5 {
            let service_id = r.read_bits(16)? as u16;
            r.skip_bits(6)?;
            let eit_schedule = r.read_bit()?;
            let eit_present_following = r.read_bit()?;
            let running_status = r.read_bits(3)? as u8;
            let free_ca_mode = r.read_bit()?;
            let descriptors_length = r.read_bits(12)? as usize;
            let descriptors = parse_descriptors(r, descriptors_length)?;
            services.push(SdtService {
                service_id,
                eit_schedule,
                eit_present_following,
                running_status,
                free_ca_mode,
                descriptors,
            });
        }
        Ok(Self {
            original_network_id,
            services,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u16(self.original_network_id);
        buf.put_u8(0xff);
        for service in &self.services {
            buf.put_u16(service.service_id);
            let mut descs = BytesMut::new();
            let length = write_descriptors(&mut descs, &service.descriptors)?;
            let mut flags = 0xfcu8; // 6 reserved bits
            if service.eit_schedule {
                flags |= 0x02;
            }
            if service.eit_present_following {
                flags |= 0x01;
            }
            buf.put_u8(flags);
            let mut b2 = (service.running_status as u16 & 0x7) << 13;
            if service.free_ca_mode {
                b2 |= 1 << 12;
            }
            b2 |= (length as u16) & 0x0fff;
            buf.put_u16(b2);
            buf.extend_from_slice(&descs);
        }
        Ok(())
    }
}

impl EitData {
    pub fn parse(r: &mut BitReader) -> Result<Self> {
        let transport_stream_id = r.read_bits(16)? as u16;
        let original_network_id = r.read_bits(16)? as u16;
        let segment_last_section_number = r.read_bits(8)? as u8;
        let last_table_id = r.read_bits(8)? as u8;
        let mut events = Vec::new();
        while r.remaining_bytes() >= 12 {
            let event_id = r.read_bits(16)? as u16;
            let start_time = parse_dvb_time(r)?;
            let duration = parse_dvb_duration(r)?;
            let running_status = r.read_bits(3)? as u8;
            let free_ca_mode = r.read_bit()?;
            let descriptors_length = r.read_bits(12)? as usize;
            let descriptors = parse_descriptors(r, descriptors_length)?;
            events.push(EitEvent {
                event_id,
                start_time,
                duration,
                running_status,
                free_ca_mode,
                descriptors,
            });
        }
        Ok(Self {
            transport_stream_id,
            original_network_id,
            segment_last_section_number,
            last_table_id,
            events,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u16(self.transport_stream_id);
        buf.put_u16(self.original_network_id);
        buf.put_u8(self.segment_last_section_number);
        buf.put_u8(self.last_table_id);
        for event in &self.events {
            buf.put_u16(event.event_id);
            write_dvb_time(buf, &event.start_time)?;
            write_dvb_duration(buf, event.duration)?;
            let mut descs = BytesMut::new();
            let length = write_descriptors(&mut descs, &event.descriptors)?;
            let mut b = (event.running_status as u16 & 0x7) << 13;
            if event.free_ca_mode {
                b |= 1 << 12;
            }
            b |= (length as u16) & 0x0fff;
            buf.put_u16(b);
            buf.extend_from_slice(&descs);
        }
        Ok(())
    }
}

impl TotData {
    pub fn parse(r: &mut BitReader, with_descriptors: bool) -> Result<Self> {
        let utc_time = parse_dvb_time(r)?;
        let descriptors = if with_descriptors {
            r.skip_bits(4)?;
            let length = r.read_bits(12)? as usize;
            parse_descriptors(r, length)?
        } else {
            Vec::new()
        };
        Ok(Self {
            utc_time,
            descriptors,
        })
    }

    pub fn write(&self, buf: &mut BytesMut, with_descriptors: bool) -> Result<()> {
        write_dvb_time(buf, &self.utc_time)?;
        if with_descriptors {
            let mut descs = BytesMut::new();
            let length = write_descriptors(&mut descs, &self.descriptors)?;
            buf.put_u16((length as u16) & 0x0fff | 0xf << 12);
            buf.extend_from_slice(&descs);
        }
        Ok(())
    }
}

impl PmtData {
    /// Wraps the body in a complete single-section PMT buffer for the
    /// given program number.
    pub fn into_psi(self, program_number: u16, version: u8) -> PsiData {
        PsiData::single(PsiSection::new(
            0x02,
            PsiSectionSyntax::current(program_number, version),
            PsiSectionData::Pmt(self),
        ))
    }
}

impl ProgramMap {
    /// Builds a complete single-section PAT buffer from the map, for
    /// handing straight to the muxer.
    pub fn to_pat(&self, transport_stream_id: u16, version: u8) -> PsiData {
        PsiData::single(PsiSection::new(
            0x00,
            PsiSectionSyntax::current(transport_stream_id, version),
            PsiSectionData::Pat(PatData::from_program_map(self)),
        ))
    }
}

// DVB wall-clock encoding: 16-bit Modified Julian Date plus 24-bit
// BCD hhmmss (ETSI EN 300 468 annex C).

fn mjd_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1858, 11, 17).unwrap()
}

fn bcd_decode(byte: u8) -> Result<u8> {
    let high = byte >> 4;
    let low = byte & 0x0f;
    if high > 9 || low > 9 {
        return Err(TsError::InvalidData(format!("invalid BCD byte 0x{byte:02x}")));
    }
    Ok(high * 10 + low)
}

fn bcd_encode(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

pub(crate) fn parse_dvb_time(r: &mut BitReader) -> Result<DateTime<Utc>> {
    let mjd = r.read_bits(16)? as u64;
    let hour = bcd_decode(r.read_bits(8)? as u8)?;
    let minute = bcd_decode(r.read_bits(8)? as u8)?;
    let second = bcd_decode(r.read_bits(8)? as u8)?;
    let date = mjd_epoch()
        .checked_add_days(Days::new(mjd))
        .ok_or_else(|| TsError::InvalidData(format!("MJD {mjd} out of range")))?;
    let ndt = date
        .and_hms_opt(hour as u32, minute as u32, second as u32)
        .ok_or_else(|| {
            TsError::InvalidData(format!("invalid BCD time {hour:02}:{minute:02}:{second:02}"))
        })?;
    Ok(Utc.from_utc_datetime(&ndt))
}

pub(crate) fn write_dvb_time(buf: &mut BytesMut, time: &DateTime<Utc>) -> Result<()> {
    let days = time
        .date_naive()
        .signed_duration_since(mjd_epoch())
        .num_days();
    if !(0..=0xffff).contains(&days) {
        return Err(TsError::InvalidData(format!(
            "date {} outside MJD range",
            time.date_naive()
        )));
    }
    buf.put_u16(days as u16);
    use chrono::Timelike;
    buf.put_u8(bcd_encode(time.hour() as u8));
    buf.put_u8(bcd_encode(time.minute() as u8));
    buf.put_u8(bcd_encode(time.second() as u8));
    Ok(())
}

pub(crate) fn parse_dvb_duration(r: &mut BitReader) -> Result<Duration> {
    let hours = bcd_decode(r.read_bits(8)? as u8)? as u64;
    let minutes = bcd_decode(r.read_bits(8)? as u8)? as u64;
    let seconds = bcd_decode(r.read_bits(8)? as u8)? as u64;
    Ok(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}

pub(crate) fn write_dvb_duration(buf: &mut BytesMut, duration: Duration) -> Result<()> {
    let total = duration.as_secs();
    let hours = total / 3600;
    if hours > 99 {
        return Err(TsError::InvalidData(format!(
            "duration {total}s exceeds BCD range"
        )));
    }
    buf.put_u8(bcd_encode(hours as u8));
    buf.put_u8(bcd_encode(((total / 60) % 60) as u8));
    buf.put_u8(bcd_encode((total % 60) as u8));
    Ok(())
}

impl PsiSection {
    /// Builds a syntax-bearing section of the given table id.
    pub fn new(table_id: u8, syntax: PsiSectionSyntax, data: PsiSectionData) -> Self {
        let table_type = TableType::from_table_id(table_id);
        Self {
            header: PsiSectionHeader {
                table_id,
                table_type,
                syntax_indicator: table_type.has_syntax_header(),
                private_bit: table_id != 0x00 && table_id != 0x02,
                section_length: 0,
            },
            syntax: Some(syntax),
            data,
        }
    }
}

impl PsiData {
    /// A single-section buffer with pointer field zero.
    pub fn single(section: PsiSection) -> Self {
        Self {
            pointer_field: 0,
            sections: vec![section],
        }
    }

    /// Parses a complete PSI payload unit: pointer field, pointer
    /// padding, then sections until a 0xFF table id or exhaustion.
    pub fn parse(data: &[u8]) -> Result<PsiData> {
        let crc = Crc32Mpeg2::new();
        let mut r = BitReader::new(data);
        let pointer_field = r.read_bits(8)? as usize;
        // Continuation bytes of a section started in an earlier unit;
        // dropped, matching live-capture resynchronization.
        r.skip_bytes(pointer_field.min(r.remaining_bytes()))?;

        let mut sections = Vec::new();
        while r.remaining_bytes() > 0 {
            if r.peek_bits(8)? as u8 == 0xff {
                break; // stuffing
            }
            let section_start = r.position();
            let table_id = r.read_bits(8)? as u8;
            let table_type = TableType::from_table_id(table_id);

            if table_type == TableType::Unknown {
                // Future table id: surface it and stop, never abort.
                sections.push(PsiSection {
                    header: PsiSectionHeader {
                        table_id,
                        table_type,
                        syntax_indicator: false,
                        private_bit: false,
                        section_length: 0,
                    },
                    syntax: None,
                    data: PsiSectionData::Raw(Vec::new()),
                });
                break;
            }

            let syntax_indicator = r.read_bit()?;
            let private_bit = r.read_bit()?;
            r.skip_bits(2)?;
            let section_length = r.read_bits(12)? as u16;
            let body = r.read_bytes(section_length as usize)?;

            let crc_len = if table_type.has_crc32() {
                if body.len() < 4 {
                    return Err(TsError::InvalidData(format!(
                        "section 0x{table_id:02x} too short for CRC trailer"
                    )));
                }
                let stored = u32::from_be_bytes([
                    body[body.len() - 4],
                    body[body.len() - 3],
                    body[body.len() - 2],
                    body[body.len() - 1],
                ]);
                let span = &data[section_start..section_start + 3 + body.len() - 4];
                let computed = crc.calculate(span);
                if stored != computed {
                    return Err(TsError::CrcMismatch {
                        table_id,
                        stored,
                        computed,
                    });
                }
                4
            } else {
                0
            };

            let mut br = BitReader::new(&body[..body.len() - crc_len]);
            let syntax = if table_type.has_syntax_header() {
                let table_id_extension = br.read_bits(16)? as u16;
                br.skip_bits(2)?;
                let version = br.read_bits(5)? as u8;
                let current_next = br.read_bit()?;
                let section_number = br.read_bits(8)? as u8;
                let last_section_number = br.read_bits(8)? as u8;
                Some(PsiSectionSyntax {
                    table_id_extension,
                    version,
                    current_next,
                    section_number,
                    last_section_number,
                })
            } else {
                None
            };

            let section_data = match table_type {
                TableType::Pat => PsiSectionData::Pat(PatData::parse(&mut br)?),
                TableType::Pmt => PsiSectionData::Pmt(PmtData::parse(&mut br)?),
                TableType::Nit => PsiSectionData::Nit(NitData::parse(&mut br)?),
                TableType::Sdt => PsiSectionData::Sdt(SdtData::parse(&mut br)?),
                TableType::Eit => PsiSectionData::Eit(EitData::parse(&mut br)?),
                TableType::Tot => PsiSectionData::Tot(TotData::parse(&mut br, true)?),
                TableType::Tdt => PsiSectionData::Tot(TotData::parse(&mut br, false)?),
                _ => PsiSectionData::Raw(br.read_remaining()?.to_vec()),
            };

            // A fixed-grammar sub-parser must consume its exact span.
            if br.remaining_bits() != 0 {
                return Err(TsError::InvalidData(format!(
                    "table 0x{table_id:02x} parser left {} bits unconsumed",
                    br.remaining_bits()
                )));
            }

            sections.push(PsiSection {
                header: PsiSectionHeader {
                    table_id,
                    table_type,
                    syntax_indicator,
                    private_bit,
                    section_length,
                },
                syntax,
                data: section_data,
            });
        }

        Ok(PsiData {
            pointer_field,
            sections,
        })
    }

    /// Serializes all sections, recomputing every section length and
    /// CRC trailer; returns total bytes written.
    pub fn write(&self, buf: &mut BytesMut) -> Result<usize> {
        let crc = Crc32Mpeg2::new();
        let start = buf.len();
        buf.put_u8(self.pointer_field as u8);
        // No previous-section bytes exist when writing; pad instead.
        for _ in 0..self.pointer_field {
            buf.put_u8(0xff);
        }

        for section in &self.sections {
            let table_type = section.header.table_type;

            let mut body = BytesMut::new();
            if let Some(syntax) = &section.syntax {
                body.put_u16(syntax.table_id_extension);
                let mut b = 0xc0u8 | (syntax.version & 0x1f) << 1;
                if syntax.current_next {
                    b |= 0x01;
                }
                body.put_u8(b);
                body.put_u8(syntax.section_number);
                body.put_u8(syntax.last_section_number);
            }
            match &section.data {
                PsiSectionData::Pat(d) => d.write(&mut body)?,
                PsiSectionData::Pmt(d) => d.write(&mut body)?,
                PsiSectionData::Nit(d) => d.write(&mut body)?,
                PsiSectionData::Sdt(d) => d.write(&mut body)?,
                PsiSectionData::Eit(d) => d.write(&mut body)?,
                PsiSectionData::Tot(d) => d.write(&mut body, table_type == TableType::Tot)?,
                PsiSectionData::Raw(d) => body.extend_from_slice(d),
            }

            let crc_len = if table_type.has_crc32() { 4 } else { 0 };
            let section_length = body.len() + crc_len;
            if section_length > 0x0fff {
                return Err(TsError::InvalidData(format!(
                    "section 0x{:02x} overflows 12-bit length: {section_length}",
                    section.header.table_id
                )));
            }

            let section_start = buf.len();
            buf.put_u8(section.header.table_id);
            let mut b = 0x30u8 | ((section_length >> 8) as u8 & 0x0f);
            if section.header.syntax_indicator {
                b |= 0x80;
            }
            if section.header.private_bit {
                b |= 0x40;
            }
            buf.put_u8(b);
            buf.put_u8(section_length as u8);
            buf.extend_from_slice(&body);

            if crc_len > 0 {
                let computed = crc.calculate(&buf[section_start..]);
                buf.put_u32(computed);
            }
        }
        Ok(buf.len() - start)
    }
}

/// Returns the total byte length of a complete PSI payload unit, or
/// `None` when more continuation packets are required. Used by the
/// demuxer to bound per-PID accumulation by declared lengths.
pub(crate) fn complete_unit_len(data: &[u8]) -> Option<usize> {
    if data.is_empty() {
        return None;
    }
    let mut pos = 1 + data[0] as usize;
    if pos > data.len() {
        return None;
    }
    loop {
        if pos >= data.len() {
            return Some(pos);
        }
        if data[pos] == 0xff {
            return Some(pos);
        }
        if TableType::from_table_id(data[pos]) == TableType::Unknown {
            // Cannot know the extent of a future table; hand over as-is.
            return Some(data.len());
        }
        if pos + 3 > data.len() {
            return None;
        }
        let length = ((data[pos + 1] & 0x0f) as usize) << 8 | data[pos + 2] as usize;
        pos += 3 + length;
        if pos > data.len() {
            return None;
        }
    }
}
