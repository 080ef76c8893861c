use super::types::{ClockReference, PTS_HZ};
use crate::error::{Result, TsError};
use crate::utils::BitReader;
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

/// Length of the fixed part of a PES header (start code, stream id,
/// packet length).
pub const PES_HEADER_SIZE: usize = 6;

/// Whether packets of this stream id carry the optional header.
/// Program stream map, padding, private stream 2, ECM/EMM, DSM-CC
/// announcements, H.222.1 type E and the directory stream go straight
/// to payload after the 6 fixed bytes.
pub fn stream_id_has_optional_header(stream_id: u8) -> bool {
    !matches!(
        stream_id,
        0xbc | 0xbe | 0xbf | 0xf0 | 0xf1 | 0xf2 | 0xf8 | 0xff
    )
}

/// The optional PES header: control flags plus PTS/DTS/ESCR when present.
///
/// Flag-gated fields this library does not interpret (ES rate, trick
/// mode, CRC, extensions) are skipped on parse via the declared header
/// data length and never written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PesHeader {
    pub scrambling_control: u8,
    pub priority: bool,
    pub data_alignment: bool,
    pub copyright: bool,
    pub original: bool,
    /// Presentation timestamp, 33-bit 90 kHz base
    pub pts: Option<ClockReference>,
    /// Decoding timestamp; only valid alongside a PTS
    pub dts: Option<ClockReference>,
    pub escr: Option<ClockReference>,
}

impl PesHeader {
    fn header_data_length(&self) -> usize {
        let mut len = 0;
        if self.pts.is_some() {
            len += 5;
        }
        if self.dts.is_some() {
            len += 5;
        }
        if self.escr.is_some() {
            len += 6;
        }
        len
    }

    /// Parses the optional header, consuming exactly
    /// `3 + header_data_length` bytes from the reader.
    pub fn parse(r: &mut BitReader) -> Result<Self> {
        if r.read_bits(2)? != 0b10 {
            return Err(TsError::InvalidData(
                "PES optional header marker bits missing".into(),
            ));
        }
        let scrambling_control = r.read_bits(2)? as u8;
        let priority = r.read_bit()?;
        let data_alignment = r.read_bit()?;
        let copyright = r.read_bit()?;
        let original = r.read_bit()?;
        let pts_flag = r.read_bit()?;
        let dts_flag = r.read_bit()?;
        let escr_flag = r.read_bit()?;
        r.skip_bits(5)?; // es_rate, trick mode, copy info, crc, extension
        let header_data_length = r.read_bits(8)? as usize;

        let mut hr = BitReader::new(r.read_bytes(header_data_length)?);
        let pts = if pts_flag {
            Some(parse_timestamp(&mut hr)?)
        } else {
            None
        };
        let dts = if dts_flag {
            Some(parse_timestamp(&mut hr)?)
        } else {
            None
        };
        let escr = if escr_flag {
            Some(parse_escr(&mut hr)?)
        } else {
            None
        };
        // Remaining header data holds fields we do not interpret,
        // followed by 0xFF stuffing.

        if dts.is_some() && pts.is_none() {
            return Err(TsError::InvalidData("PES header has DTS without PTS".into()));
        }

        Ok(Self {
            scrambling_control,
            priority,
            data_alignment,
            copyright,
            original,
            pts,
            dts,
            escr,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        let mut flags = 0x80u8 | (self.scrambling_control & 0x3) << 4;
        if self.priority {
            flags |= 0x08;
        }
        if self.data_alignment {
            flags |= 0x04;
        }
        if self.copyright {
            flags |= 0x02;
        }
        if self.original {
            flags |= 0x01;
        }
        buf.put_u8(flags);

        if self.dts.is_some() && self.pts.is_none() {
            return Err(TsError::InvalidData("PES header has DTS without PTS".into()));
        }
        let mut flags2 = 0u8;
        if self.pts.is_some() {
            flags2 |= 0x80;
        }
        if self.dts.is_some() {
            flags2 |= 0x40;
        }
        if self.escr.is_some() {
            flags2 |= 0x20;
        }
        buf.put_u8(flags2);
        buf.put_u8(self.header_data_length() as u8);

        if let Some(pts) = self.pts {
            let prefix = if self.dts.is_some() { 0b0011 } else { 0b0010 };
            write_timestamp(buf, prefix, pts.base);
        }
        if let Some(dts) = self.dts {
            write_timestamp(buf, 0b0001, dts.base);
        }
        if let Some(escr) = self.escr {
            write_escr(buf, escr);
        }
        Ok(())
    }
}

/// One complete PES packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesData {
    pub stream_id: u8,
    /// Declared length of everything after the 6 fixed bytes; 0 means
    /// unbounded (video streams). Recomputed on write when nonzero.
    pub packet_length: u16,
    pub header: Option<PesHeader>,
    pub payload: Bytes,
}

impl PesData {
    pub fn new(stream_id: u8, payload: Bytes) -> Self {
        let header = stream_id_has_optional_header(stream_id).then(PesHeader::default);
        Self {
            stream_id,
            packet_length: 0,
            header,
            payload,
        }
    }

    pub fn with_pts(mut self, pts: Duration) -> Self {
        if let Some(header) = &mut self.header {
            header.pts = Some(ClockReference::from_90khz(
                pts.as_secs() * PTS_HZ + pts.subsec_nanos() as u64 * PTS_HZ / 1_000_000_000,
            ));
        }
        self
    }

    pub fn with_dts(mut self, dts: Duration) -> Self {
        if let Some(header) = &mut self.header {
            header.dts = Some(ClockReference::from_90khz(
                dts.as_secs() * PTS_HZ + dts.subsec_nanos() as u64 * PTS_HZ / 1_000_000_000,
            ));
        }
        self
    }

    /// Marks the packet bounded so write() emits the real length.
    pub fn bounded(mut self) -> Self {
        self.packet_length = 1; // placeholder, recomputed on write
        self
    }

    /// Parses one complete PES packet. The slice must hold the whole
    /// packet; the demuxer bounds it by the declared length or, for
    /// unbounded packets, by the next payload unit start.
    pub fn parse(data: &[u8]) -> Result<PesData> {
        let mut r = BitReader::new(data);
        if r.remaining_bytes() < PES_HEADER_SIZE {
            return Err(TsError::UnexpectedEof {
                needed: PES_HEADER_SIZE * 8,
                have: data.len() * 8,
            });
        }
        if r.read_bits(24)? != 0x000001 {
            return Err(TsError::MalformedPacket(
                "PES start code prefix missing".into(),
            ));
        }
        let stream_id = r.read_bits(8)? as u8;
        let packet_length = r.read_bits(16)? as u16;

        let header = if stream_id_has_optional_header(stream_id) {
            Some(PesHeader::parse(&mut r)?)
        } else {
            None
        };
        let payload = Bytes::copy_from_slice(r.read_remaining()?);
        Ok(PesData {
            stream_id,
            packet_length,
            header,
            payload,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) -> Result<usize> {
        let start = buf.len();
        buf.put_u8(0x00);
        buf.put_u8(0x00);
        buf.put_u8(0x01);
        buf.put_u8(self.stream_id);

        let mut body = BytesMut::with_capacity(self.payload.len() + 16);
        if let Some(header) = &self.header {
            if !stream_id_has_optional_header(self.stream_id) {
                return Err(TsError::InvalidData(format!(
                    "stream id 0x{:02x} cannot carry an optional header",
                    self.stream_id
                )));
            }
            header.write(&mut body)?;
        }
        body.extend_from_slice(&self.payload);

        let packet_length = if self.packet_length == 0 {
            0
        } else {
            if body.len() > u16::MAX as usize {
                return Err(TsError::InvalidData(format!(
                    "bounded PES packet body of {} bytes overflows the length field",
                    body.len()
                )));
            }
            body.len() as u16
        };
        buf.put_u16(packet_length);
        buf.extend_from_slice(&body);
        Ok(buf.len() - start)
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        PES_HEADER_SIZE
            + self
                .header
                .as_ref()
                .map(|h| 3 + h.header_data_length())
                .unwrap_or(0)
            + self.payload.len()
    }
}

// 5-byte PTS/DTS encoding: 4-bit prefix, then the 33-bit value split
// 3/15/15 with a marker bit after each group.
fn parse_timestamp(r: &mut BitReader) -> Result<ClockReference> {
    r.skip_bits(4)?;
    let mut base = r.read_bits(3)?;
    r.skip_bits(1)?;
    base = base << 15 | r.read_bits(15)?;
    r.skip_bits(1)?;
    base = base << 15 | r.read_bits(15)?;
    r.skip_bits(1)?;
    Ok(ClockReference::from_90khz(base))
}

fn write_timestamp(buf: &mut BytesMut, prefix: u8, base: u64) {
    buf.put_u8(prefix << 4 | ((base >> 29) & 0x0e) as u8 | 0x01);
    buf.put_u16(((base >> 14) & 0xfffe) as u16 | 0x01);
    buf.put_u16(((base << 1) & 0xfffe) as u16 | 0x01);
}

// 6-byte ESCR: 2 reserved bits, then base split 3/15/15 with markers,
// 9-bit extension, final marker.
fn parse_escr(r: &mut BitReader) -> Result<ClockReference> {
    r.skip_bits(2)?;
    let mut base = r.read_bits(3)?;
    r.skip_bits(1)?;
    base = base << 15 | r.read_bits(15)?;
    r.skip_bits(1)?;
    base = base << 15 | r.read_bits(15)?;
    r.skip_bits(1)?;
    let extension = r.read_bits(9)? as u16;
    r.skip_bits(1)?;
    Ok(ClockReference::new(base, extension))
}

fn write_escr(buf: &mut BytesMut, escr: ClockReference) {
    let base = escr.base;
    buf.put_u8(0xc0 | ((base >> 27) & 0x38) as u8 | 0x04 | ((base >> 28) & 0x03) as u8);
    buf.put_u8((base >> 20) as u8);
    buf.put_u8(((base >> 12) & 0xf8) as u8 | 0x04 | ((base >> 13) & 0x03) as u8);
    buf.put_u8((base >> 5) as u8);
    buf.put_u8(((base << 3) & 0xf8) as u8 | 0x04 | ((escr.extension >> 7) & 0x03) as u8);
    buf.put_u8((escr.extension << 1) as u8 | 0x01);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pes_write_basics() {
        let packet =
            PesData::new(0xe0, Bytes::from_static(&[0u8; 10])).with_pts(Duration::from_secs(1));
        let mut buf = BytesMut::new();
        let written = packet.write(&mut buf).unwrap();
        assert_eq!(written, buf.len());
        assert_eq!(&buf[0..3], &[0x00, 0x00, 0x01]);
        assert_eq!(buf[3], 0xe0);
        // unbounded: length field stays zero
        assert_eq!(&buf[4..6], &[0x00, 0x00]);
    }

    #[test]
    fn test_pes_round_trip_pts_dts() {
        let packet = PesData::new(0xe0, Bytes::from_static(b"frame data"))
            .with_pts(Duration::from_millis(1500))
            .with_dts(Duration::from_millis(1400));
        let mut buf = BytesMut::new();
        packet.write(&mut buf).unwrap();
        let parsed = PesData::parse(&buf).unwrap();
        assert_eq!(parsed, packet);

        let header = parsed.header.unwrap();
        assert_eq!(header.pts.unwrap().base, 135_000);
        assert_eq!(header.dts.unwrap().base, 126_000);
    }

    #[test]
    fn test_pes_bounded_length_recomputed() {
        let packet = PesData::new(0xc0, Bytes::from_static(&[0xabu8; 20]))
            .with_pts(Duration::from_secs(2))
            .bounded();
        let mut buf = BytesMut::new();
        packet.write(&mut buf).unwrap();
        // 3 optional-header bytes + 5 PTS bytes + 20 payload bytes
        assert_eq!(u16::from_be_bytes([buf[4], buf[5]]), 28);
        let parsed = PesData::parse(&buf).unwrap();
        assert_eq!(parsed.packet_length, 28);
        assert_eq!(parsed.payload, packet.payload);
    }

    #[test]
    fn test_padding_stream_has_no_optional_header() {
        assert!(!stream_id_has_optional_header(0xbe));
        assert!(!stream_id_has_optional_header(0xbf));
        assert!(stream_id_has_optional_header(0xe0));
        assert!(stream_id_has_optional_header(0xc0));

        let data = [0x00, 0x00, 0x01, 0xbe, 0x00, 0x04, 0xff, 0xff, 0xff, 0xff];
        let parsed = PesData::parse(&data).unwrap();
        assert!(parsed.header.is_none());
        assert_eq!(parsed.payload.as_ref(), &[0xff; 4]);
    }

    #[test]
    fn test_pes_escr_round_trip() {
        let mut packet = PesData::new(0xe0, Bytes::from_static(&[1, 2, 3]));
        if let Some(h) = &mut packet.header {
            h.escr = Some(ClockReference::new(0x1_2345_6789, 0x155));
        }
        let mut buf = BytesMut::new();
        packet.write(&mut buf).unwrap();
        assert_eq!(PesData::parse(&buf).unwrap(), packet);
    }

    #[test]
    fn test_pes_bad_start_code() {
        let data = [0x00, 0x00, 0x02, 0xe0, 0x00, 0x00];
        assert!(matches!(
            PesData::parse(&data),
            Err(TsError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_pes_dts_without_pts_rejected() {
        let mut packet = PesData::new(0xe0, Bytes::new());
        if let Some(h) = &mut packet.header {
            h.dts = Some(ClockReference::from_90khz(100));
        }
        let mut buf = BytesMut::new();
        assert!(packet.write(&mut buf).is_err());
    }

    #[test]
    fn test_pes_header_stuffing_skipped() {
        // Hand-built header declaring 8 header-data bytes: 5 for the
        // PTS plus 3 bytes of 0xFF stuffing.
        let data = [
            0x00, 0x00, 0x01, 0xe0, 0x00, 0x00, // fixed header
            0x80, 0x80, 0x08, // marker, PTS flag, header_data_length
            0x21, 0x00, 0x01, 0x00, 0x01, // PTS base 0
            0xff, 0xff, 0xff, // stuffing
            0xde, 0xad, // payload
        ];
        let parsed = PesData::parse(&data).unwrap();
        assert_eq!(parsed.header.unwrap().pts.unwrap().base, 0);
        assert_eq!(parsed.payload.as_ref(), &[0xde, 0xad]);
    }
}
