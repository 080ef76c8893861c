use super::types::*;
use crate::error::{Result, TsError};
use crate::utils::{BitReader, BitWriter};
use bytes::{BufMut, Bytes, BytesMut};

/// A parsed 188-byte transport packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,
    pub adaptation_field: Option<AdaptationField>,
    /// Raw payload bytes, including any trailing PSI stuffing.
    pub payload: Option<Bytes>,
}

/// The fixed 4-byte packet header. The adaptation-field and payload
/// presence flags are not stored here; they are derived on write from
/// the corresponding `Option`s on [`Packet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    pub continuity_counter: u8,
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid: 0,
            scrambling_control: 0,
            continuity_counter: 0,
        }
    }
}

/// Optional adaptation field.
///
/// `stuffing_length` counts the trailing 0xFF bytes; the muxer uses it to
/// grow the field so a short final PES chunk still lands in a full packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdaptationField {
    pub discontinuity: bool,
    pub random_access: bool,
    pub es_priority: bool,
    pub pcr: Option<ClockReference>,
    pub opcr: Option<ClockReference>,
    pub splice_countdown: Option<i8>,
    pub private_data: Option<Vec<u8>>,
    pub extension: Option<AdaptationExtension>,
    pub stuffing_length: usize,
}

/// Adaptation field extension (LTW / piecewise rate / seamless splice).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdaptationExtension {
    /// (ltw_valid, ltw_offset)
    pub legal_time_window: Option<(bool, u16)>,
    /// 22-bit rate
    pub piecewise_rate: Option<u32>,
    /// (splice_type, dts_next_access_unit)
    pub seamless_splice: Option<(u8, u64)>,
}

impl AdaptationField {
    fn has_flags_byte(&self) -> bool {
        self.discontinuity
            || self.random_access
            || self.es_priority
            || self.pcr.is_some()
            || self.opcr.is_some()
            || self.splice_countdown.is_some()
            || self.private_data.is_some()
            || self.extension.is_some()
            || self.stuffing_length > 0
    }

    fn extension_length(&self) -> usize {
        match &self.extension {
            None => 0,
            Some(ext) => {
                // length byte + flags byte + gated fields
                2 + ext.legal_time_window.map_or(0, |_| 2)
                    + ext.piecewise_rate.map_or(0, |_| 3)
                    + ext.seamless_splice.map_or(0, |_| 5)
            }
        }
    }

    /// Total encoded size including the length byte itself.
    pub fn encoded_len(&self) -> usize {
        let mut len = 1;
        if self.has_flags_byte() {
            len += 1;
        }
        if self.pcr.is_some() {
            len += 6;
        }
        if self.opcr.is_some() {
            len += 6;
        }
        if self.splice_countdown.is_some() {
            len += 1;
        }
        if let Some(private) = &self.private_data {
            len += 1 + private.len();
        }
        len += self.extension_length();
        len + self.stuffing_length
    }

    /// Grows the field with trailing stuffing so `encoded_len()` comes
    /// out at exactly `target` bytes. A bare field (single length byte)
    /// cannot encode exactly two bytes, since any stuffing brings the
    /// flags byte with it; that case is `InvalidData` and the caller
    /// must shift a payload byte instead.
    pub fn pad_to(&mut self, target: usize) -> Result<()> {
        let min = self.encoded_len();
        if target < min {
            return Err(TsError::InvalidData(format!(
                "adaptation field of {min} bytes cannot shrink to {target}"
            )));
        }
        if target == min {
            return Ok(());
        }
        if self.has_flags_byte() {
            self.stuffing_length += target - min;
        } else {
            if target == 2 {
                return Err(TsError::InvalidData(
                    "bare adaptation field cannot grow to exactly 2 bytes".into(),
                ));
            }
            self.stuffing_length = target - 2;
        }
        Ok(())
    }

    pub fn parse(reader: &mut BitReader) -> Result<Self> {
        let length = reader.read_bits(8)? as usize;
        let body = reader.read_bytes(length)?;
        let mut r = BitReader::new(body);
        let mut af = AdaptationField::default();

        if length == 0 {
            return Ok(af);
        }

        af.discontinuity = r.read_bit()?;
        af.random_access = r.read_bit()?;
        af.es_priority = r.read_bit()?;
        let pcr_flag = r.read_bit()?;
        let opcr_flag = r.read_bit()?;
        let splicing_flag = r.read_bit()?;
        let private_flag = r.read_bit()?;
        let extension_flag = r.read_bit()?;

        if pcr_flag {
            af.pcr = Some(parse_clock_reference(&mut r)?);
        }
        if opcr_flag {
            af.opcr = Some(parse_clock_reference(&mut r)?);
        }
        if splicing_flag {
            af.splice_countdown = Some(r.read_bits(8)? as u8 as i8);
        }
        if private_flag {
            let n = r.read_bits(8)? as usize;
            af.private_data = Some(r.read_bytes(n)?.to_vec());
        }
        if extension_flag {
            let ext_length = r.read_bits(8)? as usize;
            if ext_length == 0 {
                return Err(TsError::MalformedPacket(
                    "zero-length adaptation extension".into(),
                ));
            }
            let ext_body = r.read_bytes(ext_length)?;
            let mut er = BitReader::new(ext_body);
            let mut ext = AdaptationExtension::default();
            let ltw_flag = er.read_bit()?;
            let piecewise_flag = er.read_bit()?;
            let seamless_flag = er.read_bit()?;
            er.skip_bits(5)?;
            if ltw_flag {
                let valid = er.read_bit()?;
                let offset = er.read_bits(15)? as u16;
                ext.legal_time_window = Some((valid, offset));
            }
            if piecewise_flag {
                er.skip_bits(2)?;
                ext.piecewise_rate = Some(er.read_bits(22)? as u32);
            }
            if seamless_flag {
                let splice_type = er.read_bits(4)? as u8;
                let mut dts = er.read_bits(3)?;
                er.skip_bits(1)?; // marker
                dts = (dts << 15) | er.read_bits(15)?;
                er.skip_bits(1)?;
                dts = (dts << 15) | er.read_bits(15)?;
                er.skip_bits(1)?;
                ext.seamless_splice = Some((splice_type, dts));
            }
            af.extension = Some(ext);
        }

        af.stuffing_length = r.remaining_bytes();
        Ok(af)
    }

    pub fn write(&self, buf: &mut BytesMut) -> Result<usize> {
        let total = self.encoded_len();
        if total - 1 > 0xff {
            return Err(TsError::InvalidData("adaptation field too long".into()));
        }
        let mut w = BitWriter::new(buf);
        w.write_u8((total - 1) as u8)?;

        if !self.has_flags_byte() {
            return Ok(total);
        }

        w.write_bit(self.discontinuity);
        w.write_bit(self.random_access);
        w.write_bit(self.es_priority);
        w.write_bit(self.pcr.is_some());
        w.write_bit(self.opcr.is_some());
        w.write_bit(self.splice_countdown.is_some());
        w.write_bit(self.private_data.is_some());
        w.write_bit(self.extension.is_some());

        if let Some(pcr) = &self.pcr {
            write_clock_reference(&mut w, pcr);
        }
        if let Some(opcr) = &self.opcr {
            write_clock_reference(&mut w, opcr);
        }
        if let Some(countdown) = self.splice_countdown {
            w.write_u8(countdown as u8)?;
        }
        if let Some(private) = &self.private_data {
            w.write_u8(private.len() as u8)?;
            w.write_bytes(private)?;
        }
        if let Some(ext) = &self.extension {
            w.write_u8((self.extension_length() - 1) as u8)?;
            w.write_bit(ext.legal_time_window.is_some());
            w.write_bit(ext.piecewise_rate.is_some());
            w.write_bit(ext.seamless_splice.is_some());
            w.write_bits(0b11111, 5);
            if let Some((valid, offset)) = ext.legal_time_window {
                w.write_bit(valid);
                w.write_bits(offset as u64, 15);
            }
            if let Some(rate) = ext.piecewise_rate {
                w.write_bits(0b11, 2);
                w.write_bits(rate as u64, 22);
            }
            if let Some((splice_type, dts)) = ext.seamless_splice {
                w.write_bits(splice_type as u64, 4);
                w.write_bits((dts >> 30) & 0x7, 3);
                w.write_bit(true);
                w.write_bits((dts >> 15) & 0x7fff, 15);
                w.write_bit(true);
                w.write_bits(dts & 0x7fff, 15);
                w.write_bit(true);
            }
        }
        for _ in 0..self.stuffing_length {
            w.write_u8(0xff)?;
        }
        Ok(total)
    }
}

fn parse_clock_reference(r: &mut BitReader) -> Result<ClockReference> {
    let base = r.read_bits(33)?;
    r.skip_bits(6)?;
    let extension = r.read_bits(9)? as u16;
    Ok(ClockReference::new(base, extension))
}

fn write_clock_reference(w: &mut BitWriter, cr: &ClockReference) {
    w.write_bits(cr.base, 33);
    w.write_bits(0x3f, 6);
    w.write_bits(cr.extension as u64, 9);
}

impl Packet {
    /// Parses one packet from the first 188 bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Packet> {
        if data.len() < TS_PACKET_SIZE {
            return Err(TsError::MalformedPacket(format!(
                "packet truncated: {} bytes",
                data.len()
            )));
        }
        let data = &data[..TS_PACKET_SIZE];
        let mut reader = BitReader::new(data);

        let sync = reader.read_bits(8)? as u8;
        if sync != SYNC_BYTE {
            return Err(TsError::InvalidSyncByte { byte: sync });
        }

        let transport_error = reader.read_bit()?;
        let payload_unit_start = reader.read_bit()?;
        let transport_priority = reader.read_bit()?;
        let pid = reader.read_bits(13)? as u16;
        let scrambling_control = reader.read_bits(2)? as u8;
        let has_adaptation_field = reader.read_bit()?;
        let has_payload = reader.read_bit()?;
        let continuity_counter = reader.read_bits(4)? as u8;

        let adaptation_field = if has_adaptation_field {
            Some(AdaptationField::parse(&mut reader)?)
        } else {
            None
        };

        // A fully consumed budget yields an empty payload, not an error.
        let payload = if has_payload {
            Some(Bytes::copy_from_slice(reader.read_remaining()?))
        } else {
            None
        };

        Ok(Packet {
            header: PacketHeader {
                transport_error,
                payload_unit_start,
                transport_priority,
                pid,
                scrambling_control,
                continuity_counter,
            },
            adaptation_field,
            payload,
        })
    }

    /// Writes the packet as exactly 188 bytes, stuffing the payload
    /// region with 0xFF when the payload is short.
    pub fn write(&self, buf: &mut BytesMut) -> Result<usize> {
        let start = buf.len();

        buf.put_u8(SYNC_BYTE);
        let mut b1 = 0u8;
        if self.header.transport_error {
            b1 |= 0x80;
        }
        if self.header.payload_unit_start {
            b1 |= 0x40;
        }
        if self.header.transport_priority {
            b1 |= 0x20;
        }
        b1 |= ((self.header.pid >> 8) & 0x1f) as u8;
        buf.put_u8(b1);
        buf.put_u8((self.header.pid & 0xff) as u8);

        let mut b3 = self.header.scrambling_control << 6;
        if self.adaptation_field.is_some() {
            b3 |= 0x20;
        }
        if self.payload.is_some() {
            b3 |= 0x10;
        }
        b3 |= self.header.continuity_counter & 0x0f;
        buf.put_u8(b3);

        if let Some(af) = &self.adaptation_field {
            af.write(buf)?;
        }

        if let Some(payload) = &self.payload {
            buf.extend_from_slice(payload);
        }

        let written = buf.len() - start;
        if written > TS_PACKET_SIZE {
            return Err(TsError::InvalidData(format!(
                "packet contents overflow 188 bytes ({written})"
            )));
        }
        for _ in written..TS_PACKET_SIZE {
            buf.put_u8(0xff);
        }
        Ok(TS_PACKET_SIZE)
    }
}
