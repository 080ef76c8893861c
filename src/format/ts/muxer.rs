use super::descriptor::Descriptor;
use super::packet::{AdaptationField, Packet, PacketHeader};
use super::psi::{PmtData, PmtElementaryStream, PsiData};
use super::types::{StreamType, PID_NULL, TS_HEADER_SIZE, TS_PACKET_SIZE};
use crate::error::{Result, TsError};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

const PACKET_PAYLOAD_SIZE: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;

/// One payload unit to be packetized: a serialized PES packet or any
/// other elementary payload destined for a single PID.
#[derive(Debug, Clone)]
pub struct MuxerData {
    pub pid: u16,
    /// Applied to the first output packet only (PCR, random access).
    pub adaptation_field: Option<AdaptationField>,
    pub payload: Bytes,
}

/// An elementary stream registered with the muxer, in PMT entry form.
#[derive(Debug, Clone)]
pub struct ElementaryStream {
    pub stream_type: StreamType,
    pub pid: u16,
    pub descriptors: Vec<Descriptor>,
}

/// MPEG transport stream muxer.
///
/// Packetizes payload units into 188-byte packets over a buffered
/// `AsyncWrite`. Elementary payload is never padded with raw 0xFF
/// bytes; a short final packet is filled by growing its adaptation
/// field instead, so the ES byte stream survives a demux round trip
/// exactly. PSI buffers get plain 0xFF stuffing after the sections,
/// which the section grammar terminates on.
pub struct Muxer<W: AsyncWrite + Unpin + Send> {
    writer: BufWriter<W>,
    continuity: HashMap<u16, u8>,
    streams: Vec<ElementaryStream>,
    pcr_pid: Option<u16>,
}

impl<W: AsyncWrite + Unpin + Send> Muxer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            continuity: HashMap::new(),
            streams: Vec::new(),
            pcr_pid: None,
        }
    }

    /// Registers an elementary stream for the PMT this muxer emits.
    pub fn add_elementary_stream(
        &mut self,
        stream_type: StreamType,
        pid: u16,
        descriptors: Vec<Descriptor>,
    ) -> Result<()> {
        if self.streams.iter().any(|s| s.pid == pid) {
            return Err(TsError::InvalidData(format!(
                "elementary PID 0x{pid:04x} registered twice"
            )));
        }
        self.streams.push(ElementaryStream {
            stream_type,
            pid,
            descriptors,
        });
        Ok(())
    }

    pub fn elementary_streams(&self) -> &[ElementaryStream] {
        &self.streams
    }

    pub fn set_pcr_pid(&mut self, pid: u16) {
        self.pcr_pid = Some(pid);
    }

    /// The PMT body for the registered streams, ready for
    /// [`write_psi`](Self::write_psi). PCR PID defaults to the null PID
    /// when unset, meaning "no PCR carried".
    pub fn pmt(&self) -> PmtData {
        PmtData {
            pcr_pid: self.pcr_pid.unwrap_or(PID_NULL),
            program_descriptors: Vec::new(),
            streams: self
                .streams
                .iter()
                .map(|s| PmtElementaryStream {
                    stream_type: s.stream_type,
                    elementary_pid: s.pid,
                    descriptors: s.descriptors.clone(),
                })
                .collect(),
        }
    }

    /// Splits one payload unit across packets: payload-unit-start on the
    /// first packet only, the caller's adaptation field on the first
    /// packet only, continuity counter incremented per packet. Returns
    /// total bytes written.
    pub async fn write_data(&mut self, data: &MuxerData) -> Result<usize> {
        let total = data.payload.len();
        let mut offset = 0;
        let mut written = 0;
        let mut first = true;

        while offset < total || first {
            let mut af = if first {
                data.adaptation_field.clone()
            } else {
                None
            };
            let min_af = af.as_ref().map_or(0, AdaptationField::encoded_len);
            if min_af > PACKET_PAYLOAD_SIZE {
                return Err(TsError::InvalidData(format!(
                    "adaptation field of {min_af} bytes does not fit a packet"
                )));
            }
            let remaining = total - offset;
            let mut chunk = remaining.min(PACKET_PAYLOAD_SIZE - min_af);
            let mut target = PACKET_PAYLOAD_SIZE - chunk;

            if target > min_af {
                // short final chunk: the adaptation field absorbs the slack
                let mut padded = af.take().unwrap_or_default();
                if padded.pad_to(target).is_err() {
                    // the 2-byte hole: push one payload byte to the next packet
                    chunk -= 1;
                    target += 1;
                    padded.pad_to(target)?;
                }
                af = Some(padded);
            }

            let packet = Packet {
                header: PacketHeader {
                    pid: data.pid,
                    payload_unit_start: first,
                    continuity_counter: self.next_continuity(data.pid),
                    ..Default::default()
                },
                adaptation_field: af,
                payload: Some(data.payload.slice(offset..offset + chunk)),
            };
            written += self.write_packet(&packet).await?;
            offset += chunk;
            first = false;
        }
        Ok(written)
    }

    /// Packetizes a PSI buffer (pointer field included) onto `pid`.
    /// Continuation packets carry no pointer field; the tail of the
    /// last packet is 0xFF stuffing.
    pub async fn write_psi(&mut self, pid: u16, psi: &PsiData) -> Result<usize> {
        let mut buf = BytesMut::new();
        psi.write(&mut buf)?;
        let data = buf.freeze();

        let mut written = 0;
        let mut first = true;
        let mut offset = 0;
        while offset < data.len() || first {
            let chunk = (data.len() - offset).min(PACKET_PAYLOAD_SIZE);
            let packet = Packet {
                header: PacketHeader {
                    pid,
                    payload_unit_start: first,
                    continuity_counter: self.next_continuity(pid),
                    ..Default::default()
                },
                adaptation_field: None,
                payload: Some(data.slice(offset..offset + chunk)),
            };
            written += self.write_packet(&packet).await?;
            offset += chunk;
            first = false;
        }
        Ok(written)
    }

    /// One all-stuffing packet on PID 0x1FFF. Null packets carry no
    /// meaningful continuity, so the counter is not tracked.
    pub async fn write_null_packet(&mut self) -> Result<usize> {
        let packet = Packet {
            header: PacketHeader {
                pid: PID_NULL,
                ..Default::default()
            },
            adaptation_field: None,
            payload: Some(Bytes::new()),
        };
        self.write_packet(&packet).await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Flushes and hands back the underlying writer.
    pub async fn into_inner(mut self) -> Result<W> {
        self.writer.flush().await?;
        Ok(self.writer.into_inner())
    }

    async fn write_packet(&mut self, packet: &Packet) -> Result<usize> {
        let mut buf = BytesMut::with_capacity(TS_PACKET_SIZE);
        let written = packet.write(&mut buf)?;
        self.writer.write_all(&buf).await?;
        Ok(written)
    }

    fn next_continuity(&mut self, pid: u16) -> u8 {
        let counter = self.continuity.entry(pid).or_insert(0);
        let value = *counter;
        *counter = (*counter + 1) & 0x0f;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::demuxer::{Demuxer, DemuxerPayload, PidKind};
    use crate::format::ts::pes::PesData;
    use crate::format::ts::psi::{PatData, PatEntry, PsiSection, PsiSectionData, PsiSectionSyntax};
    use crate::format::ts::types::{ClockReference, PID_PAT};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::runtime::Runtime;

    async fn collect(out: Vec<u8>) -> Vec<Packet> {
        let mut packets = Vec::new();
        let mut demuxer = Demuxer::new(Cursor::new(out));
        while let Some(packet) = demuxer.next_packet().await.unwrap() {
            packets.push(packet);
        }
        packets
    }

    #[test]
    fn test_continuity_counters_increment() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let mut muxer = Muxer::new(Vec::new());
            let data = MuxerData {
                pid: 0x100,
                adaptation_field: None,
                payload: Bytes::from(vec![0u8; 500]),
            };
            let written = muxer.write_data(&data).await.unwrap();
            assert_eq!(written, 3 * TS_PACKET_SIZE);
            let packets = collect(muxer.into_inner().await.unwrap()).await;
            assert_eq!(packets.len(), 3);
            for (i, packet) in packets.iter().enumerate() {
                assert_eq!(packet.header.continuity_counter, i as u8);
                assert_eq!(packet.header.payload_unit_start, i == 0);
            }
        });
    }

    #[test]
    fn test_pcr_on_first_packet_only() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let mut muxer = Muxer::new(Vec::new());
            let data = MuxerData {
                pid: 0x100,
                adaptation_field: Some(AdaptationField {
                    random_access: true,
                    pcr: Some(ClockReference::from_27mhz(27_000_000)),
                    ..Default::default()
                }),
                payload: Bytes::from(vec![0u8; 400]),
            };
            muxer.write_data(&data).await.unwrap();
            let packets = collect(muxer.into_inner().await.unwrap()).await;
            let af = packets[0].adaptation_field.as_ref().unwrap();
            assert_eq!(af.pcr.unwrap().as_27mhz(), 27_000_000);
            assert!(af.random_access);
            for packet in &packets[1..packets.len() - 1] {
                assert!(packet.adaptation_field.is_none());
            }
        });
    }

    #[test]
    fn test_pes_survives_mux_demux_round_trip() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            // 182 payload bytes in a packet hits the 2-byte adaptation
            // field hole; make sure that path round-trips too.
            for payload_len in [10usize, 182, 183, 184, 250, 400] {
                let body: Vec<u8> = (0..payload_len).map(|i| i as u8).collect();
                let pes = PesData::new(0xe0, Bytes::from(body.clone()))
                    .with_pts(Duration::from_secs(3))
                    .bounded();
                let mut pes_bytes = BytesMut::new();
                pes.write(&mut pes_bytes).unwrap();

                let mut muxer = Muxer::new(Vec::new());
                muxer
                    .write_data(&MuxerData {
                        pid: 0x100,
                        adaptation_field: None,
                        payload: pes_bytes.freeze(),
                    })
                    .await
                    .unwrap();
                let out = muxer.into_inner().await.unwrap();
                assert_eq!(out.len() % TS_PACKET_SIZE, 0);

                let mut demuxer = Demuxer::new(Cursor::new(out));
                demuxer.set_pid_kind(0x100, PidKind::Pes);
                let unit = demuxer.next_data().await.unwrap().unwrap();
                match unit.payload {
                    DemuxerPayload::Pes(parsed) => {
                        assert_eq!(parsed.payload.as_ref(), &body[..], "len {payload_len}")
                    }
                    other => panic!("expected PES, got {other:?}"),
                }
            }
        });
    }

    #[test]
    fn test_write_psi_round_trip() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let pat = PsiData::single(PsiSection::new(
                0x00,
                PsiSectionSyntax::current(1, 0),
                PsiSectionData::Pat(PatData {
                    entries: vec![PatEntry {
                        program_number: 1,
                        network_pid: 0,
                        program_map_pid: 0x1000,
                    }],
                }),
            ));
            let mut muxer = Muxer::new(Vec::new());
            let written = muxer.write_psi(PID_PAT, &pat).await.unwrap();
            assert_eq!(written, TS_PACKET_SIZE);
            let mut demuxer = Demuxer::new(Cursor::new(muxer.into_inner().await.unwrap()));
            let unit = demuxer.next_data().await.unwrap().unwrap();
            match unit.payload {
                DemuxerPayload::Pat(parsed) => {
                    assert_eq!(parsed.entries[0].program_map_pid, 0x1000)
                }
                other => panic!("expected PAT, got {other:?}"),
            }
        });
    }

    #[test]
    fn test_null_packet() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let mut muxer = Muxer::new(Vec::new());
            muxer.write_null_packet().await.unwrap();
            let out = muxer.into_inner().await.unwrap();
            assert_eq!(out.len(), TS_PACKET_SIZE);
            assert_eq!(out[0], 0x47);
            assert_eq!(((out[1] as u16 & 0x1f) << 8) | out[2] as u16, PID_NULL);
            assert!(out[4..].iter().all(|&b| b == 0xff));
        });
    }

    #[test]
    fn test_duplicate_elementary_pid_rejected() {
        let mut muxer = Muxer::new(Vec::new());
        muxer
            .add_elementary_stream(StreamType::H264, 0x100, vec![])
            .unwrap();
        assert!(matches!(
            muxer.add_elementary_stream(StreamType::AdtsAac, 0x100, vec![]),
            Err(TsError::InvalidData(_))
        ));
    }

    #[test]
    fn test_pmt_reflects_registered_streams() {
        let mut muxer = Muxer::new(Vec::new());
        muxer
            .add_elementary_stream(StreamType::H264, 0x100, vec![Descriptor::StreamIdentifier(1)])
            .unwrap();
        muxer
            .add_elementary_stream(StreamType::AdtsAac, 0x101, vec![])
            .unwrap();
        muxer.set_pcr_pid(0x100);

        let pmt = muxer.pmt();
        assert_eq!(pmt.pcr_pid, 0x100);
        assert_eq!(pmt.streams.len(), 2);
        assert_eq!(pmt.streams[0].elementary_pid, 0x100);
        assert_eq!(pmt.streams[1].stream_type, StreamType::AdtsAac);
    }
}
