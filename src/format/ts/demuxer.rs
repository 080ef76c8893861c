use super::packet::Packet;
use super::pes::PesData;
use super::psi::{
    self, EitData, NitData, PatData, PmtData, PsiData, PsiSectionData, PsiSectionSyntax, SdtData,
    TotData,
};
use super::types::{
    ProgramMap, StreamType, PID_EIT, PID_NIT, PID_NULL, PID_PAT, PID_SDT, PID_TOT, SYNC_BYTE,
    TS_PACKET_SIZE,
};
use crate::error::{Result, TsError};
use bytes::BytesMut;
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Shared flag for cooperative cancellation; see
/// [`Demuxer::cancel_handle`].
pub type CancelHandle = Arc<AtomicBool>;

/// How payloads on a PID are assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidKind {
    /// Section data: pointer field plus back-to-back tables.
    Psi,
    /// Packetized elementary stream data.
    Pes,
}

/// One reassembled unit: a single parsed table section or PES packet.
/// A PSI buffer holding several back-to-back sections yields one unit
/// per section, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct DemuxerData {
    pub pid: u16,
    /// The packet that started this unit; carries the adaptation field
    /// (PCR, random access indicator) callers may need.
    pub first_packet: Packet,
    /// Syntax header of the emitting section (program number for a PMT,
    /// transport stream id for a PAT); `None` for TOT/TDT and PES.
    pub syntax: Option<PsiSectionSyntax>,
    pub payload: DemuxerPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DemuxerPayload {
    Pat(PatData),
    Pmt(PmtData),
    Sdt(SdtData),
    Eit(EitData),
    Nit(NitData),
    Tot(TotData),
    Pes(PesData),
}

struct Accumulator {
    kind: PidKind,
    first_packet: Packet,
    data: BytesMut,
}

/// MPEG transport stream demuxer.
///
/// Reads 188-byte packets from any `AsyncRead` source and reassembles
/// per-PID payload units: PSI tables on the well-known and PAT-announced
/// PIDs, PES packets on PIDs announced by a PMT (or registered by the
/// caller). Tables are parsed as they complete, so a PAT followed by its
/// PMT is enough to start extracting elementary streams.
pub struct Demuxer<R: AsyncRead + Unpin + Send> {
    reader: R,
    cancel: Arc<AtomicBool>,
    kinds: HashMap<u16, PidKind>,
    continuity: HashMap<u16, u8>,
    accumulators: HashMap<u16, Accumulator>,
    ready: VecDeque<DemuxerData>,
    programs: ProgramMap,
    stream_types: HashMap<u16, StreamType>,
    packets_read: u64,
}

impl<R: AsyncRead + Unpin + Send> Demuxer<R> {
    pub fn new(reader: R) -> Self {
        let mut kinds = HashMap::new();
        for pid in [PID_PAT, PID_NIT, PID_SDT, PID_EIT, PID_TOT] {
            kinds.insert(pid, PidKind::Psi);
        }
        Self {
            reader,
            cancel: Arc::new(AtomicBool::new(false)),
            kinds,
            continuity: HashMap::new(),
            accumulators: HashMap::new(),
            ready: VecDeque::new(),
            programs: ProgramMap::new(),
            stream_types: HashMap::new(),
            packets_read: 0,
        }
    }

    /// Handle for cooperative cancellation: once set, the next read
    /// attempt returns [`TsError::Cancelled`]. Safe to store and trip
    /// from a signal handler task.
    pub fn cancel_handle(&self) -> CancelHandle {
        Arc::clone(&self.cancel)
    }

    /// Registers a PID by hand, ahead of (or instead of) table discovery.
    pub fn set_pid_kind(&mut self, pid: u16, kind: PidKind) {
        self.kinds.insert(pid, kind);
    }

    /// PMT PID to program number associations learned from PATs so far.
    pub fn programs(&self) -> &ProgramMap {
        &self.programs
    }

    /// Elementary PID to stream type associations learned from PMTs so far.
    pub fn stream_types(&self) -> &HashMap<u16, StreamType> {
        &self.stream_types
    }

    pub fn packets_read(&self) -> u64 {
        self.packets_read
    }

    /// Reads and parses the next packet. `Ok(None)` at a clean end of
    /// stream; a stream ending inside a packet is malformed. A lost
    /// sync byte triggers a byte-level resynchronization scan.
    pub async fn next_packet(&mut self) -> Result<Option<Packet>> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(TsError::Cancelled);
        }
        let mut buf = [0u8; TS_PACKET_SIZE];
        if !self.fill(&mut buf, 0).await? {
            return Ok(None);
        }
        if buf[0] != SYNC_BYTE {
            self.resync(&mut buf).await?;
        }
        self.packets_read += 1;
        Packet::parse(&buf).map(Some)
    }

    /// Reassembles payload units until one completes. `Ok(None)` after
    /// the end of stream, once every flushable unit has been handed out.
    pub async fn next_data(&mut self) -> Result<Option<DemuxerData>> {
        loop {
            if let Some(data) = self.ready.pop_front() {
                return Ok(Some(data));
            }
            match self.next_packet().await? {
                Some(packet) => self.handle_packet(packet)?,
                None => {
                    self.flush_eof();
                    return Ok(self.ready.pop_front());
                }
            }
        }
    }

    /// Fills `buf[offset..]` from the reader. Returns false on a clean
    /// end of stream at `offset == 0`.
    async fn fill(&mut self, buf: &mut [u8; TS_PACKET_SIZE], offset: usize) -> Result<bool> {
        let mut filled = offset;
        while filled < TS_PACKET_SIZE {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(TsError::MalformedPacket(format!(
                    "stream ended {filled} bytes into a packet"
                )));
            }
            filled += n;
        }
        Ok(true)
    }

    /// Scans forward to the next 0x47 candidate after sync loss and
    /// slides it to the start of the buffer. A false candidate costs
    /// one mis-framed packet before the next read rescans.
    async fn resync(&mut self, buf: &mut [u8; TS_PACKET_SIZE]) -> Result<()> {
        let mut skipped = 0usize;
        while buf[0] != SYNC_BYTE {
            match buf.iter().position(|&b| b == SYNC_BYTE) {
                Some(pos) => {
                    skipped += pos;
                    buf.copy_within(pos.., 0);
                    if !self.fill(buf, TS_PACKET_SIZE - pos).await? {
                        return Err(TsError::MalformedPacket(
                            "stream ended during resynchronization".into(),
                        ));
                    }
                }
                None => {
                    skipped += TS_PACKET_SIZE;
                    if !self.fill(buf, 0).await? {
                        return Err(TsError::MalformedPacket(
                            "stream ended during resynchronization".into(),
                        ));
                    }
                }
            }
        }
        warn!("resynchronized after skipping {skipped} bytes");
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        let pid = packet.header.pid;
        if packet.header.transport_error {
            debug!("PID 0x{pid:04x}: dropping packet with transport error indicator");
            return Ok(());
        }
        if pid == PID_NULL {
            return Ok(());
        }
        let Some(kind) = self.kinds.get(&pid).copied() else {
            return Ok(());
        };
        let Some(payload) = packet.payload.clone() else {
            return Ok(());
        };

        let cc = packet.header.continuity_counter;
        if let Some(last) = self.continuity.insert(pid, cc) {
            if cc == last {
                // duplicate packet
                return Ok(());
            }
            if cc != (last + 1) & 0x0f {
                debug!("PID 0x{pid:04x}: continuity {last} -> {cc}, dropping partial unit");
                self.accumulators.remove(&pid);
            }
        }

        if packet.header.payload_unit_start {
            if let Some(acc) = self.accumulators.remove(&pid) {
                self.finish_open_unit(pid, acc);
            }
            let mut acc = Accumulator {
                kind,
                first_packet: packet,
                data: BytesMut::new(),
            };
            acc.data.extend_from_slice(&payload);
            self.advance_unit(pid, acc)?;
        } else if let Some(mut acc) = self.accumulators.remove(&pid) {
            acc.data.extend_from_slice(&payload);
            self.advance_unit(pid, acc)?;
        }
        // continuation without an open unit: start was never seen, skip
        Ok(())
    }

    /// Checks whether the accumulated bytes form a complete unit; emits
    /// it or re-parks the accumulator.
    fn advance_unit(&mut self, pid: u16, acc: Accumulator) -> Result<()> {
        match acc.kind {
            PidKind::Psi => {
                if let Some(len) = psi::complete_unit_len(&acc.data) {
                    let parsed = PsiData::parse(&acc.data[..len])?;
                    self.register_tables(&parsed);
                    for section in parsed.sections {
                        let payload = match section.data {
                            PsiSectionData::Pat(d) => DemuxerPayload::Pat(d),
                            PsiSectionData::Pmt(d) => DemuxerPayload::Pmt(d),
                            PsiSectionData::Sdt(d) => DemuxerPayload::Sdt(d),
                            PsiSectionData::Eit(d) => DemuxerPayload::Eit(d),
                            PsiSectionData::Nit(d) => DemuxerPayload::Nit(d),
                            PsiSectionData::Tot(d) => DemuxerPayload::Tot(d),
                            PsiSectionData::Raw(_) => {
                                debug!(
                                    "PID 0x{pid:04x}: skipping table 0x{:02x} with no parser",
                                    section.header.table_id
                                );
                                continue;
                            }
                        };
                        self.ready.push_back(DemuxerData {
                            pid,
                            first_packet: acc.first_packet.clone(),
                            syntax: section.syntax,
                            payload,
                        });
                    }
                } else {
                    self.accumulators.insert(pid, acc);
                }
            }
            PidKind::Pes => {
                if acc.data.len() >= 6 {
                    let declared = u16::from_be_bytes([acc.data[4], acc.data[5]]) as usize;
                    if declared > 0 {
                        let total = 6 + declared;
                        if acc.data.len() >= total {
                            // bytes past the declared length are stuffing
                            let parsed = PesData::parse(&acc.data[..total])?;
                            self.ready.push_back(DemuxerData {
                                pid,
                                first_packet: acc.first_packet,
                                syntax: None,
                                payload: DemuxerPayload::Pes(parsed),
                            });
                            return Ok(());
                        }
                    }
                }
                // unbounded, or not enough bytes yet
                self.accumulators.insert(pid, acc);
            }
        }
        Ok(())
    }

    /// A new unit started on a PID with bytes still pending. Unbounded
    /// PES packets are terminated by exactly this, so emit them; any
    /// other partial unit is dropped, matching live-join behavior where
    /// a fragment's start was never observed.
    fn finish_open_unit(&mut self, pid: u16, acc: Accumulator) {
        if acc.kind == PidKind::Pes
            && acc.data.len() >= 6
            && u16::from_be_bytes([acc.data[4], acc.data[5]]) == 0
        {
            match PesData::parse(&acc.data) {
                Ok(parsed) => self.ready.push_back(DemuxerData {
                    pid,
                    first_packet: acc.first_packet,
                    syntax: None,
                    payload: DemuxerPayload::Pes(parsed),
                }),
                Err(err) => debug!("PID 0x{pid:04x}: dropping malformed PES unit: {err}"),
            }
            return;
        }
        debug!(
            "PID 0x{pid:04x}: dropping {} partial bytes at new unit start",
            acc.data.len()
        );
    }

    fn flush_eof(&mut self) {
        let pending: Vec<u16> = self.accumulators.keys().copied().collect();
        for pid in pending {
            if let Some(acc) = self.accumulators.remove(&pid) {
                self.finish_open_unit(pid, acc);
            }
        }
    }

    /// Learns PID layout from freshly parsed tables: PATs announce PMT
    /// PIDs, PMTs announce elementary PIDs.
    fn register_tables(&mut self, psi: &PsiData) {
        for section in &psi.sections {
            match &section.data {
                PsiSectionData::Pat(pat) => {
                    for entry in &pat.entries {
                        if entry.program_number != 0 {
                            self.programs.set(entry.program_map_pid, entry.program_number);
                            self.kinds.insert(entry.program_map_pid, PidKind::Psi);
                        }
                    }
                }
                PsiSectionData::Pmt(pmt) => {
                    for stream in &pmt.streams {
                        self.kinds.insert(stream.elementary_pid, PidKind::Pes);
                        self.stream_types
                            .insert(stream.elementary_pid, stream.stream_type);
                    }
                }
                _ => {}
            }
        }
    }
}
