//! ts-probe - transport stream inspection tool
//!
//! Reads a TS from a file or a UDP (multicast) socket and reports the
//! programs, elementary streams, and services it announces, or dumps
//! per-unit / per-packet lines for debugging captures.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::process;
use std::sync::atomic::Ordering;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::UdpSocket;
use tsio::format::ts::{Demuxer, DemuxerPayload, PesData, SdtData};
use tsio::{Result, TsError};

/// MPEG transport stream probe
#[derive(Parser, Debug)]
#[command(name = "ts-probe", version, about = "MPEG transport stream probe")]
struct Cli {
    /// Input: a file path, or udp://host:port (multicast groups are joined)
    input: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print one line per demuxed payload unit
    Data,
    /// Print one line per transport packet
    Packets,
}

#[derive(Serialize)]
struct ProbeOutput {
    programs: Vec<ProgramInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    services: Vec<ServiceInfo>,
}

#[derive(Serialize)]
struct ProgramInfo {
    program_number: u16,
    pmt_pid: u16,
    pcr_pid: u16,
    streams: Vec<EsInfo>,
}

#[derive(Serialize)]
struct EsInfo {
    pid: u16,
    stream_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    descriptors: Vec<String>,
}

#[derive(Serialize)]
struct ServiceInfo {
    service_id: u16,
    provider: String,
    name: String,
}

/// A datagram socket served as a byte stream. Each datagram is buffered
/// whole so short reads never drop its tail.
struct UdpSource {
    socket: UdpSocket,
    buf: Box<[u8]>,
    pos: usize,
    len: usize,
}

impl UdpSource {
    fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            buf: vec![0u8; 65536].into_boxed_slice(),
            pos: 0,
            len: 0,
        }
    }
}

impl AsyncRead for UdpSource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = self.get_mut();
        while me.pos >= me.len {
            let mut rb = ReadBuf::new(&mut me.buf);
            ready!(me.socket.poll_recv(cx, &mut rb))?;
            me.len = rb.filled().len();
            me.pos = 0;
        }
        let n = out.remaining().min(me.len - me.pos);
        out.put_slice(&me.buf[me.pos..me.pos + n]);
        me.pos += n;
        Poll::Ready(Ok(()))
    }
}

enum Input {
    File(tokio::fs::File),
    Udp(UdpSource),
}

impl AsyncRead for Input {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Input::File(f) => Pin::new(f).poll_read(cx, buf),
            Input::Udp(u) => Pin::new(u).poll_read(cx, buf),
        }
    }
}

async fn open_input(spec: &str) -> Result<Input> {
    if let Some(addr) = spec.strip_prefix("udp://") {
        let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
            TsError::InvalidData(format!("expected udp://host:port, got {spec:?}"))
        })?;
        let ip: Ipv4Addr = host
            .parse()
            .map_err(|_| TsError::InvalidData(format!("bad IPv4 address {host:?}")))?;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port.parse::<u16>().map_err(
            |_| TsError::InvalidData(format!("bad port {port:?}")),
        )?))
        .await?;
        if ip.is_multicast() {
            socket.join_multicast_v4(ip, Ipv4Addr::UNSPECIFIED)?;
        }
        Ok(Input::Udp(UdpSource::new(socket)))
    } else {
        Ok(Input::File(tokio::fs::File::open(spec).await?))
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let input = match open_input(&cli.input).await {
        Ok(input) => input,
        Err(err) => {
            eprintln!("error: cannot open {:?}: {err}", cli.input);
            process::exit(1);
        }
    };

    let mut demuxer = Demuxer::new(input);
    let cancel = demuxer.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let result = match cli.command {
        Some(Command::Packets) => run_packets(&mut demuxer).await,
        Some(Command::Data) => run_data(&mut demuxer).await,
        None => run_programs(&mut demuxer).await,
    };
    match result {
        Ok(()) | Err(TsError::Cancelled) => {}
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(1);
        }
    }
}

async fn run_packets(demuxer: &mut Demuxer<Input>) -> Result<()> {
    while let Some(packet) = demuxer.next_packet().await? {
        let mut line = format!(
            "PID {:#06x} cc={:2}",
            packet.header.pid, packet.header.continuity_counter
        );
        if packet.header.payload_unit_start {
            line.push_str(" start");
        }
        if let Some(af) = &packet.adaptation_field {
            if let Some(pcr) = &af.pcr {
                line.push_str(&format!(" pcr={:.6}s", af_seconds(pcr)));
            }
            if af.random_access {
                line.push_str(" rai");
            }
            if af.discontinuity {
                line.push_str(" discont");
            }
        }
        if let Some(payload) = &packet.payload {
            line.push_str(&format!(" payload={}", payload.len()));
        }
        println!("{line}");
    }
    Ok(())
}

fn af_seconds(pcr: &tsio::format::ts::ClockReference) -> f64 {
    pcr.as_duration().as_secs_f64()
}

async fn run_data(demuxer: &mut Demuxer<Input>) -> Result<()> {
    while let Some(unit) = demuxer.next_data().await? {
        let what = match &unit.payload {
            DemuxerPayload::Pat(pat) => format!("PAT {} programs", pat.entries.len()),
            DemuxerPayload::Pmt(pmt) => format!(
                "PMT pcr_pid={:#06x} {} streams",
                pmt.pcr_pid,
                pmt.streams.len()
            ),
            DemuxerPayload::Sdt(sdt) => format!("SDT {} services", sdt.services.len()),
            DemuxerPayload::Eit(eit) => format!("EIT {} events", eit.events.len()),
            DemuxerPayload::Nit(nit) => {
                format!("NIT {} transports", nit.transport_streams.len())
            }
            DemuxerPayload::Tot(tot) => format!("TOT {}", tot.utc_time),
            DemuxerPayload::Pes(pes) => describe_pes(pes),
        };
        println!("PID {:#06x} {what}", unit.pid);
    }
    Ok(())
}

fn describe_pes(pes: &PesData) -> String {
    let mut s = format!("PES stream_id={:#04x} {} bytes", pes.stream_id, pes.payload.len());
    if let Some(header) = &pes.header {
        if let Some(pts) = header.pts {
            s.push_str(&format!(" pts={}", pts.base));
        }
        if let Some(dts) = header.dts {
            s.push_str(&format!(" dts={}", dts.base));
        }
    }
    s
}

async fn run_programs(demuxer: &mut Demuxer<Input>) -> Result<()> {
    let mut pmts: BTreeMap<u16, ProgramInfo> = BTreeMap::new();
    let mut announced: Vec<u16> = Vec::new();
    let mut pat_seen = false;
    let mut sdt: Option<SdtData> = None;

    while let Some(unit) = demuxer.next_data().await? {
        match unit.payload {
            DemuxerPayload::Pat(pat) => {
                pat_seen = true;
                for entry in &pat.entries {
                    if entry.program_number != 0 && !announced.contains(&entry.program_number) {
                        announced.push(entry.program_number);
                    }
                }
            }
            DemuxerPayload::Pmt(pmt) => {
                let program_number = unit.syntax.map(|s| s.table_id_extension).unwrap_or(0);
                pmts.entry(program_number).or_insert_with(|| ProgramInfo {
                    program_number,
                    pmt_pid: unit.pid,
                    pcr_pid: pmt.pcr_pid,
                    streams: pmt
                        .streams
                        .iter()
                        .map(|s| EsInfo {
                            pid: s.elementary_pid,
                            stream_type: format!("{:?}", s.stream_type),
                            descriptors: s.descriptors.iter().map(|d| format!("{d:?}")).collect(),
                        })
                        .collect(),
                });
            }
            DemuxerPayload::Sdt(data) => sdt = Some(data),
            _ => {}
        }
        // Live sources never end; stop once the announced tables are in.
        if pat_seen && announced.iter().all(|n| pmts.contains_key(n)) {
            break;
        }
    }

    let output = ProbeOutput {
        programs: pmts.into_values().collect(),
        services: sdt
            .map(|sdt| {
                sdt.services
                    .iter()
                    .map(|service| {
                        let (provider, name) = service
                            .descriptors
                            .iter()
                            .find_map(|d| match d {
                                tsio::format::ts::Descriptor::Service(s) => Some((
                                    String::from_utf8_lossy(&s.provider).into_owned(),
                                    String::from_utf8_lossy(&s.name).into_owned(),
                                )),
                                _ => None,
                            })
                            .unwrap_or_default();
                        ServiceInfo {
                            service_id: service.service_id,
                            provider,
                            name,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&output).map_err(|e| TsError::InvalidData(e.to_string()))?
    );
    Ok(())
}
