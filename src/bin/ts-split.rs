//! ts-split - elementary stream splitter
//!
//! Demuxes a transport stream file and re-muxes every elementary stream
//! into its own single-program `<PID>.ts` in the output directory, each
//! with a fresh PAT/PMT so the result plays standalone.

use bytes::BytesMut;
use clap::Parser;
use log::info;
use std::collections::HashMap;
use std::path::Path;
use std::process;
use tokio::fs::File;
use tsio::format::ts::{
    AdaptationField, Demuxer, DemuxerPayload, Muxer, MuxerData, PesData, ProgramMap, StreamType,
};
use tsio::{Result, TsError};

/// Split a transport stream into one file per elementary stream
#[derive(Parser, Debug)]
#[command(name = "ts-split", version, about = "TS elementary stream splitter")]
struct Cli {
    /// Input transport stream file
    input: std::path::PathBuf,

    /// Output directory for the per-PID files
    #[arg(short, long, default_value = ".")]
    output: std::path::PathBuf,
}

const SPLIT_PMT_PID: u16 = 0x1000;

struct EsOutput {
    muxer: Muxer<File>,
    units: u64,
}

impl EsOutput {
    /// Opens `<PID>.ts` and emits its PAT/PMT header tables.
    async fn create(dir: &Path, pid: u16, stream_type: StreamType) -> Result<Self> {
        let path = dir.join(format!("{pid}.ts"));
        let file = File::create(&path).await?;
        let mut muxer = Muxer::new(file);
        muxer.add_elementary_stream(stream_type, pid, vec![])?;
        muxer.set_pcr_pid(pid);

        let mut programs = ProgramMap::new();
        programs.set(SPLIT_PMT_PID, 1);
        muxer.write_psi(0x0000, &programs.to_pat(1, 0)).await?;
        let pmt = muxer.pmt().into_psi(1, 0);
        muxer.write_psi(SPLIT_PMT_PID, &pmt).await?;
        info!("writing PID {pid:#06x} to {}", path.display());
        Ok(Self { muxer, units: 0 })
    }

    async fn write_unit(
        &mut self,
        pid: u16,
        pes: &PesData,
        adaptation_field: Option<AdaptationField>,
    ) -> Result<()> {
        let mut payload = BytesMut::new();
        pes.write(&mut payload)?;
        self.muxer
            .write_data(&MuxerData {
                pid,
                adaptation_field,
                payload: payload.freeze(),
            })
            .await?;
        self.units += 1;
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(&cli).await {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    if !cli.output.is_dir() {
        return Err(TsError::InvalidData(format!(
            "output directory {} does not exist",
            cli.output.display()
        )));
    }

    let file = File::open(&cli.input).await?;
    let mut demuxer = Demuxer::new(file);
    let mut outputs: HashMap<u16, EsOutput> = HashMap::new();

    while let Some(unit) = demuxer.next_data().await? {
        let DemuxerPayload::Pes(pes) = unit.payload else {
            continue;
        };
        let pid = unit.pid;
        if !outputs.contains_key(&pid) {
            let stream_type = demuxer
                .stream_types()
                .get(&pid)
                .copied()
                .unwrap_or(StreamType::PrivateData);
            outputs.insert(pid, EsOutput::create(&cli.output, pid, stream_type).await?);
        }
        if let Some(output) = outputs.get_mut(&pid) {
            // keep the source packet's PCR / random access marks
            output
                .write_unit(pid, &pes, unit.first_packet.adaptation_field.clone())
                .await?;
        }
    }

    let mut pids: Vec<u16> = outputs.keys().copied().collect();
    pids.sort_unstable();
    for pid in pids {
        if let Some(output) = outputs.get_mut(&pid) {
            output.muxer.flush().await?;
            eprintln!("PID {pid:#06x}: {} units", output.units);
        }
    }
    if outputs.is_empty() {
        eprintln!("no elementary streams found");
    }
    Ok(())
}
