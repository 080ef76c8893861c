//! End-to-end mux/demux round trips over in-memory streams.

use bytes::{Bytes, BytesMut};
use chrono::{TimeZone, Utc};
use std::io::Cursor;
use std::time::Duration;
use tokio::runtime::Runtime;
use tsio::format::ts::{
    AdaptationField, ClockReference, Demuxer, DemuxerPayload, Muxer, MuxerData, Packet, PesData,
    ProgramMap, PsiData, PsiSection, PsiSectionData, StreamType, TotData, PID_PAT, PID_TOT,
    TS_PACKET_SIZE,
};

fn pes_bytes(stream_id: u8, body: &[u8], pts_secs: u64) -> Bytes {
    let pes = PesData::new(stream_id, Bytes::copy_from_slice(body))
        .with_pts(Duration::from_secs(pts_secs))
        .bounded();
    let mut buf = BytesMut::new();
    pes.write(&mut buf).unwrap();
    buf.freeze()
}

#[test]
fn test_single_program_pipeline() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut muxer = Muxer::new(Vec::new());

        let mut programs = ProgramMap::new();
        programs.set(0x1000, 1);
        muxer.write_psi(PID_PAT, &programs.to_pat(7, 0)).await.unwrap();

        muxer
            .add_elementary_stream(StreamType::H264, 0x100, vec![])
            .unwrap();
        muxer
            .add_elementary_stream(StreamType::AdtsAac, 0x101, vec![])
            .unwrap();
        muxer.set_pcr_pid(0x100);
        let pmt = muxer.pmt().into_psi(1, 0);
        muxer.write_psi(0x1000, &pmt).await.unwrap();

        let video = vec![0xabu8; 600];
        let audio = vec![0xcdu8; 90];
        muxer
            .write_data(&MuxerData {
                pid: 0x100,
                adaptation_field: None,
                payload: pes_bytes(0xe0, &video, 1),
            })
            .await
            .unwrap();
        muxer
            .write_data(&MuxerData {
                pid: 0x101,
                adaptation_field: None,
                payload: pes_bytes(0xc0, &audio, 1),
            })
            .await
            .unwrap();
        let wire = muxer.into_inner().await.unwrap();
        assert_eq!(wire.len() % TS_PACKET_SIZE, 0);

        // drain the other side and rebuild the program layout
        let mut demuxer = Demuxer::new(Cursor::new(wire));

        let unit = demuxer.next_data().await.unwrap().unwrap();
        match unit.payload {
            DemuxerPayload::Pat(pat) => {
                assert_eq!(pat.entries.len(), 1);
                assert_eq!(pat.entries[0].program_number, 1);
                assert_eq!(pat.entries[0].program_map_pid, 0x1000);
            }
            other => panic!("expected PAT first, got {other:?}"),
        }
        assert_eq!(unit.syntax.unwrap().table_id_extension, 7);

        let unit = demuxer.next_data().await.unwrap().unwrap();
        match unit.payload {
            DemuxerPayload::Pmt(pmt) => {
                assert_eq!(pmt.pcr_pid, 0x100);
                // streams surface in PMT order
                let pids: Vec<u16> = pmt.streams.iter().map(|s| s.elementary_pid).collect();
                assert_eq!(pids, vec![0x100, 0x101]);
                assert_eq!(pmt.streams[0].stream_type, StreamType::H264);
            }
            other => panic!("expected PMT second, got {other:?}"),
        }
        assert_eq!(demuxer.programs().pmt_pid(1), Some(0x1000));

        let unit = demuxer.next_data().await.unwrap().unwrap();
        assert_eq!(unit.pid, 0x100);
        match unit.payload {
            DemuxerPayload::Pes(pes) => {
                assert_eq!(pes.payload.as_ref(), &video[..]);
                assert_eq!(pes.header.unwrap().pts.unwrap().base, 90_000);
            }
            other => panic!("expected video PES, got {other:?}"),
        }

        let unit = demuxer.next_data().await.unwrap().unwrap();
        assert_eq!(unit.pid, 0x101);
        match unit.payload {
            DemuxerPayload::Pes(pes) => assert_eq!(pes.payload.as_ref(), &audio[..]),
            other => panic!("expected audio PES, got {other:?}"),
        }

        assert!(demuxer.next_data().await.unwrap().is_none());
    });
}

#[test]
fn test_continuity_counters_span_units() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut muxer = Muxer::new(Vec::new());
        for _ in 0..2 {
            muxer
                .write_data(&MuxerData {
                    pid: 0x200,
                    adaptation_field: None,
                    payload: Bytes::from(vec![0u8; 400]),
                })
                .await
                .unwrap();
        }
        let wire = muxer.into_inner().await.unwrap();

        let counters: Vec<u8> = wire
            .chunks(TS_PACKET_SIZE)
            .map(|chunk| Packet::parse(chunk).unwrap().header.continuity_counter)
            .collect();
        assert_eq!(counters, vec![0, 1, 2, 3, 4, 5]);
    });
}

#[test]
fn test_pcr_survives_round_trip() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let pcr = ClockReference::new(0x1_0000_1234, 0x1ff);
        let mut muxer = Muxer::new(Vec::new());
        muxer
            .write_data(&MuxerData {
                pid: 0x100,
                adaptation_field: Some(AdaptationField {
                    random_access: true,
                    pcr: Some(pcr),
                    ..Default::default()
                }),
                payload: pes_bytes(0xe0, b"keyframe", 5),
            })
            .await
            .unwrap();
        let mut demuxer = Demuxer::new(Cursor::new(muxer.into_inner().await.unwrap()));
        demuxer.set_pid_kind(0x100, tsio::format::ts::PidKind::Pes);
        let unit = demuxer.next_data().await.unwrap().unwrap();
        let af = unit.first_packet.adaptation_field.as_ref().unwrap();
        assert_eq!(af.pcr, Some(pcr));
        assert!(af.random_access);
    });
}

#[test]
fn test_tot_through_pipeline() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let tot = PsiData::single(PsiSection {
            header: tsio::format::ts::PsiSectionHeader {
                table_id: 0x73,
                table_type: tsio::format::ts::TableType::Tot,
                syntax_indicator: false,
                private_bit: true,
                section_length: 0,
            },
            syntax: None,
            data: PsiSectionData::Tot(TotData {
                utc_time: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
                descriptors: vec![],
            }),
        });

        let mut muxer = Muxer::new(Vec::new());
        muxer.write_psi(PID_TOT, &tot).await.unwrap();
        let mut demuxer = Demuxer::new(Cursor::new(muxer.into_inner().await.unwrap()));
        let unit = demuxer.next_data().await.unwrap().unwrap();
        assert_eq!(unit.pid, PID_TOT);
        match unit.payload {
            DemuxerPayload::Tot(tot) => {
                assert_eq!(tot.utc_time, Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())
            }
            other => panic!("expected TOT, got {other:?}"),
        }
    });
}

#[test]
fn test_long_psi_spans_packets() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        // A PAT with enough programs to overflow one packet payload.
        let mut programs = ProgramMap::new();
        for n in 1..=60u16 {
            programs.set(0x1000 + n, n);
        }
        let pat = programs.to_pat(1, 0);

        let mut muxer = Muxer::new(Vec::new());
        let written = muxer.write_psi(PID_PAT, &pat).await.unwrap();
        assert_eq!(written, 2 * TS_PACKET_SIZE);
        let mut demuxer = Demuxer::new(Cursor::new(muxer.into_inner().await.unwrap()));
        let unit = demuxer.next_data().await.unwrap().unwrap();
        match unit.payload {
            DemuxerPayload::Pat(parsed) => assert_eq!(parsed.entries.len(), 60),
            other => panic!("expected PAT, got {other:?}"),
        }
        assert_eq!(demuxer.programs().len(), 60);
    });
}

#[test]
fn test_unknown_stream_type_passthrough() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut muxer = Muxer::new(Vec::new());
        muxer
            .add_elementary_stream(StreamType::Unknown(0x42), 0x300, vec![])
            .unwrap();
        let pmt = muxer.pmt().into_psi(1, 0);
        let mut programs = ProgramMap::new();
        programs.set(0x1000, 1);
        muxer.write_psi(PID_PAT, &programs.to_pat(1, 0)).await.unwrap();
        muxer.write_psi(0x1000, &pmt).await.unwrap();
        let mut demuxer = Demuxer::new(Cursor::new(muxer.into_inner().await.unwrap()));
        demuxer.next_data().await.unwrap(); // PAT
        let unit = demuxer.next_data().await.unwrap().unwrap();
        match unit.payload {
            DemuxerPayload::Pmt(pmt) => {
                assert_eq!(pmt.streams[0].stream_type, StreamType::Unknown(0x42))
            }
            other => panic!("expected PMT, got {other:?}"),
        }
    });
}
