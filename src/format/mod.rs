//! # Media Format Implementations
//!
//! Container formats live here. The only member today is the MPEG
//! transport stream codec; its demuxer and muxer operate over tokio's
//! `AsyncRead`/`AsyncWrite` so the same code serves files and sockets.

/// MPEG Transport Stream (TS) format
pub mod ts;
