use thiserror::Error;

#[derive(Error, Debug)]
pub enum TsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid sync byte: 0x{byte:02x}")]
    InvalidSyncByte { byte: u8 },

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("unexpected end of data: needed {needed} more bits, {have} available")]
    UnexpectedEof { needed: usize, have: usize },

    #[error("CRC32 mismatch in table 0x{table_id:02x}: stored 0x{stored:08x}, computed 0x{computed:08x}")]
    CrcMismatch {
        table_id: u8,
        stored: u32,
        computed: u32,
    },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("read loop cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, TsError>;
