use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    io,
};

#[derive(Debug)]
pub(crate) enum ImageError {
    AnchorNotFound { scanned: u64 },
    CloseUnsupported,
    EmptyAnchor,
    InvalidPartitionTable(String),
    InvalidSignature([u8; 2]),
    Io(io::Error),
    OutOfRange { offset: u64, len: usize, size: u64 },
    Overflow { offset: u64, len: usize, size: u64 },
    PartitionIndexOutOfRange(usize),
    PayloadTooLarge { len: usize, sector_size: usize },
}

impl Display for ImageError {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::AnchorNotFound { scanned } => {
                write!(f, "Anchor not found after scanning {} bytes; is this a supported image?", scanned)
            }
            Self::CloseUnsupported => f.write_str("Partition window does not own the image handle; close the image"),
            Self::EmptyAnchor => f.write_str("Anchor to search for is empty"),
            Self::InvalidPartitionTable(msg) => write!(f, "Invalid partition table: {}", msg),
            Self::InvalidSignature(sig) => {
                write!(f, "Invalid signature: expected [0x55, 0xaa], actual {}", hex::encode(sig))
            }
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::OutOfRange { offset, len, size } => {
                write!(f, "Read of {} bytes at offset {} is past the end of a {} byte partition", len, offset, size)
            }
            Self::Overflow { offset, len, size } => {
                write!(f, "Write of {} bytes at offset {} overflows a {} byte partition", len, offset, size)
            }
            Self::PartitionIndexOutOfRange(index) => write!(f, "No populated partition at index {}", index),
            Self::PayloadTooLarge { len, sector_size } => {
                write!(f, "Payload of {} bytes does not fit in a {} byte sector", len, sector_size)
            }
        }
    }
}

impl Error for ImageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ImageError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
