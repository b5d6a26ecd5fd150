//! The binary trace format and trace file access.
//!
//! A trace is a headerless sequence of 5-byte records. Byte 0 packs the
//! operation: bit 0 is the write flag, bits 1..7 the CPU id. Bytes 1..4 are
//! the 32-bit accessed address, little-endian. A file whose size is not a
//! multiple of the record size is malformed.

use std::fs::File;
use std::io;
use std::path::Path;

pub const TRACE_RECORD_SIZE: usize = 5;

/// One decoded trace record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceRecord {
    pub cpu: u8,
    pub is_write: bool,
    pub addr: u32,
}

impl TraceRecord {
    pub fn decode(bytes: [u8; TRACE_RECORD_SIZE]) -> Self {
        Self {
            cpu: bytes[0] >> 1,
            is_write: bytes[0] & 1 != 0,
            addr: u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
        }
    }

    pub fn encode(self) -> [u8; TRACE_RECORD_SIZE] {
        let op = (self.cpu << 1) | self.is_write as u8;
        let addr = self.addr.to_le_bytes();
        [op, addr[0], addr[1], addr[2], addr[3]]
    }
}

/// Iterate the records of a raw trace buffer. The buffer length must
/// already be a multiple of the record size; a stray tail is ignored.
pub fn iter_records(bytes: &[u8]) -> impl Iterator<Item = TraceRecord> + '_ {
    bytes
        .chunks_exact(TRACE_RECORD_SIZE)
        .map(|chunk| TraceRecord::decode(chunk.try_into().unwrap()))
}

/// A whole trace held as one byte buffer.
///
/// Unix memory-maps the file and advises the OS that access is sequential
/// (the record loop is a single forward pass); other systems read the file
/// up front.
pub enum Trace {
    #[cfg(unix)]
    Mapped(memmap2::Mmap),
    Owned(Vec<u8>),
}

impl Trace {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let trace;
        #[cfg(unix)]
        {
            use memmap2::{Advice, Mmap};
            let map = unsafe { Mmap::map(&file)? };
            map.advise(Advice::Sequential)?;
            trace = Trace::Mapped(map);
        }
        #[cfg(not(unix))]
        {
            use std::io::Read;
            let mut bytes = Vec::new();
            io::BufReader::new(file).read_to_end(&mut bytes)?;
            trace = Trace::Owned(bytes);
        }
        trace.validated()
    }

    /// Wrap an in-memory trace buffer, checking its framing.
    pub fn from_bytes(bytes: Vec<u8>) -> io::Result<Self> {
        Trace::Owned(bytes).validated()
    }

    fn validated(self) -> io::Result<Self> {
        if self.as_bytes().len() % TRACE_RECORD_SIZE != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "trace size is not a multiple of the record size",
            ));
        }
        Ok(self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            #[cfg(unix)]
            Trace::Mapped(map) => map,
            Trace::Owned(bytes) => bytes,
        }
    }

    pub fn records(&self) -> impl Iterator<Item = TraceRecord> + '_ {
        iter_records(self.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len() / TRACE_RECORD_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_the_packed_op_byte() {
        // CPU 5 write to 0xdeadbeef
        let record = TraceRecord::decode([0x0b, 0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(record.cpu, 5);
        assert!(record.is_write);
        assert_eq!(record.addr, 0xdead_beef);

        // CPU 0 read of 0x10
        let record = TraceRecord::decode([0x00, 0x10, 0x00, 0x00, 0x00]);
        assert_eq!(record.cpu, 0);
        assert!(!record.is_write);
        assert_eq!(record.addr, 0x10);
    }

    #[test]
    fn encode_inverts_decode() {
        let record = TraceRecord {
            cpu: 127,
            is_write: true,
            addr: 0x0102_0304,
        };
        assert_eq!(TraceRecord::decode(record.encode()), record);
    }

    #[test]
    fn malformed_length_is_rejected() {
        assert!(Trace::from_bytes(vec![0u8; 12]).is_err());
        let trace = Trace::from_bytes(vec![0u8; 15]).unwrap();
        assert_eq!(trace.len(), 3);
    }

    #[test]
    fn iterates_in_file_order() {
        let a = TraceRecord {
            cpu: 1,
            is_write: false,
            addr: 0x20,
        };
        let b = TraceRecord {
            cpu: 2,
            is_write: true,
            addr: 0x40,
        };
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&a.encode());
        bytes.extend_from_slice(&b.encode());
        let decoded: Vec<TraceRecord> = iter_records(&bytes).collect();
        assert_eq!(decoded, vec![a, b]);
    }
}
