use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::storage::StorageBacking;
use crate::types::{HeapDumpError, Result};

/// Phase-2 access to instance/array payload bytes. Phase 1 only records
/// (offset, length); this trait fetches the bytes when the navigator asks,
/// from either an in-memory copy of the dump or the file itself.
pub trait PayloadSource {
    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>>;
}

/// Whole dump held in memory. Fast, bounded by dump size.
pub struct MemoryPayloads {
    bytes: Vec<u8>,
}

impl MemoryPayloads {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            bytes: std::fs::read(path)?,
        })
    }

    #[cfg(test)]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl PayloadSource for MemoryPayloads {
    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(len as u64)
            .filter(|&end| end <= self.bytes.len() as u64)
            .ok_or_else(|| {
                HeapDumpError::corrupt(offset, "payload extends past the end of the dump")
            })?;
        Ok(self.bytes[offset as usize..end as usize].to_vec())
    }
}

/// Seek-and-read from the dump file on every request. Constant memory,
/// re-derivation is allowed to be slow.
pub struct FilePayloads {
    file: RefCell<File>,
}

impl FilePayloads {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            file: RefCell::new(File::open(path)?),
        })
    }
}

impl PayloadSource for FilePayloads {
    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                HeapDumpError::corrupt(offset, "payload extends past the end of the dump")
            }
            _ => HeapDumpError::Io(e),
        })?;
        Ok(buf)
    }
}

/// Picks the payload source matching the storage backing of the run.
pub fn open_payloads(path: &Path, backing: &StorageBacking) -> Result<Box<dyn PayloadSource>> {
    Ok(match backing {
        StorageBacking::Memory => Box::new(MemoryPayloads::load(path)?),
        StorageBacking::File | StorageBacking::FileIn(_) => {
            Box::new(FilePayloads::open(path)?)
        }
    })
}
