use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::types::Result;

/// Bytes per slot of an int list. Values wider than the slot are rejected
/// on `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWidth {
    One,
    Two,
    Four,
    Eight,
}

impl SlotWidth {
    pub fn bytes(self) -> usize {
        match self {
            SlotWidth::One => 1,
            SlotWidth::Two => 2,
            SlotWidth::Four => 4,
            SlotWidth::Eight => 8,
        }
    }

    fn max_value(self) -> u64 {
        match self {
            SlotWidth::One => u8::MAX as u64,
            SlotWidth::Two => u16::MAX as u64,
            SlotWidth::Four => u32::MAX as u64,
            SlotWidth::Eight => u64::MAX,
        }
    }
}

/// A fixed-length array of fixed-width unsigned integers. Callers never
/// branch on whether the slots live in memory or in a scratch file.
pub trait IntList {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Result<u64>;

    fn set(&mut self, index: usize, value: u64) -> Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where per-object bookkeeping lists are held. The file variants trade
/// speed for scaling past available memory. `File` uses anonymous temp
/// files; `FileIn` creates named scratch files in the given directory and
/// removes them when the list is dropped, so callers can watch the
/// directory to confirm nothing outlives a run, completed or cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StorageBacking {
    #[default]
    Memory,
    File,
    FileIn(PathBuf),
}

impl StorageBacking {
    pub fn new_list(&self, width: SlotWidth, len: usize) -> Result<Box<dyn IntList>> {
        Ok(match self {
            StorageBacking::Memory => Box::new(MemoryIntList::new(width, len)),
            StorageBacking::File => Box::new(FileIntList::new(width, len)?),
            StorageBacking::FileIn(dir) => Box::new(FileIntList::new_in(width, len, dir)?),
        })
    }
}

/// Slots packed big-endian into one `Vec<u8>`.
pub struct MemoryIntList {
    width: SlotWidth,
    data: Vec<u8>,
}

impl MemoryIntList {
    pub fn new(width: SlotWidth, len: usize) -> Self {
        Self {
            width,
            data: vec![0; len * width.bytes()],
        }
    }
}

impl IntList for MemoryIntList {
    fn len(&self) -> usize {
        self.data.len() / self.width.bytes()
    }

    fn get(&self, index: usize) -> Result<u64> {
        let w = self.width.bytes();
        let slot = &self.data[index * w..index * w + w];
        Ok(unpack(slot))
    }

    fn set(&mut self, index: usize, value: u64) -> Result<()> {
        debug_assert!(value <= self.width.max_value());
        let w = self.width.bytes();
        pack(&mut self.data[index * w..index * w + w], value);
        Ok(())
    }
}

/// Slots packed into a scratch file. Slow per-slot access, but memory use
/// is constant regardless of list length.
pub struct FileIntList {
    width: SlotWidth,
    len: usize,
    file: RefCell<File>,
    // Held for named scratch files; dropping it removes the path.
    _path: Option<tempfile::TempPath>,
}

impl FileIntList {
    pub fn new(width: SlotWidth, len: usize) -> Result<Self> {
        let file = tempfile::tempfile()?;
        file.set_len((len * width.bytes()) as u64)?;
        Ok(Self {
            width,
            len,
            file: RefCell::new(file),
            _path: None,
        })
    }

    pub fn new_in(width: SlotWidth, len: usize, dir: &Path) -> Result<Self> {
        let (file, path) = tempfile::NamedTempFile::new_in(dir)?.into_parts();
        file.set_len((len * width.bytes()) as u64)?;
        Ok(Self {
            width,
            len,
            file: RefCell::new(file),
            _path: Some(path),
        })
    }
}

impl IntList for FileIntList {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Result<u64> {
        let w = self.width.bytes();
        let mut buf = [0u8; 8];
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start((index * w) as u64))?;
        file.read_exact(&mut buf[..w])?;
        Ok(unpack(&buf[..w]))
    }

    fn set(&mut self, index: usize, value: u64) -> Result<()> {
        debug_assert!(value <= self.width.max_value());
        let w = self.width.bytes();
        let mut buf = [0u8; 8];
        pack(&mut buf[..w], value);
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start((index * w) as u64))?;
        file.write_all(&buf[..w])?;
        Ok(())
    }
}

fn unpack(slot: &[u8]) -> u64 {
    slot.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn pack(slot: &mut [u8], value: u64) {
    let mut v = value;
    for b in slot.iter_mut().rev() {
        *b = (v & 0xff) as u8;
        v >>= 8;
    }
}
