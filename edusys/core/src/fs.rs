//! Linked-allocation file system over the simulated block device.
//!
//! The first track is the directory; every other track holds data cells.
//! Each cell stores one file record: a status byte, a linked TSB pointing at
//! the next cell of the same file ((0,0,0) = end of chain), and the payload.
//! On disk a record is a hex string: two uppercase characters per byte,
//! zero-padded to the cell's full capacity.

use crate::disk::{BlockDevice, DiskError, Tsb};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FsError {
    #[error("directory full")]
    DirectoryFull,
    #[error("not enough space on disk")]
    InsufficientSpace,
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("file already exists: {0}")]
    FileExists(String),
    #[error("file name does not fit in a directory entry")]
    NameTooLarge,
    #[error("file data spans more than one block")]
    RecordTooLarge,
    #[error("invalid file record: {0}")]
    InvalidRecord(String),
    #[error(transparent)]
    Disk(#[from] DiskError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Available,
    OccupiedText,
    OccupiedBinary,
}

impl FileStatus {
    pub fn code(self) -> u8 {
        match self {
            FileStatus::Available => 0,
            FileStatus::OccupiedText => 1,
            FileStatus::OccupiedBinary => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, FsError> {
        match code {
            0 => Ok(FileStatus::Available),
            1 => Ok(FileStatus::OccupiedText),
            2 => Ok(FileStatus::OccupiedBinary),
            other => Err(FsError::InvalidRecord(format!(
                "unknown status code {other}"
            ))),
        }
    }
}

/// Hex-encode a byte stream, append the NUL terminator, and split it into
/// cell-payload chunks. Every chunk is exactly `2 * capacity` characters;
/// the final one is zero-padded out to that length.
pub fn convert_data(data: &[u8], capacity: usize) -> Vec<String> {
    let mut stream = data.to_vec();
    stream.push(0);
    stream
        .chunks(capacity)
        .map(|chunk| {
            let mut hex: String = chunk.iter().map(|b| format!("{b:02X}")).collect();
            while hex.len() < capacity * 2 {
                hex.push('0');
            }
            hex
        })
        .collect()
}

/// Decode a hex payload back into bytes.
pub fn revert_data(hex: &str) -> Result<Vec<u8>, FsError> {
    let cleaned: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() % 2 != 0 {
        return Err(FsError::InvalidRecord(
            "payload has an odd number of hex characters".into(),
        ));
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .map_err(|_| FsError::InvalidRecord(format!("bad hex at offset {i}")))
        })
        .collect()
}

/// Strip the NUL terminator and zero padding from a decoded text payload.
fn strip_text_padding(mut bytes: Vec<u8>) -> Vec<u8> {
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}

/// One file record: the in-memory form of a disk cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub status: FileStatus,
    pub link: Tsb,
    pub data: Vec<u8>,
}

impl FileRecord {
    pub fn available() -> Self {
        Self {
            status: FileStatus::Available,
            link: Tsb::ZERO,
            data: Vec::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == FileStatus::Available
    }

    pub fn is_linked(&self) -> bool {
        !self.link.is_end()
    }

    /// Payload with terminator and padding stripped; how text (and file
    /// names) read back.
    pub fn text_data(&self) -> Vec<u8> {
        strip_text_padding(self.data.clone())
    }

    fn header_hex(status: FileStatus, link: Tsb) -> String {
        format!(
            "{:02X}{:02X}{:02X}{:02X}",
            status.code(),
            link.track,
            link.sector,
            link.block
        )
    }

    /// Encode into the on-disk hex string. The payload must fit a single
    /// cell; multi-cell data goes through the chaining write path instead.
    pub fn to_record_string(&self, block_size: usize) -> Result<String, FsError> {
        let capacity = block_size - 4;
        if self.data.len() > capacity {
            return Err(FsError::RecordTooLarge);
        }
        let mut out = Self::header_hex(self.status, self.link);
        for byte in &self.data {
            out.push_str(&format!("{byte:02X}"));
        }
        while out.len() < block_size * 2 {
            out.push('0');
        }
        Ok(out)
    }

    /// Decode an on-disk hex string. The payload keeps its padding; callers
    /// strip it where text semantics apply.
    pub fn from_record_string(record: &str) -> Result<Self, FsError> {
        let bytes = revert_data(record)?;
        if bytes.len() < 4 {
            return Err(FsError::InvalidRecord("record shorter than header".into()));
        }
        Ok(Self {
            status: FileStatus::from_code(bytes[0])?,
            link: Tsb::new(bytes[1], bytes[2], bytes[3]),
            data: bytes[4..].to_vec(),
        })
    }
}

/// The file system driver proper.
#[derive(Debug)]
pub struct FsDriver {
    device: BlockDevice,
}

impl FsDriver {
    pub fn new(device: BlockDevice) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &BlockDevice {
        &self.device
    }

    pub(crate) fn device_mut(&mut self) -> &mut BlockDevice {
        &mut self.device
    }

    /// Payload capacity of one cell, in bytes.
    pub fn data_capacity(&self) -> usize {
        self.device.block_size() - 4
    }

    /// Zero every cell, then write the master record at (0,0,0).
    pub fn format(&mut self) -> crate::Result<()> {
        log::info!("formatting disk");
        let zeros = "0".repeat(self.device.block_size() * 2);
        for tsb in self.device.addresses().collect::<Vec<_>>() {
            self.device.write(tsb, &zeros)?;
        }
        let master = FileRecord {
            status: FileStatus::OccupiedText,
            link: Tsb::ZERO,
            data: b"MBR".to_vec(),
        };
        self.write_record(Tsb::ZERO, &master)?;
        Ok(())
    }

    fn record_at(&self, tsb: Tsb) -> Result<FileRecord, FsError> {
        FileRecord::from_record_string(&self.device.read(tsb)?)
    }

    fn write_record(&mut self, tsb: Tsb, record: &FileRecord) -> Result<(), FsError> {
        let encoded = record.to_record_string(self.device.block_size())?;
        self.device.write(tsb, &encoded)?;
        Ok(())
    }

    fn zero_cell(&mut self, tsb: Tsb) -> Result<(), FsError> {
        let zeros = "0".repeat(self.device.block_size() * 2);
        self.device.write(tsb, &zeros)?;
        Ok(())
    }

    /// Directory cells: the first track, minus the master record.
    fn directory_addresses(&self) -> impl Iterator<Item = Tsb> {
        self.device.addresses().filter(|tsb| {
            tsb.track == 0 && !tsb.is_end()
        })
    }

    /// Data cells: every track past the directory.
    fn data_addresses(&self) -> impl Iterator<Item = Tsb> {
        self.device.addresses().filter(|tsb| tsb.track > 0)
    }

    /// First available directory cell.
    pub fn find_free_file(&self) -> Result<Tsb, FsError> {
        for tsb in self.directory_addresses() {
            if self.record_at(tsb)?.is_available() {
                return Ok(tsb);
            }
        }
        Err(FsError::DirectoryFull)
    }

    /// Locate a file's directory entry by name.
    pub fn find_file(&self, name: &str) -> Result<(Tsb, FileRecord), FsError> {
        for tsb in self.directory_addresses() {
            let record = self.record_at(tsb)?;
            if !record.is_available() && record.text_data() == name.as_bytes() {
                return Ok((tsb, record));
            }
        }
        Err(FsError::FileNotFound(name.to_string()))
    }

    /// Claim a free directory cell and store the name as its payload.
    pub fn create_file(&mut self, name: &str) -> Result<Tsb, FsError> {
        if name.len() > self.data_capacity() {
            return Err(FsError::NameTooLarge);
        }
        if self.find_file(name).is_ok() {
            return Err(FsError::FileExists(name.to_string()));
        }
        let tsb = self.find_free_file()?;
        let record = FileRecord {
            status: FileStatus::OccupiedText,
            link: Tsb::ZERO,
            data: name.as_bytes().to_vec(),
        };
        self.write_record(tsb, &record)?;
        log::debug!("created file {name:?} at {tsb}");
        Ok(tsb)
    }

    /// Overwrite a file's contents. The data is chunked into cells chained
    /// by their linked TSBs; with too few free cells nothing is written.
    pub fn write_file(&mut self, name: &str, data: &[u8], binary: bool) -> Result<(), FsError> {
        let (dir_tsb, mut dir_record) = self.find_file(name)?;
        let chunks = convert_data(data, self.data_capacity());

        // Reserve fresh cells for the whole chain up front; the old chain
        // is released only after the new one is in place.
        let mut free = Vec::with_capacity(chunks.len());
        for tsb in self.data_addresses().collect::<Vec<_>>() {
            if free.len() == chunks.len() {
                break;
            }
            if self.record_at(tsb)?.is_available() {
                free.push(tsb);
            }
        }
        if free.len() < chunks.len() {
            log::warn!(
                "write of {name:?} needs {} cells, only {} free",
                chunks.len(),
                free.len()
            );
            return Err(FsError::InsufficientSpace);
        }

        let status = if binary {
            FileStatus::OccupiedBinary
        } else {
            FileStatus::OccupiedText
        };
        for (i, chunk) in chunks.iter().enumerate() {
            let link = free.get(i + 1).copied().unwrap_or(Tsb::ZERO);
            let encoded = format!("{}{}", FileRecord::header_hex(status, link), chunk);
            self.device.write(free[i], &encoded)?;
        }

        let old_chain = self.chain_from(dir_record.link)?;
        dir_record.link = free[0];
        self.write_record(dir_tsb, &dir_record)?;
        for tsb in old_chain {
            self.zero_cell(tsb)?;
        }
        log::debug!("wrote {} bytes to {name:?} across {} cells", data.len(), chunks.len());
        Ok(())
    }

    /// Read a file's contents by walking its chain. Text payloads come back
    /// with terminator and padding stripped; binary payloads are returned
    /// whole (callers know their real length).
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>, FsError> {
        let (_, dir_record) = self.find_file(name)?;
        let mut bytes = Vec::new();
        let mut text = true;
        for tsb in self.chain_from(dir_record.link)? {
            let record = self.record_at(tsb)?;
            if record.status == FileStatus::OccupiedBinary {
                text = false;
            }
            bytes.extend_from_slice(&record.data);
        }
        Ok(if text { strip_text_padding(bytes) } else { bytes })
    }

    /// Remove a file: zero its chain, then its directory entry.
    pub fn delete_file(&mut self, name: &str) -> Result<(), FsError> {
        let (dir_tsb, dir_record) = self.find_file(name)?;
        for tsb in self.chain_from(dir_record.link)? {
            self.zero_cell(tsb)?;
        }
        self.zero_cell(dir_tsb)?;
        log::debug!("deleted file {name:?}");
        Ok(())
    }

    /// Collect the cell addresses of a chain starting at `first`.
    fn chain_from(&self, first: Tsb) -> Result<Vec<Tsb>, FsError> {
        let mut chain = Vec::new();
        let mut current = first;
        while !current.is_end() {
            if chain.contains(&current) {
                return Err(FsError::InvalidRecord(format!(
                    "link cycle through {current}"
                )));
            }
            chain.push(current);
            current = self.record_at(current)?.link;
        }
        Ok(chain)
    }

    /// The full device contents, for the display layer.
    pub fn get_contents(&self) -> Vec<Vec<Vec<String>>> {
        self.device.contents()
    }
}
