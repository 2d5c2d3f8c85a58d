use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rkyv::Deserialize;

use crate::model::CatalogRecord;

/// Append-only catalog segment.
///
/// Entries are length-prefixed rkyv blobs: [Length (4b LE)][Data (N bytes)].
/// Records are immutable once appended, so offsets handed out by `append`
/// stay valid for the life of the file.
#[derive(Debug)]
pub struct Segment {
    pub file_path: PathBuf,
    file: File,
    current_offset: u64,
}

impl Segment {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let current_offset = file.metadata()?.len();

        Ok(Self {
            file_path: path.to_path_buf(),
            file,
            current_offset,
        })
    }

    pub fn append(&mut self, record: &CatalogRecord) -> io::Result<u64> {
        let bytes = rkyv::to_bytes::<_, 8192>(record)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        let start = self.current_offset;

        // The committed offset is the only write position we trust; the
        // descriptor's cursor is unspecified after open or any read.
        self.file.seek(SeekFrom::Start(start))?;

        let len = bytes.len() as u32;
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&bytes)?;
        self.file.sync_data()?;

        self.current_offset += 4 + bytes.len() as u64;
        Ok(start)
    }

    pub fn read(&self, offset: u64) -> io::Result<CatalogRecord> {
        // Fresh descriptor: a cloned handle would share the writer's cursor
        let mut file = File::open(&self.file_path)?;
        file.seek(SeekFrom::Start(offset))?;
        read_entry(&mut file).map(|(record, _)| record)
    }

    /// An independent read descriptor plus the committed end offset, for
    /// scans that must not hold whatever lock guards the writer.
    pub fn reader(&self) -> io::Result<SegmentReader> {
        Ok(SegmentReader {
            file: File::open(&self.file_path)?,
            end: self.current_offset,
        })
    }
}

/// Sequential full-scan reader over a segment snapshot. Entries appended
/// after `reader()` was taken are not observed.
pub struct SegmentReader {
    file: File,
    end: u64,
}

impl SegmentReader {
    /// Read every record in append order, yielding (offset, record).
    pub fn scan(mut self) -> io::Result<Vec<(u64, CatalogRecord)>> {
        self.file.seek(SeekFrom::Start(0))?;

        let mut out = Vec::new();
        let mut offset = 0u64;
        while offset < self.end {
            let (record, consumed) = read_entry(&mut self.file)?;
            out.push((offset, record));
            offset += consumed;
        }
        Ok(out)
    }
}

fn read_entry(file: &mut File) -> io::Result<(CatalogRecord, u64)> {
    let mut len_buf = [0u8; 4];
    file.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut bytes = vec![0u8; len];
    file.read_exact(&mut bytes)?;

    // Validation needs the archive's native alignment
    let mut aligned = rkyv::AlignedVec::with_capacity(len);
    aligned.extend_from_slice(&bytes);

    let archived = rkyv::check_archived_root::<CatalogRecord>(&aligned)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    let record: CatalogRecord = archived
        .deserialize(&mut rkyv::Infallible)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "corrupt catalog entry"))?;

    Ok((record, 4 + len as u64))
}
