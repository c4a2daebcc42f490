use std::fs::File;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail, ensure};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::{Mmap, MmapOptions};

use crate::text::latin1_to_string;

const COMMENT_LEN: usize = 256;
const SIGNATURE_LEN: usize = 16;
const HEADER_SIZE: usize = COMMENT_LEN + SIGNATURE_LEN + 6 * 4;
const ENTRY_SIZE: usize = 80;
const NAME_LEN: usize = 64;

const TYPE_DIRECTORY: u32 = 0x8000_0000;

pub const SIGNATURE_G1: &[u8; SIGNATURE_LEN] = b"PSVDSC_V2.00\r\n\r\n";
pub const SIGNATURE_G2: &[u8; SIGNATURE_LEN] = b"PSVDSC_V2.00\n\r\n\r";

/// A file stored in a VDF volume. Directory entries are flattened away; the
/// engine addresses files by bare name.
#[derive(Debug, Clone)]
pub struct VdfEntry {
    pub name: String,
    pub offset: u64,
    pub size: u32,
}

impl VdfEntry {
    pub fn data_range(&self) -> Range<usize> {
        let start = self.offset as usize;
        let end = start + self.size as usize;
        start..end
    }
}

#[derive(Debug)]
pub struct VdfArchive {
    path: PathBuf,
    mmap: Mmap,
    entries: Vec<VdfEntry>,
}

impl VdfArchive {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let file = File::open(&path_buf)
            .with_context(|| format!("opening VDF volume at {}", path_buf.display()))?;
        let mmap = unsafe { MmapOptions::new().map(&file) }
            .with_context(|| format!("memory-mapping VDF volume {}", path_buf.display()))?;

        let entries = parse_entries(&mmap)
            .with_context(|| format!("parsing VDF volume {}", path_buf.display()))?;

        Ok(VdfArchive {
            path: path_buf,
            mmap,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[VdfEntry] {
        &self.entries
    }

    pub fn find_entry(&self, name: &str) -> Option<&VdfEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    pub fn read_entry_bytes(&self, entry: &VdfEntry) -> &[u8] {
        &self.mmap[entry.data_range()]
    }

    pub fn extract_entry<P: AsRef<Path>>(&self, entry: &VdfEntry, dest: P) -> Result<()> {
        let bytes = self.read_entry_bytes(entry);
        let mut file = File::create(dest.as_ref())
            .with_context(|| format!("creating {}", dest.as_ref().display()))?;
        file.write_all(bytes)
            .with_context(|| format!("writing {}", dest.as_ref().display()))?;
        Ok(())
    }
}

fn parse_entries(mmap: &[u8]) -> Result<Vec<VdfEntry>> {
    ensure!(
        mmap.len() >= HEADER_SIZE,
        "VDF volume is too small to contain a header"
    );

    let signature = &mmap[COMMENT_LEN..COMMENT_LEN + SIGNATURE_LEN];
    if signature != SIGNATURE_G1 && signature != SIGNATURE_G2 {
        bail!("VDF volume missing PSVDSC signature");
    }

    let fields = &mmap[COMMENT_LEN + SIGNATURE_LEN..HEADER_SIZE];
    let entry_count = LittleEndian::read_u32(&fields[0..4]) as usize;
    let root_offset = LittleEndian::read_u32(&fields[16..20]) as usize;
    let entry_size = LittleEndian::read_u32(&fields[20..24]) as usize;
    ensure!(
        entry_size == ENTRY_SIZE,
        "unexpected VDF entry size {entry_size}"
    );

    let table_len = entry_count
        .checked_mul(ENTRY_SIZE)
        .ok_or_else(|| anyhow!("VDF entry count overflow"))?;
    let table_end = root_offset
        .checked_add(table_len)
        .ok_or_else(|| anyhow!("VDF entry table overflow"))?;
    ensure!(
        table_end <= mmap.len(),
        "VDF volume truncated before end of entry table"
    );

    let mut entries = Vec::new();
    for index in 0..entry_count {
        let base = root_offset + index * ENTRY_SIZE;
        let raw = &mmap[base..base + ENTRY_SIZE];
        let entry_type = LittleEndian::read_u32(&raw[NAME_LEN + 8..NAME_LEN + 12]);
        if entry_type & TYPE_DIRECTORY != 0 {
            continue;
        }

        let name = latin1_to_string(&raw[..NAME_LEN]).trim_end_matches([' ', '\0']).to_string();
        ensure!(!name.is_empty(), "VDF entry {index} has an empty name");
        let offset = LittleEndian::read_u32(&raw[NAME_LEN..NAME_LEN + 4]) as usize;
        let size = LittleEndian::read_u32(&raw[NAME_LEN + 4..NAME_LEN + 8]);
        let end = offset
            .checked_add(size as usize)
            .ok_or_else(|| anyhow!("VDF entry {index} size overflow"))?;
        ensure!(
            end <= mmap.len(),
            "VDF entry {index} ({name}) data extends beyond file"
        );

        entries.push(VdfEntry {
            name,
            offset: offset as u64,
            size,
        });
    }

    Ok(entries)
}
