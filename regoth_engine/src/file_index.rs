use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::warn;
use regoth_formats::VdfArchive;
use walkdir::WalkDir;

/// Read-only lookup of game files by name. Names are case-insensitive.
pub trait FileIndex {
    fn has_file(&self, name: &str) -> bool;

    fn read_file(&self, name: &str) -> Result<Vec<u8>>;
}

fn key(name: &str) -> String {
    name.to_ascii_uppercase()
}

/// Loose files under one or more directory trees, keyed by file name.
#[derive(Debug, Default, Clone)]
pub struct DirectoryIndex {
    files: HashMap<String, PathBuf>,
}

impl DirectoryIndex {
    pub fn from_root(root: &Path) -> Result<Self> {
        let mut index = DirectoryIndex::default();
        index.extend_from_root(root)?;
        Ok(index)
    }

    /// Earlier roots win when two trees hold the same file name.
    pub fn extend_from_root(&mut self, root: &Path) -> Result<()> {
        if !root.is_dir() {
            bail!("{} is not a directory", root.display());
        }
        for entry in WalkDir::new(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("failed to traverse {}: {err}", root.display());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            self.files
                .entry(key(name))
                .or_insert_with(|| entry.path().to_path_buf());
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FileIndex for DirectoryIndex {
    fn has_file(&self, name: &str) -> bool {
        self.files.contains_key(&key(name))
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let Some(path) = self.files.get(&key(name)) else {
            bail!("file {name} is not in the index");
        };
        fs::read(path).with_context(|| format!("reading {}", path.display()))
    }
}

/// Packed archives, searched in the order they were added.
#[derive(Debug, Default)]
pub struct ArchiveIndex {
    archives: Vec<VdfArchive>,
}

impl ArchiveIndex {
    pub fn open<I, P>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut archives = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let archive = VdfArchive::open(path)
                .with_context(|| format!("opening archive {}", path.display()))?;
            archives.push(archive);
        }
        if archives.is_empty() {
            bail!("no archives given");
        }
        Ok(Self { archives })
    }

    pub fn archives(&self) -> &[VdfArchive] {
        &self.archives
    }
}

impl FileIndex for ArchiveIndex {
    fn has_file(&self, name: &str) -> bool {
        self.archives
            .iter()
            .any(|archive| archive.find_entry(name).is_some())
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        for archive in &self.archives {
            if let Some(entry) = archive.find_entry(name) {
                return Ok(archive.read_entry_bytes(entry).to_vec());
            }
        }
        bail!("file {name} is not in any archive")
    }
}

/// In-memory files, mostly for tests and tooling.
#[derive(Debug, Default, Clone)]
pub struct MemoryIndex {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, bytes: Vec<u8>) {
        self.files.insert(key(name), bytes);
    }

    pub fn with_file(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.insert(name, bytes);
        self
    }
}

impl FileIndex for MemoryIndex {
    fn has_file(&self, name: &str) -> bool {
        self.files.contains_key(&key(name))
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        match self.files.get(&key(name)) {
            Some(bytes) => Ok(bytes.clone()),
            None => bail!("file {name} is not in the index"),
        }
    }
}

/// Indexes consulted in order; the first one holding a name serves it.
#[derive(Default)]
pub struct LayeredIndex {
    layers: Vec<Box<dyn FileIndex>>,
}

impl LayeredIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, layer: Box<dyn FileIndex>) {
        self.layers.push(layer);
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl FileIndex for LayeredIndex {
    fn has_file(&self, name: &str) -> bool {
        self.layers.iter().any(|layer| layer.has_file(name))
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        match self.layers.iter().find(|layer| layer.has_file(name)) {
            Some(layer) => layer.read_file(name),
            None => bail!("file {name} is not in the index"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn directory_index_matches_names_case_insensitively() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("worlds"))?;
        fs::write(dir.path().join("worlds").join("NewWorld.zen"), b"zen")?;

        let index = DirectoryIndex::from_root(dir.path())?;
        assert_eq!(index.len(), 1);
        assert!(index.has_file("NEWWORLD.ZEN"));
        assert_eq!(index.read_file("newworld.zen")?, b"zen");
        assert!(index.read_file("oldmine.zen").is_err());
        Ok(())
    }

    #[test]
    fn layered_index_prefers_earlier_layers() -> Result<()> {
        let mut layered = LayeredIndex::new();
        layered.push(Box::new(MemoryIndex::new().with_file("a.txt", b"first".to_vec())));
        layered.push(Box::new(
            MemoryIndex::new()
                .with_file("A.TXT", b"second".to_vec())
                .with_file("b.txt", b"b".to_vec()),
        ));
        assert_eq!(layered.read_file("a.txt")?, b"first");
        assert_eq!(layered.read_file("b.txt")?, b"b");
        assert!(!layered.has_file("c.txt"));
        Ok(())
    }
}
