//! Application archive codec.
//!
//! Layout (before gzip), all integers little-endian:
//!
//! ```text
//! u32 entry count
//! per entry: u16 name length, name (utf-8), u32 content length, content
//! ```
//!
//! Names are relative to the mount point. A name ending in `/` is a
//! directory and has no content.

use std::path::Path;

use walkdir::WalkDir;

use crate::error::ArchiveError;

/// Smallest possible entry: empty name, empty content.
const MIN_ENTRY_LEN: usize = 2 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn file(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// `name` gets its trailing `/` if missing.
    pub fn dir(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        Self {
            name,
            data: Vec::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], ArchiveError> {
        let remaining = self.bytes.len() - self.offset;
        if len > remaining {
            return Err(ArchiveError::Truncated {
                offset: self.offset,
                needed: len - remaining,
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, ArchiveError> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> Result<u32, ArchiveError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}

/// Decode an uncompressed archive, validating every entry.
pub fn decode(bytes: &[u8]) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut reader = Reader { bytes, offset: 0 };
    let count = reader.u32()?;
    if (count as usize).saturating_mul(MIN_ENTRY_LEN) > reader.remaining() {
        return Err(ArchiveError::ImplausibleCount {
            count,
            available: reader.remaining(),
        });
    }

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_len = reader.u16()? as usize;
        let name_at = reader.offset;
        let name = std::str::from_utf8(reader.take(name_len)?)
            .map_err(|_| ArchiveError::NameEncoding(name_at))?
            .to_string();
        let data_len = reader.u32()? as usize;
        let data = reader.take(data_len)?.to_vec();
        validate_name(&name)?;
        if name.ends_with('/') && !data.is_empty() {
            return Err(ArchiveError::DirectoryWithContent(name));
        }
        entries.push(ArchiveEntry { name, data });
    }

    if reader.remaining() > 0 {
        return Err(ArchiveError::TrailingBytes(reader.remaining()));
    }
    Ok(entries)
}

pub fn encode(entries: &[ArchiveEntry]) -> Result<Vec<u8>, ArchiveError> {
    let count = u32::try_from(entries.len()).map_err(|_| ArchiveError::TooLarge {
        name: "<archive>".to_string(),
        len: entries.len(),
    })?;
    let total: usize = entries
        .iter()
        .map(|entry| MIN_ENTRY_LEN + entry.name.len() + entry.data.len())
        .sum();
    let mut out = Vec::with_capacity(4 + total);
    out.extend_from_slice(&count.to_le_bytes());
    for entry in entries {
        validate_name(&entry.name)?;
        let name_len = u16::try_from(entry.name.len()).map_err(|_| ArchiveError::TooLarge {
            name: entry.name.clone(),
            len: entry.name.len(),
        })?;
        let data_len = u32::try_from(entry.data.len()).map_err(|_| ArchiveError::TooLarge {
            name: entry.name.clone(),
            len: entry.data.len(),
        })?;
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(entry.name.as_bytes());
        out.extend_from_slice(&data_len.to_le_bytes());
        out.extend_from_slice(&entry.data);
    }
    Ok(out)
}

/// Collect a project directory, directories before their contents.
pub fn pack_dir(root: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    if !root.is_dir() {
        return Err(ArchiveError::Read {
            path: root.display().to_string(),
            reason: "not a directory".to_string(),
        });
    }
    let mut entries = Vec::new();
    for item in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let item = item.map_err(|err| ArchiveError::Read {
            path: root.display().to_string(),
            reason: err.to_string(),
        })?;
        let relative = item
            .path()
            .strip_prefix(root)
            .map_err(|err| ArchiveError::Read {
                path: item.path().display().to_string(),
                reason: err.to_string(),
            })?;
        let name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if item.file_type().is_dir() {
            entries.push(ArchiveEntry::dir(name));
        } else if item.file_type().is_file() {
            let data = std::fs::read(item.path()).map_err(|err| ArchiveError::Read {
                path: item.path().display().to_string(),
                reason: err.to_string(),
            })?;
            entries.push(ArchiveEntry::file(name, data));
        }
    }
    if entries.is_empty() {
        return Err(ArchiveError::Empty(root.display().to_string()));
    }
    Ok(entries)
}

fn validate_name(name: &str) -> Result<(), ArchiveError> {
    let trimmed = name.trim_end_matches('/');
    let unsafe_name = trimmed.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.contains('\0')
        || trimmed.split('/').any(|segment| segment == ".." || segment.is_empty());
    if unsafe_name {
        return Err(ArchiveError::UnsafeName(name.to_string()));
    }
    Ok(())
}
