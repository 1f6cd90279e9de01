//! Reader for Valve VPK directory archives (versions 1 and 2).
//!
//! A VPK "directory" file (`pak01_dir.vpk`) starts with a small header followed
//! by a tree of NUL-terminated strings grouped extension -> directory -> file
//! name. Each file record points either into the directory file's own data
//! section or into a numbered sibling part archive (`pak01_000.vpk`, ...).
//!
//! ```text
//! header    signature u32, version u32, tree_size u32 [, 4 x u32 section sizes (v2)]
//! tree      ext\0 { dir\0 { name\0 crc u32, preload u16, index u16, offset u32, len u32, 0xFFFF, preload bytes }* \0 }* \0 ... \0
//! data      entries stored in the directory file (index 0x7FFF)
//! ```

use crate::error::{ArchiveError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Seek, SeekFrom};

/// Magic number at the start of every VPK directory file.
pub const VPK_SIGNATURE: u32 = 0x55AA_1234;

/// Archive index meaning "data lives in the directory file itself".
pub const DIR_ARCHIVE_INDEX: u16 = 0x7FFF;

const ENTRY_TERMINATOR: u16 = 0xFFFF;
const DIR_SUFFIX: &str = "_dir.vpk";

/// Read access to a packed archive.
///
/// This is the seam the merge orchestrator enumerates entries through; tests
/// substitute an in-memory implementation.
pub trait ArchiveReader {
    /// All entry paths, forward-slash separated, in archive order.
    fn entry_paths(&self) -> &[String];

    /// Read the full payload of one entry.
    fn read_entry(&mut self, path: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
struct VpkEntry {
    preload: Vec<u8>,
    archive_index: u16,
    offset: u32,
    length: u32,
}

/// A mounted VPK directory file.
pub struct VpkArchive {
    path: Utf8PathBuf,
    version: u32,
    /// Absolute offset of the directory file's embedded data section.
    data_offset: u64,
    paths: Vec<String>,
    entries: HashMap<String, VpkEntry>,
    /// Open handles keyed by archive index, reused across reads.
    handles: HashMap<u16, File>,
}

impl VpkArchive {
    /// Open and parse a VPK directory file.
    ///
    /// Fails with [`ArchiveError::NotFound`] when `path` does not exist and with
    /// [`ArchiveError::Corrupt`] when it exists but cannot be parsed.
    pub fn open(path: impl AsRef<Utf8Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = match File::open(path.as_std_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArchiveError::NotFound(path.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let archive = Self::parse(path, &mut reader)?;
        tracing::debug!(
            "Mounted VPK v{} path={} entries={}",
            archive.version,
            archive.path,
            archive.paths.len()
        );
        Ok(archive)
    }

    /// VPK format version (1 or 2).
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Path of the directory file this archive was opened from.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Number of entries in the directory tree.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn parse<R: Read>(path: &Utf8Path, reader: &mut R) -> Result<Self> {
        let corrupt = |reason: String| ArchiveError::Corrupt {
            path: path.to_owned(),
            reason,
        };

        let signature = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| corrupt(format!("truncated header: {}", e)))?;
        if signature != VPK_SIGNATURE {
            return Err(corrupt(format!("bad signature {:#010x}", signature)));
        }

        let version = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| corrupt(format!("truncated header: {}", e)))?;
        let tree_size = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| corrupt(format!("truncated header: {}", e)))?;

        let header_len: u64 = match version {
            1 => 12,
            2 => {
                // file data, archive md5, other md5 and signature section sizes
                let mut skipped = [0u8; 16];
                reader
                    .read_exact(&mut skipped)
                    .map_err(|e| corrupt(format!("truncated v2 header: {}", e)))?;
                28
            }
            other => return Err(corrupt(format!("unsupported version {}", other))),
        };

        // tree_size is untrusted; only allocate what the file actually holds
        let mut tree = Vec::new();
        reader
            .by_ref()
            .take(tree_size as u64)
            .read_to_end(&mut tree)
            .map_err(|e| corrupt(format!("unreadable tree: {}", e)))?;
        if tree.len() != tree_size as usize {
            return Err(corrupt(format!(
                "tree shorter than {} bytes ({} available)",
                tree_size,
                tree.len()
            )));
        }

        let (paths, entries) = parse_tree(&tree).map_err(corrupt)?;

        Ok(Self {
            path: path.to_owned(),
            version,
            data_offset: header_len + tree_size as u64,
            paths,
            entries,
            handles: HashMap::new(),
        })
    }

    /// Path of the numbered part archive holding entries with `archive_index`.
    fn part_path(&self, archive_index: u16) -> Result<Utf8PathBuf> {
        let file_name = self.path.file_name().unwrap_or_default();
        let Some(prefix) = file_name.strip_suffix(DIR_SUFFIX) else {
            return Err(ArchiveError::Corrupt {
                path: self.path.clone(),
                reason: format!(
                    "entry references part archive {} but the file name has no '{}' suffix",
                    archive_index, DIR_SUFFIX
                ),
            });
        };

        let part_name = format!("{}_{:03}.vpk", prefix, archive_index);
        Ok(match self.path.parent() {
            Some(parent) => parent.join(part_name),
            None => Utf8PathBuf::from(part_name),
        })
    }

    /// File holding the data of entries with `archive_index`.
    fn data_path(&self, archive_index: u16) -> Result<Utf8PathBuf> {
        if archive_index == DIR_ARCHIVE_INDEX {
            Ok(self.path.clone())
        } else {
            self.part_path(archive_index)
        }
    }

    fn handle(&mut self, archive_index: u16) -> Result<&mut File> {
        let file_path = self.data_path(archive_index)?;

        Ok(match self.handles.entry(archive_index) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => slot.insert(File::open(file_path.as_std_path())?),
        })
    }
}

impl ArchiveReader for VpkArchive {
    fn entry_paths(&self) -> &[String] {
        &self.paths
    }

    fn read_entry(&mut self, path: &str) -> Result<Vec<u8>> {
        let entry = self
            .entries
            .get(path)
            .cloned()
            .ok_or_else(|| ArchiveError::MissingEntry(path.to_string()))?;

        if entry.length == 0 {
            return Ok(entry.preload);
        }

        let offset = if entry.archive_index == DIR_ARCHIVE_INDEX {
            self.data_offset + entry.offset as u64
        } else {
            entry.offset as u64
        };
        let data_path = self.data_path(entry.archive_index)?;
        let corrupt = |reason: String| ArchiveError::Corrupt {
            path: data_path.clone(),
            reason,
        };

        let file = self.handle(entry.archive_index)?;
        let file_len = file.metadata()?.len();
        let end = offset.saturating_add(entry.length as u64);
        if end > file_len {
            return Err(corrupt(format!(
                "entry '{}' spans bytes {}..{} but the file is {} bytes",
                path, offset, end, file_len
            )));
        }

        let mut bytes = Vec::with_capacity(entry.preload.len() + entry.length as usize);
        bytes.extend_from_slice(&entry.preload);
        let start = bytes.len();
        bytes.resize(start + entry.length as usize, 0);

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut bytes[start..]).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                corrupt(format!("entry '{}' is truncated", path))
            }
            _ => ArchiveError::from(e),
        })?;

        Ok(bytes)
    }
}

type ParsedTree = (Vec<String>, HashMap<String, VpkEntry>);

fn parse_tree(tree: &[u8]) -> std::result::Result<ParsedTree, String> {
    let mut cursor = Cursor::new(tree);
    let mut paths = Vec::new();
    let mut entries = HashMap::new();

    loop {
        let extension = read_cstring(&mut cursor)?;
        if extension.is_empty() {
            break;
        }

        loop {
            let directory = read_cstring(&mut cursor)?;
            if directory.is_empty() {
                break;
            }

            loop {
                let name = read_cstring(&mut cursor)?;
                if name.is_empty() {
                    break;
                }

                let entry = read_entry_record(&mut cursor)
                    .map_err(|e| format!("truncated record for '{}': {}", name, e))?;
                let full_path = join_entry_path(&directory, &name, &extension);
                if entries.insert(full_path.clone(), entry).is_none() {
                    paths.push(full_path);
                }
            }
        }
    }

    Ok((paths, entries))
}

fn read_entry_record(cursor: &mut Cursor<&[u8]>) -> std::result::Result<VpkEntry, String> {
    // crc32 of the payload, not verified here
    let _crc = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    let preload_len = cursor.read_u16::<LittleEndian>().map_err(|e| e.to_string())?;
    let archive_index = cursor.read_u16::<LittleEndian>().map_err(|e| e.to_string())?;
    let offset = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    let length = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    let terminator = cursor.read_u16::<LittleEndian>().map_err(|e| e.to_string())?;
    if terminator != ENTRY_TERMINATOR {
        return Err(format!("bad record terminator {:#06x}", terminator));
    }

    let mut preload = vec![0u8; preload_len as usize];
    cursor.read_exact(&mut preload).map_err(|e| e.to_string())?;

    Ok(VpkEntry {
        preload,
        archive_index,
        offset,
        length,
    })
}

fn read_cstring(cursor: &mut Cursor<&[u8]>) -> std::result::Result<String, String> {
    let mut buf = Vec::new();
    cursor
        .read_until(0, &mut buf)
        .map_err(|e| e.to_string())?;
    if buf.pop() != Some(0) {
        return Err("unterminated string in directory tree".to_string());
    }
    String::from_utf8(buf).map_err(|e| format!("non UTF-8 name in directory tree: {}", e))
}

/// Rebuild `dir/name.ext`; a single space stands for an empty component.
fn join_entry_path(directory: &str, name: &str, extension: &str) -> String {
    let mut path = String::new();
    if directory != " " {
        path.push_str(&directory.replace('\\', "/"));
        path.push('/');
    }
    path.push_str(name);
    if extension != " " {
        path.push('.');
        path.push_str(extension);
    }
    path
}
