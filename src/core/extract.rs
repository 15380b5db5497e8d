use crate::core::progress::ProgressReporter;
use crate::error::{Result, UpdaterError};
use crate::utils::fs;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Entry, EntryType};
use tracing::{debug, info};
use xz2::read::XzDecoder;

const PROGRESS_LABEL: &str = "unpack:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    RegularFile,
    Other,
}

impl From<EntryType> for EntryKind {
    fn from(entry_type: EntryType) -> Self {
        if entry_type.is_dir() {
            EntryKind::Directory
        } else if entry_type.is_file() {
            EntryKind::RegularFile
        } else {
            EntryKind::Other
        }
    }
}

/// One member of the archive as recorded in its headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub kind: EntryKind,
    /// Zero for anything but regular files.
    pub size: u64,
}

impl ArchiveEntry {
    fn read<R: Read>(entry: &Entry<'_, R>) -> io::Result<Self> {
        let kind = EntryKind::from(entry.header().entry_type());
        Ok(Self {
            name: entry.path()?.to_string_lossy().into_owned(),
            kind,
            size: if kind == EntryKind::RegularFile {
                entry.size()
            } else {
                0
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Xz,
    Zstd,
    Bzip2,
    Plain,
}

impl Compression {
    /// Sniffs the compression from the first bytes of the file.
    pub fn detect(magic: &[u8]) -> Self {
        if magic.starts_with(&[0x1f, 0x8b]) {
            Compression::Gzip
        } else if magic.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Compression::Xz
        } else if magic.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Compression::Zstd
        } else if magic.starts_with(b"BZh") {
            Compression::Bzip2
        } else {
            Compression::Plain
        }
    }

    fn decoder<'a, R: Read + 'a>(self, reader: R) -> io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::Gzip => Box::new(MultiGzDecoder::new(reader)),
            Compression::Xz => Box::new(XzDecoder::new(reader)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
            Compression::Plain => Box::new(reader),
            Compression::Bzip2 => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "bzip2 compression is not supported",
                ))
            }
        })
    }
}

/// Unpacks a tar archive into a target directory.
///
/// The archive is opened and its entries listed in
/// [`ExtractionSession::open`]; [`ExtractionSession::run`] rewinds and
/// extracts. The handle is released by [`ExtractionSession::close`] or on
/// drop.
pub struct ExtractionSession {
    archive: Option<File>,
    archive_path: PathBuf,
    compression: Compression,
    entries: Vec<ArchiveEntry>,
    target_dir: PathBuf,
    total_file_bytes: u64,
    bytes_extracted: u64,
}

impl ExtractionSession {
    pub fn open<P: Into<PathBuf>, T: Into<PathBuf>>(archive_path: P, target_dir: T) -> Result<Self> {
        let archive_path = archive_path.into();
        let format_error = |message: String| UpdaterError::ArchiveFormat {
            path: archive_path.clone(),
            message,
        };

        let mut file = File::open(&archive_path).map_err(|e| format_error(e.to_string()))?;

        let mut magic = Vec::with_capacity(6);
        Read::by_ref(&mut file)
            .take(6)
            .read_to_end(&mut magic)
            .map_err(|e| format_error(e.to_string()))?;
        if magic.is_empty() {
            return Err(format_error("empty file".to_string()));
        }

        let compression = Compression::detect(&magic);
        debug!("{} looks like {compression:?}", archive_path.display());

        let entries = list_entries(&mut file, compression).map_err(|e| format_error(e.to_string()))?;
        let total_file_bytes = entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::RegularFile)
            .map(|entry| entry.size)
            .sum();

        Ok(Self {
            archive: Some(file),
            archive_path,
            compression,
            entries,
            target_dir: target_dir.into(),
            total_file_bytes,
            bytes_extracted: 0,
        })
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn total_file_bytes(&self) -> u64 {
        self.total_file_bytes
    }

    pub fn bytes_extracted(&self) -> u64 {
        self.bytes_extracted
    }

    /// Extracts every directory and regular file, in archive order.
    ///
    /// Other entry kinds (links, devices) are skipped. The first entry that
    /// cannot be extracted aborts the whole run.
    pub fn run<W: Write>(&mut self, progress: &mut ProgressReporter<W>) -> Result<u64> {
        let file = self
            .archive
            .as_mut()
            .ok_or_else(|| UpdaterError::extraction_error("", "extraction session already closed"))?;

        fs::ensure_dir_exists(&self.target_dir)?;

        let format_error = |e: io::Error| UpdaterError::ArchiveFormat {
            path: self.archive_path.clone(),
            message: e.to_string(),
        };

        file.rewind()?;
        let mut archive = Archive::new(self.compression.decoder(&mut *file).map_err(format_error)?);
        let total = self.total_file_bytes;
        self.bytes_extracted = 0;

        for entry in archive.entries().map_err(format_error)? {
            let mut entry = entry.map_err(format_error)?;
            let info = ArchiveEntry::read(&entry).map_err(format_error)?;

            match info.kind {
                EntryKind::Directory => {
                    unpack_entry(&mut entry, &info.name, &self.target_dir)?;
                }
                EntryKind::RegularFile => {
                    unpack_entry(&mut entry, &info.name, &self.target_dir)?;
                    self.bytes_extracted += info.size;
                    if self.bytes_extracted < total {
                        progress.update(PROGRESS_LABEL, self.bytes_extracted, total, false);
                    }
                }
                EntryKind::Other => debug!("skipping {}", info.name),
            }
        }

        if total > 0 {
            progress.update(PROGRESS_LABEL, total, total, true);
        }

        info!(
            "extracted {} entries ({} bytes) into {}",
            self.entries.len(),
            self.bytes_extracted,
            self.target_dir.display()
        );
        Ok(self.bytes_extracted)
    }

    /// Releases the archive handle. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.archive.take().is_some() {
            debug!("closed {}", self.archive_path.display());
        }
    }
}

impl Drop for ExtractionSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn list_entries(file: &mut File, compression: Compression) -> io::Result<Vec<ArchiveEntry>> {
    file.rewind()?;
    let mut archive = Archive::new(compression.decoder(&mut *file)?);
    archive
        .entries()?
        .map(|entry| ArchiveEntry::read(&entry?))
        .collect()
}

/// True when `path` would land outside the directory it is joined onto.
fn escapes_target(path: &Path) -> bool {
    path.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

fn unpack_entry<R: Read>(entry: &mut Entry<'_, R>, name: &str, target_dir: &Path) -> Result<()> {
    if escapes_target(Path::new(name)) {
        return Err(UpdaterError::extraction_error(
            name,
            "path escapes the target directory",
        ));
    }

    match entry.unpack_in(target_dir) {
        Ok(true) => Ok(()),
        Ok(false) => Err(UpdaterError::extraction_error(
            name,
            "path escapes the target directory",
        )),
        Err(e) => Err(UpdaterError::extraction_error(name, e.to_string())),
    }
}
