use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use super::{BackendKind, Extractor};
use crate::error::{ArchiveError, Result};
use crate::format::{ArchiveFormat, detect_from_reader};
use crate::result::{ExtractedEntry, ExtractorResult};
use crate::sanitize::{reject_linked_path, sanitize_entry, sanitize_symlink_target};

const CHUNK_SIZE: usize = 64 * 1024;

#[cfg(feature = "zip")]
const S_IFMT: u32 = 0o170000;
#[cfg(feature = "zip")]
const S_IFLNK: u32 = 0o120000;

/// In-process extraction through the `zip` and `tar` crates.
pub struct LibraryExtractor {
    archive: PathBuf,
    outdir: PathBuf,
    interrupted: AtomicBool,
}

enum EntryKind<'a> {
    Directory,
    File(&'a mut dyn Read),
    Symlink(PathBuf),
    Skipped(&'static str),
}

struct PendingEntry<'a> {
    name: String,
    mode: Option<u32>,
    kind: EntryKind<'a>,
}

/// Writes pending entries below the output directory.
struct EntrySink<'s> {
    outdir: &'s Path,
    interrupted: &'s AtomicBool,
    on_entry: &'s mut dyn FnMut(ExtractedEntry),
}

impl LibraryExtractor {
    pub fn new(archive: &Path, outdir: &Path) -> Self {
        Self {
            archive: archive.to_path_buf(),
            outdir: outdir.to_path_buf(),
            interrupted: AtomicBool::new(false),
        }
    }

    fn run(&self, on_entry: &mut dyn FnMut(ExtractedEntry)) -> Result<()> {
        let mut file = File::open(&self.archive).map_err(|source| ArchiveError::Open {
            path: self.archive.clone(),
            source,
        })?;

        let by_name = ArchiveFormat::from_path(&self.archive).filter(|f| f.is_library_supported());
        let format = match by_name {
            Some(format) => format,
            None => detect_from_reader(&mut file)?
                .filter(|f| f.is_library_supported())
                .ok_or_else(|| ArchiveError::UnsupportedFormat(self.archive.clone()))?,
        };
        debug!(archive = %self.archive.display(), ?format, "extracting in process");

        let mut sink = EntrySink {
            outdir: &self.outdir,
            interrupted: &self.interrupted,
            on_entry,
        };
        match format {
            #[cfg(feature = "zip")]
            ArchiveFormat::Zip => extract_zip(file, &mut sink),
            #[cfg(feature = "tar")]
            ArchiveFormat::Tar(codec) => extract_tar(codec.wrap(file)?, &mut sink),
            _ => Err(ArchiveError::UnsupportedFormat(self.archive.clone())),
        }
    }
}

impl Extractor for LibraryExtractor {
    fn extract(&self, on_entry: &mut dyn FnMut(ExtractedEntry)) -> ExtractorResult {
        if self.interrupted.load(Ordering::SeqCst) {
            return ExtractorResult::interrupted();
        }
        match self.run(on_entry) {
            Ok(()) => ExtractorResult::success(),
            Err(ArchiveError::Interrupted) => ExtractorResult::interrupted(),
            Err(err) => ExtractorResult::failure(err.to_string()),
        }
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Library
    }
}

#[cfg(feature = "zip")]
fn extract_zip(file: File, sink: &mut EntrySink<'_>) -> Result<()> {
    let corrupted = |e: zip::result::ZipError| ArchiveError::Corrupted(e.to_string());
    let mut archive = zip::ZipArchive::new(file).map_err(corrupted)?;

    for index in 0..archive.len() {
        sink.check_interrupt()?;
        let mut entry = archive.by_index(index).map_err(corrupted)?;
        let name = entry.name().to_string();
        let mode = entry.unix_mode();

        let kind = if entry.is_dir() {
            EntryKind::Directory
        } else if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            let mut target = String::new();
            entry.read_to_string(&mut target)?;
            EntryKind::Symlink(PathBuf::from(target))
        } else {
            EntryKind::File(&mut entry)
        };
        sink.accept(PendingEntry { name, mode, kind })?;
    }
    Ok(())
}

#[cfg(feature = "tar")]
fn extract_tar(reader: Box<dyn Read>, sink: &mut EntrySink<'_>) -> Result<()> {
    let corrupted = |e: io::Error| ArchiveError::Corrupted(e.to_string());
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries().map_err(corrupted)? {
        sink.check_interrupt()?;
        let mut entry = entry.map_err(corrupted)?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let mode = entry.header().mode().ok();
        let entry_type = entry.header().entry_type();

        let kind = if entry_type.is_dir() {
            EntryKind::Directory
        } else if entry_type.is_symlink() {
            match entry.link_name() {
                Ok(Some(target)) => EntryKind::Symlink(target.into_owned()),
                _ => EntryKind::Skipped("symlink without a target"),
            }
        } else if entry_type.is_file() || entry_type.is_contiguous() {
            EntryKind::File(&mut entry)
        } else if entry_type.is_hard_link() {
            EntryKind::Skipped("hard link")
        } else {
            EntryKind::Skipped("special file")
        };
        sink.accept(PendingEntry { name, mode, kind })?;
    }
    Ok(())
}

impl EntrySink<'_> {
    fn check_interrupt(&self) -> Result<()> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Err(ArchiveError::Interrupted);
        }
        Ok(())
    }

    fn accept(&mut self, entry: PendingEntry<'_>) -> Result<()> {
        let sanitized = match sanitize_entry(&entry.name, self.outdir) {
            Ok(sanitized) => sanitized,
            Err(err) => {
                warn!(entry = %entry.name, %err, "skipping unsafe archive entry");
                return Ok(());
            }
        };
        // A link may replace an existing link; anything else must not be
        // written through one.
        let walked = match entry.kind {
            EntryKind::Symlink(_) => sanitized.relative.parent().unwrap_or(Path::new("")),
            _ => sanitized.relative.as_path(),
        };
        if let Err(err) = reject_linked_path(walked, self.outdir) {
            warn!(entry = %entry.name, %err, "skipping entry behind a symlink");
            return Ok(());
        }
        let dest = sanitized.resolved;

        match entry.kind {
            EntryKind::Directory => create_dir(&dest)?,
            EntryKind::File(reader) => {
                if let Some(parent) = dest.parent() {
                    create_dir(parent)?;
                }
                self.copy(reader, &dest)?;
                apply_mode(&dest, entry.mode)?;
            }
            EntryKind::Symlink(target) => {
                if let Err(err) = sanitize_symlink_target(&target, &dest, self.outdir) {
                    warn!(entry = %entry.name, %err, "skipping escaping symlink");
                    return Ok(());
                }
                if let Some(parent) = dest.parent() {
                    create_dir(parent)?;
                }
                if !create_symlink(&target, &dest)? {
                    return Ok(());
                }
            }
            EntryKind::Skipped(reason) => {
                debug!(entry = %entry.name, reason, "skipping archive entry");
                return Ok(());
            }
        }

        debug!(entry = %entry.name, "extracted");
        (self.on_entry)(ExtractedEntry {
            name: entry.name,
            path: dest,
        });
        Ok(())
    }

    fn copy(&self, reader: &mut dyn Read, dest: &Path) -> Result<()> {
        let write_err = |source| ArchiveError::Write {
            path: dest.to_path_buf(),
            source,
        };
        let mut out = File::create(dest).map_err(write_err)?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            self.check_interrupt()?;
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(ArchiveError::Corrupted(err.to_string())),
            };
            out.write_all(&buf[..n]).map_err(write_err)?;
        }
        out.flush().map_err(write_err)
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| ArchiveError::DirectoryCreationFailed {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;

        let perms = fs::Permissions::from_mode(mode & 0o777 | 0o600);
        fs::set_permissions(path, perms).map_err(|source| ArchiveError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

/// Returns whether a link was created.
#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> Result<bool> {
    let write_err = |source| ArchiveError::Write {
        path: link.to_path_buf(),
        source,
    };
    if fs::symlink_metadata(link).is_ok() {
        fs::remove_file(link).map_err(write_err)?;
    }
    std::os::unix::fs::symlink(target, link).map_err(write_err)?;
    Ok(true)
}

#[cfg(not(unix))]
fn create_symlink(target: &Path, link: &Path) -> Result<bool> {
    debug!(link = %link.display(), target = %target.display(), "symlinks unsupported here");
    Ok(false)
}
