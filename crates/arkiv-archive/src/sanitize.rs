use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{ArchiveError, Result};

/// Result of sanitizing an archive entry name.
#[derive(Clone, Debug)]
pub struct SanitizedPath {
    pub original: String,
    pub relative: PathBuf,
    pub resolved: PathBuf,
}

/// Map an entry name onto a path below `base`, rejecting zip-slip.
///
/// The name is normalized lexically (`\` counts as a separator). After
/// normalization it must be relative and must not start with `..`.
pub fn sanitize_entry(name: &str, base: &Path) -> Result<SanitizedPath> {
    let unsafe_entry = |reason| ArchiveError::UnsafeEntry {
        entry: name.to_string(),
        reason,
    };

    if name.contains('\0') {
        return Err(unsafe_entry("contains a null byte"));
    }

    let unified = name.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(unsafe_entry("absolute path"));
    }

    let parts = normalize_components(&unified);
    match parts.first() {
        None => return Err(unsafe_entry("empty path")),
        Some(&"..") => return Err(unsafe_entry("escapes the output directory")),
        Some(_) => {}
    }

    let relative: PathBuf = parts.iter().collect();
    let resolved = base.join(&relative);
    if !resolved.starts_with(base) {
        return Err(unsafe_entry("escapes the output directory"));
    }

    Ok(SanitizedPath {
        original: name.to_string(),
        relative,
        resolved,
    })
}

/// Validate a symlink target relative to the link's location.
///
/// Absolute targets are rejected outright; relative ones must resolve to a
/// path below `base` without passing through a symlink already on disk.
pub fn sanitize_symlink_target(target: &Path, link: &Path, base: &Path) -> Result<PathBuf> {
    let escape = || ArchiveError::SymlinkEscape {
        target: target.to_path_buf(),
        link: link.to_path_buf(),
    };

    let unified = target.to_string_lossy().replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(escape());
    }

    let link_dir = link.parent().unwrap_or(base);
    let relative_dir = link_dir.strip_prefix(base).map_err(|_| escape())?;
    let joined = format!("{}/{}", relative_dir.to_string_lossy().replace('\\', "/"), unified);

    let parts = normalize_components(&joined);
    if parts.first() == Some(&"..") || first_linked_component(base, Path::new(&joined)).is_some() {
        return Err(escape());
    }

    Ok(base.join(parts.iter().collect::<PathBuf>()))
}

/// Fail when `relative`, walked below `base`, passes through a symlink that
/// is already on disk. Links written by earlier entries are invisible to
/// the lexical checks above.
pub fn reject_linked_path(relative: &Path, base: &Path) -> Result<()> {
    match first_linked_component(base, relative) {
        Some(_) => Err(ArchiveError::UnsafeEntry {
            entry: relative.to_string_lossy().into_owned(),
            reason: "passes through a symlink",
        }),
        None => Ok(()),
    }
}

fn first_linked_component(base: &Path, relative: &Path) -> Option<PathBuf> {
    let mut current = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => current.push(part),
            Component::ParentDir => {
                if current != base {
                    current.pop();
                }
                continue;
            }
            _ => continue,
        }
        if fs::symlink_metadata(&current).is_ok_and(|meta| meta.file_type().is_symlink()) {
            return Some(current);
        }
    }
    None
}

/// Lexical normalization that keeps leading `..` so callers can see it.
fn normalize_components(path: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&"..") | None => parts.push(".."),
                Some(_) => {
                    parts.pop();
                }
            },
            other => parts.push(other),
        }
    }
    parts
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
