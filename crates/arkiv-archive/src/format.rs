use std::io::{self, Read, Seek};
use std::path::Path;

use crate::error::{ArchiveError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar(TarCompress),
    SevenZip,
    Rar,
}

/// Compression codec for tar archives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TarCompress {
    None,
    Gzip,
    Xz,
    Zstd,
}

/// File-name suffixes, longest first so `.tar.gz` wins over `.gz`.
const SUFFIXES: &[(&str, ArchiveFormat)] = &[
    (".tar.gz", ArchiveFormat::Tar(TarCompress::Gzip)),
    (".tar.xz", ArchiveFormat::Tar(TarCompress::Xz)),
    (".tar.zst", ArchiveFormat::Tar(TarCompress::Zstd)),
    (".tgz", ArchiveFormat::Tar(TarCompress::Gzip)),
    (".txz", ArchiveFormat::Tar(TarCompress::Xz)),
    (".tzst", ArchiveFormat::Tar(TarCompress::Zstd)),
    (".tar", ArchiveFormat::Tar(TarCompress::None)),
    (".zip", ArchiveFormat::Zip),
    (".cbz", ArchiveFormat::Zip),
    (".jar", ArchiveFormat::Zip),
    (".7z", ArchiveFormat::SevenZip),
    (".cb7", ArchiveFormat::SevenZip),
    (".rar", ArchiveFormat::Rar),
    (".cbr", ArchiveFormat::Rar),
];

impl ArchiveFormat {
    /// Guess the format from the file name alone.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        SUFFIXES
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix))
            .map(|(_, format)| *format)
    }

    /// Whether the in-process library backend can read this format.
    pub fn is_library_supported(self) -> bool {
        match self {
            Self::Zip => cfg!(feature = "zip"),
            Self::Tar(TarCompress::None | TarCompress::Gzip) => cfg!(feature = "tar"),
            Self::Tar(TarCompress::Xz) => cfg!(feature = "xz"),
            Self::Tar(TarCompress::Zstd) => cfg!(feature = "zstd"),
            Self::SevenZip | Self::Rar => false,
        }
    }
}

impl TarCompress {
    /// Wrap `reader` in the decoder for this codec.
    #[cfg(feature = "tar")]
    pub fn wrap<R: Read + 'static>(self, reader: R) -> Result<Box<dyn Read>> {
        match self {
            Self::None => Ok(Box::new(reader)),
            Self::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
            #[cfg(feature = "xz")]
            Self::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
            #[cfg(feature = "zstd")]
            Self::Zstd => {
                let decoder = zstd::stream::Decoder::new(reader)
                    .map_err(|e| ArchiveError::Corrupted(e.to_string()))?;
                Ok(Box::new(decoder))
            }
            #[allow(unreachable_patterns)]
            other => Err(ArchiveError::Corrupted(format!("{other:?} tar support not compiled in"))),
        }
    }
}

pub fn detect_format(data: &[u8]) -> Option<ArchiveFormat> {
    match data {
        [0x50, 0x4B, 0x03, 0x04, ..] | [0x50, 0x4B, 0x05, 0x06, ..] => Some(ArchiveFormat::Zip),
        [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C, ..] => Some(ArchiveFormat::SevenZip),
        [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, ..] => Some(ArchiveFormat::Rar),
        [0x1F, 0x8B, ..] => Some(ArchiveFormat::Tar(TarCompress::Gzip)),
        [0x28, 0xB5, 0x2F, 0xFD, ..] => Some(ArchiveFormat::Tar(TarCompress::Zstd)),
        [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00, ..] => Some(ArchiveFormat::Tar(TarCompress::Xz)),
        _ if is_tar_header(data) => Some(ArchiveFormat::Tar(TarCompress::None)),
        _ => None,
    }
}

fn is_tar_header(data: &[u8]) -> bool {
    data.len() >= 263 && &data[257..262] == b"ustar"
}

/// Sniff the format from the first block of `reader`, then rewind it.
pub fn detect_from_reader<R: Read + Seek>(reader: &mut R) -> io::Result<Option<ArchiveFormat>> {
    let mut header = [0u8; 512];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    reader.rewind()?;
    Ok(detect_format(&header[..filled]))
}
